use garde::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;
use crate::services::auth::normalize_phone;

/// Login input after phone normalization.
#[derive(Validate, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Phone number with all whitespace removed.
    #[garde(custom(phone_format))]
    pub phone: String,
    /// The password as typed.
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

impl Credentials {
    /// Normalizes and validates raw login input.
    ///
    /// # Arguments
    ///
    /// * `phone` - The phone number as typed, possibly with spaces.
    /// * `password` - The password as typed.
    ///
    /// # Returns
    ///
    /// A `Result` containing the validated `Credentials`.
    pub fn parse(phone: &str, password: &str) -> Result<Self> {
        let credentials = Self {
            phone: normalize_phone(phone),
            password: password.to_string(),
        };
        credentials.validate()?;
        Ok(credentials)
    }
}

/// Validates a normalized phone number: optional leading `+`, then 6 to 20 digits.
pub fn phone_format(value: &str, _ctx: &()) -> garde::Result {
    let digits = value.strip_prefix('+').unwrap_or(value);

    if digits.len() < 6 || digits.len() > 20 {
        return Err(garde::Error::new("phone number must have 6 to 20 digits"));
    }

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(garde::Error::new("phone number can only contain digits"));
    }

    Ok(())
}
