use argon2::{
    password_hash::{PasswordHash, PasswordVerifier},
    Argon2,
};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{AppError, Result};
use crate::models::user::RemoteIdentity;
use crate::validation::auth::Credentials;

/// Prefix of an Argon2 PHC string.
const ARGON2_PREFIX: &str = "$argon2";

/// Strips every whitespace character from a phone number.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Verifies a password against the value stored on the remote identity.
///
/// # Arguments
///
/// * `password` - The password to verify.
/// * `stored` - Either an Argon2 PHC string or a plaintext password.
///
/// # Returns
///
/// A `Result` containing `true` if the password is valid, `false` otherwise.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let mut password_bytes = password.as_bytes().to_vec();

    let result = if stored.starts_with(ARGON2_PREFIX) {
        let parsed_hash = PasswordHash::new(stored)
            .map_err(|e| AppError::Validation(format!("Hash parse error: {}", e)))?;
        Argon2::default()
            .verify_password(&password_bytes, &parsed_hash)
            .is_ok()
    } else {
        password_bytes.ct_eq(stored.as_bytes()).into()
    };

    password_bytes.zeroize();
    tracing::debug!("Password verification completed");
    Ok(result)
}

/// Finds the identity matching the credentials in a list fetched from the remote.
///
/// # Arguments
///
/// * `identities` - The list view of all identities.
/// * `credentials` - Normalized, validated credentials.
///
/// # Returns
///
/// The matching identity, `UserNotFound` when no phone matches, or
/// `WrongPassword` when a phone matches but no password does.
pub fn match_credentials<'a>(
    identities: &'a [RemoteIdentity],
    credentials: &Credentials,
) -> Result<&'a RemoteIdentity> {
    let mut phone_matched = false;

    for identity in identities
        .iter()
        .filter(|i| normalize_phone(&i.phone) == credentials.phone)
    {
        phone_matched = true;
        let Some(stored) = identity.password.as_deref() else {
            continue;
        };
        if verify_password(&credentials.password, stored)? {
            return Ok(identity);
        }
    }

    if phone_matched {
        Err(AppError::WrongPassword)
    } else {
        Err(AppError::UserNotFound)
    }
}
