use garde::Validate;

use crate::error::Result;
use crate::models::session::SessionRecord;
use crate::services::auth::normalize_phone;
use crate::validation::auth::phone_format;

/// A partial edit of the signed-in user's own profile.
///
/// Role fields are deliberately absent: the role only ever comes from the
/// remote identity service.
#[derive(Debug, Clone, Default, Validate)]
pub struct ProfileUpdate {
    #[garde(length(min = 1, max = 120))]
    pub display_name: Option<String>,
    #[garde(skip)]
    pub phone: Option<String>,
    #[garde(email)]
    pub email: Option<String>,
    #[garde(length(max = 255))]
    pub address: Option<String>,
    #[garde(length(max = 2048))]
    pub avatar: Option<String>,
    #[garde(length(min = 1, max = 120))]
    pub bank_name: Option<String>,
    #[garde(length(min = 4, max = 34))]
    pub bank_account: Option<String>,
}

impl ProfileUpdate {
    /// Validates the update and merges every `Some` field into `record`.
    ///
    /// # Arguments
    ///
    /// * `record` - The record to update in place.
    ///
    /// # Returns
    ///
    /// A `Result<()>`; `record` is untouched on error.
    pub fn apply_to(&self, record: &mut SessionRecord) -> Result<()> {
        self.validate()?;

        let phone = self.phone.as_deref().map(normalize_phone);
        if let Some(ref phone) = phone {
            phone_format(phone, &())
                .map_err(|e| crate::error::AppError::Validation(format!("phone: {}", e)))?;
        }

        if let Some(ref name) = self.display_name {
            record.display_name = name.trim().to_string();
        }
        if let Some(phone) = phone {
            record.phone = phone;
        }
        if self.email.is_some() {
            record.email = self.email.clone();
        }
        if self.address.is_some() {
            record.address = self.address.clone();
        }
        if self.avatar.is_some() {
            record.avatar = self.avatar.clone();
        }
        if self.bank_name.is_some() {
            record.bank_name = self.bank_name.clone();
        }
        if self.bank_account.is_some() {
            record.bank_account = self.bank_account.clone();
        }

        Ok(())
    }
}
