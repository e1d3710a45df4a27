use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, Result};
use crate::models::user::RemoteIdentity;

/// Avatar value meaning "use the default image for this role".
pub const DEFAULT_AVATAR: &str = "default";

/// Stable identifier of a remote identity.
///
/// The remote service hands out either numbers or strings; both are kept
/// as their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId(value.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => UserId(n.to_string()),
            Raw::Text(s) => UserId(s),
        })
    }
}

/// Access level of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub i64);

impl RoleId {
    /// Back-office administrator.
    pub const ADMIN: RoleId = RoleId(1);
    /// Field sales agent.
    pub const SALES_AGENT: RoleId = RoleId(2);
    /// Customer (farm or retailer).
    pub const CUSTOMER: RoleId = RoleId(3);
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoleId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(RoleId)
    }
}

/// Denormalized role object carried alongside `role_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Must equal the owning record's `role_id`.
    pub id: RoleId,
    /// The role's display name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// The snapshot of the identity signed in on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Immutable once assigned.
    pub user_id: UserId,
    /// The user's display name.
    pub display_name: String,
    /// Normalized phone number.
    pub phone: String,
    /// The user's access level.
    pub role_id: RoleId,
    /// Denormalized role, if the remote record carried one.
    #[serde(default)]
    pub role: Option<Role>,
    /// Avatar URI or [`DEFAULT_AVATAR`].
    #[serde(default)]
    pub avatar: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Delivery or office address.
    #[serde(default)]
    pub address: Option<String>,
    /// Bank name for commission payouts.
    #[serde(default)]
    pub bank_name: Option<String>,
    /// Bank account number for commission payouts.
    #[serde(default)]
    pub bank_account: Option<String>,
    /// Epoch millis of the last successful remote reconciliation.
    pub last_fetched_at: i64,
}

impl SessionRecord {
    /// Builds a record from a full remote identity fetched at `fetched_at`.
    pub fn from_remote(remote: &RemoteIdentity, fetched_at: i64) -> Result<Self> {
        let role_id = remote.effective_role_id().ok_or_else(|| {
            AppError::Validation(format!("Remote identity {} carries no role", remote.id))
        })?;

        Ok(Self {
            user_id: remote.id.clone(),
            display_name: remote.name.clone(),
            phone: crate::services::auth::normalize_phone(&remote.phone),
            role_id,
            role: remote.role.clone(),
            avatar: remote.avatar.clone(),
            email: remote.email.clone(),
            address: remote.address.clone(),
            bank_name: None,
            bank_account: None,
            last_fetched_at: fetched_at,
        })
    }

    /// Checks that `role.id` agrees with `role_id`.
    pub fn check_role_agreement(&self) -> Result<()> {
        match &self.role {
            Some(role) if role.id != self.role_id => Err(AppError::Validation(format!(
                "role.id {} disagrees with roleId {}",
                role.id, self.role_id
            ))),
            _ => Ok(()),
        }
    }

    /// Applies the role fields of a reconciliation fetch.
    ///
    /// Only `role_id`/`role` and the fetch watermark move; every other
    /// field keeps its local value so profile edits survive.
    pub fn apply_reconciliation(&mut self, remote: &RemoteIdentity, fetched_at: i64) -> bool {
        let before = self.role_id;
        if let Some(role_id) = remote.effective_role_id() {
            self.role_id = role_id;
            self.role = remote.role.clone();
        }
        self.last_fetched_at = self.last_fetched_at.max(fetched_at);
        before != self.role_id
    }

    /// Whether the record is at least `ttl_ms` old at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.last_fetched_at >= ttl_ms
    }

    /// Returns a copy with the cosmetic avatar substitution applied.
    pub fn with_default_avatar(mut self) -> Self {
        let empty = self.avatar.as_deref().is_none_or(|a| a.trim().is_empty());
        if self.role_id == RoleId::CUSTOMER && empty {
            self.avatar = Some(DEFAULT_AVATAR.to_string());
        }
        self
    }
}
