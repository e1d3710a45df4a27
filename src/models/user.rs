use std::fmt;

use serde::Deserialize;

use crate::models::session::{Role, RoleId, UserId};

/// An identity as served by the remote identity service.
///
/// The list endpoint returns a subset of these fields (usually without
/// `role`); the by-id endpoint returns the full record.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteIdentity {
    /// The unique identifier for the identity.
    pub id: UserId,
    /// The phone number, as entered on the server.
    #[serde(default)]
    pub phone: String,
    /// Plaintext password or an Argon2 PHC string.
    #[serde(default, alias = "passwordHash")]
    pub password: Option<String>,
    /// The display name.
    #[serde(default, alias = "displayName")]
    pub name: String,
    /// The scalar role id.
    #[serde(default)]
    pub role_id: Option<RoleId>,
    /// The role object, only on the by-id endpoint.
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl RemoteIdentity {
    /// The role id this identity should be stored with.
    ///
    /// When both are present the role object wins, so the persisted pair
    /// never disagrees.
    pub fn effective_role_id(&self) -> Option<RoleId> {
        match (&self.role, self.role_id) {
            (Some(role), Some(scalar)) if role.id != scalar => {
                tracing::warn!(
                    "⚠️  Remote identity {} has roleId {} but role.id {}, using role.id",
                    self.id,
                    scalar,
                    role.id
                );
                Some(role.id)
            }
            (Some(role), _) => Some(role.id),
            (None, scalar) => scalar,
        }
    }
}

impl fmt::Debug for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteIdentity")
            .field("id", &self.id)
            .field("phone", &self.phone)
            .field("name", &self.name)
            .field("role_id", &self.role_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
