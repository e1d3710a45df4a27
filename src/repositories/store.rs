use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::Result;

/// Persisted key layout.
pub mod keys {
    /// Prefix shared by every identity key.
    pub const IDENTITY_PREFIX: &str = "identity.";
    /// Serialized `SessionRecord`.
    pub const FULL: &str = "identity.full";
    /// Scalar role id, written first.
    pub const ROLE_ID: &str = "identity.roleId";
    /// Serialized `Role` object.
    pub const ROLE: &str = "identity.role";
    pub const USER_ID: &str = "identity.userId";
    pub const NAME: &str = "identity.name";
    pub const PHONE: &str = "identity.phone";
    pub const AVATAR: &str = "identity.avatar";
    /// Epoch millis of the last successful reconciliation.
    pub const LAST_RECONCILE_AT: &str = "identity.lastReconcileAt";
    /// Last-used phone number; survives sign-out.
    pub const REMEMBERED_PHONE: &str = "remembered.phone";
}

/// A durable key-value store that survives process restarts.
///
/// Every operation may fail with `AppError::StorageFailure`; implementations
/// must not swallow errors.
pub trait PersistentStore: Send + Sync {
    /// Reads a value.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Writes a value.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Removes a value; removing a missing key is not an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Removes several values at once.
    fn remove_many<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<()>>;

    /// Lists every key currently stored.
    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// An in-process store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every entry, ordered by key.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }
}

impl PersistentStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries.write().await.remove(key);
            Ok(())
        })
    }

    fn remove_many<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            for key in keys {
                entries.remove(key);
            }
            Ok(())
        })
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.entries.read().await.keys().cloned().collect()) })
    }
}
