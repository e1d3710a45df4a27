use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::clock::Clock;
use crate::config::{Config, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_STALE_TTL_SECS};
use crate::error::{AppError, Result};
use crate::models::session::{RoleId, SessionRecord, UserId};
use crate::repositories::remote::RemoteIdentityService;
use crate::repositories::store::{keys, PersistentStore};
use crate::services::auth;
use crate::validation::auth::Credentials;
use crate::validation::profile::ProfileUpdate;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How often `get_current` re-reads when an invalidation races the read.
const READ_ATTEMPTS: usize = 3;

/// Tuning knobs of the session cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How old a record may be before `get_current` reconciles it.
    pub stale_ttl: Duration,
    /// Upper bound on every remote call.
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_ttl: Duration::from_secs(DEFAULT_STALE_TTL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            stale_ttl: config.stale_ttl,
            fetch_timeout: config.http_timeout,
        }
    }
}

/// Something that happened to the cached identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A record was fully written.
    Stored { user_id: UserId, role_id: RoleId },
    /// A background reconciliation committed.
    Reconciled {
        user_id: UserId,
        role_id: RoleId,
        role_changed: bool,
    },
    /// A background reconciliation ended without writing anything.
    ReconcileAbandoned { user_id: UserId },
    /// Every identity key was removed.
    Cleared,
}

/// Persisted and in-memory copies of the role, as read at one instant.
#[derive(Debug, Clone, Default)]
pub struct RoleMirrors {
    /// Role of the in-process copy.
    pub in_memory: Option<RoleId>,
    /// Raw `identity.full` value.
    pub full_record: Option<String>,
    /// Raw `identity.roleId` value.
    pub scalar_role_id: Option<String>,
}

struct Inner {
    store: Arc<dyn PersistentStore>,
    remote: Arc<dyn RemoteIdentityService>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    current: RwLock<Option<SessionRecord>>,
    /// Bumped by every invalidation; deferred writes compare against it.
    epoch: AtomicU64,
    reconciling: AtomicBool,
    last_attempt_ms: AtomicI64,
    /// Serializes deferred commits against invalidation.
    commit: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// Clears the single-flight flag when a reconciliation task ends.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.reconciling.store(false, Ordering::SeqCst);
    }
}

/// The device's view of the signed-in identity.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<Inner>,
}

impl SessionCache {
    /// Creates a new `SessionCache`.
    ///
    /// # Arguments
    ///
    /// * `store` - The durable store holding the identity keys.
    /// * `remote` - The remote source of truth.
    /// * `clock` - Time source for staleness decisions.
    /// * `settings` - TTL and timeout.
    pub fn new(
        store: Arc<dyn PersistentStore>,
        remote: Arc<dyn RemoteIdentityService>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                clock,
                settings,
                current: RwLock::new(None),
                epoch: AtomicU64::new(0),
                reconciling: AtomicBool::new(false),
                last_attempt_ms: AtomicI64::new(i64::MIN),
                commit: Mutex::new(()),
                events,
            }),
        }
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Signs in with a phone number and password.
    ///
    /// # Arguments
    ///
    /// * `phone` - The phone number as typed; whitespace is ignored.
    /// * `password` - The password as typed.
    /// * `remember_phone` - Keep the phone number for the next login screen.
    ///
    /// # Returns
    ///
    /// A `Result` containing the stored `SessionRecord`, `UserNotFound` or
    /// `WrongPassword` on a credential mismatch.
    pub async fn login(
        &self,
        phone: &str,
        password: &str,
        remember_phone: bool,
    ) -> Result<SessionRecord> {
        let credentials = Credentials::parse(phone, password)?;
        tracing::debug!("🔐 Authenticating phone: ***{}", phone_tail(&credentials.phone));

        let identities = self.remote_call(self.inner.remote.list_identities()).await?;
        let matched = auth::match_credentials(&identities, &credentials)?;
        let user_id = matched.id.clone();

        let detail = self.remote_call(self.inner.remote.fetch_identity(&user_id)).await?;
        if detail.id != user_id {
            return Err(AppError::Validation(format!(
                "Asked for identity {} but received {}",
                user_id, detail.id
            )));
        }

        let mut record = SessionRecord::from_remote(&detail, self.inner.clock.now_ms())?;
        if record.phone.is_empty() {
            record.phone = credentials.phone.clone();
        }

        {
            let _guard = self.inner.commit.lock().await;
            self.invalidate_locked().await?;
            self.store_locked(record.clone()).await?;
            self.inner
                .store
                .set(keys::LAST_RECONCILE_AT, &record.last_fetched_at.to_string())
                .await?;
        }

        // The identity is committed; a failed convenience key must not undo the login.
        let remembered = if remember_phone {
            self.inner
                .store
                .set(keys::REMEMBERED_PHONE, &credentials.phone)
                .await
        } else {
            self.inner.store.remove(keys::REMEMBERED_PHONE).await
        };
        if let Err(e) = remembered {
            tracing::warn!("⚠️  Could not update {}: {}", keys::REMEMBERED_PHONE, e);
        }

        tracing::info!("✅ User signed in: {} (role {})", record.user_id, record.role_id);
        Ok(record)
    }

    /// Returns the signed-in identity, or `None` when signed out.
    ///
    /// Never waits on the network. A stale record is still returned; the
    /// reconciliation it triggers only affects later reads. A read that
    /// overlaps an invalidation is retried, so an identity cleared mid-read
    /// is never reloaded into memory.
    pub async fn get_current(&self) -> Option<SessionRecord> {
        for _ in 0..READ_ATTEMPTS {
            let epoch = self.inner.epoch.load(Ordering::SeqCst);
            let persisted = self.read_persisted().await;

            let record = {
                let mut current = self.inner.current.write().await;
                if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                    tracing::debug!("Identity invalidated during read, reading again");
                    continue;
                }
                match persisted {
                    Ok(Some(record)) => {
                        if current.is_none() {
                            *current = Some(record.clone());
                        }
                        record
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::warn!(
                            "⚠️  Could not read persisted identity, using in-memory copy: {}",
                            e
                        );
                        current.clone()?
                    }
                }
            };

            self.maybe_reconcile(&record, epoch);
            return Some(record.with_default_avatar());
        }

        tracing::warn!("⚠️  Identity kept changing while being read, reporting signed out");
        None
    }

    /// Writes a record to the store in the fixed key order.
    ///
    /// A record for a different user than the active one starts a new
    /// identity, so every identity key is cleared first.
    pub async fn store(&self, record: SessionRecord) -> Result<()> {
        let _guard = self.inner.commit.lock().await;

        let active = self.active_user_id().await?;
        if active.is_some_and(|id| id != record.user_id) {
            self.invalidate_locked().await?;
        }

        self.store_locked(record).await
    }

    /// Removes every identity key except the remembered phone number.
    pub async fn invalidate_all(&self) -> Result<()> {
        let _guard = self.inner.commit.lock().await;
        self.invalidate_locked().await
    }

    /// Signs out, optionally keeping the remembered phone number.
    pub async fn sign_out(&self, keep_remembered_phone: bool) -> Result<()> {
        self.invalidate_all().await?;
        if !keep_remembered_phone {
            self.inner.store.remove(keys::REMEMBERED_PHONE).await?;
        }
        tracing::info!("👋 Signed out");
        Ok(())
    }

    /// Merges a profile edit into the current record and stores it.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated record, or `NoActiveSession`.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<SessionRecord> {
        let _guard = self.inner.commit.lock().await;

        let in_memory = self.inner.current.read().await.clone();
        let mut record = match in_memory {
            Some(record) => record,
            None => self.read_persisted().await?.ok_or(AppError::NoActiveSession)?,
        };

        update.apply_to(&mut record)?;
        self.store_locked(record.clone()).await?;

        tracing::info!("✅ Profile updated for user: {}", record.user_id);
        Ok(record)
    }

    /// Returns the remembered phone number, if any.
    pub async fn remembered_phone(&self) -> Result<Option<String>> {
        self.inner.store.get(keys::REMEMBERED_PHONE).await
    }

    /// Returns the role of the in-process copy.
    pub async fn in_memory_role(&self) -> Option<RoleId> {
        self.inner.current.read().await.as_ref().map(|r| r.role_id)
    }

    /// Reads every copy of the role; storage errors read as absent.
    pub async fn role_mirrors(&self) -> RoleMirrors {
        let full_record = self
            .inner
            .store
            .get(keys::FULL)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️  Could not read {}: {}", keys::FULL, e);
                None
            });
        let scalar_role_id = self
            .inner
            .store
            .get(keys::ROLE_ID)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️  Could not read {}: {}", keys::ROLE_ID, e);
                None
            });

        RoleMirrors {
            in_memory: self.in_memory_role().await,
            full_record,
            scalar_role_id,
        }
    }

    async fn remote_call<T>(&self, call: BoxFuture<'_, Result<T>>) -> Result<T> {
        tokio::time::timeout(self.inner.settings.fetch_timeout, call).await?
    }

    async fn read_persisted(&self) -> Result<Option<SessionRecord>> {
        match self.inner.store.get(keys::FULL).await? {
            Some(raw) => Ok(Some(sonic_rs::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn active_user_id(&self) -> Result<Option<UserId>> {
        if let Some(record) = self.inner.current.read().await.as_ref() {
            return Ok(Some(record.user_id.clone()));
        }
        Ok(self.inner.store.get(keys::USER_ID).await?.map(UserId))
    }

    /// Must be called with `commit` held.
    async fn store_locked(&self, mut record: SessionRecord) -> Result<()> {
        record.check_role_agreement()?;

        let in_memory = self.inner.current.read().await.clone();
        let previous = match in_memory {
            Some(record) => Some(record),
            None => self.read_persisted().await.unwrap_or(None),
        };
        if let Some(previous) = previous.filter(|p| p.user_id == record.user_id) {
            record.last_fetched_at = record.last_fetched_at.max(previous.last_fetched_at);
        }

        let full = sonic_rs::to_string(&record)?;
        let role = record.role.as_ref().map(sonic_rs::to_string).transpose()?;
        let store = &self.inner.store;

        // roleId first: a torn read sees at worst a roleId ahead of the full record.
        store.set(keys::ROLE_ID, &record.role_id.to_string()).await?;
        match role {
            Some(ref role) => store.set(keys::ROLE, role).await?,
            None => store.remove(keys::ROLE).await?,
        }
        store.set(keys::FULL, &full).await?;
        store.set(keys::PHONE, &record.phone).await?;
        store.set(keys::NAME, &record.display_name).await?;
        store.set(keys::USER_ID, record.user_id.as_str()).await?;
        match record.avatar {
            Some(ref avatar) => store.set(keys::AVATAR, avatar).await?,
            None => store.remove(keys::AVATAR).await?,
        }

        let event = SessionEvent::Stored {
            user_id: record.user_id.clone(),
            role_id: record.role_id,
        };
        *self.inner.current.write().await = Some(record);
        let _ = self.inner.events.send(event);
        Ok(())
    }

    /// Must be called with `commit` held.
    async fn invalidate_locked(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.last_attempt_ms.store(i64::MIN, Ordering::SeqCst);
        *self.inner.current.write().await = None;

        let doomed: Vec<String> = self
            .inner
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(keys::IDENTITY_PREFIX))
            .collect();
        self.inner.store.remove_many(&doomed).await?;

        tracing::debug!("🧹 Cleared {} identity keys", doomed.len());
        let _ = self.inner.events.send(SessionEvent::Cleared);
        Ok(())
    }

    /// Starts a background reconciliation if the record is stale.
    ///
    /// At most one runs at a time, and a new attempt waits a full TTL after
    /// the previous one even if that one failed.
    ///
    /// `epoch` is the session epoch observed before `record` was read.
    fn maybe_reconcile(&self, record: &SessionRecord, epoch: u64) -> bool {
        let now = self.inner.clock.now_ms();
        let ttl_ms = self.inner.settings.stale_ttl.as_millis() as i64;

        if record.user_id.as_str().is_empty() || !record.is_stale(now, ttl_ms) {
            return false;
        }

        let last_attempt = self.inner.last_attempt_ms.load(Ordering::SeqCst);
        if last_attempt != i64::MIN && now - last_attempt < ttl_ms {
            return false;
        }

        if self
            .inner
            .reconciling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Reconciliation already in flight");
            return false;
        }
        self.inner.last_attempt_ms.store(now, Ordering::SeqCst);

        let flight = InFlight(self.inner.clone());
        let cache = self.clone();
        let user_id = record.user_id.clone();

        tokio::spawn(async move {
            let _flight = flight;
            cache.reconcile(user_id, epoch).await;
        });
        true
    }

    async fn reconcile(&self, user_id: UserId, epoch: u64) {
        tracing::debug!("🔄 Reconciling identity {}", user_id);

        if let Err(e) = self.try_reconcile(&user_id, epoch).await {
            tracing::warn!(
                "⚠️  Reconciliation for {} failed, serving cached identity: {}",
                user_id,
                e
            );
            let _ = self
                .inner
                .events
                .send(SessionEvent::ReconcileAbandoned { user_id });
        }
    }

    async fn try_reconcile(&self, user_id: &UserId, epoch: u64) -> Result<()> {
        let remote = self.remote_call(self.inner.remote.fetch_identity(user_id)).await?;
        let fetched_at = self.inner.clock.now_ms();

        let _guard = self.inner.commit.lock().await;

        let active = self.active_user_id().await?;
        if self.inner.epoch.load(Ordering::SeqCst) != epoch
            || active.as_ref() != Some(user_id)
            || remote.id != *user_id
        {
            tracing::info!("Discarding reconciliation for {}: no longer the active identity", user_id);
            let _ = self.inner.events.send(SessionEvent::ReconcileAbandoned {
                user_id: user_id.clone(),
            });
            return Ok(());
        }

        let in_memory = self.inner.current.read().await.clone();
        let mut record = match in_memory {
            Some(record) => record,
            None => self.read_persisted().await?.ok_or(AppError::NoActiveSession)?,
        };

        let previous_role = record.role_id;
        let role_changed = record.apply_reconciliation(&remote, fetched_at);
        let role_id = record.role_id;
        let last_fetched_at = record.last_fetched_at;

        self.store_locked(record).await?;
        self.inner
            .store
            .set(keys::LAST_RECONCILE_AT, &last_fetched_at.to_string())
            .await?;

        if role_changed {
            tracing::info!("🔁 Role of {} changed: {} -> {}", user_id, previous_role, role_id);
        } else {
            tracing::debug!("✅ Identity {} reconciled, role unchanged", user_id);
        }

        let _ = self.inner.events.send(SessionEvent::Reconciled {
            user_id: user_id.clone(),
            role_id,
            role_changed,
        });
        Ok(())
    }
}

fn phone_tail(phone: &str) -> &str {
    let start = phone.len().saturating_sub(3);
    phone.get(start..).unwrap_or("")
}
