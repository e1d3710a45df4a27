#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, Notify};

use feedline_session::{
    AppError, CacheSettings, ManualClock, MemoryStore, PersistentStore, RemoteIdentity,
    RemoteIdentityService, Result, Role, RoleId, SessionCache, SessionEvent, UserId,
};

/// Arbitrary fixed start time: 2026-01-01T00:00:00Z.
pub const T0: i64 = 1_767_225_600_000;
pub const TTL: Duration = Duration::from_secs(180);

// ─── Remote ─────────────────────────────────────────────────────

/// In-test remote identity service with call counters and a fetch gate.
#[derive(Default)]
pub struct ScriptedRemote {
    identities: Mutex<BTreeMap<String, RemoteIdentity>>,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub offline: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    pub fetch_started: Notify,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, identity: RemoteIdentity) -> Self {
        self.put(identity);
        self
    }

    pub fn put(&self, identity: RemoteIdentity) {
        self.identities
            .lock()
            .unwrap()
            .insert(identity.id.as_str().to_string(), identity);
    }

    pub fn set_role(&self, id: &str, role_id: RoleId) {
        let mut identities = self.identities.lock().unwrap();
        let identity = identities.get_mut(id).expect("unknown identity");
        identity.role_id = Some(role_id);
        identity.role = Some(role(role_id));
    }

    /// Makes every following fetch wait until the returned handle is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl RemoteIdentityService for ScriptedRemote {
    fn list_identities(&self) -> BoxFuture<'_, Result<Vec<RemoteIdentity>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(AppError::NetworkUnavailable("offline".to_string()));
            }
            let list = self
                .identities
                .lock()
                .unwrap()
                .values()
                .cloned()
                .map(|mut identity| {
                    identity.role = None;
                    identity
                })
                .collect();
            Ok(list)
        })
    }

    fn fetch_identity<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, Result<RemoteIdentity>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                self.fetch_started.notify_one();
                gate.notified().await;
            }

            if self.offline.load(Ordering::SeqCst) {
                return Err(AppError::NetworkUnavailable("offline".to_string()));
            }
            let found = self.identities.lock().unwrap().get(id.as_str()).cloned();
            found.ok_or_else(|| AppError::NetworkUnavailable(format!("identity {} not found", id)))
        })
    }
}

// ─── Store ──────────────────────────────────────────────────────

/// A `MemoryStore` whose reads and writes can be switched to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_reads: Arc<AtomicBool>,
    pub fail_writes: Arc<AtomicBool>,
    /// Writes to this one key fail; everything else goes through.
    failing_key: Arc<Mutex<Option<String>>>,
    held_read: Arc<Mutex<Option<(String, Arc<Notify>)>>>,
    pub read_started: Arc<Notify>,
}

impl FlakyStore {
    /// Makes every write to `key` fail.
    pub fn fail_writes_to(&self, key: &str) {
        *self.failing_key.lock().unwrap() = Some(key.to_string());
    }

    /// Makes the next read of `key` hand back its value only once the
    /// returned handle is notified.
    pub fn hold_next_read(&self, key: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held_read.lock().unwrap() = Some((key.to_string(), gate.clone()));
        gate
    }

    fn read_guard(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::StorageFailure("read failed".to_string()));
        }
        Ok(())
    }

    fn write_guard(&self, key: &str) -> Result<()> {
        let key_fails = self.failing_key.lock().unwrap().as_deref() == Some(key);
        if key_fails || self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::StorageFailure("write failed".to_string()));
        }
        Ok(())
    }

    fn take_held_read(&self, key: &str) -> Option<Arc<Notify>> {
        let mut held = self.held_read.lock().unwrap();
        match held.as_ref() {
            Some((held_key, _)) if held_key == key => held.take().map(|(_, gate)| gate),
            _ => None,
        }
    }
}

impl PersistentStore for FlakyStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            self.read_guard()?;
            let value = self.inner.get(key).await;
            if let Some(gate) = self.take_held_read(key) {
                self.read_started.notify_one();
                gate.notified().await;
            }
            value
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.write_guard(key)?;
            self.inner.set(key, value).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.write_guard(key)?;
            self.inner.remove(key).await
        })
    }

    fn remove_many<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for key in keys {
                self.write_guard(key)?;
            }
            self.inner.remove_many(keys).await
        })
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            self.read_guard()?;
            self.inner.list_keys().await
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────

pub fn role(role_id: RoleId) -> Role {
    let name = match role_id {
        RoleId::ADMIN => "admin",
        RoleId::SALES_AGENT => "sales_agent",
        RoleId::CUSTOMER => "customer",
        _ => "other",
    };
    Role {
        id: role_id,
        name: name.to_string(),
        description: None,
    }
}

pub fn identity(id: i64, phone: &str, password: &str, role_id: RoleId) -> RemoteIdentity {
    RemoteIdentity {
        id: UserId::from(id),
        phone: phone.to_string(),
        password: Some(password.to_string()),
        name: format!("User {}", id),
        role_id: Some(role_id),
        role: Some(role(role_id)),
        avatar: None,
        email: None,
        address: None,
    }
}

/// The agent from the end-to-end scenario.
pub fn agent() -> RemoteIdentity {
    identity(7, "0987654321", "p1", RoleId::SALES_AGENT)
}

pub struct Harness {
    pub store: FlakyStore,
    pub remote: Arc<ScriptedRemote>,
    pub clock: Arc<ManualClock>,
    pub cache: SessionCache,
}

impl Harness {
    pub fn new(remote: ScriptedRemote) -> Self {
        Self::with_store(FlakyStore::default(), remote)
    }

    pub fn with_store(store: FlakyStore, remote: ScriptedRemote) -> Self {
        let remote = Arc::new(remote);
        let clock = Arc::new(ManualClock::new(T0));
        let cache = build_cache(&store, &remote, &clock, Duration::from_secs(5));
        Self {
            store,
            remote,
            clock,
            cache,
        }
    }

    /// A cache with no in-memory state over the same store, as after a restart.
    pub fn restart(&self) -> SessionCache {
        build_cache(&self.store, &self.remote, &self.clock, Duration::from_secs(5))
    }

    pub async fn identity_keys(&self) -> Vec<String> {
        self.store
            .inner
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.starts_with("identity."))
            .collect()
    }
}

pub fn build_cache(
    store: &FlakyStore,
    remote: &Arc<ScriptedRemote>,
    clock: &Arc<ManualClock>,
    fetch_timeout: Duration,
) -> SessionCache {
    SessionCache::new(
        Arc::new(store.clone()),
        remote.clone(),
        clock.clone(),
        CacheSettings {
            stale_ttl: TTL,
            fetch_timeout,
        },
    )
}

/// Waits for the background reconciliation to end, skipping other events.
pub async fn next_reconcile_outcome(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await.expect("session events closed") {
                event @ SessionEvent::Reconciled { .. } => return event,
                event @ SessionEvent::ReconcileAbandoned { .. } => return event,
                _ => continue,
            }
        }
    })
    .await
    .expect("reconciliation did not finish")
}
