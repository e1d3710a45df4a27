use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::models::session::{RoleId, SessionRecord};
use crate::services::session_cache::{SessionCache, SessionEvent};

/// Capacity of the role change channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Emitted once per change of the effective role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    /// The previously resolved role, `None` when signed out.
    pub old: Option<RoleId>,
    /// The newly resolved role, `None` when signed out.
    pub new: Option<RoleId>,
    /// Remount key for role-dependent navigation.
    pub generation: u64,
}

/// Resolves the effective role from its three mirrors.
///
/// The in-memory copy wins, then the parsed full record, then the scalar
/// key. Unparseable values are skipped.
pub fn resolve(
    in_memory: Option<RoleId>,
    full_record: Option<&str>,
    scalar_role_id: Option<&str>,
) -> Option<RoleId> {
    in_memory
        .or_else(|| {
            full_record
                .and_then(|raw| sonic_rs::from_str::<SessionRecord>(raw).ok())
                .map(|record| record.role_id)
        })
        .or_else(|| scalar_role_id.and_then(|raw| raw.parse().ok()))
}

/// Derives the one role value UI gating consumes.
pub struct RoleGate {
    cache: SessionCache,
    /// `None` until the first refresh.
    last: Mutex<Option<Option<RoleId>>>,
    generation: AtomicU64,
    events: broadcast::Sender<RoleChange>,
}

impl RoleGate {
    /// Creates a new `RoleGate` reading from `cache`.
    pub fn new(cache: SessionCache) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cache,
            last: Mutex::new(None),
            generation: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribes to role changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RoleChange> {
        self.events.subscribe()
    }

    /// The generation counter; bumps on every role change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The last resolved role, without touching the store.
    pub async fn effective_role(&self) -> Option<RoleId> {
        let last = *self.last.lock().await;
        last.flatten()
    }

    /// Re-reads the mirrors and emits a `RoleChange` if the resolved role moved.
    ///
    /// The first refresh only records a baseline.
    pub async fn refresh(&self) -> Option<RoleId> {
        let mut last = self.last.lock().await;

        let mirrors = self.cache.role_mirrors().await;
        let resolved = resolve(
            mirrors.in_memory,
            mirrors.full_record.as_deref(),
            mirrors.scalar_role_id.as_deref(),
        );

        match *last {
            None => {
                tracing::debug!("Role gate baseline: {:?}", resolved);
            }
            Some(previous) if previous == resolved => {}
            Some(previous) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    "🔀 Effective role changed: {:?} -> {:?} (generation {})",
                    previous,
                    resolved,
                    generation
                );
                let _ = self.events.send(RoleChange {
                    old: previous,
                    new: resolved,
                    generation,
                });
            }
        }

        *last = Some(resolved);
        resolved
    }

    /// Refreshes on every session event until the returned task is aborted.
    ///
    /// The gate holds a clone of the cache, so the event channel never
    /// closes while the listener runs.
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.cache.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::ReconcileAbandoned { .. }) => {}
                    Ok(_) => {
                        self.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Role gate skipped {} session events", skipped);
                        self.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_AGENT: &str = r#"{"userId":"7","displayName":"Lan","phone":"0987654321","roleId":2,"lastFetchedAt":0}"#;

    #[test]
    fn in_memory_wins() {
        assert_eq!(
            resolve(Some(RoleId::ADMIN), Some(FULL_AGENT), Some("3")),
            Some(RoleId::ADMIN)
        );
    }

    #[test]
    fn full_record_beats_scalar_key() {
        // A torn write leaves the scalar ahead of the full record.
        assert_eq!(resolve(None, Some(FULL_AGENT), Some("1")), Some(RoleId::SALES_AGENT));
    }

    #[test]
    fn falls_back_to_scalar_then_nothing() {
        assert_eq!(resolve(None, Some("{broken"), Some(" 3 ")), Some(RoleId::CUSTOMER));
        assert_eq!(resolve(None, None, Some("x")), None);
        assert_eq!(resolve(None, None, None), None);
    }
}
