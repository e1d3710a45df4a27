use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::repositories::redis_store::RedisStore;
use crate::repositories::remote::{HttpIdentityService, RemoteIdentityService};
use crate::repositories::store::PersistentStore;
use crate::services::lifecycle::LifecycleMonitor;
use crate::services::role_gate::RoleGate;
use crate::services::session_cache::{CacheSettings, SessionCache};

/// The wired-up identity layer of the app.
pub struct IdentityState {
    /// The configuration it was built from.
    pub config: Config,
    /// The session cache.
    pub cache: SessionCache,
    /// The effective-role gate, already listening to the cache.
    pub role_gate: Arc<RoleGate>,
    /// The lifecycle monitor, its timer already running.
    pub lifecycle: Arc<LifecycleMonitor>,
    tasks: Vec<JoinHandle<()>>,
}

impl IdentityState {
    /// Connects to Redis and the remote identity service and wires everything.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `IdentityState`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = RedisStore::connect(&config.redis_url, &config.device_namespace).await?;
        let remote = HttpIdentityService::new(&config.api_base_url, config.http_timeout)?;
        tracing::info!("✅ Remote identity client initialized for {}", config.api_base_url);

        Self::with_collaborators(config, Arc::new(store), Arc::new(remote), Arc::new(SystemClock))
            .await
    }

    /// Wires the identity layer over the given collaborators.
    pub async fn with_collaborators(
        config: &Config,
        store: Arc<dyn PersistentStore>,
        remote: Arc<dyn RemoteIdentityService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache = SessionCache::new(store, remote, clock.clone(), CacheSettings::from(config));
        tracing::info!(
            "✅ Session cache initialized (stale TTL {}s)",
            config.stale_ttl.as_secs()
        );

        let role_gate = Arc::new(RoleGate::new(cache.clone()));
        let effective = role_gate.refresh().await;
        let listener = role_gate.clone().spawn_listener();
        tracing::info!("✅ Role gate initialized, effective role: {:?}", effective);

        let lifecycle = Arc::new(LifecycleMonitor::new(cache.clone(), clock, config.stale_ttl));
        let timer = lifecycle.clone().spawn_timer(config.lifecycle_tick);
        tracing::info!(
            "✅ Lifecycle timer started (every {}s)",
            config.lifecycle_tick.as_secs()
        );

        Ok(Self {
            config: config.clone(),
            cache,
            role_gate,
            lifecycle,
            tasks: vec![listener, timer],
        })
    }

    /// Stops the background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("🛑 Identity layer stopped");
    }
}

impl Drop for IdentityState {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
