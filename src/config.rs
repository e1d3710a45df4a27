use std::env;
use std::time::Duration;
use anyhow::{Context, Result};

/// Default staleness window before a cached identity is reconciled.
pub const DEFAULT_STALE_TTL_SECS: u64 = 180;
/// Default client-side timeout for remote identity calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
/// Default period of the lifecycle timer.
pub const DEFAULT_LIFECYCLE_TICK_SECS: u64 = 60;

/// The session layer's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The base URL of the remote identity service.
    pub api_base_url: String,
    /// The URL of the Redis server backing the persistent store.
    pub redis_url: String,
    /// Prefix isolating this device's keys in the store.
    pub device_namespace: String,
    /// How old a cached identity may be before it is reconciled.
    pub stale_ttl: Duration,
    /// Bounded timeout for every remote call.
    pub http_timeout: Duration,
    /// How often the lifecycle timer fires.
    pub lifecycle_tick: Duration,
}

impl Config {
    /// Creates a new `Config` from environment variables, loading `.env` first.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("API_BASE_URL").context("API_BASE_URL must be set")?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        if api_base_url.is_empty() {
            anyhow::bail!("API_BASE_URL must not be empty");
        }

        Ok(Self {
            api_base_url,
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            device_namespace: lookup("DEVICE_NAMESPACE").unwrap_or_else(|| "device".to_string()),
            stale_ttl: seconds(&lookup, "IDENTITY_STALE_TTL_SECS", DEFAULT_STALE_TTL_SECS)?,
            http_timeout: seconds(&lookup, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            lifecycle_tick: seconds(&lookup, "LIFECYCLE_TICK_SECS", DEFAULT_LIFECYCLE_TICK_SECS)?,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key))?,
        None => default,
    };

    if secs == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }

    Ok(Duration::from_secs(secs))
}
