use futures::future::BoxFuture;
use redis::aio::ConnectionManager;

use crate::error::Result;
use crate::repositories::store::PersistentStore;

/// Number of keys asked for per `SCAN` round trip.
const SCAN_BATCH: usize = 100;

/// A `PersistentStore` backed by Redis.
///
/// Keys are stored as `{namespace}:{key}` so several devices (or test runs)
/// can share one server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Connects to Redis and creates a new `RedisStore`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - The URL of the Redis server.
    /// * `namespace` - Prefix for every key written by this store.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `RedisStore`.
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized for namespace '{}'", namespace);
        Ok(Self::with_connection(conn, namespace))
    }

    /// Creates a new `RedisStore` over an existing connection.
    pub fn with_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn strip<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}

impl PersistentStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let value: Option<String> = redis::cmd("GET")
                .arg(self.namespaced(key))
                .query_async(&mut self.conn.clone())
                .await?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _: () = redis::cmd("SET")
                .arg(self.namespaced(key))
                .arg(value)
                .query_async(&mut self.conn.clone())
                .await?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _: i64 = redis::cmd("DEL")
                .arg(self.namespaced(key))
                .query_async(&mut self.conn.clone())
                .await?;
            Ok(())
        })
    }

    fn remove_many<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            let full: Vec<String> = keys.iter().map(|k| self.namespaced(k)).collect();
            let removed: i64 = redis::cmd("DEL")
                .arg(&full)
                .query_async(&mut self.conn.clone())
                .await?;
            tracing::debug!("🧹 Removed {} of {} keys", removed, keys.len());
            Ok(())
        })
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let pattern = format!("{}:*", self.namespace);
            let mut conn = self.conn.clone();
            let mut cursor: u64 = 0;
            let mut found = Vec::new();

            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;

                found.extend(batch.iter().filter_map(|k| self.strip(k)).map(str::to_string));

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            found.sort();
            found.dedup();
            Ok(found)
        })
    }
}
