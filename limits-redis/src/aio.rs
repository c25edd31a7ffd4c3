//! The async mirror (§2 item 5). Unlike the in-process memory driver, every
//! operation here has a real suspension point — a network round trip — so
//! this is a genuine async implementation, not a thin delegating wrapper.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use limits_core::aio::storage::{
    AsyncMovingWindowStorage, AsyncSlidingWindowCounterStorage, AsyncStorage,
};
use limits_core::errors::{LimitsError, Result};
use limits_core::registry::StorageUri;
use limits_core::storage::SlidingWindowSample;
use redis::aio::ConnectionManager;
use redis::cluster_async::ClusterConnection;
use redis::cluster::ClusterClient;
use redis::Client;
use tracing::{debug_span, Instrument};

use crate::client::Backend;
use crate::scripts;

const KEY_PREFIX: &str = "LIMITS:";

enum AsyncConn {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

macro_rules! dispatch {
    ($conn:expr, |$c:ident| $body:expr) => {
        match $conn {
            AsyncConn::Single(mut $c) => $body,
            AsyncConn::Cluster(mut $c) => $body,
        }
    };
}

/// Async mirror of [`crate::storage::RedisStorage`].
#[derive(Debug)]
pub struct AsyncRedisStorage {
    backend: AsyncBackend,
}

enum AsyncBackend {
    Single(ConnectionManager),
    Cluster(ClusterClient),
}

impl std::fmt::Debug for AsyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncBackend::Single(_) => f.write_str("AsyncBackend::Single"),
            AsyncBackend::Cluster(_) => f.write_str("AsyncBackend::Cluster"),
        }
    }
}

impl AsyncRedisStorage {
    pub async fn new(uri: &str) -> Result<Self> {
        let parsed = StorageUri::parse(uri)?;
        let backend = Backend::resolve(&parsed)?;
        let backend = match backend {
            Backend::Single(client) => {
                let manager = ConnectionManager::new(client)
                    .await
                    .map_err(LimitsError::storage)?;
                AsyncBackend::Single(manager)
            }
            Backend::Cluster(_) => {
                // `redis::cluster::ClusterClient` built by `Backend::resolve` is
                // sync-oriented; rebuild the cluster client from the same node
                // list for the async connection type.
                let urls: Result<Vec<String>> = parsed
                    .hosts
                    .iter()
                    .map(|(host, port)| crate::client::node_url(&parsed, host, *port))
                    .collect();
                let client = ClusterClient::new(urls?).map_err(LimitsError::storage)?;
                AsyncBackend::Cluster(client)
            }
        };
        Ok(Self { backend })
    }

    async fn conn(&self) -> Result<AsyncConn> {
        match &self.backend {
            AsyncBackend::Single(manager) => Ok(AsyncConn::Single(manager.clone())),
            AsyncBackend::Cluster(client) => Ok(AsyncConn::Cluster(
                client
                    .get_async_connection()
                    .await
                    .map_err(LimitsError::storage)?,
            )),
        }
    }

    fn prefixed(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn window_id(now: SystemTime, expiry: Duration) -> i64 {
        let secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        (secs / expiry.as_secs().max(1)) as i64
    }

    /// See the sync driver's `sliding_keys` for why both keys share a
    /// `{base}` hash tag.
    fn sliding_keys(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let base = Self::prefixed(key);
        let window = Self::window_id(now, expiry);
        (
            format!("{{{base}}}/{window}"),
            format!("{{{base}}}/{}", window - 1),
        )
    }
}

#[async_trait]
impl AsyncStorage for AsyncRedisStorage {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let key = Self::prefixed(key);
        let conn = self.conn().await?;
        let value: i64 = if elastic {
            dispatch!(conn, |c| async move {
                let value: i64 = redis::cmd("INCRBY")
                    .arg(&key)
                    .arg(amount)
                    .query_async(&mut c)
                    .await?;
                redis::cmd("EXPIRE")
                    .arg(&key)
                    .arg(expiry.as_secs())
                    .query_async::<i64>(&mut c)
                    .await?;
                Ok::<i64, redis::RedisError>(value)
            }
            .instrument(debug_span!("redis.incr"))
            .await)
            .map_err(LimitsError::storage)?
        } else {
            dispatch!(conn, |c| scripts::INCR_EXPIRE_SCRIPT
                .key(&key)
                .arg(expiry.as_secs())
                .arg(amount)
                .invoke_async(&mut c)
                .instrument(debug_span!("redis.incr"))
                .await)
            .map_err(LimitsError::storage)?
        };
        Ok(value as u64)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let key = Self::prefixed(key);
        let conn = self.conn().await?;
        let value: Option<i64> =
            dispatch!(conn, |c| redis::cmd("GET").arg(&key).query_async(&mut c).await)
                .map_err(LimitsError::storage)?;
        Ok(value.unwrap_or(0) as u64)
    }

    async fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        let key = Self::prefixed(key);
        let conn = self.conn().await?;
        let ttl: i64 =
            dispatch!(conn, |c| redis::cmd("TTL").arg(&key).query_async(&mut c).await)
                .map_err(LimitsError::storage)?;
        Ok(SystemTime::now() + Duration::from_secs(ttl.max(0) as u64))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let key = Self::prefixed(key);
        let conn = self.conn().await?;
        let _: i64 = dispatch!(conn, |c| redis::cmd("DEL").arg(&key).query_async(&mut c).await)
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    async fn reset(&self) -> Result<Option<u64>> {
        let conn = self.conn().await?;
        let pattern = format!("{KEY_PREFIX}*");
        let deleted: i64 = dispatch!(conn, |c| scripts::CLEAR_KEYS_SCRIPT
            .arg(&pattern)
            .invoke_async(&mut c)
            .await)
        .map_err(LimitsError::storage)?;
        Ok(Some(deleted as u64))
    }

    async fn check(&self) -> bool {
        let Ok(conn) = self.conn().await else {
            return false;
        };
        dispatch!(conn, |c| redis::cmd("PING")
            .query_async::<String>(&mut c)
            .await)
        .is_ok()
    }

    fn as_moving_window(&self) -> Option<&dyn AsyncMovingWindowStorage> {
        Some(self)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn AsyncSlidingWindowCounterStorage> {
        Some(self)
    }
}

#[async_trait]
impl AsyncMovingWindowStorage for AsyncRedisStorage {
    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        let key = Self::prefixed(key);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let token = format!("{}.{}", now.as_secs(), now.subsec_nanos());
        let conn = self.conn().await?;
        let acquired: i64 = dispatch!(conn, |c| scripts::ACQUIRE_MOVING_WINDOW_SCRIPT
            .key(&key)
            .arg(now.as_secs_f64())
            .arg(limit)
            .arg(expiry.as_secs())
            .arg(amount)
            .arg(&token)
            .invoke_async(&mut c)
            .await)
        .map_err(LimitsError::storage)?;
        Ok(acquired == 1)
    }

    async fn get_moving_window(&self, key: &str, _limit: u64, expiry: Duration) -> Result<(SystemTime, u64)> {
        let key = Self::prefixed(key);
        let now = SystemTime::now();
        let cutoff = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_sub(expiry);
        let conn = self.conn().await?;
        let result: Option<(String, u64)> = dispatch!(conn, |c| scripts::MOVING_WINDOW_SCRIPT
            .key(&key)
            .arg(cutoff.as_secs_f64())
            .invoke_async(&mut c)
            .await)
        .map_err(LimitsError::storage)?;

        match result {
            Some((oldest, count)) => {
                let oldest_secs: f64 = oldest.parse().unwrap_or(0.0);
                Ok((UNIX_EPOCH + Duration::from_secs_f64(oldest_secs), count))
            }
            None => Ok((now, 0)),
        }
    }
}

#[async_trait]
impl AsyncSlidingWindowCounterStorage for AsyncRedisStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn().await?;
        let acquired: i64 = dispatch!(conn, |c| scripts::ACQUIRE_SLIDING_WINDOW_SCRIPT
            .key(&current)
            .key(&previous)
            .arg(limit)
            .arg(expiry.as_millis() as u64)
            .arg(amount)
            .invoke_async(&mut c)
            .await)
        .map_err(LimitsError::storage)?;
        Ok(acquired == 1)
    }

    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn().await?;
        let (previous_count, previous_ttl, current_count, current_ttl): (i64, i64, i64, i64) =
            dispatch!(conn, |c| scripts::GET_SLIDING_WINDOW_SCRIPT
                .key(&current)
                .key(&previous)
                .invoke_async(&mut c)
                .await)
            .map_err(LimitsError::storage)?;

        Ok(SlidingWindowSample {
            previous_count: previous_count.max(0) as u64,
            previous_ttl: Duration::from_millis(previous_ttl.max(0) as u64),
            current_count: current_count.max(0) as u64,
            current_ttl: Duration::from_millis(current_ttl.max(0) as u64),
        })
    }

    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn().await?;
        let _: i64 = dispatch!(conn, |c| scripts::CLEAR_SLIDING_WINDOW_SCRIPT
            .key(&current)
            .key(&previous)
            .invoke_async(&mut c)
            .await)
        .map_err(LimitsError::storage)?;
        Ok(())
    }
}
