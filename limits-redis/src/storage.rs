use std::time::{Duration, SystemTime, UNIX_EPOCH};

use limits_core::errors::{LimitsError, Result};
use limits_core::storage::{
    MovingWindowStorage, SlidingWindowCounterStorage, SlidingWindowSample, Storage,
};
use redis::cluster::ClusterConnection;
use redis::Connection;
use tracing::debug_span;

use crate::client::Backend;
use crate::scripts;

/// Every key this driver touches lives under this prefix, independent of
/// the `LIMITER` namespace already baked into [`limits_core::limit::RateLimitItem::key_for`],
/// so a `reset()` can find (and only find) this library's own state in a
/// shared Redis database.
const KEY_PREFIX: &str = "LIMITS:";

enum Conn {
    Single(Connection),
    Cluster(ClusterConnection),
}

macro_rules! dispatch {
    ($conn:expr, |$c:ident| $body:expr) => {
        match $conn {
            Conn::Single(mut $c) => $body,
            Conn::Cluster(mut $c) => $body,
        }
    };
}

/// Redis-backed storage driver (§4.1.2). Depends on `redis`.
///
/// Every multi-step invariant (conditional expiry, moving-window admission,
/// sliding-window admission) is enforced by a server-side Lua script so
/// there is no read-modify-write race between this process and any other
/// client sharing the same keys.
#[derive(Debug)]
pub struct RedisStorage {
    backend: Backend,
}

impl RedisStorage {
    /// `uri` is a `redis://`, `rediss://`, `redis+unix://` or
    /// `redis+sentinel://` URI, optionally with comma-separated cluster
    /// hosts.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed = limits_core::registry::StorageUri::parse(uri)?;
        Ok(Self {
            backend: Backend::resolve(&parsed)?,
        })
    }

    fn conn(&self) -> Result<Conn> {
        match &self.backend {
            Backend::Single(client) => Ok(Conn::Single(
                client.get_connection().map_err(LimitsError::storage)?,
            )),
            Backend::Cluster(client) => Ok(Conn::Cluster(
                client.get_connection().map_err(LimitsError::storage)?,
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

    /// Both keys carry the same `{base}` hash tag (§6: `"{key}"` /
    /// `"{key}/-1"`) so the pair always lands in the same cluster slot —
    /// the Lua script touching both keys would otherwise be rejected by a
    /// real cluster with a CROSSSLOT error.
    fn sliding_keys(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let base = Self::prefixed(key);
        let window = Self::window_id(now, expiry);
        (
            format!("{{{base}}}/{window}"),
            format!("{{{base}}}/{}", window - 1),
        )
    }
}

impl Storage for RedisStorage {
    fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let _span = debug_span!("redis.incr", key = %key, elastic).entered();
        let key = Self::prefixed(key);
        let conn = self.conn()?;
        if elastic {
            let value: i64 = dispatch!(conn, |c| {
                let result: redis::RedisResult<i64> = (|| {
                    let value: i64 = redis::cmd("INCRBY").arg(&key).arg(amount).query(&mut c)?;
                    redis::cmd("EXPIRE")
                        .arg(&key)
                        .arg(expiry.as_secs())
                        .query::<i64>(&mut c)?;
                    Ok(value)
                })();
                result
            })
            .map_err(LimitsError::storage)?;
            Ok(value as u64)
        } else {
            let value: i64 = dispatch!(conn, |c| scripts::INCR_EXPIRE_SCRIPT
                .key(&key)
                .arg(expiry.as_secs())
                .arg(amount)
                .invoke(&mut c))
            .map_err(LimitsError::storage)?;
            Ok(value as u64)
        }
    }

    fn get(&self, key: &str) -> Result<u64> {
        let key = Self::prefixed(key);
        let conn = self.conn()?;
        let value: Option<i64> = dispatch!(conn, |c| redis::cmd("GET").arg(&key).query(&mut c))
            .map_err(LimitsError::storage)?;
        Ok(value.unwrap_or(0) as u64)
    }

    fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        let key = Self::prefixed(key);
        let conn = self.conn()?;
        let ttl: i64 = dispatch!(conn, |c| redis::cmd("TTL").arg(&key).query(&mut c))
            .map_err(LimitsError::storage)?;
        Ok(SystemTime::now() + Duration::from_secs(ttl.max(0) as u64))
    }

    fn clear(&self, key: &str) -> Result<()> {
        let key = Self::prefixed(key);
        let conn = self.conn()?;
        let _: i64 = dispatch!(conn, |c| redis::cmd("DEL").arg(&key).query(&mut c))
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    fn reset(&self) -> Result<Option<u64>> {
        let conn = self.conn()?;
        let pattern = format!("{KEY_PREFIX}*");
        let deleted: i64 =
            dispatch!(conn, |c| scripts::CLEAR_KEYS_SCRIPT.arg(&pattern).invoke(&mut c))
                .map_err(LimitsError::storage)?;
        Ok(Some(deleted as u64))
    }

    fn check(&self) -> bool {
        let Ok(conn) = self.conn() else {
            return false;
        };
        dispatch!(conn, |c| redis::cmd("PING").query::<String>(&mut c)).is_ok()
    }

    fn as_moving_window(&self) -> Option<&dyn MovingWindowStorage> {
        Some(self)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        Some(self)
    }
}

impl MovingWindowStorage for RedisStorage {
    fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        let key = Self::prefixed(key);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let token = format!("{}.{}", now.as_secs(), now.subsec_nanos());
        let conn = self.conn()?;
        let acquired: i64 = dispatch!(conn, |c| scripts::ACQUIRE_MOVING_WINDOW_SCRIPT
            .key(&key)
            .arg(now.as_secs_f64())
            .arg(limit)
            .arg(expiry.as_secs())
            .arg(amount)
            .arg(&token)
            .invoke(&mut c))
        .map_err(LimitsError::storage)?;
        Ok(acquired == 1)
    }

    fn get_moving_window(&self, key: &str, _limit: u64, expiry: Duration) -> Result<(SystemTime, u64)> {
        let key = Self::prefixed(key);
        let now = SystemTime::now();
        let cutoff = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_sub(expiry);
        let conn = self.conn()?;
        let result: Option<(String, u64)> = dispatch!(conn, |c| scripts::MOVING_WINDOW_SCRIPT
            .key(&key)
            .arg(cutoff.as_secs_f64())
            .invoke(&mut c))
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

impl SlidingWindowCounterStorage for RedisStorage {
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn()?;
        let acquired: i64 = dispatch!(conn, |c| scripts::ACQUIRE_SLIDING_WINDOW_SCRIPT
            .key(&current)
            .key(&previous)
            .arg(limit)
            .arg(expiry.as_millis() as u64)
            .arg(amount)
            .invoke(&mut c))
        .map_err(LimitsError::storage)?;
        Ok(acquired == 1)
    }

    fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn()?;
        let (previous_count, previous_ttl, current_count, current_ttl): (i64, i64, i64, i64) =
            dispatch!(conn, |c| scripts::GET_SLIDING_WINDOW_SCRIPT
                .key(&current)
                .key(&previous)
                .invoke(&mut c))
            .map_err(LimitsError::storage)?;

        Ok(SlidingWindowSample {
            previous_count: previous_count.max(0) as u64,
            previous_ttl: Duration::from_millis(previous_ttl.max(0) as u64),
            current_count: current_count.max(0) as u64,
            current_ttl: Duration::from_millis(current_ttl.max(0) as u64),
        })
    }

    fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (current, previous) = Self::sliding_keys(key, expiry, now);
        let conn = self.conn()?;
        let _: i64 = dispatch!(conn, |c| scripts::CLEAR_SLIDING_WINDOW_SCRIPT
            .key(&current)
            .key(&previous)
            .invoke(&mut c))
        .map_err(LimitsError::storage)?;
        Ok(())
    }
}
