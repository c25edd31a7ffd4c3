//! Memcached storage driver (§4.1.3).
//!
//! Memcached has no scripting and no TTL introspection, so every
//! multi-step invariant the Redis driver gets from a Lua script is
//! assembled here from `add` (create-if-absent) and `incr`/`decr`, plus a
//! companion `"{key}/expires"` key that records the counter's absolute
//! expiry as a decimal string — the only way to answer `get_expiry` without
//! a native TTL read.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use limits_core::errors::{LimitsError, Result};
use limits_core::storage::{SlidingWindowCounterStorage, SlidingWindowSample, Storage};
use memcache::Client;
use tracing::debug_span;

const EXPIRES_SUFFIX: &str = "/expires";

/// Memcached-backed storage driver. Depends on the `memcache` crate.
///
/// Does not implement [`limits_core::storage::MovingWindowStorage`]: the
/// exact log-based algorithm needs an ordered list primitive memcached
/// doesn't have. `SlidingWindowCounterStorage` is implemented with the
/// documented under-admission race (§4.1.3/§9): concurrent writers racing
/// across a window boundary may cause slightly fewer than `limit` requests
/// to be admitted, never more.
#[derive(Debug)]
pub struct MemcachedStorage {
    client: Client,
}

impl MemcachedStorage {
    /// `uri` is a `memcached://` URI; comma-separated hosts shard across
    /// servers client-side (the `memcache` crate's own hashing), and a
    /// `memcached+unix:///path/to/sock` URI targets a single UDS server.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed = limits_core::registry::StorageUri::parse(uri)?;
        let urls = connect_urls(&parsed)?;
        let client = Client::connect(urls).map_err(LimitsError::storage)?;
        Ok(MemcachedStorage { client })
    }

    fn expires_key(key: &str) -> String {
        format!("{key}{EXPIRES_SUFFIX}")
    }

    /// The create-if-absent increment assembly described in §4.1.3:
    /// 1. Try `incr`. On hit, the key exists and we're done.
    /// 2. On miss, `add` with an initial value. If that wins the race,
    ///    we created the key. If another writer beat us to it, fall back
    ///    to `incr` against the now-present key.
    fn incr_or_create(&self, key: &str, expiry: Duration, amount: u64) -> Result<(u64, bool)> {
        match self.client.increment(key, amount) {
            Ok(value) => Ok((value, false)),
            Err(_not_found) => {
                match self
                    .client
                    .add(key, amount, expiry.as_secs() as u32)
                {
                    Ok(()) => Ok((amount, true)),
                    Err(_lost_race) => {
                        let value = self.client.increment(key, amount).map_err(LimitsError::storage)?;
                        Ok((value, false))
                    }
                }
            }
        }
    }

    fn write_expires(&self, key: &str, expiry: Duration, now: SystemTime) -> Result<()> {
        let expires_at = now + expiry;
        let secs = expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.client
            .set(&Self::expires_key(key), secs.to_string(), expiry.as_secs() as u32)
            .map_err(LimitsError::storage)
    }

    fn read_expires(&self, key: &str) -> Result<SystemTime> {
        let raw: Option<String> = self
            .client
            .get(&Self::expires_key(key))
            .map_err(LimitsError::storage)?;
        match raw.and_then(|s| s.parse::<u64>().ok()) {
            Some(secs) => Ok(UNIX_EPOCH + Duration::from_secs(secs)),
            None => Ok(SystemTime::now()),
        }
    }

    fn window_id(now: SystemTime, expiry: Duration) -> i64 {
        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        (secs / expiry.as_secs().max(1)) as i64
    }

    fn sliding_keys(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let window = Self::window_id(now, expiry);
        (format!("{key}/{window}"), format!("{key}/{}", window - 1))
    }

    /// `(count, remaining_ttl)` for one sliding-window bucket, using the
    /// companion expires key since memcached can't answer "what's this
    /// key's TTL" directly.
    fn bucket(&self, key: &str, now: SystemTime) -> Result<(u64, Duration)> {
        let value: Option<u64> = self.client.get(key).map_err(LimitsError::storage)?;
        let Some(count) = value else {
            return Ok((0, Duration::ZERO));
        };
        let expires_at = self.read_expires(key)?;
        let ttl = expires_at.duration_since(now).unwrap_or(Duration::ZERO);
        Ok((count, ttl))
    }
}

fn connect_urls(parsed: &limits_core::registry::StorageUri) -> Result<Vec<String>> {
    if let Some(path) = &parsed.unix_path {
        return Ok(vec![format!("memcache:///{}", path.trim_start_matches('/'))]);
    }
    if parsed.hosts.is_empty() {
        return Err(LimitsError::configuration("memcached URI is missing a host"));
    }
    Ok(parsed
        .hosts
        .iter()
        .map(|(host, port)| {
            let port = if *port == 0 { 11211 } else { *port };
            format!("memcache://{host}:{port}")
        })
        .collect())
}

impl Storage for MemcachedStorage {
    fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let _span = debug_span!("memcached.incr", key = %key, elastic).entered();
        let now = SystemTime::now();
        let (value, created) = self.incr_or_create(key, expiry, amount)?;
        if created || elastic {
            self.write_expires(key, expiry, now)?;
            if !created {
                // Elastic refresh on an already-existing key: the value
                // itself doesn't need rewriting, only its ttl.
                self.client
                    .touch(key, expiry.as_secs() as u32)
                    .map_err(LimitsError::storage)?;
            }
        }
        Ok(value)
    }

    fn get(&self, key: &str) -> Result<u64> {
        let value: Option<u64> = self.client.get(key).map_err(LimitsError::storage)?;
        Ok(value.unwrap_or(0))
    }

    fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        self.read_expires(key)
    }

    fn clear(&self, key: &str) -> Result<()> {
        let _ = self.client.delete(key).map_err(LimitsError::storage)?;
        let _ = self
            .client
            .delete(&Self::expires_key(key))
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    fn reset(&self) -> Result<Option<u64>> {
        // Memcached has no key-pattern enumeration; `flush_all` clears the
        // entire cache (not just this library's namespace), so the honest
        // answer per §7 ("reset() is best-effort; unsupported is allowed")
        // is "unsupported" rather than nuking keys that may belong to other
        // tenants of the same cache.
        Ok(None)
    }

    fn check(&self) -> bool {
        self.client.version().is_ok()
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        Some(self)
    }
}

impl SlidingWindowCounterStorage for MemcachedStorage {
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        if amount == 0 || amount > limit {
            return Ok(false);
        }
        let now = SystemTime::now();
        let (cur_key, prev_key) = Self::sliding_keys(key, expiry, now);
        let (prev_count, prev_ttl) = self.bucket(&prev_key, now)?;
        let (cur_count, _) = self.bucket(&cur_key, now)?;

        let weighted_before = weighted(prev_count, prev_ttl, cur_count, expiry);
        if weighted_before + amount > limit {
            return Ok(false);
        }

        let (post_value, created) = self.incr_or_create(&cur_key, expiry * 2, amount)?;
        if created {
            self.write_expires(&cur_key, expiry * 2, now)?;
        }

        let weighted_after = weighted(prev_count, prev_ttl, post_value, expiry);
        if weighted_after > limit {
            // Post-check failed: another writer raised the weighted count
            // above the limit between our read and our increment.
            // Compensate by decrementing back out (§4.1.3's documented
            // residual race: this may under-admit by one, never over-admit).
            let _ = self.client.decrement(&cur_key, amount);
            return Ok(false);
        }
        Ok(true)
    }

    fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let (cur_key, prev_key) = Self::sliding_keys(key, expiry, now);
        let (current_count, current_ttl) = self.bucket(&cur_key, now)?;
        let (previous_count, previous_ttl) = self.bucket(&prev_key, now)?;
        Ok(SlidingWindowSample {
            previous_count,
            previous_ttl,
            current_count,
            current_ttl,
        })
    }

    fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (cur_key, prev_key) = Self::sliding_keys(key, expiry, now);
        for k in [cur_key, prev_key] {
            let _ = self.client.delete(&k);
            let _ = self.client.delete(&Self::expires_key(&k));
        }
        Ok(())
    }
}

/// Shared weighted-count arithmetic (§3.4), duplicated from
/// [`limits_core::storage::weighted_count`] because this driver works in
/// `(count, ttl)` pairs read individually rather than a ready-made
/// [`SlidingWindowSample`] at the call sites above.
fn weighted(previous_count: u64, previous_ttl: Duration, current_count: u64, expiry: Duration) -> u64 {
    limits_core::storage::weighted_count(
        SlidingWindowSample {
            previous_count,
            previous_ttl,
            current_count,
            current_ttl: Duration::ZERO,
        },
        expiry,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_matches_shared_formula() {
        let w = weighted(10, Duration::from_millis(500), 2, Duration::from_secs(1));
        assert_eq!(w, 5 + 2);
    }

    #[test]
    fn connect_urls_rejects_missing_host() {
        let parsed = limits_core::registry::StorageUri::parse("memcached://").unwrap();
        assert!(connect_urls(&parsed).is_err());
    }

    #[test]
    fn connect_urls_builds_one_url_per_host() {
        let mut parsed = limits_core::registry::StorageUri::parse("memcached://a:11211").unwrap();
        parsed.hosts.push(("b".to_string(), 11311));
        let urls = connect_urls(&parsed).unwrap();
        assert_eq!(urls, vec!["memcache://a:11211", "memcache://b:11311"]);
    }

    #[test]
    fn connect_urls_handles_unix_socket() {
        let parsed = limits_core::registry::StorageUri::parse("memcached+unix:///tmp/m.sock").unwrap();
        let urls = connect_urls(&parsed).unwrap();
        assert_eq!(urls, vec!["memcache:///tmp/m.sock"]);
    }
}
