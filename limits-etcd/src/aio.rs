//! etcd v3 storage driver (§4.1.5), natively async on `etcd-client`.
//!
//! etcd has no per-key TTL of its own — leases substitute, and a lease's
//! countdown only resets on an explicit keep-alive, which is exactly the
//! "elastic expiry extends the window" behavior this driver needs. There is
//! also no server-side scripting, so every multi-step invariant here is a
//! bounded optimistic-concurrency retry loop: read the value and its
//! `mod_revision`, then a `txn` whose `Compare` guards that nothing else
//! wrote the key in between.
//!
//! Value format (§6): `"count:window_end"` as UTF-8 bytes under key
//! `"limits/{key}"`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp};
use limits_core::aio::storage::{AsyncSlidingWindowCounterStorage, AsyncStorage};
use limits_core::errors::{LimitsError, Result};
use limits_core::storage::SlidingWindowSample;
use tracing::debug_span;

const KEY_PREFIX: &str = "limits/";
const DEFAULT_MAX_RETRIES: u32 = 5;

/// etcd-backed storage driver. Depends on the `etcd-client` crate.
///
/// Does not implement `MovingWindowStorage` (§4.1.5 only specifies the
/// Counter increment loop and the sliding-window key derivation; etcd has
/// no ordered-list primitive to build the exact log-based algorithm on
/// without an extra, undocumented data structure).
#[derive(Clone)]
pub struct AsyncEtcdStorage {
    client: Client,
    max_retries: u32,
}

impl std::fmt::Debug for AsyncEtcdStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncEtcdStorage")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AsyncEtcdStorage {
    /// `uri` is an `etcd://host:port[,host:port...]` URI; the `max_retries`
    /// query parameter (default 5) bounds the optimistic-concurrency loop.
    pub async fn new(uri: &str) -> Result<Self> {
        let parsed = limits_core::registry::StorageUri::parse(uri)?;
        if parsed.hosts.is_empty() {
            return Err(LimitsError::configuration("etcd URI is missing a host"));
        }
        let endpoints: Vec<String> = parsed
            .hosts
            .iter()
            .map(|(host, port)| format!("http://{host}:{}", if *port == 0 { 2379 } else { *port }))
            .collect();
        let max_retries = parsed
            .query
            .get("max_retries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let client = Client::connect(endpoints, None).await.map_err(LimitsError::storage)?;
        Ok(AsyncEtcdStorage { client, max_retries })
    }

    fn full_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn encode(count: u64, window_end: SystemTime) -> String {
        let secs = window_end.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        format!("{count}:{secs}")
    }

    fn decode(bytes: &[u8]) -> Option<(u64, SystemTime)> {
        let text = std::str::from_utf8(bytes).ok()?;
        let (count_str, window_str) = text.split_once(':')?;
        let count: u64 = count_str.parse().ok()?;
        let secs: u64 = window_str.parse().ok()?;
        Some((count, UNIX_EPOCH + Duration::from_secs(secs)))
    }

    fn window_id(now: SystemTime, expiry: Duration) -> i64 {
        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        (secs / expiry.as_secs().max(1)) as i64
    }

    fn sliding_keys(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let window = Self::window_id(now, expiry);
        (format!("{key}/{window}"), format!("{key}/{}", window - 1))
    }

    /// Read `(count, window_end)`, or `(0, now)` if absent/expired. Also
    /// returns the raw `mod_revision` and current lease id (0 if none) so
    /// callers can build an optimistic-concurrency `Compare`.
    async fn read(&self, full_key: &str, now: SystemTime) -> Result<(u64, SystemTime, i64, i64)> {
        let mut client = self.client.kv_client();
        let resp = client
            .get(full_key, None)
            .await
            .map_err(LimitsError::storage)?;
        let Some(kv) = resp.kvs().first() else {
            return Ok((0, now, 0, 0));
        };
        let Some((count, window_end)) = Self::decode(kv.value()) else {
            return Ok((0, now, kv.mod_revision(), kv.lease()));
        };
        if window_end <= now {
            return Ok((0, now, kv.mod_revision(), kv.lease()));
        }
        Ok((count, window_end, kv.mod_revision(), kv.lease()))
    }

    /// The bounded optimistic-concurrency increment loop (§4.1.5): create
    /// with a fresh lease if absent, or CAS-update the value against the
    /// same lease (keeping it alive, and so resetting its countdown, when
    /// `elastic`). Exhausting `max_retries` surfaces
    /// [`LimitsError::ConcurrentUpdate`].
    async fn incr_key(&self, key: &str, ttl: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let full_key = Self::full_key(key);
        let mut kv = self.client.kv_client();
        let mut lease = self.client.lease_client();

        for _attempt in 0..self.max_retries {
            let now = SystemTime::now();
            let (count, window_end, mod_revision, lease_id) = self.read(&full_key, now).await?;

            if count == 0 && lease_id == 0 {
                // Absent (or the prior value decoded to an expired window):
                // grant a fresh lease and create the key, guarded by a
                // version check so a concurrent creator loses the race
                // cleanly instead of silently overwriting.
                let granted = lease
                    .grant(ttl.as_secs().max(1) as i64, None)
                    .await
                    .map_err(LimitsError::storage)?;
                let value = Self::encode(amount, now + ttl);
                let put = TxnOp::put(
                    full_key.clone(),
                    value,
                    Some(PutOptions::new().with_lease(granted.id())),
                );
                let txn = Txn::new()
                    .when(vec![Compare::version(full_key.clone(), CompareOp::Equal, 0)])
                    .and_then(vec![put]);
                let resp = kv.txn(txn).await.map_err(LimitsError::storage)?;
                if resp.succeeded() {
                    return Ok(amount);
                }
                continue;
            }

            // `count == 0` here means the stored value decoded to an
            // expired (or malformed) window even though the key still
            // exists: this call is the one reopening the window, so the
            // ttl resets unconditionally, same as the fresh-create path
            // above, rather than only resetting it when `elastic`.
            let reopening = count == 0;
            if elastic {
                let _ = lease.keep_alive_once(lease_id).await;
            }
            let new_count = count.saturating_add(amount);
            let new_window_end = if elastic || reopening { now + ttl } else { window_end };
            let value = Self::encode(new_count, new_window_end);
            let put = TxnOp::put(full_key.clone(), value, Some(PutOptions::new().with_lease(lease_id)));
            let txn = Txn::new()
                .when(vec![Compare::mod_revision(full_key.clone(), CompareOp::Equal, mod_revision)])
                .and_then(vec![put]);
            let resp = kv.txn(txn).await.map_err(LimitsError::storage)?;
            if resp.succeeded() {
                return Ok(new_count);
            }
        }

        Err(LimitsError::ConcurrentUpdate {
            key: key.to_string(),
            attempts: self.max_retries,
        })
    }

    /// Best-effort compensating decrement for the sliding-window post-check
    /// (no retry bound: a lost race here just leaves the residual
    /// under-admission documented in §4.1.3/§9, never an over-admission).
    async fn decr_key(&self, key: &str, amount: u64) {
        let full_key = Self::full_key(key);
        let now = SystemTime::now();
        if let Ok((count, window_end, mod_revision, lease_id)) = self.read(&full_key, now).await {
            if lease_id == 0 {
                return;
            }
            let value = Self::encode(count.saturating_sub(amount), window_end);
            let mut kv = self.client.kv_client();
            let put = TxnOp::put(full_key.clone(), value, Some(PutOptions::new().with_lease(lease_id)));
            let txn = Txn::new()
                .when(vec![Compare::mod_revision(full_key, CompareOp::Equal, mod_revision)])
                .and_then(vec![put]);
            let _ = kv.txn(txn).await;
        }
    }
}

#[async_trait]
impl AsyncStorage for AsyncEtcdStorage {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let _span = debug_span!("etcd.incr", key = %key, elastic).entered();
        self.incr_key(key, expiry, amount, elastic).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let full_key = Self::full_key(key);
        Ok(self.read(&full_key, SystemTime::now()).await?.0)
    }

    async fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        let full_key = Self::full_key(key);
        Ok(self.read(&full_key, SystemTime::now()).await?.1)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut kv = self.client.kv_client();
        kv.delete(Self::full_key(key), None).await.map_err(LimitsError::storage)?;
        Ok(())
    }

    async fn reset(&self) -> Result<Option<u64>> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .delete(KEY_PREFIX, Some(etcd_client::DeleteOptions::new().with_prefix()))
            .await
            .map_err(LimitsError::storage)?;
        Ok(Some(resp.deleted() as u64))
    }

    async fn check(&self) -> bool {
        let mut kv = self.client.kv_client();
        kv.get(KEY_PREFIX, Some(GetOptions::new().with_count_only()))
            .await
            .is_ok()
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn AsyncSlidingWindowCounterStorage> {
        Some(self)
    }
}

#[async_trait]
impl AsyncSlidingWindowCounterStorage for AsyncEtcdStorage {
    async fn acquire_sliding_window_entry(
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
        let (cur_id, prev_id) = Self::sliding_keys(key, expiry, now);
        let (prev_count, prev_window_end, _, _) = self.read(&Self::full_key(&prev_id), now).await?;
        let prev_ttl = prev_window_end.duration_since(now).unwrap_or(Duration::ZERO);
        let (cur_count, _, _, _) = self.read(&Self::full_key(&cur_id), now).await?;

        let weighted_before = limits_core::storage::weighted_count(
            SlidingWindowSample {
                previous_count: prev_count,
                previous_ttl: prev_ttl,
                current_count: cur_count,
                current_ttl: Duration::ZERO,
            },
            expiry,
        );
        if weighted_before + amount > limit {
            return Ok(false);
        }

        let post = self.incr_key(&cur_id, expiry * 2, amount, false).await?;
        let weighted_after = limits_core::storage::weighted_count(
            SlidingWindowSample {
                previous_count: prev_count,
                previous_ttl: prev_ttl,
                current_count: post,
                current_ttl: Duration::ZERO,
            },
            expiry,
        );
        if weighted_after > limit {
            self.decr_key(&cur_id, amount).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let (cur_id, prev_id) = Self::sliding_keys(key, expiry, now);
        let (current_count, current_window_end, _, _) = self.read(&Self::full_key(&cur_id), now).await?;
        let (previous_count, previous_window_end, _, _) = self.read(&Self::full_key(&prev_id), now).await?;
        Ok(SlidingWindowSample {
            previous_count,
            previous_ttl: previous_window_end.duration_since(now).unwrap_or(Duration::ZERO),
            current_count,
            current_ttl: current_window_end.duration_since(now).unwrap_or(Duration::ZERO),
        })
    }

    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (cur_id, prev_id) = Self::sliding_keys(key, expiry, now);
        let mut kv = self.client.kv_client();
        kv.delete(Self::full_key(&cur_id), None).await.map_err(LimitsError::storage)?;
        kv.delete(Self::full_key(&prev_id), None).await.map_err(LimitsError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_format_round_trips() {
        let window_end = UNIX_EPOCH + Duration::from_secs(1_000);
        let encoded = AsyncEtcdStorage::encode(7, window_end);
        assert_eq!(encoded, "7:1000");
        let (count, decoded_end) = AsyncEtcdStorage::decode(encoded.as_bytes()).unwrap();
        assert_eq!(count, 7);
        assert_eq!(decoded_end, window_end);
    }

    #[test]
    fn sliding_keys_derive_from_window_id() {
        let now = UNIX_EPOCH + Duration::from_secs(125);
        let (cur, prev) = AsyncEtcdStorage::sliding_keys("k", Duration::from_secs(60), now);
        assert_eq!(cur, "k/2");
        assert_eq!(prev, "k/1");
    }
}
