//! MongoDB storage driver (§4.1.4), natively async — `mongodb`'s client is
//! built on `tokio` throughout, so this is the primary implementation; the
//! synchronous facade in [`crate::storage`] blocks on a dedicated runtime.
//!
//! Two collections, both with a TTL index on `expireAt` so expired
//! documents are reaped server-side without this driver doing any sweeping
//! of its own:
//!
//! - `counters`: `{ _id, value, expireAt }`, used by the Counter capability
//!   and (with derived window-id keys) the sliding-window pair.
//! - `windows`: `{ _id, entries: [timestamp, ...] (newest first, capped to
//!   `limit`), expireAt }`, used by the moving-window capability.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use limits_core::aio::storage::{
    AsyncMovingWindowStorage, AsyncSlidingWindowCounterStorage, AsyncStorage,
};
use limits_core::errors::{LimitsError, Result};
use limits_core::storage::SlidingWindowSample;
use mongodb::bson::{self, doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions};
use mongodb::{Client, Collection};
use tracing::debug_span;

const DEFAULT_DATABASE: &str = "limits";

/// MongoDB-backed storage driver. Depends on the `mongodb` crate.
#[derive(Debug, Clone)]
pub struct AsyncMongoStorage {
    counters: Collection<Document>,
    windows: Collection<Document>,
}

impl AsyncMongoStorage {
    /// `uri` is a `mongodb://` or `mongodb+srv://` URI; the database name
    /// is taken from the URI path, defaulting to `"limits"` (§0).
    pub async fn new(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await.map_err(LimitsError::storage)?;
        let parsed = limits_core::registry::StorageUri::parse(uri)?;
        let db_name = parsed.path.as_deref().unwrap_or(DEFAULT_DATABASE);
        let db = client.database(db_name);
        let counters = db.collection::<Document>("counters");
        let windows = db.collection::<Document>("windows");
        Ok(AsyncMongoStorage { counters, windows })
    }

    fn window_id(now: SystemTime, expiry: Duration) -> i64 {
        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        (secs / expiry.as_secs().max(1)) as i64
    }

    fn sliding_ids(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let window = Self::window_id(now, expiry);
        (format!("{key}/{window}"), format!("{key}/{}", window - 1))
    }

    /// The shared increment-with-reset-on-expiry pipeline (§4.1.4): resets
    /// `value` to `amount` (instead of adding to it) when `expireAt` is
    /// absent or in the past, and (re)sets `expireAt` to `now + ttl` either
    /// on that same reset or whenever `elastic` is set.
    async fn incr_counter(
        &self,
        id: &str,
        ttl: Duration,
        amount: u64,
        elastic: bool,
        now: SystemTime,
    ) -> Result<u64> {
        let now_bson = to_bson_time(now);
        let new_expiry = to_bson_time(now + ttl);
        let expired_or_absent = doc! {
            "$or": [
                { "expireAt": { "$exists": false } },
                { "expireAt": { "$lte": &now_bson } },
            ]
        };
        let pipeline = vec![doc! {
            "$set": {
                "value": {
                    "$cond": {
                        "if": expired_or_absent.clone(),
                        "then": Bson::Int64(amount as i64),
                        "else": { "$add": ["$value", amount as i64] },
                    }
                },
                "expireAt": {
                    "$cond": {
                        "if": { "$or": [Bson::Boolean(elastic), expired_or_absent] },
                        "then": &new_expiry,
                        "else": "$expireAt",
                    }
                },
            }
        }];
        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let doc = self
            .counters
            .find_one_and_update(doc! { "_id": id }, pipeline)
            .with_options(opts)
            .await
            .map_err(LimitsError::storage)?
            .ok_or_else(|| LimitsError::storage(MongoDriverError("find_one_and_update returned no document".into())))?;
        Ok(doc.get_i64("value").unwrap_or(amount as i64) as u64)
    }

    /// Compensation decrement for the sliding-window post-check (§4.1.4's
    /// mongodb analogue of the memcached `decr` compensation): a plain
    /// `$inc`, no reset-on-expiry logic, since it only ever targets a
    /// counter this same call just created or incremented moments ago.
    async fn decr_counter(&self, id: &str, amount: u64) -> Result<()> {
        self.counters
            .update_one(doc! { "_id": id }, doc! { "$inc": { "value": -(amount as i64) } })
            .await
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    async fn read_counter(&self, id: &str, now: SystemTime) -> Result<(u64, SystemTime)> {
        let doc = self
            .counters
            .find_one(doc! { "_id": id })
            .await
            .map_err(LimitsError::storage)?;
        let Some(doc) = doc else {
            return Ok((0, now));
        };
        let expire_at = doc
            .get("expireAt")
            .and_then(|b| b.as_datetime())
            .map(|d| d.to_system_time())
            .unwrap_or(now);
        if expire_at <= now {
            return Ok((0, now));
        }
        let value = doc.get_i64("value").unwrap_or(0) as u64;
        Ok((value, expire_at))
    }
}

fn to_bson_time(t: SystemTime) -> Bson {
    Bson::DateTime(BsonDateTime::from_system_time(t))
}

#[derive(Debug, thiserror::Error)]
#[error("mongodb driver error: {0}")]
struct MongoDriverError(String);

#[async_trait]
impl AsyncStorage for AsyncMongoStorage {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let _span = debug_span!("mongodb.incr", key = %key, elastic).entered();
        self.incr_counter(key, expiry, amount, elastic, SystemTime::now()).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        Ok(self.read_counter(key, SystemTime::now()).await?.0)
    }

    async fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        Ok(self.read_counter(key, SystemTime::now()).await?.1)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.counters
            .delete_one(doc! { "_id": key })
            .await
            .map_err(LimitsError::storage)?;
        self.windows
            .delete_one(doc! { "_id": key })
            .await
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    async fn reset(&self) -> Result<Option<u64>> {
        let counters = self
            .counters
            .delete_many(doc! {})
            .await
            .map_err(LimitsError::storage)?
            .deleted_count;
        let windows = self
            .windows
            .delete_many(doc! {})
            .await
            .map_err(LimitsError::storage)?
            .deleted_count;
        Ok(Some(counters + windows))
    }

    async fn check(&self) -> bool {
        self.counters
            .find_one(doc! {})
            .await
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
impl AsyncMovingWindowStorage for AsyncMongoStorage {
    /// Conditional `updateOne` (§4.1.4): the filter requires the entry at
    /// position `limit - amount` to be absent or older than `now - expiry`;
    /// `$push`/`$each`/`$position`/`$slice` maintains the capped,
    /// newest-first list. A duplicate-key error means an existing document
    /// failed the capacity filter (`upsert` tried to insert a sibling with
    /// the same `_id`) — treated as refusal, not a propagated error.
    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        if amount == 0 || amount > limit {
            return Ok(false);
        }
        let now = SystemTime::now();
        let cutoff = to_bson_time(now - expiry);
        let guard_index = (limit - amount) as i64;
        let guard_path = format!("entries.{guard_index}");
        let filter = doc! {
            "_id": key,
            "$or": [
                { &guard_path: { "$exists": false } },
                { &guard_path: { "$lt": &cutoff } },
            ]
        };
        let now_bson = to_bson_time(now);
        let entries: Vec<Bson> = std::iter::repeat(now_bson.clone()).take(amount as usize).collect();
        let update = doc! {
            "$push": { "entries": { "$each": entries, "$position": 0, "$slice": limit as i64 } },
            "$set": { "expireAt": to_bson_time(now + expiry) },
        };
        let opts = UpdateOptions::builder().upsert(true).build();
        match self
            .windows
            .update_one(filter, update)
            .with_options(opts)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(LimitsError::storage(e)),
        }
    }

    async fn get_moving_window(&self, key: &str, _limit: u64, expiry: Duration) -> Result<(SystemTime, u64)> {
        let now = SystemTime::now();
        let cutoff = now - expiry;
        let doc = self
            .windows
            .find_one(doc! { "_id": key })
            .await
            .map_err(LimitsError::storage)?;
        let Some(doc) = doc else {
            return Ok((now, 0));
        };
        let entries = doc.get_array("entries").ok().cloned().unwrap_or_default();
        let active: Vec<SystemTime> = entries
            .iter()
            .filter_map(|b| b.as_datetime())
            .map(|d| d.to_system_time())
            .filter(|t| *t >= cutoff)
            .collect();
        match active.iter().min() {
            Some(oldest) => Ok((*oldest, active.len() as u64)),
            None => Ok((now, 0)),
        }
    }
}

#[async_trait]
impl AsyncSlidingWindowCounterStorage for AsyncMongoStorage {
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
        let (cur_id, prev_id) = Self::sliding_ids(key, expiry, now);
        let (prev_count, prev_expire_at) = self.read_counter(&prev_id, now).await?;
        let prev_ttl = prev_expire_at.duration_since(now).unwrap_or(Duration::ZERO);
        let (cur_count, _) = self.read_counter(&cur_id, now).await?;

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

        let post = self.incr_counter(&cur_id, expiry * 2, amount, false, now).await?;
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
            self.decr_counter(&cur_id, amount).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let (cur_id, prev_id) = Self::sliding_ids(key, expiry, now);
        let (current_count, current_expire_at) = self.read_counter(&cur_id, now).await?;
        let (previous_count, previous_expire_at) = self.read_counter(&prev_id, now).await?;
        Ok(SlidingWindowSample {
            previous_count,
            previous_ttl: previous_expire_at.duration_since(now).unwrap_or(Duration::ZERO),
            current_count,
            current_ttl: current_expire_at.duration_since(now).unwrap_or(Duration::ZERO),
        })
    }

    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (cur_id, prev_id) = Self::sliding_ids(key, expiry, now);
        self.counters
            .delete_many(doc! { "_id": { "$in": [cur_id, prev_id] } })
            .await
            .map_err(LimitsError::storage)?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), mongodb::error::ErrorKind::Write(
        mongodb::error::WriteFailure::WriteError(we)
    ) if we.code == 11000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_ids_derive_from_window() {
        let now = UNIX_EPOCH + Duration::from_secs(125);
        let (cur, prev) = AsyncMongoStorage::sliding_ids("k", Duration::from_secs(60), now);
        assert_eq!(cur, "k/2");
        assert_eq!(prev, "k/1");
    }
}
