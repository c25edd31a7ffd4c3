//! Redis storage driver for the rate-limiting strategy core (§4.1.2).
//!
//! Implements `Storage`, `MovingWindowStorage`, and
//! `SlidingWindowCounterStorage` against standalone, cluster, sentinel, and
//! unix-socket Redis targets, with every multi-step invariant enforced by a
//! server-side Lua script.
//!
//! [`aio::AsyncRedisStorage`] is the natively-async mirror, built over
//! `ConnectionManager`/`ClusterConnection` rather than blocking connections.

mod client;
mod scripts;

pub mod aio;
pub mod storage;

pub use storage::RedisStorage;
