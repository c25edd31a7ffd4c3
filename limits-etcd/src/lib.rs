//! etcd storage driver for the rate-limiting strategy core (§4.1.5).
//!
//! [`aio::AsyncEtcdStorage`] is the primary, natively-async implementation;
//! [`storage::EtcdStorage`] is a blocking facade over it for callers on
//! the synchronous strategy surface.

pub mod aio;
pub mod storage;

pub use aio::AsyncEtcdStorage;
pub use storage::EtcdStorage;
