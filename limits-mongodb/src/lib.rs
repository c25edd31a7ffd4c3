//! MongoDB storage driver for the rate-limiting strategy core (§4.1.4).
//!
//! [`aio::AsyncMongoStorage`] is the primary, natively-async implementation;
//! [`storage::MongoStorage`] is a blocking facade over it for callers on
//! the synchronous strategy surface.

pub mod aio;
pub mod storage;

pub use aio::AsyncMongoStorage;
pub use storage::MongoStorage;
