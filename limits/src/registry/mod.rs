//! The full scheme registry (§5): extends [`limits_core::registry`]'s
//! `memory`-only match with whichever driver crates this build enabled.
//!
//! Each arm is feature-gated because the corresponding driver is an
//! optional Cargo dependency, not a dynamically loaded plugin (§9 —
//! "explicit registration, not a metaclass").

pub mod aio;

use std::sync::Arc;

use limits_core::errors::{LimitsError, Result};
use limits_core::registry::StorageUri;
use limits_core::storage::Storage;

/// Construct a synchronous storage for `uri`, dispatching on its scheme
/// (§6's scheme table). Unknown or disabled-feature schemes are a
/// [`LimitsError::Configuration`].
pub fn storage_from_uri(uri: &str) -> Result<Arc<dyn Storage>> {
    let parsed = StorageUri::parse(uri)?;

    match parsed.scheme.as_str() {
        #[cfg(feature = "redis")]
        "redis" | "rediss" | "redis+cluster" | "redis+sentinel" => {
            Ok(Arc::new(limits_redis::RedisStorage::new(uri)?))
        }

        #[cfg(feature = "memcached")]
        "memcached" => Ok(Arc::new(limits_memcached::MemcachedStorage::new(uri)?)),

        #[cfg(feature = "mongodb")]
        "mongodb" | "mongodb+srv" => Ok(Arc::new(limits_mongodb::MongoStorage::new(uri)?)),

        #[cfg(feature = "etcd")]
        "etcd" => Ok(Arc::new(limits_etcd::EtcdStorage::new(uri)?)),

        "memory" => limits_core::registry::storage_from_uri(uri),

        other => Err(LimitsError::configuration(format!(
            "unknown or disabled storage scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_memory() {
        let storage = storage_from_uri("memory://").unwrap();
        assert!(storage.check());
    }

    #[test]
    fn unknown_scheme_is_configuration_error() {
        let err = storage_from_uri("not-a-real-scheme://host").unwrap_err();
        assert!(matches!(err, LimitsError::Configuration(_)));
    }
}
