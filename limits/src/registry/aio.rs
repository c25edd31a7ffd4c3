//! Async mirror of [`super::storage_from_uri`] (§5). Accepts both bare and
//! `async+`-prefixed schemes (the prefix is implied here but tolerated for
//! symmetry with the sync factory).
//!
//! Unlike the sync factory, this one is itself `async`: a remote driver's
//! constructor performs a connection handshake, which is a suspending call
//! on the async side rather than something to hide behind a blocking `new`.

use std::sync::Arc;

use limits_core::aio::storage::AsyncStorage;
use limits_core::errors::{LimitsError, Result};
use limits_core::registry::StorageUri;

pub async fn storage_from_uri(uri: &str) -> Result<Arc<dyn AsyncStorage>> {
    let parsed = StorageUri::parse(uri)?;

    match parsed.scheme.as_str() {
        #[cfg(feature = "redis")]
        "redis" | "rediss" | "redis+cluster" | "redis+sentinel" => {
            Ok(Arc::new(limits_redis::aio::AsyncRedisStorage::new(uri).await?))
        }

        #[cfg(feature = "memcached")]
        "memcached" => Ok(Arc::new(limits_memcached::aio::AsyncMemcachedStorage::new(uri)?)),

        #[cfg(feature = "mongodb")]
        "mongodb" | "mongodb+srv" => Ok(Arc::new(limits_mongodb::AsyncMongoStorage::new(uri).await?)),

        #[cfg(feature = "etcd")]
        "etcd" => Ok(Arc::new(limits_etcd::AsyncEtcdStorage::new(uri).await?)),

        "memory" => Ok(Arc::new(limits_core::aio::memory::AsyncMemoryStorage::new())),

        other => Err(LimitsError::configuration(format!(
            "unknown or disabled storage scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_memory() {
        let storage = storage_from_uri("async+memory://").await.unwrap();
        assert!(storage.check().await);
    }

    #[tokio::test]
    async fn unknown_scheme_is_configuration_error() {
        let err = storage_from_uri("not-a-real-scheme://host").await.unwrap_err();
        assert!(matches!(err, LimitsError::Configuration(_)));
    }
}
