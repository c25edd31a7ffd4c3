use std::sync::Arc;

use crate::errors::{LimitsError, Result};
use crate::registry::StorageUri;

use super::memory::AsyncMemoryStorage;
use super::storage::AsyncStorage;

/// Async mirror of [`crate::registry::storage_from_uri`]. Accepts both
/// `memory://` and `async+memory://` (the `async+` prefix is implied here
/// but tolerated for symmetry with the sync factory).
pub fn storage_from_uri(uri: &str) -> Result<Arc<dyn AsyncStorage>> {
    let parsed = StorageUri::parse(uri)?;
    match parsed.scheme.as_str() {
        "memory" => Ok(Arc::new(AsyncMemoryStorage::new())),
        other => Err(LimitsError::configuration(format!(
            "unknown storage scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_memory_scheme() {
        let storage = storage_from_uri("async+memory://").unwrap();
        assert!(storage.check().await);
    }
}
