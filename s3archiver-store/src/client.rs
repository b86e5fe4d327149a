use async_trait::async_trait;
use std::path::Path;

/// A closed set of error classes the upload stage can act on, independent of whatever transport
/// error type a given SDK call actually returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    AccessDenied,
    Other,
    Unknown,
}

/// Maps a transport status code to a closed error class. `None` (no status code could be
/// extracted from the error at all) maps to `Unknown`; any status this table doesn't recognize
/// maps to `Other`.
pub fn decode_error(status: Option<u16>) -> ErrorClass {
    match status {
        Some(403) => ErrorClass::AccessDenied,
        Some(404) => ErrorClass::NotFound,
        Some(_) => ErrorClass::Other,
        None => ErrorClass::Unknown,
    }
}

/// Capability abstraction the upload stage calls into. The pipeline never names a concrete SDK
/// type; it only depends on this trait.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Idempotent login; caches a session internally. Returns `false` when the client is
    /// disabled or the login attempt failed.
    async fn login(&self) -> bool;

    /// Confirms (and caches) that `bucket_name` is reachable with the current credentials.
    async fn get_bucket(&self, bucket_name: &str) -> bool;

    /// Uploads `source_path` to `destination_key`. Returns `Ok(true)` iff the number of bytes
    /// the store reports receiving equals the local file size.
    async fn upload(&self, source_path: &Path, destination_key: &str) -> s3archiver_core::Result<bool>;

    /// `has_credentials && transport_available`, decided once at construction.
    fn is_enabled(&self) -> bool;
}

/// A client that never talks to the network: `is_enabled()` is always `false` and every
/// operation is a no-op failure. Used when credentials are missing, the feature flag is off, or
/// in tests that exercise the pipeline without a live object store.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledObjectStore;

#[async_trait]
impl ObjectStoreClient for DisabledObjectStore {
    async fn login(&self) -> bool {
        false
    }

    async fn get_bucket(&self, _bucket_name: &str) -> bool {
        false
    }

    async fn upload(&self, _source_path: &Path, _destination_key: &str) -> s3archiver_core::Result<bool> {
        Ok(false)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_maps_known_codes() {
        assert_eq!(decode_error(Some(403)), ErrorClass::AccessDenied);
        assert_eq!(decode_error(Some(404)), ErrorClass::NotFound);
        assert_eq!(decode_error(Some(500)), ErrorClass::Other);
        assert_eq!(decode_error(None), ErrorClass::Unknown);
    }

    #[tokio::test]
    async fn disabled_store_is_always_disabled() {
        let store = DisabledObjectStore;
        assert!(!store.is_enabled());
        assert!(!store.login().await);
        assert_eq!(store.upload(Path::new("/tmp/x"), "k").await.unwrap(), false);
    }
}
