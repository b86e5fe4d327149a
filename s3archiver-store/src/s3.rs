//! The concrete `ObjectStoreClient` backed by the AWS SDK for S3. Construction never touches the
//! network; `login`, `get_bucket`, and `upload` are the only methods that do.

use crate::client::{ObjectStoreClient, decode_error};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_runtime_api::client::result::SdkError;
use dashmap::DashMap;
use s3archiver_core::{BackendConfig, Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub struct S3ObjectStore {
    config: BackendConfig,
    enabled: bool,
    client: OnceCell<Client>,
    logged_in: AtomicBool,
    bucket_cache: DashMap<String, bool>,
}

impl S3ObjectStore {
    /// Builds a client from a configuration bundle. `is_enabled()` is decided here, once, and
    /// never changes for the lifetime of this value: `has_s3_enabled` must be set and all three
    /// credential fields must be non-empty.
    pub fn new(config: BackendConfig) -> Self {
        let enabled = config.has_s3_enabled && config.has_complete_credentials();

        if enabled {
            info!(bucket = %config.bucket_name, region = %config.region, "S3 archiving enabled");
        } else if config.has_s3_enabled {
            info!("S3 archiving requested but credentials/bucket are incomplete; archives will accumulate on disk");
        } else {
            info!("S3 archiving disabled by configuration; archives will accumulate on disk");
        }

        Self {
            config,
            enabled,
            client: OnceCell::new(),
            logged_in: AtomicBool::new(false),
            bucket_cache: DashMap::new(),
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let credentials = Credentials::new(
                    self.config.account_id.clone(),
                    self.config.secret_key.clone(),
                    None,
                    None,
                    "s3archiver",
                );
                let conf = S3ConfigBuilder::new()
                    .region(Region::new(self.config.region.clone()))
                    .credentials_provider(credentials)
                    .behavior_version_latest()
                    .build();
                Client::from_conf(conf)
            })
            .await
    }
}

/// Extracts the transport-level HTTP status from an SDK call's error, when the failure made it
/// far enough to get a response at all (as opposed to a connect/timeout/construction error).
fn status_code<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn login(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.logged_in.load(Ordering::Acquire) {
            return true;
        }

        // Constructing the client is infallible here (no network call happens until the first
        // request); "login" succeeding just means we have a client ready to use.
        let _ = self.client().await;
        self.logged_in.store(true, Ordering::Release);
        true
    }

    async fn get_bucket(&self, bucket_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(cached) = self.bucket_cache.get(bucket_name) {
            return *cached;
        }

        let client = self.client().await;
        let reachable = match client.head_bucket().bucket(bucket_name).send().await {
            Ok(_) => true,
            Err(e) => {
                let class = decode_error(status_code(&e));
                warn!(bucket = bucket_name, ?class, error = %e, "head_bucket failed");
                false
            }
        };

        self.bucket_cache.insert(bucket_name.to_string(), reachable);
        reachable
    }

    async fn upload(&self, source_path: &Path, destination_key: &str) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if !self.login().await {
            return Ok(false);
        }
        if !self.get_bucket(&self.config.bucket_name).await {
            return Ok(false);
        }

        let file_size = tokio::fs::metadata(source_path).await?.len();
        let body = ByteStream::from_path(source_path)
            .await
            .map_err(|e| Error::ObjectStore(e.to_string()))?;

        let client = self.client().await;
        let result = client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(destination_key)
            .content_length(file_size as i64)
            .body(body)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let class = decode_error(status_code(&e));
                error!(key = destination_key, ?class, error = %e, "upload failed");
                Err(Error::ObjectStore(e.to_string()))
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_s3_enabled_flag() {
        let store = S3ObjectStore::new(BackendConfig::default());
        assert!(!store.is_enabled());
    }

    #[test]
    fn disabled_with_incomplete_credentials() {
        let config = BackendConfig {
            has_s3_enabled: true,
            account_id: "id".into(),
            ..Default::default()
        };
        let store = S3ObjectStore::new(config);
        assert!(!store.is_enabled());
    }

    #[test]
    fn enabled_with_complete_credentials() {
        let config = BackendConfig {
            has_s3_enabled: true,
            account_id: "id".into(),
            secret_key: "secret".into(),
            bucket_name: "bucket".into(),
            ..Default::default()
        };
        let store = S3ObjectStore::new(config);
        assert!(store.is_enabled());
    }
}
