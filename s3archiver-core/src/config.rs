//! The configuration contract the archiving backend is constructed from (§6a). Loading this
//! from environment variables, a config file, or instance metadata is out of scope here — the
//! pipeline only owns the typed shape and the "is S3 archiving actually usable" decision.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub has_s3_enabled: bool,
    pub account_id: String,
    pub secret_key: String,
    pub bucket_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub use_config_log_paths: bool,

    /// Overrides the default staging base directory (`/tmp/Logentries/Agent/S3/`).
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    #[serde(default)]
    pub no_logs_rotation: bool,
    #[serde(default)]
    pub no_timestamps: bool,
    #[serde(default)]
    pub no_logs_compressing: bool,

    #[serde(default = "default_true")]
    pub die_on_errors: bool,
    #[serde(default = "default_true")]
    pub print_object_store_statuses: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            has_s3_enabled: false,
            account_id: String::new(),
            secret_key: String::new(),
            bucket_name: String::new(),
            region: default_region(),
            use_config_log_paths: false,
            base_dir: None,
            no_logs_rotation: false,
            no_timestamps: false,
            no_logs_compressing: false,
            die_on_errors: true,
            print_object_store_statuses: true,
        }
    }
}

impl BackendConfig {
    /// Credentials and bucket name are all non-empty — the minimum bar for attempting to talk
    /// to the object store at all.
    pub fn has_complete_credentials(&self) -> bool {
        !self.account_id.is_empty() && !self.secret_key.is_empty() && !self.bucket_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_disables_s3() {
        let config = BackendConfig::default();
        assert!(!config.has_s3_enabled);
        assert!(!config.has_complete_credentials());
    }

    #[test]
    fn incomplete_credentials_are_detected() {
        let mut config = BackendConfig {
            has_s3_enabled: true,
            account_id: "id".into(),
            ..Default::default()
        };
        assert!(!config.has_complete_credentials());
        config.secret_key = "secret".into();
        config.bucket_name = "bucket".into();
        assert!(config.has_complete_credentials());
    }
}
