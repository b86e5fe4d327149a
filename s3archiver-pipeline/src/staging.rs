//! Filesystem layout for staging files, rotated files, and archives (§3, §4.2, §6).

use s3archiver_core::{Error, Result, parse_leading_timestamp};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const MAX_COLLISION_SUFFIX: u32 = 10;

#[derive(Debug, Clone)]
pub struct StagingStore {
    base_dir: PathBuf,
}

impl StagingStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates the base directory if absent; fails if a non-directory exists at that path.
    pub async fn ensure_base_dir(&self) -> Result<()> {
        match fs::metadata(&self.base_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::BaseDirShadowed(self.base_dir.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.base_dir).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deterministic composition of the active staging path for `log_name`/`token`: no I/O.
    pub fn staging_path(&self, log_name: &str, token: &str) -> PathBuf {
        let hostname = s3archiver_core::formatters::local_hostname();
        self.base_dir
            .join(format!("amazon_s3_{hostname}_{token}_{log_name}"))
    }

    pub async fn exists_regular(path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    /// Reads the first line of `path`, splits on whitespace, and parses the leading token as a
    /// millisecond timestamp. `None` on any failure (missing file, empty file, unparseable head).
    pub async fn recover_first_ts(path: &Path) -> Option<i64> {
        let file = fs::File::open(path).await.ok()?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        let read = reader.read_line(&mut first_line).await.ok()?;
        if read == 0 {
            return None;
        }
        parse_leading_timestamp(&first_line)
    }

    /// Resolves a non-colliding path under `<base>/<token>/`, trying `_1`..`_10` on collision.
    pub async fn rotation_target(&self, token: &str, numeric_prefix: i64) -> Result<PathBuf> {
        let token_dir = self.base_dir.join(token);
        fs::create_dir_all(&token_dir).await?;

        let candidate = token_dir.join(format!("{numeric_prefix}.log"));
        if !Self::exists_regular(&candidate).await {
            return Ok(candidate);
        }

        for suffix in 1..=MAX_COLLISION_SUFFIX {
            let candidate = token_dir.join(format!("{numeric_prefix}_{suffix}.log"));
            if !Self::exists_regular(&candidate).await {
                return Ok(candidate);
            }
        }

        Err(Error::RotationExhausted {
            log_name: token.to_string(),
            dir: token_dir,
            max: MAX_COLLISION_SUFFIX,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ensure_base_dir_creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("nested").join("S3");
        let store = StagingStore::new(base.clone());
        store.ensure_base_dir().await.unwrap();
        assert!(fs::metadata(&base).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn ensure_base_dir_rejects_shadowing_file() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("S3");
        fs::write(&base, b"not a directory").await.unwrap();
        let store = StagingStore::new(base);
        assert!(matches!(
            store.ensure_base_dir().await,
            Err(Error::BaseDirShadowed(_))
        ));
    }

    #[tokio::test]
    async fn recover_first_ts_reads_leading_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("staged.log");
        fs::write(&path, b"1700000000000 hello world\n").await.unwrap();
        assert_eq!(StagingStore::recover_first_ts(&path).await, Some(1700000000000));
    }

    #[tokio::test]
    async fn recover_first_ts_none_on_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.log");
        assert_eq!(StagingStore::recover_first_ts(&path).await, None);
    }

    #[tokio::test]
    async fn rotation_target_resolves_collisions() {
        let tmp = TempDir::new().unwrap();
        let store = StagingStore::new(tmp.path().to_path_buf());

        let first = store.rotation_target("tok", 1000).await.unwrap();
        fs::write(&first, b"x").await.unwrap();
        let second = store.rotation_target("tok", 1000).await.unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("1000_1.log"));
    }

    #[tokio::test]
    async fn rotation_target_exhausts_after_ten_collisions() {
        let tmp = TempDir::new().unwrap();
        let store = StagingStore::new(tmp.path().to_path_buf());
        let token_dir = tmp.path().join("tok");
        fs::create_dir_all(&token_dir).await.unwrap();
        fs::write(token_dir.join("1000.log"), b"x").await.unwrap();
        for i in 1..=MAX_COLLISION_SUFFIX {
            fs::write(token_dir.join(format!("1000_{i}.log")), b"x")
                .await
                .unwrap();
        }

        let result = store.rotation_target("tok", 1000).await;
        assert!(matches!(result, Err(Error::RotationExhausted { .. })));
    }
}
