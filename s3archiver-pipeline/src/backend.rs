//! The pipeline coordinator (§4.5–§4.8): ingest queue, per-log state map, the consumer worker,
//! rotation, and startup recovery of orphaned staging/archive files.

use crate::compression::{CompressDone, CompressionStage};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::staging::StagingStore;
use crate::upload::{UploadDone, UploadStage};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use s3archiver_core::{BackendConfig, Result, RotationInput, RotationPolicy, now_ms};
use s3archiver_store::ObjectStoreClient;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Bounded ingest queue capacity (§6).
pub const INGEST_QUEUE_CAP: usize = 100_000;
const CONSUMER_TICK: Duration = Duration::from_millis(200);
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(100);

fn default_base_dir() -> PathBuf {
    PathBuf::from("/tmp/Logentries/Agent/S3/")
}

/// One per live `log_name` (§3). Mutated only by the consumer worker, under the map lock.
#[derive(Debug, Clone)]
pub struct LogState {
    pub staging_path: PathBuf,
    pub token: String,
    pub size: u64,
    pub first_msg_ts: Option<i64>,
}

struct LogEntry {
    log_name: String,
    data: Vec<u8>,
    size: u64,
    timestamp: i64,
}

/// The archiving backend pipeline: ingest queue, per-log state map, rotation, and the three
/// background workers (consumer, compressor, uploader).
///
/// Holds a [`Weak`] reference to its own `Arc` so that `&self` methods can mint an owned
/// `Arc<Self>` wherever a completion callback or a spawned task needs one to outlive the call
/// that created it.
pub struct ArchivingBackend {
    config: BackendConfig,
    staging: StagingStore,
    rotation_policy: RotationPolicy,
    logs: Mutex<HashMap<String, LogState>>,
    ingest_queue: Mutex<VecDeque<LogEntry>>,
    consumer_notify: Notify,
    stop: AtomicBool,
    compression_stage: CompressionStage,
    upload_stage: UploadStage,
    metrics: Arc<PipelineMetrics>,
    consumer_handle: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<ArchivingBackend>,
}

impl ArchivingBackend {
    /// Resolves the staging base directory, ensures it exists, constructs the three background
    /// stages, runs startup recovery over any orphaned `.log`/`.log.gz` files, and spawns the
    /// consumer worker. Returns an error (rather than calling `process::exit`) when the base
    /// directory is shadowed by a regular file — callers that want `die_on_errors` semantics act
    /// on that `Err` themselves.
    pub async fn new(config: BackendConfig, object_store: Arc<dyn ObjectStoreClient>) -> Result<Arc<Self>> {
        let base_dir = config.base_dir.clone().unwrap_or_else(default_base_dir);
        let staging = StagingStore::new(base_dir);
        staging.ensure_base_dir().await?;

        let metrics = Arc::new(PipelineMetrics::new());
        let compression_stage = CompressionStage::new(metrics.clone());
        let upload_stage = UploadStage::new(object_store, metrics.clone());

        let backend = Arc::new_cyclic(|weak| Self {
            config,
            staging,
            rotation_policy: RotationPolicy::new(),
            logs: Mutex::new(HashMap::new()),
            ingest_queue: Mutex::new(VecDeque::new()),
            consumer_notify: Notify::new(),
            stop: AtomicBool::new(false),
            compression_stage,
            upload_stage,
            metrics,
            consumer_handle: Mutex::new(None),
            self_ref: weak.clone(),
        });

        backend.recover_startup_state().await;

        let consumer = backend.handle();
        let handle = tokio::spawn(async move { run_consumer(consumer).await });
        *backend.consumer_handle.lock() = Some(handle);

        Ok(backend)
    }

    /// An owned `Arc` to this backend, for closures and spawned tasks that must outlive the
    /// call that creates them. Panics only if called after the owning `Arc` has been dropped,
    /// which cannot happen from a method invoked through `&self`.
    fn handle(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("backend dropped while a method on it was still running")
    }

    pub fn base_dir(&self) -> &Path {
        self.staging.base_dir()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Snapshot of a log's current bookkeeping, for tests and diagnostics.
    pub fn log_state(&self, log_name: &str) -> Option<LogState> {
        self.logs.lock().get(log_name).cloned()
    }

    /// Signals all three workers to stop and waits (bounded) for the consumer to finish its
    /// current item. Does not drain queued work — anything left in memory is recoverable from
    /// disk on the next startup (§4.8), not lost permanently.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.consumer_notify.notify_waiters();

        let handle = self.consumer_handle.lock().take();
        if let Some(handle) = handle
            && tokio::time::timeout(Duration::from_secs(5), handle).await.is_err()
        {
            warn!("consumer worker did not stop within shutdown timeout");
        }

        self.compression_stage.stop().await;
        self.upload_stage.stop().await;
    }

    // ---- producer entry point (§4.6) ----------------------------------------------------

    /// Accepts one already-formatted record for `log_name`/`token`. Empty payloads are a silent
    /// no-op (counted in metrics, not treated as an error).
    pub async fn put_data(&self, log_name: &str, token: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let mut data = data.into();
        if data.is_empty() {
            self.metrics.empty_payloads_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let timestamp = now_ms();

        if !self.logs.lock().contains_key(log_name) {
            self.create_log_state(log_name, token).await;
        }

        {
            let mut logs = self.logs.lock();
            if let Some(state) = logs.get_mut(log_name)
                && state.first_msg_ts.is_none()
            {
                state.first_msg_ts = Some(timestamp);
            }
        }

        if !self.config.no_timestamps {
            let mut prefixed = format!("{timestamp} ").into_bytes();
            prefixed.extend_from_slice(&data);
            data = prefixed;
        }
        let size = data.len() as u64;

        loop {
            let full = self.ingest_queue.lock().len() >= INGEST_QUEUE_CAP;
            if !full {
                break;
            }
            tokio::time::sleep(BACKPRESSURE_SLEEP).await;
        }

        self.ingest_queue.lock().push_back(LogEntry {
            log_name: log_name.to_string(),
            data,
            size,
            timestamp,
        });
        self.metrics.entries_queued.fetch_add(1, Ordering::Relaxed);
        self.consumer_notify.notify_one();

        Ok(())
    }

    /// Lazily creates the `LogState` for a previously unseen `log_name`, recovering `size` and
    /// `first_msg_ts` from an existing staging file left over from a prior process (§3, §4.2).
    async fn create_log_state(&self, log_name: &str, token: &str) {
        let staging_path = self.staging.staging_path(log_name, token);

        let recovered_size = if StagingStore::exists_regular(&staging_path).await {
            tokio::fs::metadata(&staging_path).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        let recovered_ts = StagingStore::recover_first_ts(&staging_path).await;

        self.logs.lock().entry(log_name.to_string()).or_insert_with(|| LogState {
            staging_path,
            token: token.to_string(),
            size: recovered_size,
            first_msg_ts: recovered_ts,
        });
    }

    // ---- consumer worker (§4.5) ----------------------------------------------------------

    async fn process_entry(&self, item: LogEntry) {
        let should_rotate = {
            let mut logs = self.logs.lock();
            let Some(state) = logs.get_mut(&item.log_name) else {
                error!(log_name = %item.log_name, "consumer received entry for a log with no state");
                return;
            };

            if state.first_msg_ts.is_none() {
                state.first_msg_ts = Some(item.timestamp);
            }

            !self.config.no_logs_rotation
                && self.rotation_policy.needs_rotation(
                    RotationInput {
                        size: state.size,
                        first_msg_ts: state.first_msg_ts,
                    },
                    item.size,
                    item.timestamp,
                )
        };

        if should_rotate && let Err(e) = self.rotate(&item.log_name).await {
            warn!(log_name = %item.log_name, error = %e, "rotation failed, staging file will keep growing");
        }

        let staging_path = match self.logs.lock().get(&item.log_name) {
            Some(state) => state.staging_path.clone(),
            None => return,
        };

        match append_to_staging(&staging_path, &item.data).await {
            Ok(()) => {
                if let Some(state) = self.logs.lock().get_mut(&item.log_name) {
                    state.size += item.size;
                }
                self.metrics.entries_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(log_name = %item.log_name, path = %staging_path.display(), error = %e, "failed to append entry to staging file");
            }
        }
    }

    // ---- rotation (§4.7) -------------------------------------------------------------------

    async fn rotate(&self, log_name: &str) -> Result<()> {
        let (token, first_msg_ts, staging_path) = {
            let logs = self.logs.lock();
            let state = logs
                .get(log_name)
                .ok_or_else(|| s3archiver_core::Error::LogNotFound(log_name.to_string()))?;
            (state.token.clone(), state.first_msg_ts, state.staging_path.clone())
        };

        if !StagingStore::exists_regular(&staging_path).await {
            // Nothing has been written to disk yet (rotation triggered by an oversized first
            // chunk alone); bookkeeping is already at its post-rotation defaults.
            if let Some(state) = self.logs.lock().get_mut(log_name) {
                state.size = 0;
                state.first_msg_ts = None;
            }
            return Ok(());
        }

        let numeric_prefix = first_msg_ts.unwrap_or_else(now_ms);
        let target = match self.staging.rotation_target(&token, numeric_prefix).await {
            Ok(target) => target,
            Err(e) => {
                error!(log_name, error = %e, "rotation path exhausted; staging file will keep growing");
                self.metrics.rotation_exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        tokio::fs::rename(&staging_path, &target).await?;
        info!(log_name, target = %target.display(), "rotated staging file");

        if let Some(state) = self.logs.lock().get_mut(log_name) {
            state.size = 0;
            state.first_msg_ts = None;
        }
        self.metrics.rotations.fetch_add(1, Ordering::Relaxed);

        if !self.config.no_logs_compressing {
            self.compression_stage.submit(target, self.make_compress_done());
        }

        Ok(())
    }

    // ---- callback chaining: compress -> upload -> delete (§4.7) ----------------------------

    fn make_compress_done(&self) -> CompressDone {
        let backend = self.handle();
        Arc::new(move |src, archive| {
            let backend = backend.clone();
            Box::pin(async move { backend.compress_done(src, archive).await })
        })
    }

    async fn compress_done(&self, src: Option<PathBuf>, archive: PathBuf) {
        if let Some(src) = src
            && let Err(e) = tokio::fs::remove_file(&src).await
        {
            warn!(path = %src.display(), error = %e, "failed to remove rotated log after compression");
        }

        let destination_key = self.destination_key(&archive);
        self.upload_stage.submit(archive, destination_key, self.make_upload_done());
    }

    fn destination_key(&self, archive: &Path) -> String {
        let relative = archive.strip_prefix(self.staging.base_dir()).unwrap_or(archive);
        format!("Logentries/Agent/{}", relative.display())
    }

    fn make_upload_done(&self) -> UploadDone {
        let backend = self.handle();
        Arc::new(move |archive, key| {
            let backend = backend.clone();
            Box::pin(async move { backend.upload_done(archive, key).await })
        })
    }

    async fn upload_done(&self, archive: PathBuf, _destination_key: String) {
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => {
                self.metrics.archives_deleted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(path = %archive.display(), error = %e, "failed to remove archive after upload");
            }
        }

        if let Some(parent) = archive.parent()
            && let Ok(mut entries) = tokio::fs::read_dir(parent).await
            && entries.next_entry().await.ok().flatten().is_none()
        {
            let _ = tokio::fs::remove_dir(parent).await;
        }
    }

    // ---- startup recovery (§4.8) -----------------------------------------------------------

    async fn recover_startup_state(&self) {
        if let Err(e) = self.enumerate_existing_archives().await {
            warn!(error = %e, "startup scan for existing archives failed");
        }
        if let Err(e) = self.enumerate_existing_logs().await {
            warn!(error = %e, "startup scan for existing rotated logs failed");
        }
    }

    /// Non-recursive scan of the base directory for orphaned rotated-but-uncompressed files.
    async fn enumerate_existing_logs(&self) -> Result<()> {
        let pattern = Regex::new(r"^[0-9_]+\.log$").expect("static regex");
        let mut entries = match tokio::fs::read_dir(self.staging.base_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !pattern.is_match(&name) {
                continue;
            }

            let path = entry.path();
            info!(path = %path.display(), "found orphaned rotated log at startup, queuing for compression");
            if !self.config.no_logs_compressing {
                self.compression_stage.submit(path, self.make_compress_done());
            }
        }
        Ok(())
    }

    /// Recursive scan of the base directory for orphaned compressed-but-unuploaded archives.
    async fn enumerate_existing_archives(&self) -> Result<()> {
        let pattern = Arc::new(Regex::new(r"^[0-9_]+\.log\.gz$").expect("static regex"));
        let base = self.staging.base_dir().to_path_buf();
        scan_archives(self.handle(), base, pattern).await
    }
}

/// Standalone (not a method) so the recursion can hold an owned `Arc<ArchivingBackend>` without
/// needing an unstable `self: &Arc<Self>` receiver.
fn scan_archives(backend: Arc<ArchivingBackend>, dir: PathBuf, pattern: Arc<Regex>) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();

            if file_type.is_dir() {
                scan_archives(backend.clone(), path, pattern.clone()).await?;
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if pattern.is_match(name) {
                info!(path = %path.display(), "found orphaned archive at startup, queuing for upload");
                backend.compress_done(None, path).await;
            }
        }
        Ok(())
    })
}

async fn run_consumer(backend: Arc<ArchivingBackend>) {
    loop {
        if backend.stop.load(Ordering::Acquire) {
            return;
        }

        let _ = tokio::time::timeout(CONSUMER_TICK, backend.consumer_notify.notified()).await;

        if backend.stop.load(Ordering::Acquire) {
            return;
        }

        loop {
            if backend.stop.load(Ordering::Acquire) {
                break;
            }
            let item = backend.ingest_queue.lock().pop_front();
            let Some(item) = item else { break };
            backend.process_entry(item).await;
        }
    }
}

async fn append_to_staging(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(data).await?;
    Ok(())
}
