//! Asynchronous gzip compression of rotated staging files (§4.3).
//!
//! Work items accumulate on a FIFO list behind a plain [`std::sync::Mutex`] (the critical
//! section is always a `VecDeque` push/pop, never an `.await`); a single background task drains
//! the list, woken by a [`Notify`] with a 300-second fallback so a crash-recovered backlog still
//! gets serviced even if nothing ever calls `submit` again. Failed items are re-appended for the
//! next cycle — compression is retried forever and never kills the worker.

use crate::metrics::PipelineMetrics;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const ARCHIVE_EXTENSION: &str = ".gz";

/// Invoked once per task that reaches a terminal (successful) outcome.
///
/// `source` is `Some(path)` when this call freshly gzipped `path`, and `None` when the task was
/// an already-compressed orphan discovered during startup recovery — in both cases `archive` is
/// the `.gz` path ready for upload.
pub type CompressDone = Arc<dyn Fn(Option<PathBuf>, PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

struct CompressionTask {
    source: PathBuf,
    on_done: CompressDone,
}

pub struct CompressionStage {
    queue: Arc<Mutex<VecDeque<CompressionTask>>>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CompressionStage {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(Self::run(queue.clone(), notify.clone(), stop.clone(), metrics));

        Self {
            queue,
            notify,
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Appends a task to the back of the work list and wakes the worker.
    pub fn submit(&self, source: PathBuf, on_done: CompressDone) {
        self.queue.lock().unwrap().push_back(CompressionTask { source, on_done });
        self.notify.notify_one();
    }

    /// Signals the worker to stop and waits for its current batch to finish.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify.notify_waiters();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(
        queue: Arc<Mutex<VecDeque<CompressionTask>>>,
        notify: Arc<Notify>,
        stop: Arc<AtomicBool>,
        metrics: Arc<PipelineMetrics>,
    ) {
        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }

            let _ = tokio::time::timeout(IDLE_TIMEOUT, notify.notified()).await;

            if stop.load(Ordering::Acquire) {
                return;
            }

            let batch: Vec<CompressionTask> = {
                let mut q = queue.lock().unwrap();
                q.drain(..).collect()
            };

            if batch.is_empty() {
                continue;
            }

            let mut failed = Vec::new();

            for task in batch {
                match compress_one(&task.source).await {
                    Ok(CompressOutcome::Compressed(archive)) => {
                        metrics.compressions_succeeded.fetch_add(1, Ordering::Relaxed);
                        (task.on_done)(Some(task.source), archive).await;
                    }
                    Ok(CompressOutcome::AlreadyArchived) => {
                        metrics.compressions_succeeded.fetch_add(1, Ordering::Relaxed);
                        (task.on_done)(None, task.source).await;
                    }
                    Err(e) => {
                        warn!(source = %task.source.display(), error = %e, "compression failed, will retry");
                        metrics.compressions_failed.fetch_add(1, Ordering::Relaxed);
                        remove_partial_archive(&task.source).await;
                        failed.push(task);
                    }
                }
            }

            if !failed.is_empty() {
                metrics.compression_retries.fetch_add(failed.len() as u64, Ordering::Relaxed);
                let mut q = queue.lock().unwrap();
                for task in failed {
                    q.push_back(task);
                }
            }
        }
    }
}

enum CompressOutcome {
    Compressed(PathBuf),
    AlreadyArchived,
}

async fn compress_one(source: &Path) -> std::io::Result<CompressOutcome> {
    if source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
    {
        return Ok(CompressOutcome::AlreadyArchived);
    }

    info!(source = %source.display(), "compressing");

    let source = source.to_path_buf();
    let archive = gzip_append_extension(&source);
    let archive_for_blocking = archive.clone();

    tokio::task::spawn_blocking(move || gzip_file(&source, &archive_for_blocking))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

    Ok(CompressOutcome::Compressed(archive))
}

fn gzip_append_extension(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn gzip_file(source: &Path, archive: &Path) -> std::io::Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use std::io::{BufReader, copy};

    let mut src = BufReader::new(File::open(source)?);
    let dst = File::create(archive)?;
    let mut encoder = GzEncoder::new(dst, Compression::default());
    copy(&mut src, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

async fn remove_partial_archive(source: &Path) {
    let archive = gzip_append_extension(source);
    if tokio::fs::metadata(&archive).await.is_ok()
        && let Err(e) = tokio::fs::remove_file(&archive).await
    {
        error!(archive = %archive.display(), error = %e, "failed to remove partial compression artifact");
    }
}
