//! Asynchronous upload of compressed archives to the object store (§4.4).
//!
//! Mirrors [`crate::compression::CompressionStage`]'s FIFO work-list/notify worker shape, with a
//! 10-second idle wake period — the value the original implementation's own comment names,
//! rather than the `CHECK_PERIOD = 300` constant it actually used (see DESIGN.md). When the
//! underlying [`ObjectStoreClient`] reports itself disabled, the stage still drains its queue
//! into `failed` every cycle rather than uploading, so nothing is silently dropped once a client
//! becomes available again — though in this implementation `is_enabled()` is decided once at
//! construction and never flips.

use crate::metrics::PipelineMetrics;
use futures::future::BoxFuture;
use s3archiver_store::ObjectStoreClient;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoked once per archive that uploads successfully.
pub type UploadDone = Arc<dyn Fn(PathBuf, String) -> BoxFuture<'static, ()> + Send + Sync>;

struct UploadTask {
    archive: PathBuf,
    destination_key: String,
    on_done: UploadDone,
}

pub struct UploadStage {
    queue: Arc<Mutex<VecDeque<UploadTask>>>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UploadStage {
    pub fn new(client: Arc<dyn ObjectStoreClient>, metrics: Arc<PipelineMetrics>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let stop = Arc::new(AtomicBool::new(false));

        if client.is_enabled() {
            info!("upload stage enabled");
        } else {
            info!("upload stage disabled (no credentials or transport unavailable); archives will accumulate on disk");
        }

        let handle = tokio::spawn(Self::run(queue.clone(), notify.clone(), stop.clone(), client, metrics));

        Self {
            queue,
            notify,
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Appends a task to the back of the work list and wakes the worker.
    pub fn submit(&self, archive: PathBuf, destination_key: String, on_done: UploadDone) {
        self.queue.lock().unwrap().push_back(UploadTask {
            archive,
            destination_key,
            on_done,
        });
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
        queue: Arc<Mutex<VecDeque<UploadTask>>>,
        notify: Arc<Notify>,
        stop: Arc<AtomicBool>,
        client: Arc<dyn ObjectStoreClient>,
        metrics: Arc<PipelineMetrics>,
    ) {
        if client.is_enabled() {
            client.login().await;
        }

        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }

            let _ = tokio::time::timeout(IDLE_TIMEOUT, notify.notified()).await;

            if stop.load(Ordering::Acquire) {
                return;
            }

            let batch: Vec<UploadTask> = {
                let mut q = queue.lock().unwrap();
                q.drain(..).collect()
            };

            if batch.is_empty() {
                continue;
            }

            let mut failed = Vec::new();

            for task in batch {
                if !client.is_enabled() {
                    failed.push(task);
                    continue;
                }

                info!(archive = %task.archive.display(), key = %task.destination_key, "uploading");

                match client.upload(&task.archive, &task.destination_key).await {
                    Ok(true) => {
                        metrics.uploads_succeeded.fetch_add(1, Ordering::Relaxed);
                        (task.on_done)(task.archive, task.destination_key).await;
                    }
                    Ok(false) => {
                        warn!(archive = %task.archive.display(), "upload reported size mismatch, will retry");
                        metrics.uploads_failed.fetch_add(1, Ordering::Relaxed);
                        failed.push(task);
                    }
                    Err(e) => {
                        warn!(archive = %task.archive.display(), error = %e, "upload failed, will retry");
                        metrics.uploads_failed.fetch_add(1, Ordering::Relaxed);
                        failed.push(task);
                    }
                }
            }

            if !failed.is_empty() {
                metrics.upload_retries.fetch_add(failed.len() as u64, Ordering::Relaxed);
                let mut q = queue.lock().unwrap();
                for task in failed {
                    q.push_back(task);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3archiver_core::Result;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        enabled: bool,
        uploaded: StdMutex<Vec<(PathBuf, String)>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ObjectStoreClient for FakeStore {
        async fn login(&self) -> bool {
            self.enabled
        }

        async fn get_bucket(&self, _bucket_name: &str) -> bool {
            self.enabled
        }

        async fn upload(&self, source_path: &Path, destination_key: &str) -> Result<bool> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Ok(false);
            }
            self.uploaded
                .lock()
                .unwrap()
                .push((source_path.to_path_buf(), destination_key.to_string()));
            Ok(true)
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    #[tokio::test]
    async fn successful_upload_invokes_callback() {
        let store = Arc::new(FakeStore {
            enabled: true,
            ..Default::default()
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let stage = UploadStage::new(store.clone(), metrics.clone());

        let done: Arc<StdMutex<Option<(PathBuf, String)>>> = Arc::new(StdMutex::new(None));
        let done_clone = done.clone();
        let on_done: UploadDone = Arc::new(move |archive, key| {
            let done_clone = done_clone.clone();
            Box::pin(async move {
                *done_clone.lock().unwrap() = Some((archive, key));
            })
        });

        stage.submit(PathBuf::from("/tmp/1000.log.gz"), "Logentries/Agent/tok/1000.log.gz".into(), on_done);
        stage.notify.notify_one();

        for _ in 0..50 {
            if done.lock().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(done.lock().unwrap().is_some());
        assert_eq!(store.uploaded.lock().unwrap().len(), 1);
        assert_eq!(metrics.snapshot().uploads_succeeded, 1);

        stage.stop().await;
    }

    #[tokio::test]
    async fn disabled_store_retries_forever() {
        let store = Arc::new(FakeStore::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let stage = UploadStage::new(store, metrics);

        let on_done: UploadDone = Arc::new(|_, _| Box::pin(async {}));
        stage.submit(PathBuf::from("/tmp/x.log.gz"), "key".into(), on_done);
        stage.notify.notify_one();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stage.queue.lock().unwrap().len(), 1);

        stage.stop().await;
    }

    #[tokio::test]
    async fn failed_upload_is_requeued() {
        let store = Arc::new(FakeStore {
            enabled: true,
            ..Default::default()
        });
        store.fail_next.store(true, Ordering::SeqCst);
        let metrics = Arc::new(PipelineMetrics::new());
        let stage = UploadStage::new(store, metrics.clone());

        let on_done: UploadDone = Arc::new(|_, _| Box::pin(async {}));
        stage.submit(PathBuf::from("/tmp/y.log.gz"), "key".into(), on_done);
        stage.notify.notify_one();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.snapshot().uploads_failed, 1);
        assert_eq!(stage.queue.lock().unwrap().len(), 1);

        stage.stop().await;
    }
}
