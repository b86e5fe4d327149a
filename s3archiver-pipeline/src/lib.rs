//! The archiving backend pipeline: ingest queue, per-log state map, rotation, compression, and
//! upload, wired together with crash-recoverable startup scanning.

pub mod backend;
pub mod compression;
pub mod metrics;
pub mod staging;
pub mod upload;

pub use backend::{ArchivingBackend, LogState, INGEST_QUEUE_CAP};
pub use compression::{CompressDone, CompressionStage};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use staging::StagingStore;
pub use upload::{UploadDone, UploadStage};
