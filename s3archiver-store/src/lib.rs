pub mod client;
pub mod s3;

pub use client::{DisabledObjectStore, ErrorClass, ObjectStoreClient, decode_error};
pub use s3::S3ObjectStore;
