use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("base directory {0:?} is shadowed by a regular file")]
    BaseDirShadowed(std::path::PathBuf),

    #[error("rotation of {log_name} exhausted all {max} collision suffixes under {dir:?}")]
    RotationExhausted {
        log_name: String,
        dir: std::path::PathBuf,
        max: u32,
    },

    #[error("log {0} not found in the state map")]
    LogNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
