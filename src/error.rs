use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EncodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("response is missing field `{0}`")]
    MissingField(String),

    #[error("ENCODE request failed: {0}")]
    Http(String),

    #[error("ENCODE returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("ENCODE response is not valid JSON: {0}")]
    Json(String),

    #[error("ENCODE returned an empty document for {0}")]
    EmptyResponse(String),

    #[error("download of {url} failed with status {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("download of {url} received {received} bytes, expected {expected}")]
    SizeMismatch {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("download of {0} was cancelled")]
    Cancelled(String),

    #[error("batch retrieval requires at least one accession")]
    EmptyBatch,

    #[error("failed to start batch workers: {0}")]
    WorkerPool(String),

    #[error("response cache error: {0}")]
    Cache(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}
