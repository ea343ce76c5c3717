//! Error types for the ingestion pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Error variants for ingestion operations.
///
/// Errors never unwind through the pipeline; they are recorded on the
/// affected file and reported once through the result sink. No error in one
/// file's stages may block another file's progress.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Opening or reading a submitted file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path of the file being ingested.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A per-chunk compressor failed mid-stream.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The uploader refused a session operation or a commit.
    #[error("upload failed: {0}")]
    Upload(#[from] casfs_upload::UploadError),

    /// A chunk reached the write stage without a finalized digest.
    #[error("missing digest for chunk at offset {0}")]
    MissingDigest(u64),

    /// Rejected pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
