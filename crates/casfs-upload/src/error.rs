//! Error types for the uploader boundary.

use thiserror::Error;

/// Result type alias for uploader operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error variants for uploader operations.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Wraps standard I/O errors from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The given streamed-upload session does not exist (already finalized,
    /// aborted, or never opened).
    #[error("unknown upload session {0}")]
    UnknownSession(u64),

    /// The backend refused to commit a finalized object.
    #[error("commit of {address} failed: {reason}")]
    CommitFailed {
        /// Content address of the object that failed to commit.
        address: String,
        /// Backend-specific description of the failure.
        reason: String,
    },
}
