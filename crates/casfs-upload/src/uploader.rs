//! The uploader trait: what the ingestion pipeline expects from a backend.

use std::path::Path;

use bytes::Bytes;

use crate::address::ObjectAddress;
use crate::error::UploadResult;

/// Opaque handle identifying one streamed-upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadHandle(pub(crate) u64);

impl UploadHandle {
    /// Numeric session id, for logging.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What the backend reports once an object has been committed.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Final content address of the object.
    pub address: ObjectAddress,
    /// Bytes streamed into the session.
    pub size: u64,
    /// True if the object already existed and the upload was dropped.
    pub deduplicated: bool,
}

/// Completion callback invoked exactly once per finalized session.
///
/// Backends may invoke it from an internal worker thread; callers must not
/// assume it runs on the finalizing thread.
pub type CommitCallback = Box<dyn FnOnce(UploadResult<CommitReceipt>) + Send>;

/// An object-store backend consuming finished chunks.
///
/// The pipeline treats this purely as an asynchronous sink: session
/// lifecycle, retries, and authentication are the backend's business.
/// Commit outcomes are reported through the [`CommitCallback`]; every other
/// operation fails synchronously.
pub trait Uploader: Send + Sync {
    /// Human-readable backend name, for logging.
    fn name(&self) -> &'static str;

    /// Open a new streamed-upload session.
    fn init_streamed_upload(&self) -> UploadResult<UploadHandle>;

    /// Append bytes to an open session.
    fn streamed_upload(&self, handle: UploadHandle, data: Bytes) -> UploadResult<()>;

    /// Close a session and commit its content under `address`.
    ///
    /// Consumes the session whether or not the commit succeeds; the outcome
    /// is delivered through `on_commit`, exactly once.
    fn finalize_streamed_upload(
        &self,
        handle: UploadHandle,
        address: ObjectAddress,
        on_commit: CommitCallback,
    );

    /// Discard a session and whatever was streamed into it.
    fn abort_streamed_upload(&self, handle: UploadHandle);

    /// Copy a local file to an arbitrary path in the store namespace.
    fn upload_file(&self, local: &Path, remote: &str) -> UploadResult<()>;

    /// True if an object exists under `address`.
    fn peek(&self, address: &ObjectAddress) -> UploadResult<bool>;

    /// Remove the object under `address`.
    fn remove(&self, address: &ObjectAddress) -> UploadResult<()>;

    /// Number of failed operations since the backend was created.
    fn num_errors(&self) -> u64;
}
