//! In-memory backend for tests and dry runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::address::ObjectAddress;
use crate::error::{UploadError, UploadResult};
use crate::uploader::{CommitCallback, CommitReceipt, UploadHandle, Uploader};

/// Backend that keeps committed objects in a map.
///
/// `set_fail_commits(true)` makes every subsequent finalize report a commit
/// failure, which is how the upload-error path is exercised in tests.
#[derive(Default)]
pub struct MemoryUploader {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    sessions: Mutex<HashMap<u64, Vec<u8>>>,
    next_session: AtomicU64,
    errors: AtomicU64,
    fail_commits: AtomicBool,
}

impl MemoryUploader {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm or disarm forced commit failures.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    /// Committed object bytes, if present.
    pub fn object(&self, address: &ObjectAddress) -> Option<Vec<u8>> {
        self.objects.lock().get(&address.object_path()).cloned()
    }

    /// Number of committed objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

impl Uploader for MemoryUploader {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn init_streamed_upload(&self) -> UploadResult<UploadHandle> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(id, Vec::new());
        Ok(UploadHandle(id))
    }

    fn streamed_upload(&self, handle: UploadHandle, data: Bytes) -> UploadResult<()> {
        let mut sessions = self.sessions.lock();
        let buf = sessions
            .get_mut(&handle.id())
            .ok_or(UploadError::UnknownSession(handle.id()))?;
        buf.extend_from_slice(&data);
        Ok(())
    }

    fn finalize_streamed_upload(
        &self,
        handle: UploadHandle,
        address: ObjectAddress,
        on_commit: CommitCallback,
    ) {
        let session = self.sessions.lock().remove(&handle.id());
        let outcome = match session {
            None => Err(UploadError::UnknownSession(handle.id())),
            Some(_) if self.fail_commits.load(Ordering::Relaxed) => Err(UploadError::CommitFailed {
                address: address.to_string(),
                reason: "commit failure injected".into(),
            }),
            Some(bytes) => {
                let size = bytes.len() as u64;
                let deduplicated = self
                    .objects
                    .lock()
                    .insert(address.object_path(), bytes)
                    .is_some();
                Ok(CommitReceipt {
                    address,
                    size,
                    deduplicated,
                })
            }
        };
        if outcome.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        on_commit(outcome);
    }

    fn abort_streamed_upload(&self, handle: UploadHandle) {
        self.sessions.lock().remove(&handle.id());
    }

    fn upload_file(&self, local: &Path, remote: &str) -> UploadResult<()> {
        let bytes = std::fs::read(local)?;
        self.objects.lock().insert(remote.to_string(), bytes);
        Ok(())
    }

    fn peek(&self, address: &ObjectAddress) -> UploadResult<bool> {
        Ok(self.objects.lock().contains_key(&address.object_path()))
    }

    fn remove(&self, address: &ObjectAddress) -> UploadResult<()> {
        self.objects.lock().remove(&address.object_path());
        Ok(())
    }

    fn num_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::HashSuffix;

    #[test]
    fn commit_stores_bytes() {
        let uploader = MemoryUploader::new();
        let addr = ObjectAddress::new("0123", HashSuffix::None);
        let handle = uploader.init_streamed_upload().unwrap();
        uploader
            .streamed_upload(handle, Bytes::from_static(b"payload"))
            .unwrap();
        uploader.finalize_streamed_upload(handle, addr.clone(), Box::new(|r| assert!(r.is_ok())));
        assert_eq!(uploader.object(&addr).unwrap(), b"payload");
    }

    #[test]
    fn injected_commit_failure_counts_as_error() {
        let uploader = MemoryUploader::new();
        uploader.set_fail_commits(true);
        let handle = uploader.init_streamed_upload().unwrap();
        uploader.finalize_streamed_upload(
            handle,
            ObjectAddress::new("ff", HashSuffix::None),
            Box::new(|r| assert!(matches!(r, Err(UploadError::CommitFailed { .. })))),
        );
        assert_eq!(uploader.num_errors(), 1);
        assert_eq!(uploader.object_count(), 0);
    }

    #[test]
    fn finalize_unknown_session_fails() {
        let uploader = MemoryUploader::new();
        uploader.finalize_streamed_upload(
            UploadHandle(42),
            ObjectAddress::new("00", HashSuffix::None),
            Box::new(|r| assert!(matches!(r, Err(UploadError::UnknownSession(42))))),
        );
    }
}
