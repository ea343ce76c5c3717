//! Local filesystem backend.
//!
//! Sessions spool into `txn/` inside the store root and are renamed into the
//! content-addressed layout on commit. Rename is atomic on the same
//! filesystem, so a crashed writer leaves at most an orphaned transaction
//! file, never a half-written object.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::address::ObjectAddress;
use crate::error::{UploadError, UploadResult};
use crate::uploader::{CommitCallback, CommitReceipt, UploadHandle, Uploader};

struct LocalSession {
    file: fs::File,
    spool_path: PathBuf,
    size: u64,
}

/// Object-store backend rooted in a local directory.
pub struct LocalUploader {
    root: PathBuf,
    sessions: Mutex<HashMap<u64, LocalSession>>,
    next_session: AtomicU64,
    errors: AtomicU64,
}

impl LocalUploader {
    /// Create a backend rooted at `root`, creating the directory layout if
    /// needed.
    pub fn new(root: impl Into<PathBuf>) -> UploadResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("txn"))?;
        fs::create_dir_all(root.join("data"))?;
        Ok(Self {
            root,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            errors: AtomicU64::new(0),
        })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bump_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn commit(&self, handle: UploadHandle, address: &ObjectAddress) -> UploadResult<CommitReceipt> {
        let mut session = self
            .sessions
            .lock()
            .remove(&handle.0)
            .ok_or(UploadError::UnknownSession(handle.0))?;
        session.file.flush()?;
        drop(session.file);

        let target = self.root.join(address.object_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.exists() {
            // Same content already committed by an earlier upload.
            fs::remove_file(&session.spool_path)?;
            debug!(address = %address, "object already present, dropping upload");
            return Ok(CommitReceipt {
                address: address.clone(),
                size: session.size,
                deduplicated: true,
            });
        }
        fs::rename(&session.spool_path, &target)?;
        debug!(address = %address, size = session.size, "object committed");
        Ok(CommitReceipt {
            address: address.clone(),
            size: session.size,
            deduplicated: false,
        })
    }
}

impl Uploader for LocalUploader {
    fn name(&self) -> &'static str {
        "local"
    }

    fn init_streamed_upload(&self) -> UploadResult<UploadHandle> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let spool_path = self.root.join("txn").join(format!("upload.{id}"));
        let file = match fs::File::create(&spool_path) {
            Ok(f) => f,
            Err(e) => {
                self.bump_errors();
                return Err(e.into());
            }
        };
        self.sessions.lock().insert(
            id,
            LocalSession {
                file,
                spool_path,
                size: 0,
            },
        );
        Ok(UploadHandle(id))
    }

    fn streamed_upload(&self, handle: UploadHandle, data: Bytes) -> UploadResult<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&handle.0)
            .ok_or(UploadError::UnknownSession(handle.0))?;
        if let Err(e) = session.file.write_all(&data) {
            self.bump_errors();
            return Err(e.into());
        }
        session.size += data.len() as u64;
        Ok(())
    }

    fn finalize_streamed_upload(
        &self,
        handle: UploadHandle,
        address: ObjectAddress,
        on_commit: CommitCallback,
    ) {
        let outcome = self.commit(handle, &address);
        if outcome.is_err() {
            self.bump_errors();
        }
        on_commit(outcome);
    }

    fn abort_streamed_upload(&self, handle: UploadHandle) {
        if let Some(session) = self.sessions.lock().remove(&handle.0) {
            drop(session.file);
            if let Err(e) = fs::remove_file(&session.spool_path) {
                warn!(session = handle.0, error = %e, "failed to remove spool file");
            }
        }
    }

    fn upload_file(&self, local: &Path, remote: &str) -> UploadResult<()> {
        let target = self.root.join(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::copy(local, &target) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.bump_errors();
                Err(e.into())
            }
        }
    }

    fn peek(&self, address: &ObjectAddress) -> UploadResult<bool> {
        Ok(self.root.join(address.object_path()).exists())
    }

    fn remove(&self, address: &ObjectAddress) -> UploadResult<()> {
        fs::remove_file(self.root.join(address.object_path()))?;
        Ok(())
    }

    fn num_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}
