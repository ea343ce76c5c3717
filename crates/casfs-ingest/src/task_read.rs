//! Read stage: turn a file into a stream of fixed-size blocks.

use std::fs;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::IngestError;
use crate::item::{BlockItem, FileItem};
use crate::task::TubeConsumer;
use crate::tube::TubeGroup;

/// Reads submitted files sequentially in fixed-size blocks.
///
/// The block stream carries the file's own tag; the chunk stage regroups it
/// into chunk streams. A file that cannot be opened or read degrades to a
/// failed file with an immediate Stop — the pipeline never unwinds.
pub struct TaskRead {
    tubes_out: Arc<TubeGroup<BlockItem>>,
    block_size: usize,
}

impl TaskRead {
    /// Reader emitting into the chunk stage's tube group.
    pub fn new(tubes_out: Arc<TubeGroup<BlockItem>>, block_size: usize) -> Self {
        Self {
            tubes_out,
            block_size,
        }
    }

    fn emit_stop(&self, file: &Arc<FileItem>) {
        self.tubes_out
            .dispatch(BlockItem::stop(Arc::clone(file), None, file.tag()));
    }

    fn read_file(&self, file: &Arc<FileItem>) -> Result<(), IngestError> {
        let io_err = |source| IngestError::Io {
            path: file.path().to_path_buf(),
            source,
        };

        let mut reader = fs::File::open(file.path()).map_err(io_err)?;
        let stat_size = reader.metadata().map_err(io_err)?.len();
        if stat_size < file.chunking().min_size {
            file.set_may_have_chunks(false);
        }

        let mut buf = vec![0u8; self.block_size];
        loop {
            let filled = read_block(&mut reader, &mut buf).map_err(io_err)?;
            if filled == 0 {
                break;
            }
            file.record_read(filled as u64);
            self.tubes_out.dispatch(BlockItem::data(
                Arc::clone(file),
                None,
                file.tag(),
                Bytes::copy_from_slice(&buf[..filled]),
            ));
        }

        // The stat can lie (file truncated while reading); re-check against
        // what was actually delivered.
        if file.size() < file.chunking().min_size {
            file.set_may_have_chunks(false);
        }
        Ok(())
    }
}

/// Fill `buf` from `reader`, tolerating short reads. Returns bytes filled;
/// less than `buf.len()` only at end of file.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl TubeConsumer for TaskRead {
    type Item = Arc<FileItem>;

    fn process(&mut self, file: Arc<FileItem>) {
        if let Err(error) = self.read_file(&file) {
            debug!(path = %file.path().display(), %error, "read failed");
            file.set_may_have_chunks(false);
            file.fail(error);
        }
        self.emit_stop(&file);
    }
}
