//! Content-defined chunk boundary detection.
//!
//! A cyclic-polynomial (buzhash) rolling checksum runs over a 48-byte
//! sliding window of the incoming stream. Once a chunk has reached the
//! policy's minimum size, every position where the checksum satisfies the
//! boundary predicate closes the chunk; a chunk that reaches the maximum
//! size is force-closed. Identical byte sub-sequences therefore produce
//! identical boundaries regardless of surrounding edits, which is what
//! makes chunk-level deduplication work across file versions.
//!
//! The detector is push-based: the chunk stage feeds it the read stage's
//! blocks as they arrive, and cut positions fall anywhere inside a block.

use crate::config::ChunkingPolicy;

const WINDOW_SIZE: usize = 48;

// Per-byte mixing constants, fixed at compile time: boundaries must be
// reproducible across processes and releases.
const BUZ_TABLE: [u64; 256] = build_buz_table();

const fn build_buz_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state: u64 = 0x9e2c_8f41_d3a7_615b;
    let mut i = 0;
    while i < 256 {
        // splitmix64
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Incremental boundary detector for one file stream.
///
/// State covers exactly one chunk at a time; [`ChunkDetector::find_cut`]
/// resets it whenever a boundary is returned, so the caller only re-feeds
/// the bytes after the cut.
pub struct ChunkDetector {
    min_size: u64,
    max_size: u64,
    // Modulus of the boundary predicate. The geometric search starts at
    // min_size, so a modulus of (avg - min) puts the mean chunk size at avg.
    threshold: u64,
    hash: u64,
    window: [u8; WINDOW_SIZE],
    window_pos: usize,
    chunk_len: u64,
}

impl ChunkDetector {
    /// Detector for the given chunking policy.
    pub fn new(policy: &ChunkingPolicy) -> Self {
        Self {
            min_size: policy.min_size,
            max_size: policy.max_size,
            threshold: (policy.avg_size.saturating_sub(policy.min_size)).max(1),
            hash: 0,
            window: [0u8; WINDOW_SIZE],
            window_pos: 0,
            chunk_len: 0,
        }
    }

    /// Consume bytes from `data` until a chunk boundary is found.
    ///
    /// Returns the number of bytes consumed (the cut falls after them), or
    /// `None` if all of `data` was consumed without a boundary. After a cut
    /// the detector is reset for the next chunk; the caller continues with
    /// `data[cut..]`.
    pub fn find_cut(&mut self, data: &[u8]) -> Option<usize> {
        for (i, &byte) in data.iter().enumerate() {
            self.roll(byte);
            self.chunk_len += 1;
            if self.chunk_len >= self.max_size
                || (self.chunk_len >= self.min_size && self.is_boundary())
            {
                self.reset();
                return Some(i + 1);
            }
        }
        None
    }

    /// Bytes accumulated into the current (unclosed) chunk.
    pub fn chunk_len(&self) -> u64 {
        self.chunk_len
    }

    /// Discard all state, ready for a fresh chunk.
    pub fn reset(&mut self) {
        self.hash = 0;
        self.window = [0u8; WINDOW_SIZE];
        self.window_pos = 0;
        self.chunk_len = 0;
    }

    fn roll(&mut self, byte: u8) {
        let outgoing = self.window[self.window_pos];
        self.window[self.window_pos] = byte;
        self.window_pos = (self.window_pos + 1) % WINDOW_SIZE;
        // The byte leaving the window was rotated WINDOW_SIZE times since
        // it entered; undo exactly that contribution.
        self.hash = self.hash.rotate_left(1)
            ^ BUZ_TABLE[outgoing as usize].rotate_left((WINDOW_SIZE % 64) as u32)
            ^ BUZ_TABLE[byte as usize];
    }

    fn is_boundary(&self) -> bool {
        self.hash % self.threshold == self.threshold - 1
    }
}
