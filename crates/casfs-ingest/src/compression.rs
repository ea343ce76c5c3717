//! Per-chunk streaming compression.
//!
//! Each chunk's byte stream runs through its own compressor instance; output
//! is drained incrementally so a slow chunk never buffers more than the
//! encoder's internal block. Output block boundaries carry no meaning
//! downstream.

use std::io::Write;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

/// Compression algorithm applied to chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// No compression (passthrough).
    None,
    /// LZ4 frame format — fast path.
    Lz4,
    /// Zstandard — higher ratio.
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default).
        level: i32,
    },
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::Zstd { level: 3 }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd { level } => write!(f, "zstd:{level}"),
        }
    }
}

/// Streaming compressor state for a single chunk.
pub enum StreamCompressor {
    /// Passthrough.
    None(Vec<u8>),
    /// LZ4 frame encoder writing into an internal buffer.
    Lz4(lz4_flex::frame::FrameEncoder<Vec<u8>>),
    /// Zstd encoder writing into an internal buffer.
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl StreamCompressor {
    /// Open a compressor for one chunk stream.
    pub fn new(algorithm: CompressionAlgorithm) -> IngestResult<Self> {
        match algorithm {
            CompressionAlgorithm::None => Ok(StreamCompressor::None(Vec::new())),
            CompressionAlgorithm::Lz4 => Ok(StreamCompressor::Lz4(
                lz4_flex::frame::FrameEncoder::new(Vec::new()),
            )),
            CompressionAlgorithm::Zstd { level } => {
                let encoder = zstd::stream::write::Encoder::new(Vec::new(), level)
                    .map_err(|e| IngestError::Compression(e.to_string()))?;
                Ok(StreamCompressor::Zstd(encoder))
            }
        }
    }

    /// Feed uncompressed bytes.
    pub fn write(&mut self, data: &[u8]) -> IngestResult<()> {
        match self {
            StreamCompressor::None(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            StreamCompressor::Lz4(enc) => enc
                .write_all(data)
                .map_err(|e| IngestError::Compression(e.to_string())),
            StreamCompressor::Zstd(enc) => enc
                .write_all(data)
                .map_err(|e| IngestError::Compression(e.to_string())),
        }
    }

    /// Drain whatever compressed output the encoder has produced so far.
    pub fn take_output(&mut self) -> Bytes {
        let buf = match self {
            StreamCompressor::None(buf) => buf,
            StreamCompressor::Lz4(enc) => enc.get_mut(),
            StreamCompressor::Zstd(enc) => enc.get_mut(),
        };
        Bytes::from(std::mem::take(buf))
    }

    /// Close the stream and return the trailing compressed bytes, including
    /// the canonical output for an empty input stream.
    pub fn finish(self) -> IngestResult<Bytes> {
        match self {
            StreamCompressor::None(buf) => Ok(Bytes::from(buf)),
            StreamCompressor::Lz4(enc) => enc
                .finish()
                .map(Bytes::from)
                .map_err(|e| IngestError::Compression(e.to_string())),
            StreamCompressor::Zstd(enc) => enc
                .finish()
                .map(Bytes::from)
                .map_err(|e| IngestError::Compression(e.to_string())),
        }
    }
}

/// Inverse transform, used to verify the round-trip law.
pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> IngestResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => {
            use std::io::Read;
            let mut out = Vec::new();
            lz4_flex::frame::FrameDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| IngestError::Compression(e.to_string()))?;
            Ok(out)
        }
        CompressionAlgorithm::Zstd { .. } => {
            zstd::decode_all(data).map_err(|e| IngestError::Compression(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALGORITHMS: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Lz4,
        CompressionAlgorithm::Zstd { level: 3 },
    ];

    fn stream_roundtrip(algorithm: CompressionAlgorithm, pieces: &[&[u8]]) -> Vec<u8> {
        let mut compressor = StreamCompressor::new(algorithm).unwrap();
        let mut compressed = Vec::new();
        for piece in pieces {
            compressor.write(piece).unwrap();
            compressed.extend_from_slice(&compressor.take_output());
        }
        compressed.extend_from_slice(&compressor.finish().unwrap());
        decompress(algorithm, &compressed).unwrap()
    }

    #[test]
    fn streamed_roundtrip_all_algorithms() {
        let pieces: [&[u8]; 3] = [b"alpha ", b"beta ", b"gamma"];
        for algorithm in ALGORITHMS {
            assert_eq!(stream_roundtrip(algorithm, &pieces), b"alpha beta gamma");
        }
    }

    #[test]
    fn empty_stream_yields_canonical_output() {
        for algorithm in ALGORITHMS {
            let compressor = StreamCompressor::new(algorithm).unwrap();
            let trailing = compressor.finish().unwrap();
            assert_eq!(decompress(algorithm, &trailing).unwrap(), b"");
        }
    }

    #[test]
    fn incremental_equals_one_shot() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        for algorithm in ALGORITHMS {
            let split = stream_roundtrip(algorithm, &[&data[..40_000], &data[40_000..]]);
            assert_eq!(split, data);
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in prop::collection::vec(0u8..=255, 0..60_000), cut in 0usize..60_000) {
            let cut = cut.min(data.len());
            for algorithm in ALGORITHMS {
                let out = stream_roundtrip(algorithm, &[&data[..cut], &data[cut..]]);
                prop_assert_eq!(&out, &data);
            }
        }
    }
}
