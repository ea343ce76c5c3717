#![warn(missing_docs)]

//! casfs uploader boundary: backends that commit finished chunks to the
//! content-addressed object store.
//!
//! The ingestion pipeline streams each chunk's compressed bytes into a
//! backend session and finalizes it with the chunk's content address. The
//! backend owns everything behind that boundary: session lifecycle, retries,
//! authentication, and the physical namespace layout.

pub mod address;
pub mod error;
pub mod local;
pub mod memory;
pub mod uploader;

pub use address::{HashSuffix, ObjectAddress};
pub use error::{UploadError, UploadResult};
pub use local::LocalUploader;
pub use memory::MemoryUploader;
pub use uploader::{CommitCallback, CommitReceipt, UploadHandle, Uploader};
