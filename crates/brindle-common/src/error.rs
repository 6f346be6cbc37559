//! Error types for brindle.

use crate::page::PageId;
use crate::types::ScanOp;
use thiserror::Error;

/// Result type alias using BrindleError.
pub type Result<T> = std::result::Result<T, BrindleError>;

/// Errors that can occur across the index, pager, and buffer layers.
#[derive(Debug, Error)]
pub enum BrindleError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {name}")]
    FileNotFound { name: String },

    #[error("file already exists: {name}")]
    FileExists { name: String },

    #[error("no open file with id {file_id}")]
    FileNotOpen { file_id: u32 },

    #[error("page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page still pinned: {page_id}")]
    PagePinned { page_id: PageId },

    // Index metadata errors
    #[error("index metadata mismatch for {index_name}")]
    BadIndexInfo { index_name: String },

    #[error("record of {len} bytes too short for a key at offset {offset}")]
    InvalidRecord { len: usize, offset: usize },

    // Scan errors
    #[error("bad scan opcodes: low {low_op}, high {high_op}")]
    BadOpcodes { low_op: ScanOp, high_op: ScanOp },

    #[error("bad scan range: low {low} exceeds high {high}")]
    BadScanRange { low: i32, high: i32 },

    #[error("no key satisfies the scan range")]
    NoSuchKey,

    #[error("no scan in progress")]
    ScanNotInitialized,

    #[error("scan exhausted")]
    ScanCompleted,
}
