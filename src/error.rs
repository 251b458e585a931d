//! Error types for undbc

use thiserror::Error;

use crate::segment::SegmentKind;

/// Main error type for undbc operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported signature: {0:02X?}")]
    UnsupportedSignature([u8; 4]),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Truncated file: {0}")]
    Truncated(String),

    #[error("Unsupported column layout: {0}")]
    UnsupportedLayout(String),

    #[error("Schema type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Schema declares {schema} columns but file carries {file}")]
    SchemaArityMismatch { schema: usize, file: usize },

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Required segment not loaded: {0:?}")]
    MissingSegment(SegmentKind),

    #[error("Record iterator already consumed")]
    ExhaustedIterator,
}

/// Result type alias for undbc operations
pub type Result<T> = std::result::Result<T, Error>;
