use thiserror::Error;

/// Errors from buffer construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("view of {len} bytes at offset {offset} exceeds parent length {parent_len}")]
    OutOfRange {
        offset: usize,
        len: usize,
        parent_len: usize,
    },

    #[error("buffer is locked")]
    Locked,
}

/// Result alias for buffer operations.
pub type BufferResult<T> = Result<T, BufferError>;
