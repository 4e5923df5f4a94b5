//! Error types for the LSE combine kernel.

use thiserror::Error;

/// Result type for LSE combine operations.
pub type Result<T> = std::result::Result<T, LseError>;

/// Error types that can occur while configuring or running the combine kernel.
///
/// Numerical "failures" (absent chunks, rows past the logical bound, rows with
/// no contribution) are never reported here: they are carried as `-inf` in
/// the data itself.
#[derive(Error, Debug)]
pub enum LseError {
    /// Worker-group partition or ring geometry is not launchable.
    #[error("Invalid kernel configuration: {0}")]
    InvalidConfig(String),

    /// Descriptor data does not match its declared shape.
    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },

    /// A store addressed a row outside the output descriptor.
    #[error("Row {row} is out of bounds for output of {rows} rows")]
    RowOutOfBounds {
        /// Offending row index
        row: usize,
        /// Logical row count of the output
        rows: usize,
    },

    /// A row of the output descriptor was stored more than once.
    #[error("Row {0} was written more than once")]
    RowWrittenTwice(usize),

    /// A slot transition broke the transfer/reduce handshake.
    #[error("Pipeline protocol violation on slot {slot} (chunk {chunk}): {reason}")]
    PipelineViolation {
        /// Ring slot index
        slot: usize,
        /// Chunk index being loaded or read
        chunk: usize,
        /// What went wrong
        reason: String,
    },

    /// A worker thread panicked before finishing its role loop.
    #[error("Worker {0} panicked")]
    WorkerPanicked(String),

    /// Kernel launch failed.
    #[cfg(feature = "gpu")]
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// Memory transfer failed (host ↔ device).
    #[cfg(feature = "gpu")]
    #[error("Memory transfer failed: {0}")]
    MemoryTransferFailed(String),
}

impl LseError {
    pub(crate) fn violation(slot: usize, chunk: usize, reason: impl Into<String>) -> Self {
        LseError::PipelineViolation {
            slot,
            chunk,
            reason: reason.into(),
        }
    }
}
