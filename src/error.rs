//! # Error types for revmark operations
//!
//! This module defines the error type shared by the watermarking codec, the
//! ledger, and the batch drivers. Variants carry the offending path where one
//! exists, and every variant maps to a stable machine-readable kind string via
//! [`RevmarkError::kind`] so batch reports and CLI output can be consumed by
//! tooling.
//!
//! ## Error categories
//!
//! - **Configuration**: unusable batch configuration files
//! - **Image I/O**: container decode/encode failures, shape mismatches
//! - **Codec**: kernel validation, capacity, watermark verification
//! - **Ledger**: chain corruption, missing blocks, overflow-record transport

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for all revmark operations.
///
/// # Examples
///
/// ```rust
/// use revmark::RevmarkError;
///
/// fn report(err: &RevmarkError) {
///     eprintln!("[{}] {}", err.kind(), err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum RevmarkError {
    /// The batch configuration file is missing, unreadable, or fails
    /// validation (bad stride, unknown data type, empty message, ...).
    #[error("invalid configuration '{}': {message}", path.display())]
    ConfigurationInvalid {
        /// Configuration file the driver was asked to load.
        path: PathBuf,
        /// Human-readable description of what failed validation.
        message: String,
    },

    /// An input image could not be decoded into a pixel buffer.
    ///
    /// Raised for unsupported color types or bit depths as well as for
    /// containers the decoder rejects outright.
    #[error("failed to read image '{}': {message}", path.display())]
    ImageReadFailed { path: PathBuf, message: String },

    /// A result image could not be encoded or written to disk.
    #[error("failed to write image '{}': {message}", path.display())]
    ImageWriteFailed { path: PathBuf, message: String },

    /// The prediction kernel is not a valid convex combination.
    ///
    /// The kernel must be square with an odd side of at least 3, have a zero
    /// center entry, non-negative weights, and weights summing to 1.
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    /// Image dimensions or sample count do not match what an operation
    /// expects (e.g. a sample vector shorter than width * height).
    #[error("image shape mismatch: {0}")]
    ImageShapeMismatch(String),

    /// No watermark bit could be embedded into the image.
    ///
    /// Every embedding carries a 256-bit watermark, so an image whose
    /// eligible blocks are all overflow-banded (or whose lattice is empty)
    /// cannot receive it.
    #[error(
        "insufficient capacity: {eligible_blocks} eligible blocks, {overflow_entries} in the overflow band, 0 bits embeddable"
    )]
    InsufficientCapacity {
        eligible_blocks: usize,
        overflow_entries: usize,
    },

    /// The watermark recovered from an image disagrees with the expected one.
    ///
    /// Removal aborts for this image; no restored file is written.
    #[error("watermark mismatch: expected {expected}, recovered {recovered} (ber {ber:.4})")]
    WatermarkMismatch {
        /// Expected watermark, 64 hex characters.
        expected: String,
        /// Recovered watermark, 64 hex characters.
        recovered: String,
        /// Bit error rate between the two over the recovered length.
        ber: f64,
    },

    /// The overflow record stored alongside an embedding could not be
    /// decoded, so exact reversal is impossible.
    #[error("overflow map unrecoverable: {0}")]
    OverflowMapUnrecoverable(String),

    /// The ledger chain failed verification.
    ///
    /// A corrupt ledger is opened read-only; appends fail with this error
    /// until the file is repaired or replaced.
    #[error("ledger '{}' corrupt at block {block_number}: {message}", path.display())]
    LedgerCorrupt {
        path: PathBuf,
        block_number: u64,
        message: String,
    },

    /// No ledger block matches the requested lookup.
    #[error("no ledger block found for {0}")]
    LedgerBlockNotFound(String),

    /// An underlying I/O operation failed.
    #[error("I/O failure")]
    Io(#[from] io::Error),
}

impl RevmarkError {
    /// Stable machine-readable kind for this error.
    ///
    /// Batch reports record these strings in `failed_images`; they never
    /// change across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            RevmarkError::ConfigurationInvalid { .. } => "configuration_invalid",
            RevmarkError::ImageReadFailed { .. } => "image_read_failed",
            RevmarkError::ImageWriteFailed { .. } => "image_write_failed",
            RevmarkError::InvalidKernel(_) => "invalid_kernel",
            RevmarkError::ImageShapeMismatch(_) => "image_shape_mismatch",
            RevmarkError::InsufficientCapacity { .. } => "insufficient_capacity",
            RevmarkError::WatermarkMismatch { .. } => "watermark_mismatch",
            RevmarkError::OverflowMapUnrecoverable(_) => "overflow_map_unrecoverable",
            RevmarkError::LedgerCorrupt { .. } => "ledger_corrupt",
            RevmarkError::LedgerBlockNotFound(_) => "ledger_block_not_found",
            RevmarkError::Io(_) => "io_failure",
        }
    }
}
