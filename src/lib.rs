//! # Revmark - Reversible Image Watermarking with a Hash-Chained Ledger
//!
//! Revmark embeds a cryptographically derived 256-bit watermark into raster
//! images by shifting prediction errors at keyed lattice positions, such
//! that the exact original image can be reconstructed from the watermarked
//! image and the secret key. Every embedding and removal is recorded as a
//! block in a local hash-chained ledger, binding together the secret key,
//! the watermark, and the fingerprints of both images.
//!
//! ## Key Features
//!
//! - **Reversible**: removal reproduces the original image byte for byte
//! - **Keyed**: a fresh random 256-bit key per embedding selects the pixels
//!   and salts the watermark; nothing secret is stored in the pixels
//! - **Tamper-evident receipts**: each batch appends one SHA-256-chained
//!   ledger block with per-image fingerprints and parameters
//! - **Deterministic**: identical inputs produce identical outputs on every
//!   platform
//!
//! ## Quick Start
//!
//! ### Embedding and removing in memory
//!
//! ```rust
//! use revmark::{embed, remove, CodecParams, ImageBuffer, SecretKey};
//!
//! let image = ImageBuffer::new(16, 16, 8, vec![100; 256])?;
//! let key = SecretKey::generate()?;
//! let params = CodecParams::defaults(8)?;
//!
//! let outcome = embed(&image, &key, "radiology archive 2024", &params)?;
//! assert!(outcome.stats.psnr > 40.0);
//!
//! let (restored, recovered) = remove(
//!     &outcome.image,
//!     &key,
//!     &params,
//!     &outcome.overflow,
//!     &outcome.watermark,
//! )?;
//! assert_eq!(restored.content_hash(), image.content_hash());
//! assert_eq!(recovered, outcome.watermark);
//! # Ok::<(), revmark::RevmarkError>(())
//! ```
//!
//! ### Batch operation with a ledger
//!
//! ```no_run
//! use revmark::{embed_batch, BatchConfig};
//! use std::path::Path;
//!
//! let config = BatchConfig::load(Path::new("batch.json"))?;
//! let report = embed_batch(&config)?;
//! println!(
//!     "block {}: {}/{} images watermarked",
//!     report.block_number, report.processed_images, report.total_images
//! );
//! # Ok::<(), revmark::RevmarkError>(())
//! ```
//!
//! ## How embedding works
//!
//! The image is tiled into disjoint blocks on a regular lattice. A ChaCha20
//! keystream seeded with the secret key selects the eligible blocks; at each
//! eligible block origin the pixel's error against a convex-kernel
//! prediction is computed, positive errors are shifted up by one to vacate a
//! histogram bin, and watermark bits land in the vacated bin. Pixels near
//! saturation are skipped and their coordinates recorded in an overflow map
//! so the inverse stays exact; the map travels inside the ledger receipt.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, RevmarkError>`; every error maps to a
//! stable machine-readable kind (see [`RevmarkError::kind`]) and carries the
//! offending path where one exists.

// Module declarations
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod image;
pub mod io;
pub mod kernel;
pub mod ledger;
pub mod mark;
pub mod metrics;

#[cfg(feature = "bin")]
pub mod cli;

// Re-exports for the public API
pub use batch::{embed_batch, extract_batch, remove_batch, BatchReport, ExtractRecord, ExtractReport};
pub use codec::{embed, extract, remove, CodecParams, EmbedOutcome, EmbedStats, ExtractOutcome, OverflowMap};
pub use config::BatchConfig;
pub use error::RevmarkError;
pub use image::ImageBuffer;
pub use kernel::Kernel;
pub use ledger::Ledger;
pub use mark::{SecretKey, SelectionMask, Watermark, WATERMARK_BITS};
