//! Typed transaction payloads for embedder and remover blocks.
//!
//! Batch drivers build these and lower them into JSON before appending; the
//! shapes mirror what auditors read back out of the ledger file. Keys inside
//! `transaction_dict` are the watermarked-image fingerprints, which makes
//! lookups by fingerprint a plain key probe.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kernel::Kernel;

/// Name of the overflow-map transport scheme this crate writes.
///
/// The map travels inside the embedder transaction as a hex-encoded binary
/// record; removal reads it back from the ledger.
pub const OVERFLOW_SCHEME: &str = "ledger-v1";

/// Payload of an embedder block: one embed-batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderTransaction {
    /// Images the batch attempted.
    pub total_images: usize,
    /// Images embedded and written successfully.
    pub processed_images: usize,
    /// Per-image failures as `"<path>: <kind>"` strings; the batch keeps
    /// going past them.
    pub failed_images: Vec<String>,
    /// One entry per processed image, keyed by the watermarked fingerprint.
    pub transaction_dict: BTreeMap<String, EmbedderEntry>,
}

/// Ledger receipt for one embedded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderEntry {
    pub timestamp: f64,
    /// Secret key, 64 hex chars. Required for extraction and removal.
    pub secret_key: String,
    pub message: String,
    /// Embedded watermark, 64 hex chars.
    pub watermark: String,
    pub kernel: Kernel,
    pub stride: u32,
    pub t_hi: u16,
    /// Fingerprint of the watermarked image (also this entry's key).
    pub hash_image_wat: String,
    /// Fingerprint of the original image; removal must reproduce it.
    pub hash_image_orig: String,
    pub bit_depth: u8,
    pub data_type: String,
    /// Always `"embedding"`.
    pub operation_type: String,
    /// Hex-encoded overflow record (see [`crate::codec::OverflowMap`]).
    pub overflow_map: String,
    /// Transport scheme for the overflow map, [`OVERFLOW_SCHEME`].
    pub overflow_scheme: String,
}

/// Payload of a remover block: one remove-batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoverTransaction {
    pub timestamp: f64,
    /// Always `"remove"`.
    pub operation: String,
    pub batch_size: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    /// Mean extraction BER over the successful entries; 0.0 for an exact
    /// batch.
    pub average_ber: f64,
    /// One entry per restored image, keyed by the watermarked fingerprint.
    pub transaction_dict: BTreeMap<String, RemovalEntry>,
}

/// Ledger receipt for one removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalEntry {
    /// Always `"removal"`.
    pub operation_type: String,
    pub original_image_hash: String,
    pub watermarked_image_hash: String,
    pub recovered_image_hash: String,
    pub extraction_ber: f64,
    pub original_watermark: String,
    pub extracted_watermark: String,
    pub removal_parameters: RemovalParameters,
}

/// Codec parameters echoed into a removal receipt, plus the overflow
/// transport scheme that was in effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalParameters {
    pub kernel: Kernel,
    pub stride: u32,
    pub t_hi: u16,
    pub bit_depth: u8,
    pub overflow_scheme: String,
}
