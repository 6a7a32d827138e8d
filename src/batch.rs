//! Batch drivers: thin orchestrators around the codec and the ledger.
//!
//! Each driver walks the configured input directory, runs the per-image
//! operation, and appends exactly one ledger block at the end of the batch.
//! Per-image failures are recorded in the batch result and processing
//! continues; only configuration problems and ledger corruption abort a
//! batch outright. The codec stays pure; drivers own all I/O and reduce
//! per-image values into the batch accumulators.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{self, CodecParams, OverflowMap};
use crate::config::BatchConfig;
use crate::error::RevmarkError;
use crate::image::ImageBuffer;
use crate::io::{self, PixelFormat};
use crate::ledger::{
    now_seconds, BlockInfo, EmbedderEntry, EmbedderTransaction, Ledger, RemovalEntry,
    RemovalParameters, RemoverTransaction, OVERFLOW_SCHEME,
};
use crate::mark::{SecretKey, Watermark, WATERMARK_BITS};
use crate::metrics;

/// Result of one embed- or remove-batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Ledger block the batch appended.
    pub block_number: u64,
    pub total_images: usize,
    pub processed_images: usize,
    /// `"<path>: <kind>"` per failed image.
    pub failed_images: Vec<String>,
}

impl BatchReport {
    /// True when every image in the batch succeeded.
    pub fn is_full_success(&self) -> bool {
        self.failed_images.is_empty()
    }
}

/// Result of one extract run (no ledger append).
#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub total_images: usize,
    pub records: Vec<ExtractRecord>,
    pub failed_images: Vec<String>,
}

impl ExtractReport {
    pub fn is_full_success(&self) -> bool {
        self.failed_images.is_empty()
    }
}

/// Extraction outcome for a single image.
#[derive(Debug, Clone)]
pub struct ExtractRecord {
    pub path: PathBuf,
    /// Recovered watermark, 64 hex chars.
    pub watermark: String,
    pub recovered_bits: usize,
    /// BER against the matched ledger entry's watermark.
    pub ber: f64,
    /// Embedder block the watermark matched against.
    pub block_number: u64,
}

fn failure_label(path: &Path, err: &RevmarkError) -> String {
    format!("{}: {}", path.display(), err.kind())
}

fn output_path(save_path: &Path, input: &Path) -> PathBuf {
    save_path.join(input.file_name().unwrap_or_default())
}

/// Embeds a fresh watermark into every image under `data_path`.
///
/// Each image gets its own random secret key; outputs land under
/// `save_path` with the input file name, and a single embedder block
/// records the whole batch.
pub fn embed_batch(config: &BatchConfig) -> Result<BatchReport, RevmarkError> {
    let format = config.pixel_format()?;
    let params = config.codec_params()?;

    let mut ledger = Ledger::open(&config.blockchain_path)?;
    ledger.require_writable()?;
    fs::create_dir_all(&config.save_path)?;

    let images = io::list_images(&config.data_path)?;
    log::info!(count = images.len(); "starting embed batch");

    let mut failed_images = Vec::new();
    let mut transaction_dict = BTreeMap::new();
    for path in &images {
        match embed_one(path, config, format, &params) {
            Ok(entry) => {
                transaction_dict.insert(entry.hash_image_wat.clone(), entry);
            }
            Err(err) => {
                log::warn!(path:% = path.display(), kind = err.kind(); "embedding failed: {err}");
                failed_images.push(failure_label(path, &err));
            }
        }
    }

    let transaction = EmbedderTransaction {
        total_images: images.len(),
        processed_images: transaction_dict.len(),
        failed_images: failed_images.clone(),
        transaction_dict,
    };
    let block_number = ledger.append(BlockInfo::Embedder, &transaction)?;

    Ok(BatchReport {
        block_number,
        total_images: transaction.total_images,
        processed_images: transaction.processed_images,
        failed_images,
    })
}

fn embed_one(
    path: &Path,
    config: &BatchConfig,
    format: PixelFormat,
    params: &CodecParams,
) -> Result<EmbedderEntry, RevmarkError> {
    let image = io::read_pixels(path, format)?;
    let key = SecretKey::generate()?;
    let outcome = codec::embed(&image, &key, &config.message, params)?;

    io::write_pixels(&output_path(&config.save_path, path), &outcome.image)?;

    log::info!(
        path:% = path.display(),
        bits = outcome.stats.bits_embedded,
        psnr = outcome.stats.psnr;
        "embedded watermark"
    );

    Ok(EmbedderEntry {
        timestamp: now_seconds(),
        secret_key: key.to_hex(),
        message: config.message.clone(),
        watermark: outcome.watermark.to_hex(),
        kernel: params.kernel().clone(),
        stride: params.stride(),
        t_hi: params.t_hi(),
        hash_image_wat: outcome.image.content_hash(),
        hash_image_orig: image.content_hash(),
        bit_depth: params.bit_depth(),
        data_type: format.data_type().to_string(),
        operation_type: "embedding".to_string(),
        overflow_map: outcome.overflow.to_record_hex(),
        overflow_scheme: OVERFLOW_SCHEME.to_string(),
    })
}

/// Removes watermarks from every image under `data_path`, restoring the
/// originals exactly.
///
/// Each image is matched to its embedder entry by watermarked fingerprint
/// (falling back to a watermark search when the fingerprint no longer
/// matches), restored, authenticated against the recorded original
/// fingerprint, and written under `save_path`. One remover block records
/// the batch.
pub fn remove_batch(config: &BatchConfig) -> Result<BatchReport, RevmarkError> {
    let format = config.pixel_format()?;

    let mut ledger = Ledger::open(&config.blockchain_path)?;
    ledger.require_writable()?;
    fs::create_dir_all(&config.save_path)?;

    let images = io::list_images(&config.data_path)?;
    log::info!(count = images.len(); "starting remove batch");

    let mut failed_images = Vec::new();
    let mut transaction_dict = BTreeMap::new();
    for path in &images {
        match remove_one(path, config, format, &ledger) {
            Ok(entry) => {
                transaction_dict.insert(entry.watermarked_image_hash.clone(), entry);
            }
            Err(err) => {
                log::warn!(path:% = path.display(), kind = err.kind(); "removal failed: {err}");
                failed_images.push(failure_label(path, &err));
            }
        }
    }

    let successful = transaction_dict.len();
    let average_ber = if successful == 0 {
        0.0
    } else {
        transaction_dict
            .values()
            .map(|e| e.extraction_ber)
            .sum::<f64>()
            / successful as f64
    };
    let transaction = RemoverTransaction {
        timestamp: now_seconds(),
        operation: "remove".to_string(),
        batch_size: images.len(),
        successful_extractions: successful,
        failed_extractions: failed_images.len(),
        average_ber,
        transaction_dict,
    };
    let block_number = ledger.append(BlockInfo::Remover, &transaction)?;

    Ok(BatchReport {
        block_number,
        total_images: transaction.batch_size,
        processed_images: successful,
        failed_images,
    })
}

fn remove_one(
    path: &Path,
    config: &BatchConfig,
    format: PixelFormat,
    ledger: &Ledger,
) -> Result<RemovalEntry, RevmarkError> {
    let image = io::read_pixels(path, format)?;
    let watermarked_hash = image.content_hash();

    let entry = match ledger.find_embedder_entry(&watermarked_hash) {
        Some((_, entry)) => entry,
        None => find_entry_by_watermark(ledger, &image)?,
    };

    if entry.overflow_scheme != OVERFLOW_SCHEME {
        return Err(RevmarkError::OverflowMapUnrecoverable(format!(
            "unknown overflow scheme '{}'",
            entry.overflow_scheme
        )));
    }
    let key = SecretKey::from_hex(&entry.secret_key)?;
    let params = CodecParams::new(entry.kernel.clone(), entry.stride, entry.t_hi, entry.bit_depth)?;
    let overflow = OverflowMap::from_record_hex(&entry.overflow_map)?;
    let expected = Watermark::from_hex(&entry.watermark)?;

    let (restored, recovered) = codec::remove(&image, &key, &params, &overflow, &expected)?;

    // The restoration must authenticate against the receipt before anything
    // is written.
    let recovered_hash = restored.content_hash();
    if recovered_hash != entry.hash_image_orig {
        return Err(RevmarkError::WatermarkMismatch {
            expected: entry.hash_image_orig.clone(),
            recovered: recovered_hash,
            ber: 0.0,
        });
    }

    io::write_pixels(&output_path(&config.save_path, path), &restored)?;
    log::info!(path:% = path.display(); "restored original image");

    Ok(RemovalEntry {
        operation_type: "removal".to_string(),
        original_image_hash: entry.hash_image_orig.clone(),
        watermarked_image_hash: watermarked_hash,
        recovered_image_hash: recovered_hash,
        extraction_ber: 0.0,
        original_watermark: entry.watermark.clone(),
        extracted_watermark: recovered.to_hex(),
        removal_parameters: RemovalParameters {
            kernel: entry.kernel.clone(),
            stride: entry.stride,
            t_hi: entry.t_hi,
            bit_depth: entry.bit_depth,
            overflow_scheme: entry.overflow_scheme.clone(),
        },
    })
}

/// Searches the ledger for the embedder entry whose key recovers an exact
/// watermark from `image`.
///
/// This is the fallback path for images whose fingerprint no longer matches
/// any recorded embedding (e.g. after tampering outside the eligible
/// lattice).
fn find_entry_by_watermark(
    ledger: &Ledger,
    image: &ImageBuffer,
) -> Result<EmbedderEntry, RevmarkError> {
    for (_, entry) in ledger.embedder_entries() {
        let Ok(key) = SecretKey::from_hex(&entry.secret_key) else {
            continue;
        };
        let Ok(params) =
            CodecParams::new(entry.kernel.clone(), entry.stride, entry.t_hi, entry.bit_depth)
        else {
            continue;
        };
        let Ok(expected) = Watermark::from_hex(&entry.watermark) else {
            continue;
        };
        let Ok(outcome) = codec::extract(image, &key, &params, WATERMARK_BITS) else {
            continue;
        };
        if outcome.bits.is_empty() {
            continue;
        }
        let expected_stream: Vec<u8> = (0..outcome.bits.len()).map(|i| expected.bit(i)).collect();
        if metrics::ber(&expected_stream, &outcome.bits) == 0.0 {
            return Ok(entry);
        }
    }
    Err(RevmarkError::LedgerBlockNotFound(
        "any embedder entry matching the image's watermark".to_string(),
    ))
}

/// Extracts watermarks from every image under `data_path` without touching
/// the images.
///
/// Recovered watermarks are written as hex text files under `ext_wat_path`
/// and matched against the ledger for a BER. No block is appended.
pub fn extract_batch(config: &BatchConfig) -> Result<ExtractReport, RevmarkError> {
    let format = config.pixel_format()?;
    let ext_wat_path =
        config
            .ext_wat_path
            .as_ref()
            .ok_or_else(|| RevmarkError::ConfigurationInvalid {
                path: config.blockchain_path.clone(),
                message: "ext_wat_path is required for extraction".to_string(),
            })?;

    let ledger = Ledger::open(&config.blockchain_path)?;
    fs::create_dir_all(ext_wat_path)?;

    let images = io::list_images(&config.data_path)?;
    log::info!(count = images.len(); "starting extraction");

    let mut failed_images = Vec::new();
    let mut records = Vec::new();
    for path in &images {
        match extract_one(path, format, &ledger, ext_wat_path) {
            Ok(record) => records.push(record),
            Err(err) => {
                log::warn!(path:% = path.display(), kind = err.kind(); "extraction failed: {err}");
                failed_images.push(failure_label(path, &err));
            }
        }
    }

    Ok(ExtractReport {
        total_images: images.len(),
        records,
        failed_images,
    })
}

fn extract_one(
    path: &Path,
    format: PixelFormat,
    ledger: &Ledger,
    ext_wat_path: &Path,
) -> Result<ExtractRecord, RevmarkError> {
    let image = io::read_pixels(path, format)?;
    let watermarked_hash = image.content_hash();

    // Prefer the exact fingerprint match; fall back to trying every
    // recorded key when the image no longer hashes to any receipt.
    let candidates: Vec<(u64, EmbedderEntry)> = match ledger.find_embedder_entry(&watermarked_hash)
    {
        Some(found) => vec![found],
        None => ledger.embedder_entries(),
    };
    if candidates.is_empty() {
        return Err(RevmarkError::LedgerBlockNotFound(format!(
            "watermarked hash {watermarked_hash}"
        )));
    }

    let mut best: Option<ExtractRecord> = None;
    for (block_number, entry) in candidates {
        let Ok(key) = SecretKey::from_hex(&entry.secret_key) else {
            continue;
        };
        let Ok(params) =
            CodecParams::new(entry.kernel.clone(), entry.stride, entry.t_hi, entry.bit_depth)
        else {
            continue;
        };
        let Ok(expected) = Watermark::from_hex(&entry.watermark) else {
            continue;
        };
        let Ok(outcome) = codec::extract(&image, &key, &params, WATERMARK_BITS) else {
            continue;
        };
        if outcome.bits.is_empty() {
            continue;
        }
        let expected_stream: Vec<u8> = (0..outcome.bits.len()).map(|i| expected.bit(i)).collect();
        let ber = metrics::ber(&expected_stream, &outcome.bits);

        let record = ExtractRecord {
            path: path.to_path_buf(),
            watermark: outcome.watermark.to_hex(),
            recovered_bits: outcome.recovered_bits,
            ber,
            block_number,
        };
        let better = match &best {
            Some(current) => ber < current.ber,
            None => true,
        };
        if better {
            best = Some(record);
        }
        if ber == 0.0 {
            break;
        }
    }

    let record = best.ok_or_else(|| {
        RevmarkError::LedgerBlockNotFound(format!("usable embedder entry for {watermarked_hash}"))
    })?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("watermark");
    fs::write(
        ext_wat_path.join(format!("{stem}.wat")),
        format!("{}\n", record.watermark),
    )?;
    log::info!(path:% = path.display(), ber = record.ber; "extracted watermark");

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Block;

    fn flat_image(value: u16) -> ImageBuffer {
        ImageBuffer::filled(16, 16, 8, value).unwrap()
    }

    fn ramp_image() -> ImageBuffer {
        // 8 * (x + y) peaks at 240, safely below the overflow band.
        let samples: Vec<u16> = (0..16u16)
            .flat_map(|y| (0..16u16).map(move |x| 8 * (x + y)))
            .collect();
        ImageBuffer::new(16, 16, 8, samples).unwrap()
    }

    struct Workspace {
        _dir: tempfile::TempDir,
        config: BatchConfig,
    }

    fn workspace() -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("input")).unwrap();
        let config = BatchConfig {
            data_path: root.join("input"),
            save_path: root.join("output"),
            ext_wat_path: Some(root.join("extracted")),
            blockchain_path: root.join("chain.json"),
            message: "batch test".to_string(),
            kernel: crate::kernel::Kernel::four_neighbor(),
            stride: 3,
            t_hi: 0,
            data_type: "png".to_string(),
            bit_depth: None,
        };
        Workspace { _dir: dir, config }
    }

    fn seed_inputs(ws: &Workspace) {
        io::write_pixels(&ws.config.data_path.join("flat.png"), &flat_image(100)).unwrap();
        io::write_pixels(&ws.config.data_path.join("ramp.png"), &ramp_image()).unwrap();
    }

    #[test]
    fn embed_then_remove_cycle_appends_linked_blocks() {
        let ws = workspace();
        seed_inputs(&ws);

        let embed_report = embed_batch(&ws.config).unwrap();
        assert_eq!(embed_report.block_number, 1);
        assert_eq!(embed_report.processed_images, 2);
        assert!(embed_report.is_full_success());

        // Remove from the watermarked outputs.
        let mut remove_config = ws.config.clone();
        remove_config.data_path = ws.config.save_path.clone();
        remove_config.save_path = ws.config.save_path.join("restored");
        let remove_report = remove_batch(&remove_config).unwrap();
        assert_eq!(remove_report.block_number, 2);
        assert_eq!(remove_report.processed_images, 2);
        assert!(remove_report.is_full_success());

        let ledger = Ledger::open(&ws.config.blockchain_path).unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.verify());

        let remover: &Block = ledger.block(2).unwrap();
        assert_eq!(remover.transaction["average_ber"], 0.0);
        assert_eq!(remover.transaction["successful_extractions"], 2);

        // Restored pixels equal the originals byte for byte.
        let restored =
            io::read_pixels(&remove_config.save_path.join("flat.png"), PixelFormat::Gray8).unwrap();
        assert_eq!(restored.content_hash(), flat_image(100).content_hash());
        let restored =
            io::read_pixels(&remove_config.save_path.join("ramp.png"), PixelFormat::Gray8).unwrap();
        assert_eq!(restored.content_hash(), ramp_image().content_hash());
    }

    #[test]
    fn extraction_writes_watermark_files_with_zero_ber() {
        let ws = workspace();
        seed_inputs(&ws);
        embed_batch(&ws.config).unwrap();

        let mut extract_config = ws.config.clone();
        extract_config.data_path = ws.config.save_path.clone();
        let report = extract_batch(&extract_config).unwrap();
        assert!(report.is_full_success());
        assert_eq!(report.records.len(), 2);
        for record in &report.records {
            assert_eq!(record.ber, 0.0);
            assert_eq!(record.block_number, 1);
        }

        let wat_file = extract_config
            .ext_wat_path
            .as_ref()
            .unwrap()
            .join("flat.wat");
        let content = fs::read_to_string(wat_file).unwrap();
        assert_eq!(content.trim().len(), 64);
    }

    #[test]
    fn tampered_image_still_extracts_but_fails_removal() {
        let ws = workspace();
        io::write_pixels(&ws.config.data_path.join("flat.png"), &flat_image(100)).unwrap();
        embed_batch(&ws.config).unwrap();

        // Flip a corner pixel: it is not a lattice origin and carries no
        // weight in any origin's 4-neighbor footprint, so the embedded bits
        // survive, but the image fingerprint changes.
        let wat_path = ws.config.save_path.join("flat.png");
        let mut tampered = io::read_pixels(&wat_path, PixelFormat::Gray8).unwrap();
        let old = tampered.get(0, 0).unwrap();
        tampered.set(0, 0, old ^ 1).unwrap();
        io::write_pixels(&wat_path, &tampered).unwrap();

        let mut extract_config = ws.config.clone();
        extract_config.data_path = ws.config.save_path.clone();
        let report = extract_batch(&extract_config).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].ber, 0.0);

        let mut remove_config = ws.config.clone();
        remove_config.data_path = ws.config.save_path.clone();
        remove_config.save_path = ws.config.save_path.join("restored");
        let remove_report = remove_batch(&remove_config).unwrap();
        assert_eq!(remove_report.processed_images, 0);
        assert_eq!(remove_report.failed_images.len(), 1);
        assert!(remove_report.failed_images[0].contains("watermark_mismatch"));
        assert!(!remove_config.save_path.join("flat.png").exists());
    }

    #[test]
    fn per_image_failures_do_not_abort_the_batch() {
        let ws = workspace();
        seed_inputs(&ws);
        fs::write(ws.config.data_path.join("broken.png"), b"not a png").unwrap();

        let report = embed_batch(&ws.config).unwrap();
        assert_eq!(report.total_images, 3);
        assert_eq!(report.processed_images, 2);
        assert_eq!(report.failed_images.len(), 1);
        assert!(report.failed_images[0].contains("image_read_failed"));
        assert!(!report.is_full_success());

        // The failure is recorded in the ledger block too.
        let ledger = Ledger::open(&ws.config.blockchain_path).unwrap();
        let block = ledger.block(report.block_number).unwrap();
        assert_eq!(block.transaction["failed_images"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn saturated_image_is_recorded_as_capacity_failure() {
        let ws = workspace();
        io::write_pixels(&ws.config.data_path.join("white.png"), &flat_image(255)).unwrap();

        let report = embed_batch(&ws.config).unwrap();
        assert_eq!(report.processed_images, 0);
        assert_eq!(report.failed_images.len(), 1);
        assert!(report.failed_images[0].contains("insufficient_capacity"));
    }

    #[test]
    fn corrupt_ledger_aborts_the_batch() {
        let ws = workspace();
        seed_inputs(&ws);
        embed_batch(&ws.config).unwrap();

        // Corrupt block 1's previous_hash on disk.
        let mut blocks: Vec<Block> =
            serde_json::from_slice(&fs::read(&ws.config.blockchain_path).unwrap()).unwrap();
        blocks[1].header.previous_hash = "ee".repeat(32);
        fs::write(
            &ws.config.blockchain_path,
            serde_json::to_vec_pretty(&blocks).unwrap(),
        )
        .unwrap();

        let err = embed_batch(&ws.config).unwrap_err();
        assert_eq!(err.kind(), "ledger_corrupt");
    }
}
