//! Hash-chained append-only transaction ledger.
//!
//! The ledger is a single JSON document holding an ordered array of blocks.
//! Each append links the new block to the SHA-256 of the canonical encoding
//! of the previous one, writes the whole document to a temporary file,
//! fsyncs, and renames it into place. Writers hold an exclusive advisory
//! lock (a sibling `.lock` file) for the duration of an append; readers need
//! no lock because the rename is atomic.
//!
//! A chain that fails verification on open is served read-only: lookups keep
//! working so removals can still be audited, but every append fails with
//! [`RevmarkError::LedgerCorrupt`] until the file is repaired.

pub mod block;
pub mod transaction;

pub use block::{Block, BlockHeader, BlockInfo, GENESIS_PREVIOUS_HASH};
pub use transaction::{
    EmbedderEntry, EmbedderTransaction, RemovalEntry, RemovalParameters, RemoverTransaction,
    OVERFLOW_SCHEME,
};

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::RevmarkError;

/// Wall-clock seconds since the Unix epoch, as the ledger records them.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Exclusive advisory writer lock, held for the duration of an append.
///
/// Implemented as a sibling `<ledger>.lock` file created with `create_new`;
/// the file is removed on drop, including on error paths.
struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    const ATTEMPTS: u32 = 50;
    const BACKOFF: Duration = Duration::from_millis(100);

    fn acquire(ledger_path: &Path) -> Result<Self, RevmarkError> {
        let path = sibling_with_suffix(ledger_path, ".lock");
        for attempt in 0..Self::ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 == Self::ATTEMPTS {
                        return Err(RevmarkError::Io(std::io::Error::new(
                            std::io::ErrorKind::WouldBlock,
                            format!("ledger lock '{}' is held by another writer", path.display()),
                        )));
                    }
                    std::thread::sleep(Self::BACKOFF);
                }
                Err(e) => return Err(RevmarkError::Io(e)),
            }
        }
        unreachable!("lock loop returns before exhausting attempts")
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.file_name().unwrap_or_default());
    name.push(suffix);
    path.with_file_name(name)
}

/// The persisted hash-chained ledger.
pub struct Ledger {
    path: PathBuf,
    blocks: Vec<Block>,
    corruption: Option<(u64, String)>,
}

impl Ledger {
    /// Opens (or creates) the ledger at `path`.
    ///
    /// A missing file gets a genesis block synthesized and persisted. An
    /// existing file is loaded and its chain verified; on a hash mismatch
    /// the ledger is served read-only and [`Ledger::is_corrupt`] reports
    /// the failing block.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::LedgerCorrupt`] when the document cannot even be
    /// parsed, [`RevmarkError::Io`] for filesystem failures.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RevmarkError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let ledger = Self {
                path: path.clone(),
                blocks: vec![Block::genesis(now_seconds())],
                corruption: None,
            };
            let _lock = LedgerLock::acquire(&path)?;
            ledger.persist_atomic()?;
            log::info!(path = path.display().to_string().as_str(); "created ledger with genesis block");
            return Ok(ledger);
        }

        let data = fs::read(&path)?;
        let blocks: Vec<Block> =
            serde_json::from_slice(&data).map_err(|e| RevmarkError::LedgerCorrupt {
                path: path.clone(),
                block_number: 0,
                message: format!("unparseable ledger document: {e}"),
            })?;

        let corruption = check_chain(&blocks).err();
        if let Some((number, ref message)) = corruption {
            log::warn!(block = number; "ledger chain corrupt, opening read-only: {message}");
        }
        Ok(Self {
            path,
            blocks,
            corruption,
        })
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.get(number as usize)
    }

    /// Whether the chain failed verification on open.
    pub fn is_corrupt(&self) -> bool {
        self.corruption.is_some()
    }

    fn corruption_error(&self) -> Option<RevmarkError> {
        self.corruption
            .as_ref()
            .map(|(number, message)| RevmarkError::LedgerCorrupt {
                path: self.path.clone(),
                block_number: *number,
                message: message.clone(),
            })
    }

    /// Fails fast when the chain was corrupt at open time.
    ///
    /// Batch drivers call this before doing any per-image work that would
    /// end in an append.
    pub fn require_writable(&self) -> Result<(), RevmarkError> {
        match self.corruption_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Appends a block wrapping `transaction` and returns its number.
    ///
    /// Takes the writer lock, links the block to the hash of the current
    /// tail, persists via write-temp/fsync/rename, and only then exposes
    /// the block to readers of this handle.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::LedgerCorrupt`] when the chain was corrupt at open
    /// time (the ledger is read-only), [`RevmarkError::Io`] on persistence
    /// failures.
    pub fn append<T: Serialize>(
        &mut self,
        info: BlockInfo,
        transaction: &T,
    ) -> Result<u64, RevmarkError> {
        if let Some(err) = self.corruption_error() {
            return Err(err);
        }

        let _lock = LedgerLock::acquire(&self.path)?;

        let last = self.blocks.last().expect("ledger always has genesis");
        let block = Block {
            header: BlockHeader {
                timestamp: now_seconds(),
                previous_hash: last.compute_hash(),
                block_number: last.header.block_number + 1,
            },
            info,
            transaction: serde_json::to_value(transaction).map_err(|e| {
                RevmarkError::Io(std::io::Error::other(format!(
                    "unserializable transaction: {e}"
                )))
            })?,
        };
        let number = block.header.block_number;

        self.blocks.push(block);
        if let Err(e) = self.persist_atomic() {
            self.blocks.pop();
            return Err(e);
        }

        log::info!(block = number; "appended ledger block");
        Ok(number)
    }

    /// Recomputes the whole chain.
    ///
    /// Returns false on any linkage mismatch, and also when a remover
    /// entry references a watermarked fingerprint no earlier embedder block
    /// recorded.
    pub fn verify(&self) -> bool {
        if check_chain(&self.blocks).is_err() {
            return false;
        }

        let mut embedded: HashSet<String> = HashSet::new();
        for block in &self.blocks {
            match block.info {
                BlockInfo::Embedder => {
                    if let Some(dict) = block.transaction.get("transaction_dict") {
                        if let Some(map) = dict.as_object() {
                            embedded.extend(map.keys().cloned());
                        }
                    }
                }
                BlockInfo::Remover => {
                    let Some(map) = block
                        .transaction
                        .get("transaction_dict")
                        .and_then(|d| d.as_object())
                    else {
                        return false;
                    };
                    if map.keys().any(|h| !embedded.contains(h)) {
                        return false;
                    }
                }
                BlockInfo::Genesis => {}
            }
        }
        true
    }

    /// Most recent embedder block whose `transaction_dict` has key `hash`.
    pub fn find_by_watermarked_hash(&self, hash: &str) -> Option<u64> {
        self.blocks
            .iter()
            .rev()
            .filter(|b| b.info == BlockInfo::Embedder)
            .find(|b| {
                b.transaction
                    .get("transaction_dict")
                    .and_then(|d| d.get(hash))
                    .is_some()
            })
            .map(|b| b.header.block_number)
    }

    /// The most recent embedder entry for a watermarked fingerprint,
    /// deserialized back into its typed form.
    pub fn find_embedder_entry(&self, hash: &str) -> Option<(u64, EmbedderEntry)> {
        let number = self.find_by_watermarked_hash(hash)?;
        let entry = self
            .block(number)?
            .transaction
            .get("transaction_dict")?
            .get(hash)?;
        serde_json::from_value(entry.clone())
            .ok()
            .map(|e| (number, e))
    }

    /// All embedder entries, most recent block first.
    ///
    /// The extract-only path walks these as key candidates when an image's
    /// fingerprint no longer matches any recorded embedding. Entries that
    /// fail to deserialize are skipped.
    pub fn embedder_entries(&self) -> Vec<(u64, EmbedderEntry)> {
        self.blocks
            .iter()
            .rev()
            .filter(|b| b.info == BlockInfo::Embedder)
            .flat_map(|b| {
                let number = b.header.block_number;
                b.transaction
                    .get("transaction_dict")
                    .and_then(|d| d.as_object())
                    .into_iter()
                    .flat_map(move |map| {
                        map.values().filter_map(move |v| {
                            serde_json::from_value(v.clone()).ok().map(|e| (number, e))
                        })
                    })
            })
            .collect()
    }

    /// Embedder blocks whose recorded watermark equals `watermark`.
    ///
    /// Used by the extract-only path when image fingerprints no longer
    /// match (e.g. a tampered file).
    pub fn find_by_extracted_watermark(&self, watermark: &str) -> Vec<u64> {
        self.blocks
            .iter()
            .filter(|b| b.info == BlockInfo::Embedder)
            .filter(|b| {
                b.transaction
                    .get("transaction_dict")
                    .and_then(|d| d.as_object())
                    .is_some_and(|map| {
                        map.values()
                            .any(|e| e.get("watermark").and_then(|w| w.as_str()) == Some(watermark))
                    })
            })
            .map(|b| b.header.block_number)
            .collect()
    }

    /// Writes the document to `<ledger>.tmp`, fsyncs, renames into place.
    fn persist_atomic(&self) -> Result<(), RevmarkError> {
        let tmp = sibling_with_suffix(&self.path, ".tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut body = serde_json::to_vec_pretty(&self.blocks)
            .map_err(|e| RevmarkError::Io(std::io::Error::other(e.to_string())))?;
        body.push(b'\n');
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Checks header linkage over a block slice.
///
/// Returns the failing block number and a description on mismatch.
fn check_chain(blocks: &[Block]) -> Result<(), (u64, String)> {
    let Some(genesis) = blocks.first() else {
        return Err((0, "ledger has no blocks".to_string()));
    };
    if genesis.header.block_number != 0 {
        return Err((0, "genesis block number is not 0".to_string()));
    }
    if genesis.header.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err((0, "genesis previous_hash is not all zeros".to_string()));
    }

    for (n, pair) in blocks.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        let number = n as u64 + 1;
        if next.header.block_number != number {
            return Err((number, format!(
                "block number {} at position {number}",
                next.header.block_number
            )));
        }
        let expected = prev.compute_hash();
        if next.header.previous_hash != expected {
            return Err((
                number,
                format!(
                    "previous_hash {} does not match parent hash {expected}",
                    next.header.previous_hash
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn embedder_tx(hash: &str, watermark: &str) -> EmbedderTransaction {
        let entry = EmbedderEntry {
            timestamp: 1.0,
            secret_key: "11".repeat(32),
            message: "m".to_string(),
            watermark: watermark.to_string(),
            kernel: crate::kernel::Kernel::four_neighbor(),
            stride: 3,
            t_hi: 0,
            hash_image_wat: hash.to_string(),
            hash_image_orig: "bb".repeat(32),
            bit_depth: 8,
            data_type: "png".to_string(),
            operation_type: "embedding".to_string(),
            overflow_map: String::new(),
            overflow_scheme: OVERFLOW_SCHEME.to_string(),
        };
        let mut dict = BTreeMap::new();
        dict.insert(hash.to_string(), entry);
        EmbedderTransaction {
            total_images: 1,
            processed_images: 1,
            failed_images: vec![],
            transaction_dict: dict,
        }
    }

    #[test]
    fn open_creates_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.blocks()[0].info, BlockInfo::Genesis);
        assert!(ledger.verify());
        assert!(path.exists());
    }

    #[test]
    fn append_links_blocks_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();

        let n1 = ledger
            .append(BlockInfo::Embedder, &embedder_tx(&"aa".repeat(32), &"cc".repeat(32)))
            .unwrap();
        assert_eq!(n1, 1);
        assert!(ledger.verify());

        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.verify());
        assert_eq!(
            reopened.blocks()[1].header.previous_hash,
            reopened.blocks()[0].compute_hash()
        );
    }

    #[test]
    fn lookups_by_hash_and_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();

        let wat_hash = "aa".repeat(32);
        let watermark = "cc".repeat(32);
        ledger
            .append(BlockInfo::Embedder, &embedder_tx(&wat_hash, &watermark))
            .unwrap();

        assert_eq!(ledger.find_by_watermarked_hash(&wat_hash), Some(1));
        assert_eq!(ledger.find_by_watermarked_hash("missing"), None);
        assert_eq!(ledger.find_by_extracted_watermark(&watermark), vec![1]);
        assert!(ledger.find_by_extracted_watermark("nope").is_empty());

        let (number, entry) = ledger.find_embedder_entry(&wat_hash).unwrap();
        assert_eq!(number, 1);
        assert_eq!(entry.watermark, watermark);
    }

    #[test]
    fn most_recent_embedder_block_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();

        let wat_hash = "aa".repeat(32);
        ledger
            .append(BlockInfo::Embedder, &embedder_tx(&wat_hash, &"c1".repeat(32)))
            .unwrap();
        ledger
            .append(BlockInfo::Embedder, &embedder_tx(&wat_hash, &"c2".repeat(32)))
            .unwrap();
        assert_eq!(ledger.find_by_watermarked_hash(&wat_hash), Some(2));
    }

    #[test]
    fn remover_without_matching_embedder_fails_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();

        let mut dict = serde_json::Map::new();
        dict.insert("ff".repeat(32), json!({}));
        ledger
            .append(BlockInfo::Remover, &json!({"transaction_dict": dict}))
            .unwrap();
        assert!(!ledger.verify());
    }

    #[test]
    fn tampered_previous_hash_is_detected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();
        ledger
            .append(BlockInfo::Embedder, &embedder_tx(&"aa".repeat(32), &"cc".repeat(32)))
            .unwrap();

        // Corrupt block 1's previous_hash on disk.
        let mut blocks: Vec<Block> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        blocks[1].header.previous_hash = "ff".repeat(32);
        fs::write(&path, serde_json::to_vec_pretty(&blocks).unwrap()).unwrap();

        let mut reopened = Ledger::open(&path).unwrap();
        assert!(reopened.is_corrupt());
        assert!(!reopened.verify());
        let err = reopened
            .append(BlockInfo::Embedder, &json!({}))
            .unwrap_err();
        assert!(matches!(err, RevmarkError::LedgerCorrupt { .. }));
    }

    #[test]
    fn lock_file_is_released_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut ledger = Ledger::open(&path).unwrap();
        ledger
            .append(BlockInfo::Embedder, &embedder_tx(&"aa".repeat(32), &"cc".repeat(32)))
            .unwrap();
        assert!(!sibling_with_suffix(&path, ".lock").exists());
    }
}
