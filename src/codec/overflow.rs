//! Overflow map and its versioned binary record.
//!
//! Pixels whose value sits in the near-saturation band are left untouched by
//! the embedder and their coordinates collected here, so the inverse can skip
//! them and reproduce the original image exactly. The map travels inside the
//! ledger's embedder transaction as a hex-encoded record: a magic/version
//! envelope, a flag byte selecting the coordinate width, a big-endian entry
//! count, the coordinate pairs, and a trailing CRC32 over the body.

use binrw::BinRead;
use crc32fast::Hasher;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use thiserror::Error;

use crate::error::RevmarkError;

#[derive(Debug, Error)]
pub(crate) enum RecordError {
    #[error("insufficient data for overflow record")]
    InsufficientData,

    #[error("invalid record magic")]
    InvalidMagic,

    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("CRC mismatch: expected {expected:08x}, found {found:08x}")]
    CrcMismatch { expected: u32, found: u32 },

    #[error("duplicate coordinate ({0}, {1})")]
    DuplicateCoordinate(u32, u32),

    #[error("record is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RecordError> for RevmarkError {
    fn from(err: RecordError) -> Self {
        RevmarkError::OverflowMapUnrecoverable(err.to_string())
    }
}

// Record constants
const MAGIC: &[u8; 4] = b"RWOF";
const VERSION: u8 = 1;

const MAGIC_SIZE: usize = 4;
const VERSION_SIZE: usize = 1;
const FLAGS_SIZE: usize = 1;
const COUNT_SIZE: usize = 4;
const CRC32_SIZE: usize = 4;

const FIXED_RECORD_SIZE: usize = MAGIC_SIZE + VERSION_SIZE + FLAGS_SIZE + COUNT_SIZE + CRC32_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
pub(crate) struct RecordFlags(u8);

bitflags::bitflags! {
    impl RecordFlags: u8 {
        // 0 = u16 coordinates, 1 = u32 coordinates
        const WIDE_COORDS = 0b0000_0001;
    }
}

#[derive(Debug, BinRead)]
#[br(big)]
#[br(magic = b"RWOF")]
struct FixedRecord {
    #[br(assert(version == VERSION))]
    version: u8,
    flags: RecordFlags,
    count: u32,
}

/// Ordered list of pixel coordinates excluded from modification.
///
/// Coordinates are appended in lattice traversal order and are unique within
/// one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowMap {
    coords: Vec<(u32, u32)>,
}

impl OverflowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a coordinate; the embedder visits each lattice cell once, so
    /// entries stay unique by construction.
    pub(crate) fn push(&mut self, x: u32, y: u32) {
        self.coords.push((x, y));
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn coords(&self) -> &[(u32, u32)] {
        &self.coords
    }

    /// Coordinate set for O(1) skip tests during extraction.
    pub fn coord_set(&self) -> HashSet<(u32, u32)> {
        self.coords.iter().copied().collect()
    }

    /// Serializes the map into its binary record.
    ///
    /// Narrow (u16) coordinates are used whenever every component fits,
    /// which covers any image up to 65535 pixels a side.
    pub fn encode_record(&self) -> Vec<u8> {
        let wide = self
            .coords
            .iter()
            .any(|&(x, y)| x > u16::MAX as u32 || y > u16::MAX as u32);

        let mut flags = RecordFlags::empty();
        if wide {
            flags |= RecordFlags::WIDE_COORDS;
        }

        let coord_size = if wide { 8 } else { 4 };
        let mut out = Vec::with_capacity(FIXED_RECORD_SIZE + self.coords.len() * coord_size);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(flags.bits());
        out.extend_from_slice(&(self.coords.len() as u32).to_be_bytes());
        for &(x, y) in &self.coords {
            if wide {
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
            } else {
                out.extend_from_slice(&(x as u16).to_be_bytes());
                out.extend_from_slice(&(y as u16).to_be_bytes());
            }
        }
        let crc = crc_over(&out[MAGIC_SIZE..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Decodes a binary record back into a map, validating the envelope, the
    /// CRC, and coordinate uniqueness.
    pub fn decode_record(data: &[u8]) -> Result<Self, RevmarkError> {
        Ok(Self::decode_record_inner(data)?)
    }

    fn decode_record_inner(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() < FIXED_RECORD_SIZE {
            return Err(RecordError::InsufficientData);
        }

        let mut cursor = Cursor::new(data);
        let fixed = FixedRecord::read_be(&mut cursor).map_err(|e| match e {
            binrw::Error::AssertFail { .. } => RecordError::UnsupportedVersion(VERSION),
            binrw::Error::BadMagic { .. } => RecordError::InvalidMagic,
            binrw::Error::Io(io_err) => RecordError::Io(io_err),
            _ => RecordError::InsufficientData,
        })?;

        let wide = fixed.flags.contains(RecordFlags::WIDE_COORDS);
        let coord_size = if wide { 8usize } else { 4 };
        let body_end = (cursor.position() as usize)
            .checked_add(fixed.count as usize * coord_size)
            .ok_or(RecordError::InsufficientData)?;
        if data.len() < body_end + CRC32_SIZE {
            return Err(RecordError::InsufficientData);
        }

        let expected = crc_over(&data[MAGIC_SIZE..body_end]);
        let found = u32::from_be_bytes(
            data[body_end..body_end + CRC32_SIZE]
                .try_into()
                .expect("4-byte slice"),
        );
        if expected != found {
            return Err(RecordError::CrcMismatch { expected, found });
        }

        let mut coords = Vec::with_capacity(fixed.count as usize);
        let mut seen = HashSet::with_capacity(fixed.count as usize);
        for _ in 0..fixed.count {
            let (x, y) = if wide {
                let mut buf = [0u8; 4];
                cursor.read_exact(&mut buf)?;
                let x = u32::from_be_bytes(buf);
                cursor.read_exact(&mut buf)?;
                (x, u32::from_be_bytes(buf))
            } else {
                let mut buf = [0u8; 2];
                cursor.read_exact(&mut buf)?;
                let x = u16::from_be_bytes(buf) as u32;
                cursor.read_exact(&mut buf)?;
                (x, u16::from_be_bytes(buf) as u32)
            };
            if !seen.insert((x, y)) {
                return Err(RecordError::DuplicateCoordinate(x, y));
            }
            coords.push((x, y));
        }

        Ok(Self { coords })
    }

    /// Hex form of the record, as stored in ledger transactions.
    pub fn to_record_hex(&self) -> String {
        hex::encode(self.encode_record())
    }

    /// Parses a map from its hex record form.
    pub fn from_record_hex(s: &str) -> Result<Self, RevmarkError> {
        let data = hex::decode(s).map_err(RecordError::from)?;
        Self::decode_record(&data)
    }
}

fn crc_over(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> OverflowMap {
        let mut map = OverflowMap::new();
        map.push(1, 1);
        map.push(4, 1);
        map.push(7, 4);
        map
    }

    #[test]
    fn record_round_trip_narrow() {
        let map = sample_map();
        let record = map.encode_record();
        assert_eq!(&record[..4], MAGIC);
        let back = OverflowMap::decode_record(&record).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn record_round_trip_wide() {
        let mut map = OverflowMap::new();
        map.push(70_000, 3);
        map.push(2, 70_001);
        let record = map.encode_record();
        let back = OverflowMap::decode_record(&record).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn empty_map_round_trips() {
        let map = OverflowMap::new();
        let back = OverflowMap::from_record_hex(&map.to_record_hex()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn corrupt_crc_is_rejected() {
        let mut record = sample_map().encode_record();
        let last = record.len() - 1;
        record[last] ^= 0xFF;
        assert!(OverflowMap::decode_record(&record).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut record = sample_map().encode_record();
        record[0] = b'X';
        assert!(OverflowMap::decode_record(&record).is_err());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let record = sample_map().encode_record();
        assert!(OverflowMap::decode_record(&record[..record.len() - 3]).is_err());
    }

    #[test]
    fn duplicate_coordinates_are_rejected() {
        // Hand-build a record with a repeated coordinate.
        let mut map = OverflowMap::new();
        map.push(5, 5);
        map.push(5, 5);
        let record = map.encode_record();
        assert!(matches!(
            OverflowMap::decode_record(&record),
            Err(RevmarkError::OverflowMapUnrecoverable(_))
        ));
    }
}
