//! Watermark derivation: secret keys, the 256-bit watermark, and the keyed
//! pseudo-random selection mask.
//!
//! Everything here is deterministic from its inputs so that embedding and
//! extraction agree bit-for-bit across platforms. The only source of entropy
//! is [`SecretKey::generate`], which draws a fresh 256-bit key from the
//! operating system for each embedding.

use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::error::RevmarkError;

/// Size of a secret key in bytes.
pub const KEY_SIZE: usize = 32;

/// Number of bits in a derived watermark.
pub const WATERMARK_BITS: usize = 256;

/// A 256-bit secret key, one per embedding.
///
/// The key seeds the selection mask and salts the watermark digest. It is
/// recorded in the ledger as a 64-character lowercase hex string and is never
/// placed into pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Draws a fresh random key from the operating system.
    ///
    /// # Errors
    ///
    /// Surfaces the platform entropy failure as [`RevmarkError::Io`].
    pub fn generate() -> Result<Self, RevmarkError> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::fill(&mut bytes)
            .map_err(|e| RevmarkError::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self(bytes))
    }

    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Lowercase hex form, 64 characters. This exact string participates in
    /// watermark derivation and is what the ledger stores.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a key from its 64-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, RevmarkError> {
        let bytes: [u8; KEY_SIZE] = hex::decode(s)
            .map_err(|e| {
                RevmarkError::Io(std::io::Error::other(format!(
                    "secret key is not valid hex: {e}"
                )))
            })?
            .try_into()
            .map_err(|_| {
                RevmarkError::Io(std::io::Error::other("secret key must be 32 bytes"))
            })?;
        Ok(Self(bytes))
    }
}

/// A derived 256-bit watermark.
///
/// `W = SHA-256(UTF-8(message) || UTF-8(hex(secret_key)))`, displayed as 64
/// lowercase hex characters. Bits are indexed most-significant-first within
/// each digest byte, in digest order; the codec consumes them in that order
/// and cycles past 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark([u8; 32]);

impl Watermark {
    /// Derives the watermark for a message under a key.
    pub fn derive(message: &str, key: &SecretKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        hasher.update(key.to_hex().as_bytes());
        Self(hasher.finalize().into())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Bit `i` of the watermark, MSB-first within each byte.
    pub fn bit(&self, i: usize) -> u8 {
        let i = i % WATERMARK_BITS;
        (self.0[i / 8] >> (7 - (i % 8))) & 1
    }

    /// The watermark as an ordered bit vector of length 256.
    pub fn bits(&self) -> Vec<u8> {
        (0..WATERMARK_BITS).map(|i| self.bit(i)).collect()
    }

    /// Packs a recovered bit stream (MSB-first) back into a watermark,
    /// zero-padding when fewer than 256 bits were recovered.
    pub fn from_bits(bits: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        for (i, &b) in bits.iter().take(WATERMARK_BITS).enumerate() {
            bytes[i / 8] |= (b & 1) << (7 - (i % 8));
        }
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, RevmarkError> {
        let bytes: [u8; 32] = hex::decode(s)
            .map_err(|e| {
                RevmarkError::Io(std::io::Error::other(format!(
                    "watermark is not valid hex: {e}"
                )))
            })?
            .try_into()
            .map_err(|_| RevmarkError::Io(std::io::Error::other("watermark must be 32 bytes")))?;
        Ok(Self(bytes))
    }
}

/// Deterministic binary selection mask over the block lattice.
///
/// Generated from a ChaCha20 keystream seeded with the raw 32-byte secret
/// key: `ceil(cells / 8)` keystream bytes are drawn, and cell `i` in
/// row-major order takes bit `(byte[i / 8] >> (i % 8)) & 1`. A lattice cell
/// is eligible for watermarking iff its mask bit is 1. The message never
/// participates, so changing it leaves the mask unchanged.
#[derive(Debug, Clone)]
pub struct SelectionMask {
    cols: u32,
    rows: u32,
    bits: Vec<u8>,
}

impl SelectionMask {
    /// Derives the mask for a `cols x rows` lattice under `key`.
    pub fn derive(key: &SecretKey, cols: u32, rows: u32) -> Self {
        let cells = cols as usize * rows as usize;
        let mut stream = vec![0u8; cells.div_ceil(8)];
        let mut rng = ChaCha20Rng::from_seed(*key.as_bytes());
        rng.fill_bytes(&mut stream);

        let bits = (0..cells)
            .map(|i| (stream[i / 8] >> (i % 8)) & 1)
            .collect();
        Self { cols, rows, bits }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Mask bit for lattice cell `(i, j)`.
    pub fn bit(&self, i: u32, j: u32) -> u8 {
        debug_assert!(i < self.cols && j < self.rows);
        self.bits[j as usize * self.cols as usize + i as usize]
    }

    /// Number of cells with mask bit 1.
    pub fn ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b == 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(byte: u8) -> SecretKey {
        let mut bytes = [0u8; KEY_SIZE];
        bytes[KEY_SIZE - 1] = byte;
        SecretKey::from_bytes(bytes)
    }

    #[test]
    fn key_hex_round_trip() {
        let key = key_of(1);
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.ends_with("01"));
        assert_eq!(SecretKey::from_hex(&hex).unwrap(), key);
        assert!(SecretKey::from_hex("abcd").is_err());
    }

    #[test]
    fn watermark_is_deterministic_and_key_salted() {
        let key = key_of(1);
        let w1 = Watermark::derive("A", &key);
        let w2 = Watermark::derive("A", &key);
        assert_eq!(w1, w2);

        let w3 = Watermark::derive("B", &key);
        assert_ne!(w1, w3);

        let w4 = Watermark::derive("A", &key_of(2));
        assert_ne!(w1, w4);
    }

    #[test]
    fn watermark_bits_cycle_past_256() {
        let w = Watermark::derive("msg", &key_of(9));
        assert_eq!(w.bit(0), w.bit(256));
        assert_eq!(w.bit(17), w.bit(273));
        assert_eq!(w.bits().len(), WATERMARK_BITS);
    }

    #[test]
    fn watermark_bit_order_is_msb_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0b1000_0001;
        let w = Watermark::from_bytes(bytes);
        assert_eq!(w.bit(0), 1);
        assert_eq!(w.bit(1), 0);
        assert_eq!(w.bit(7), 1);
        assert_eq!(w.bit(8), 0);
    }

    #[test]
    fn watermark_bits_round_trip() {
        let w = Watermark::derive("round trip", &key_of(3));
        assert_eq!(Watermark::from_bits(&w.bits()), w);
    }

    #[test]
    fn mask_depends_on_key_not_message() {
        let a = SelectionMask::derive(&key_of(1), 16, 16);
        let b = SelectionMask::derive(&key_of(1), 16, 16);
        for j in 0..16 {
            for i in 0..16 {
                assert_eq!(a.bit(i, j), b.bit(i, j));
            }
        }

        let c = SelectionMask::derive(&key_of(2), 16, 16);
        let differing = (0..16)
            .flat_map(|j| (0..16).map(move |i| (i, j)))
            .filter(|&(i, j)| a.bit(i, j) != c.bit(i, j))
            .count();
        assert!(differing > 0, "distinct keys should yield distinct masks");
    }

    #[test]
    fn mask_is_roughly_balanced() {
        let mask = SelectionMask::derive(&key_of(7), 64, 64);
        let ones = mask.ones();
        // 4096 Bernoulli(1/2) cells; a 10-sigma band is [1728, 2368].
        assert!((1728..=2368).contains(&ones), "ones = {ones}");
    }
}
