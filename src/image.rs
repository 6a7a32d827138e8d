//! Pixel buffer with bounds-checked access and content fingerprinting.
//!
//! The codec operates on a plain two-dimensional grid of unsigned samples.
//! Samples are held as `u16` regardless of the declared bit depth so the same
//! buffer type serves both 8-bit rasters and 16-bit deep images; the depth
//! caps the admissible sample range.

use sha2::{Digest, Sha256};

use crate::error::RevmarkError;

/// Two-dimensional grid of unsigned integer samples.
///
/// Inputs to the codec are treated as immutable: embedding and removal clone
/// the buffer and return a new one rather than mutating in place.
///
/// # Examples
///
/// ```rust
/// use revmark::ImageBuffer;
///
/// let image = ImageBuffer::new(8, 8, 8, vec![100; 64])?;
/// assert_eq!(image.get(3, 3), Some(100));
/// assert_eq!(image.get(8, 0), None);
/// # Ok::<(), revmark::RevmarkError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bit_depth: u8,
    samples: Vec<u16>,
}

impl ImageBuffer {
    /// Builds a buffer from row-major samples.
    ///
    /// # Errors
    ///
    /// Returns [`RevmarkError::ImageShapeMismatch`] when the sample count
    /// does not equal `width * height`, when either dimension is zero, when
    /// the bit depth is not 8 or 16, or when a sample exceeds `2^D - 1`.
    pub fn new(
        width: u32,
        height: u32,
        bit_depth: u8,
        samples: Vec<u16>,
    ) -> Result<Self, RevmarkError> {
        if width == 0 || height == 0 {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "zero-sized image {width}x{height}"
            )));
        }
        if bit_depth != 8 && bit_depth != 16 {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "unsupported bit depth {bit_depth}, expected 8 or 16"
            )));
        }
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "{} samples for a {width}x{height} image, expected {expected}",
                samples.len()
            )));
        }
        let max = Self::max_sample_for_depth(bit_depth);
        if let Some(bad) = samples.iter().find(|&&s| s > max) {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "sample {bad} exceeds maximum {max} for bit depth {bit_depth}"
            )));
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            samples,
        })
    }

    /// Buffer filled with a constant sample value. Handy in tests.
    pub fn filled(
        width: u32,
        height: u32,
        bit_depth: u8,
        value: u16,
    ) -> Result<Self, RevmarkError> {
        Self::new(
            width,
            height,
            bit_depth,
            vec![value; width as usize * height as usize],
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Largest sample value admissible at this buffer's depth, `2^D - 1`.
    pub fn max_sample(&self) -> u16 {
        Self::max_sample_for_depth(self.bit_depth)
    }

    fn max_sample_for_depth(bit_depth: u8) -> u16 {
        if bit_depth == 16 {
            u16::MAX
        } else {
            (1u16 << bit_depth) - 1
        }
    }

    /// Sample at `(x, y)`, or `None` outside the grid.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.samples[y as usize * self.width as usize + x as usize])
    }

    /// Writes the sample at `(x, y)`.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::ImageShapeMismatch`] when the coordinate lies outside
    /// the grid or the value exceeds the depth range.
    pub fn set(&mut self, x: u32, y: u32, value: u16) -> Result<(), RevmarkError> {
        if x >= self.width || y >= self.height {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "coordinate ({x}, {y}) outside {}x{}",
                self.width, self.height
            )));
        }
        if value > self.max_sample() {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "value {value} exceeds maximum {} for bit depth {}",
                self.max_sample(),
                self.bit_depth
            )));
        }
        self.samples[y as usize * self.width as usize + x as usize] = value;
        Ok(())
    }

    /// Row-major view of the raw samples.
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// SHA-256 fingerprint of the pixel array, as 64 lowercase hex chars.
    ///
    /// Samples are serialized row-major as little-endian unsigned integers of
    /// width `ceil(D / 8)` bytes: one byte per sample at depth 8, two at
    /// depth 16. Container metadata never participates.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        if self.bit_depth == 8 {
            for &s in &self.samples {
                hasher.update([s as u8]);
            }
        } else {
            for &s in &self.samples {
                hasher.update(s.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// True when both buffers share width, height and depth.
    pub fn same_shape(&self, other: &ImageBuffer) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.bit_depth == other.bit_depth
    }
}
