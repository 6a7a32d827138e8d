//! Reversible watermark codec.
//!
//! The codec tiles the image into disjoint blocks on a regular lattice and
//! shifts prediction errors at block origins to vacate a histogram bin for
//! watermark bits. Every decision it makes is reproducible from the secret
//! key and the parameters, and every pixel it refuses to touch is logged in
//! an [`OverflowMap`] so the inverse is byte-exact.
//!
//! # Forward rule (per eligible block origin, error `e = I - p`)
//!
//! - `e < t_hi` (including all negatives): pixel untouched, no bit consumed.
//! - original value in the near-saturation band `[2^D - 2, 2^D - 1]`: pixel
//!   untouched, coordinate appended to the overflow map, no bit consumed.
//! - `e = t_hi`: the next watermark bit `b` lands in the vacated bin,
//!   `I' = p + t_hi + b`.
//! - `e > t_hi`: the error shifts up by one, `I' = I + 1`.
//!
//! The inverse reads the same lattice in the same order, skips overflow
//! coordinates, and maps `e' ∈ {t_hi, t_hi+1}` back to a bit and `e' >
//! t_hi+1` back to `e' - 1`. Predictions agree between the two passes
//! because only block origins are ever modified and the stride keeps kernel
//! footprints disjoint.

pub mod overflow;

pub use overflow::OverflowMap;

use crate::error::RevmarkError;
use crate::image::ImageBuffer;
use crate::kernel::Kernel;
use crate::mark::{SecretKey, SelectionMask, Watermark, WATERMARK_BITS};
use crate::metrics;

/// Histogram shift applied to errors above `t_hi`.
///
/// This is the embed-specific offset `MAX - t_hi`; the vacated bin has width
/// one, so a single value of shift serves every depth.
const SHIFT: u16 = 1;

/// Per-operation codec parameters.
///
/// A value of this type is validated once and then shared by embed, extract
/// and remove; the same parameters must be presented for the inverse
/// operations to succeed, and the ledger records them verbatim.
#[derive(Debug, Clone)]
pub struct CodecParams {
    kernel: Kernel,
    stride: u32,
    t_hi: u16,
    bit_depth: u8,
}

impl CodecParams {
    /// Validates and bundles codec parameters.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::InvalidKernel`] when the stride is smaller than the
    /// kernel side (kernel footprints of neighboring origins would overlap
    /// and predictions would no longer survive embedding), or when `t_hi`
    /// leaves no room below the near-saturation band.
    pub fn new(
        kernel: Kernel,
        stride: u32,
        t_hi: u16,
        bit_depth: u8,
    ) -> Result<Self, RevmarkError> {
        if stride < kernel.side() as u32 {
            return Err(RevmarkError::InvalidKernel(format!(
                "stride {stride} is smaller than the kernel side {}; block footprints would overlap",
                kernel.side()
            )));
        }
        if bit_depth != 8 && bit_depth != 16 {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "unsupported bit depth {bit_depth}, expected 8 or 16"
            )));
        }
        let max = if bit_depth == 16 {
            u16::MAX
        } else {
            (1u16 << bit_depth) - 1
        };
        if t_hi as u32 + SHIFT as u32 + 1 >= max as u32 {
            return Err(RevmarkError::InvalidKernel(format!(
                "t_hi {t_hi} leaves no embeddable range at bit depth {bit_depth}"
            )));
        }
        Ok(Self {
            kernel,
            stride,
            t_hi,
            bit_depth,
        })
    }

    /// Default parameters for a bit depth: 4-neighbor kernel, stride 3,
    /// t_hi 0.
    pub fn defaults(bit_depth: u8) -> Result<Self, RevmarkError> {
        Self::new(Kernel::four_neighbor(), 3, 0, bit_depth)
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn t_hi(&self) -> u16 {
        self.t_hi
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    fn max_sample(&self) -> u16 {
        if self.bit_depth == 16 {
            u16::MAX
        } else {
            (1u16 << self.bit_depth) - 1
        }
    }

    /// Lowest value of the near-saturation band `[2^D - 2, 2^D - 1]`.
    fn band_floor(&self) -> u16 {
        self.max_sample() - SHIFT
    }

    fn check_depth(&self, image: &ImageBuffer) -> Result<(), RevmarkError> {
        if image.bit_depth() != self.bit_depth {
            return Err(RevmarkError::ImageShapeMismatch(format!(
                "image depth {} does not match codec depth {}",
                image.bit_depth(),
                self.bit_depth
            )));
        }
        Ok(())
    }
}

/// The block lattice induced by a kernel half-size and stride.
///
/// Origins sit at `(r + i*S, r + j*S)` and stay at least `r` away from every
/// image edge so the kernel footprint is always interior.
#[derive(Debug, Clone, Copy)]
struct Lattice {
    r: u32,
    stride: u32,
    cols: u32,
    rows: u32,
}

impl Lattice {
    fn of(image: &ImageBuffer, params: &CodecParams) -> Self {
        let r = params.kernel.half_size();
        let stride = params.stride;
        let span = |dim: u32| {
            if dim > 2 * r {
                (dim - 2 * r).div_ceil(stride)
            } else {
                0
            }
        };
        Self {
            r,
            stride,
            cols: span(image.width()),
            rows: span(image.height()),
        }
    }

    fn origin(&self, i: u32, j: u32) -> (u32, u32) {
        (self.r + i * self.stride, self.r + j * self.stride)
    }

    fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cols = self.cols;
        (0..self.rows).flat_map(move |j| (0..cols).map(move |i| (i, j)))
    }
}

/// Statistics reported by a successful embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedStats {
    /// Lattice cells whose mask bit is 1.
    pub eligible_blocks: usize,
    /// Eligible cells whose pixel changed to carry a watermark bit. Cells
    /// that were merely shifted to vacate the bin are not counted.
    pub modified_blocks: usize,
    /// Distinct watermark bits embedded, `min(256, modified_blocks)`; the
    /// stream cycles when more cells than bits are available.
    pub bits_embedded: usize,
    /// PSNR between input and output, in dB.
    pub psnr: f64,
}

/// Everything produced by [`embed`].
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    /// Watermarked copy of the input; the input itself is never mutated.
    pub image: ImageBuffer,
    /// Watermark that was embedded.
    pub watermark: Watermark,
    /// Coordinates excluded from modification, in traversal order.
    pub overflow: OverflowMap,
    pub stats: EmbedStats,
}

/// Everything produced by an extract-only pass.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    /// Recovered watermark, zero-padded past the recovered length.
    pub watermark: Watermark,
    /// Recovered raw bit stream, cycled repeats included.
    pub bits: Vec<u8>,
    /// Number of watermark bits recovered, capped at the expected count.
    pub recovered_bits: usize,
    /// Best-effort restoration. `Some` only when no lattice cell was
    /// ambiguous without the overflow map; byte-exact in that case.
    pub restored: Option<ImageBuffer>,
}

/// Embeds the watermark derived from `message` under `key` into `image`.
///
/// Returns a new image; the input is untouched. Pixels outside eligible
/// block origins are bit-identical between input and output.
///
/// # Errors
///
/// - [`RevmarkError::ImageShapeMismatch`] on a depth mismatch.
/// - [`RevmarkError::InsufficientCapacity`] when not a single watermark bit
///   could be embedded (empty lattice, empty mask, or every eligible cell in
///   the overflow band).
pub fn embed(
    image: &ImageBuffer,
    key: &SecretKey,
    message: &str,
    params: &CodecParams,
) -> Result<EmbedOutcome, RevmarkError> {
    params.check_depth(image)?;

    let lattice = Lattice::of(image, params);
    let mask = SelectionMask::derive(key, lattice.cols, lattice.rows);
    let watermark = Watermark::derive(message, key);

    let band_floor = params.band_floor() as i64;
    let t_hi = params.t_hi as i64;
    let max_value = image.max_sample() as i64;

    let mut out = image.clone();
    let mut overflow = OverflowMap::new();
    let mut eligible = 0usize;
    let mut bit_cursor = 0usize;

    for (i, j) in lattice.cells() {
        if mask.bit(i, j) == 0 {
            continue;
        }
        eligible += 1;

        let (x, y) = lattice.origin(i, j);
        let value = image.get(x, y).expect("lattice origin in bounds") as i64;
        let p = params.kernel.predict(image, x, y);
        let e = value - p;

        if e < t_hi {
            continue;
        }
        if value >= band_floor || p + e + SHIFT as i64 > max_value {
            overflow.push(x, y);
            continue;
        }
        let new_value = if e == t_hi {
            let b = watermark.bit(bit_cursor) as i64;
            bit_cursor += 1;
            p + t_hi + b
        } else {
            value + SHIFT as i64
        };
        out.set(x, y, new_value as u16)?;
    }

    if bit_cursor == 0 {
        return Err(RevmarkError::InsufficientCapacity {
            eligible_blocks: eligible,
            overflow_entries: overflow.len(),
        });
    }

    let stats = EmbedStats {
        eligible_blocks: eligible,
        modified_blocks: bit_cursor,
        bits_embedded: bit_cursor.min(WATERMARK_BITS),
        psnr: metrics::psnr(image, &out),
    };

    log::debug!(
        eligible = stats.eligible_blocks,
        bits = stats.bits_embedded,
        overflow = overflow.len();
        "embedded watermark"
    );

    Ok(EmbedOutcome {
        image: out,
        watermark,
        overflow,
        stats,
    })
}

/// Extracts the watermark without the overflow map.
///
/// Walks the lattice, skipping cells whose value pins them to the overflow
/// band unambiguously, and flags the pass as ambiguous when a cell could be
/// either an untouched near-saturation pixel or a shifted one. The restored
/// image is returned only for unambiguous passes.
pub fn extract(
    image: &ImageBuffer,
    key: &SecretKey,
    params: &CodecParams,
    expected_bits: usize,
) -> Result<ExtractOutcome, RevmarkError> {
    params.check_depth(image)?;

    let lattice = Lattice::of(image, params);
    let mask = SelectionMask::derive(key, lattice.cols, lattice.rows);

    let band_floor = params.band_floor() as i64;
    let max_value = image.max_sample() as i64;
    let t_hi = params.t_hi as i64;

    let mut restored = image.clone();
    let mut ambiguous = false;
    let mut bits = Vec::new();

    for (i, j) in lattice.cells() {
        if mask.bit(i, j) == 0 {
            continue;
        }
        let (x, y) = lattice.origin(i, j);
        let value = image.get(x, y).expect("lattice origin in bounds") as i64;

        // A modified pixel never reaches 2^D - 1, so the ceiling value pins
        // this cell to the overflow band: untouched, skip.
        if value == max_value {
            continue;
        }

        let p = params.kernel.predict(image, x, y);
        let e = value - p;
        if e < t_hi {
            continue;
        }

        // Without the map, a cell at the band floor could be an untouched
        // near-saturation pixel or a legitimately shifted one.
        if value == band_floor {
            ambiguous = true;
        }

        if e == t_hi || e == t_hi + 1 {
            bits.push((e - t_hi) as u8);
            restored.set(x, y, (p + t_hi) as u16)?;
        } else {
            restored.set(x, y, (value - SHIFT as i64) as u16)?;
        }
    }

    let recovered_bits = bits.len().min(expected_bits);
    let watermark = Watermark::from_bits(&bits);

    Ok(ExtractOutcome {
        watermark,
        bits,
        recovered_bits,
        restored: if ambiguous { None } else { Some(restored) },
    })
}

/// Removes the watermark and restores the original image exactly.
///
/// The overflow map comes from the ledger entry that recorded the
/// embedding; `expected` is the watermark that entry logged. The recovered
/// bit stream (cycled repeats included) must agree with `expected` over its
/// full length.
///
/// # Errors
///
/// - [`RevmarkError::WatermarkMismatch`] when any recovered bit disagrees
///   with the expected watermark, or when no bit was recoverable at all.
pub fn remove(
    image: &ImageBuffer,
    key: &SecretKey,
    params: &CodecParams,
    overflow: &OverflowMap,
    expected: &Watermark,
) -> Result<(ImageBuffer, Watermark), RevmarkError> {
    params.check_depth(image)?;

    let lattice = Lattice::of(image, params);
    let mask = SelectionMask::derive(key, lattice.cols, lattice.rows);
    let skip = overflow.coord_set();

    let t_hi = params.t_hi as i64;

    let mut restored = image.clone();
    let mut bits = Vec::new();

    for (i, j) in lattice.cells() {
        if mask.bit(i, j) == 0 {
            continue;
        }
        let (x, y) = lattice.origin(i, j);
        if skip.contains(&(x, y)) {
            continue;
        }
        let value = image.get(x, y).expect("lattice origin in bounds") as i64;
        let p = params.kernel.predict(image, x, y);
        let e = value - p;
        if e < t_hi {
            continue;
        }
        if e == t_hi || e == t_hi + 1 {
            bits.push((e - t_hi) as u8);
            restored.set(x, y, (p + t_hi) as u16)?;
        } else {
            restored.set(x, y, (value - SHIFT as i64) as u16)?;
        }
    }

    let recovered = Watermark::from_bits(&bits);
    let expected_stream: Vec<u8> = (0..bits.len()).map(|i| expected.bit(i)).collect();
    let ber = metrics::ber(&expected_stream, &bits);
    if bits.is_empty() || ber > 0.0 {
        return Err(RevmarkError::WatermarkMismatch {
            expected: expected.to_hex(),
            recovered: recovered.to_hex(),
            ber,
        });
    }

    Ok((restored, recovered))
}
