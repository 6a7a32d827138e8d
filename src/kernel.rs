//! Prediction kernel and the pixel predictor built on it.
//!
//! A kernel is an odd-side square matrix of non-negative weights summing to
//! one with a zero center. Applied to a pixel's neighborhood it yields the
//! convex-combination prediction whose signed difference from the actual
//! sample is the prediction error the codec shifts.

use serde::{Deserialize, Serialize};

use crate::error::RevmarkError;
use crate::image::ImageBuffer;

/// Tolerance for the convexity check on the weight sum.
const WEIGHT_SUM_EPS: f64 = 1e-9;

/// Convex prediction kernel.
///
/// Serializes as a plain 2-D array so it can live in configuration files and
/// ledger transactions unchanged.
///
/// # Examples
///
/// ```rust
/// use revmark::Kernel;
///
/// let kernel = Kernel::four_neighbor();
/// assert_eq!(kernel.side(), 3);
/// assert_eq!(kernel.half_size(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct Kernel {
    side: usize,
    weights: Vec<f64>,
}

impl Kernel {
    /// Builds a kernel from row-major rows, validating convexity.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::InvalidKernel`] when the matrix is not square with an
    /// odd side of at least 3, a weight is negative, the center entry is not
    /// zero, or the weights do not sum to 1.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, RevmarkError> {
        let side = rows.len();
        if side < 3 || side % 2 == 0 {
            return Err(RevmarkError::InvalidKernel(format!(
                "side must be odd and at least 3, got {side}"
            )));
        }
        if rows.iter().any(|row| row.len() != side) {
            return Err(RevmarkError::InvalidKernel(format!(
                "matrix must be square with side {side}"
            )));
        }
        let weights: Vec<f64> = rows.iter().flatten().copied().collect();
        if let Some(bad) = weights.iter().find(|w| **w < 0.0 || !w.is_finite()) {
            return Err(RevmarkError::InvalidKernel(format!(
                "weights must be finite and non-negative, got {bad}"
            )));
        }
        let center = weights[(side / 2) * side + side / 2];
        if center != 0.0 {
            return Err(RevmarkError::InvalidKernel(format!(
                "center entry must be 0, got {center}"
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPS {
            return Err(RevmarkError::InvalidKernel(format!(
                "weights must sum to 1, got {sum}"
            )));
        }
        Ok(Self { side, weights })
    }

    /// The default kernel: 1/4 on each cardinal neighbor of a 3x3 window.
    pub fn four_neighbor() -> Self {
        Self::from_rows(&[
            vec![0.0, 0.25, 0.0],
            vec![0.25, 0.0, 0.25],
            vec![0.0, 0.25, 0.0],
        ])
        .expect("four-neighbor kernel is convex")
    }

    /// Side length K of the square matrix.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Half-size r = (K - 1) / 2; the border of width r is ineligible.
    pub fn half_size(&self) -> u32 {
        (self.side as u32 - 1) / 2
    }

    /// Row-major rows, for serialization into ledger transactions.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.weights
            .chunks(self.side)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Integer prediction for the pixel at `(x, y)`.
    ///
    /// Computes `floor(sum of K[i][j] * I[x+i-r, y+j-r])` with floor toward
    /// negative infinity; the floor is what makes the codec's inverse exact.
    /// Callers must keep `(x, y)` within `[r, w-r) x [r, h-r)`.
    pub fn predict(&self, image: &ImageBuffer, x: u32, y: u32) -> i64 {
        let r = self.half_size();
        debug_assert!(x >= r && y >= r);
        debug_assert!(x < image.width() - r && y < image.height() - r);

        let mut acc = 0.0f64;
        for j in 0..self.side {
            for i in 0..self.side {
                let w = self.weights[j * self.side + i];
                if w == 0.0 {
                    continue;
                }
                let px = x + i as u32 - r;
                let py = y + j as u32 - r;
                // Neighborhood stays in bounds by the caller contract.
                let sample = image.get(px, py).unwrap_or(0);
                acc += w * sample as f64;
            }
        }
        acc.floor() as i64
    }
}

impl TryFrom<Vec<Vec<f64>>> for Kernel {
    type Error = RevmarkError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Kernel::from_rows(&rows)
    }
}

impl From<Kernel> for Vec<Vec<f64>> {
    fn from(kernel: Kernel) -> Self {
        kernel.rows()
    }
}
