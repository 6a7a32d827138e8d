//! Batch configuration records.
//!
//! Drivers are configured by a single JSON document; everything the codec
//! needs per operation is carried explicitly as parameters, so there is no
//! process-wide mutable state. Omitted fields fall back to the documented
//! defaults: 4-neighbor kernel, stride 3, `t_hi` 0, and a bit depth derived
//! from the data type.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::CodecParams;
use crate::error::RevmarkError;
use crate::io::PixelFormat;
use crate::kernel::Kernel;

fn default_kernel() -> Kernel {
    Kernel::four_neighbor()
}

fn default_stride() -> u32 {
    3
}

fn default_data_type() -> String {
    "png".to_string()
}

/// Configuration accepted by the batch drivers.
///
/// # Example document
///
/// ```json
/// {
///     "data_path": "scans/input",
///     "save_path": "scans/watermarked",
///     "blockchain_path": "scans/chain.json",
///     "message": "radiology archive 2024",
///     "stride": 3,
///     "t_hi": 0,
///     "data_type": "png16"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory of input images.
    pub data_path: PathBuf,
    /// Directory for watermarked or restored outputs.
    pub save_path: PathBuf,
    /// Directory for extracted watermark files (extract driver only).
    #[serde(default)]
    pub ext_wat_path: Option<PathBuf>,
    /// Ledger document path.
    pub blockchain_path: PathBuf,
    /// Message the watermark is derived from (embedding only).
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_kernel")]
    pub kernel: Kernel,
    #[serde(default = "default_stride")]
    pub stride: u32,
    #[serde(default)]
    pub t_hi: u16,
    /// `"png"` (8-bit) or `"png16"` (16-bit).
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Explicit bit depth; when omitted it follows the data type.
    #[serde(default)]
    pub bit_depth: Option<u8>,
}

impl BatchConfig {
    /// Loads and validates a configuration document.
    ///
    /// # Errors
    ///
    /// [`RevmarkError::ConfigurationInvalid`] with the offending path for
    /// unreadable files, malformed JSON, unknown data types, depth
    /// conflicts, and kernel/stride combinations the codec rejects.
    pub fn load(path: &Path) -> Result<Self, RevmarkError> {
        let invalid = |message: String| RevmarkError::ConfigurationInvalid {
            path: path.to_path_buf(),
            message,
        };

        let data = fs::read(path).map_err(|e| invalid(e.to_string()))?;
        let config: BatchConfig =
            serde_json::from_slice(&data).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RevmarkError> {
        let format = self.pixel_format()?;
        if let Some(depth) = self.bit_depth {
            if depth != format.bit_depth() {
                return Err(RevmarkError::ImageShapeMismatch(format!(
                    "bit_depth {depth} conflicts with data_type '{}' (expects {})",
                    self.data_type,
                    format.bit_depth()
                )));
            }
        }
        // Surfaces invalid kernel/stride combinations at load time.
        self.codec_params()?;
        Ok(())
    }

    /// Pixel container variant for this configuration.
    pub fn pixel_format(&self) -> Result<PixelFormat, RevmarkError> {
        PixelFormat::from_data_type(&self.data_type).ok_or_else(|| {
            RevmarkError::ImageShapeMismatch(format!(
                "unknown data_type '{}', expected 'png' or 'png16'",
                self.data_type
            ))
        })
    }

    /// Bit depth in effect: explicit when given, else from the data type.
    pub fn effective_bit_depth(&self) -> Result<u8, RevmarkError> {
        match self.bit_depth {
            Some(depth) => Ok(depth),
            None => Ok(self.pixel_format()?.bit_depth()),
        }
    }

    /// Codec parameters for this configuration.
    pub fn codec_params(&self) -> Result<CodecParams, RevmarkError> {
        CodecParams::new(
            self.kernel.clone(),
            self.stride,
            self.t_hi,
            self.effective_bit_depth()?,
        )
    }
}
