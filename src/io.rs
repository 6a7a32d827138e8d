//! Pixel I/O collaborators.
//!
//! The codec itself never touches the filesystem; these helpers satisfy the
//! small capability set it relies on (read a pixel array, write a pixel
//! array, know the bit depth) with two concrete variants: 8-bit and 16-bit
//! grayscale PNG. Deep images (the 16-bit path) use the PNG wire format's
//! big-endian sample pairs. Inputs that are not grayscale at the expected
//! depth are rejected with the offending path.

use std::fs;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use crate::error::RevmarkError;
use crate::image::ImageBuffer;

/// The two supported pixel container variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit grayscale PNG (`data_type = "png"`).
    Gray8,
    /// 16-bit grayscale PNG (`data_type = "png16"`).
    Gray16,
}

impl PixelFormat {
    /// Resolves a configuration `data_type` string.
    pub fn from_data_type(data_type: &str) -> Option<Self> {
        match data_type {
            "png" => Some(PixelFormat::Gray8),
            "png16" => Some(PixelFormat::Gray16),
            _ => None,
        }
    }

    pub fn data_type(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "png",
            PixelFormat::Gray16 => "png16",
        }
    }

    pub fn bit_depth(self) -> u8 {
        match self {
            PixelFormat::Gray8 => 8,
            PixelFormat::Gray16 => 16,
        }
    }

    fn png_depth(self) -> png::BitDepth {
        match self {
            PixelFormat::Gray8 => png::BitDepth::Eight,
            PixelFormat::Gray16 => png::BitDepth::Sixteen,
        }
    }
}

fn read_error(path: &Path, message: impl Into<String>) -> RevmarkError {
    RevmarkError::ImageReadFailed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn write_error(path: &Path, message: impl Into<String>) -> RevmarkError {
    RevmarkError::ImageWriteFailed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Reads a grayscale PNG into a pixel buffer at the expected depth.
///
/// # Errors
///
/// [`RevmarkError::ImageReadFailed`] when the file is unreadable, not a
/// PNG, not grayscale, or not at the format's bit depth.
pub fn read_pixels(path: &Path, format: PixelFormat) -> Result<ImageBuffer, RevmarkError> {
    let data = fs::read(path).map_err(|e| read_error(path, e.to_string()))?;

    let decoder = png::Decoder::new(Cursor::new(data.as_slice()));
    let mut reader = decoder
        .read_info()
        .map_err(|e| read_error(path, e.to_string()))?;
    let info = reader.info();

    if info.color_type != png::ColorType::Grayscale {
        return Err(read_error(
            path,
            format!("unsupported color type {:?}, expected grayscale", info.color_type),
        ));
    }
    if info.bit_depth != format.png_depth() {
        return Err(read_error(
            path,
            format!(
                "bit depth {:?} does not match data type '{}'",
                info.bit_depth,
                format.data_type()
            ),
        ));
    }
    let (width, height) = (info.width, info.height);

    let mut bytes = vec![0u8; reader.output_buffer_size()];
    let frame = reader
        .next_frame(&mut bytes)
        .map_err(|e| read_error(path, e.to_string()))?;
    bytes.truncate(frame.buffer_size());

    let samples = match format {
        PixelFormat::Gray8 => bytes.iter().map(|&b| b as u16).collect(),
        PixelFormat::Gray16 => bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect(),
    };

    ImageBuffer::new(width, height, format.bit_depth(), samples)
        .map_err(|e| read_error(path, e.to_string()))
}

/// Writes a pixel buffer as a grayscale PNG.
///
/// The output path is always distinct from the codec's input path; callers
/// own the naming.
pub fn write_pixels(path: &Path, image: &ImageBuffer) -> Result<(), RevmarkError> {
    let format = match image.bit_depth() {
        8 => PixelFormat::Gray8,
        16 => PixelFormat::Gray16,
        depth => {
            return Err(write_error(path, format!("unsupported bit depth {depth}")));
        }
    };

    let mut writer_buffer = BufWriter::new(Vec::new());
    {
        let mut encoder = png::Encoder::new(&mut writer_buffer, image.width(), image.height());
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(format.png_depth());
        let mut writer = encoder
            .write_header()
            .map_err(|e| write_error(path, e.to_string()))?;

        let bytes: Vec<u8> = match format {
            PixelFormat::Gray8 => image.samples().iter().map(|&s| s as u8).collect(),
            PixelFormat::Gray16 => image
                .samples()
                .iter()
                .flat_map(|s| s.to_be_bytes())
                .collect(),
        };
        writer
            .write_image_data(&bytes)
            .map_err(|e| write_error(path, e.to_string()))?;
        writer.finish().map_err(|e| write_error(path, e.to_string()))?;
    }

    let data = writer_buffer
        .into_inner()
        .map_err(|e| write_error(path, format!("failed to extract buffer: {e}")))?;
    fs::write(path, data).map_err(|e| write_error(path, e.to_string()))?;
    Ok(())
}

/// Lists the PNG files directly under `dir`, sorted by name.
///
/// Batch drivers walk this list; sorting keeps batch transaction order
/// deterministic across platforms.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, RevmarkError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray8_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");
        let image = ImageBuffer::filled(8, 8, 8, 100).unwrap();

        write_pixels(&path, &image).unwrap();
        let back = read_pixels(&path, PixelFormat::Gray8).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn gray16_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.png");
        let samples: Vec<u16> = (0..64u32).map(|i| (i * 1000) as u16).collect();
        let image = ImageBuffer::new(8, 8, 16, samples).unwrap();

        write_pixels(&path, &image).unwrap();
        let back = read_pixels(&path, PixelFormat::Gray16).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn depth_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");
        write_pixels(&path, &ImageBuffer::filled(4, 4, 8, 10).unwrap()).unwrap();

        let err = read_pixels(&path, PixelFormat::Gray16).unwrap_err();
        assert!(matches!(err, RevmarkError::ImageReadFailed { .. }));
    }

    #[test]
    fn non_grayscale_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");

        let mut buffer = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buffer, 2, 2);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[0u8; 12]).unwrap();
        }
        fs::write(&path, buffer).unwrap();

        let err = read_pixels(&path, PixelFormat::Gray8).unwrap_err();
        assert!(matches!(err, RevmarkError::ImageReadFailed { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_pixels(Path::new("nope/missing.png"), PixelFormat::Gray8).unwrap_err();
        assert!(err.to_string().contains("missing.png"));
    }

    #[test]
    fn directory_listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let listed = list_images(dir.path()).unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn data_type_resolution() {
        assert_eq!(PixelFormat::from_data_type("png"), Some(PixelFormat::Gray8));
        assert_eq!(
            PixelFormat::from_data_type("png16"),
            Some(PixelFormat::Gray16)
        );
        assert_eq!(PixelFormat::from_data_type("dcm"), None);
    }
}
