use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("image is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to re-encode image as PNG: {0}")]
    Encode(image::ImageError),
}

/// An image flattened to RGB8, stored as PNG and base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    base64: String,
    width: u32,
    height: u32,
}

impl NormalizedImage {
    pub fn into_base64(self) -> String {
        self.base64
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Decodes any supported raster format and re-encodes it as a base64 RGB PNG.
pub fn normalize_image(bytes: &[u8]) -> Result<NormalizedImage, ImageDecodeError> {
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    let decoded = image::load_from_memory(bytes).map_err(ImageDecodeError::Decode)?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(ImageDecodeError::Encode)?;

    Ok(NormalizedImage {
        base64: BASE64.encode(&png),
        width,
        height,
    })
}

pub(crate) fn image_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
