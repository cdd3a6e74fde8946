use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;

use super::AdapterError;

/// Base64-encoded image ready to be inlined into a backend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub base64: String,
}

impl ImageData {
    pub fn new(mime_type: &str, base64: String) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            base64,
        }
    }

    /// Decode raw image bytes, shrink so neither side exceeds `max_dimension`,
    /// and re-encode as JPEG.
    pub fn from_bytes(bytes: &[u8], max_dimension: u32) -> Result<Self, AdapterError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| AdapterError::InvalidImage(format!("failed to decode image: {}", e)))?;

        let (width, height) = img.dimensions();
        let img = if width > max_dimension || height > max_dimension {
            img.resize(
                max_dimension,
                max_dimension,
                image::imageops::FilterType::Triangle,
            )
        } else {
            img
        };

        let jpeg = encode_jpeg(&img, 85)
            .map_err(|e| AdapterError::InvalidImage(format!("failed to encode image as JPEG: {}", e)))?;
        Ok(Self::new("image/jpeg", BASE64.encode(jpeg)))
    }

    /// Parse a `data:<mime>;base64,<payload>` URL. A bare payload is taken
    /// to be base64 PNG data.
    pub fn from_data_url(url: &str) -> Result<Self, AdapterError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AdapterError::InvalidImage("empty image data".to_string()));
        }

        match url.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| AdapterError::InvalidImage("malformed data URL".to_string()))?;
                let mime_type = header
                    .strip_suffix(";base64")
                    .ok_or_else(|| AdapterError::InvalidImage("data URL is not base64".to_string()))?;
                let mime_type = if mime_type.is_empty() { "image/png" } else { mime_type };
                Ok(Self::new(mime_type, payload.to_string()))
            }
            None => Ok(Self::new("image/png", url.to_string())),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Encode as JPEG. The image is flattened to RGB first since JPEG has no alpha.
pub(crate) fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 80, 40, 255]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
