use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::GenericImageView;
use thiserror::Error;

use crate::adapters::encode_jpeg;

const THUMBNAIL_QUALITY: u8 = 70;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("could not encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),
}

/// Scale an image to fit within `max_size` and return it as a JPEG data URL.
pub fn derive_thumbnail(bytes: &[u8], max_size: u32) -> Result<String, ThumbnailError> {
    let img = image::load_from_memory(bytes).map_err(ThumbnailError::Decode)?;
    let (width, height) = img.dimensions();
    let thumb = if width > max_size || height > max_size {
        img.thumbnail(max_size, max_size)
    } else {
        img
    };
    let jpeg = encode_jpeg(&thumb, THUMBNAIL_QUALITY).map_err(ThumbnailError::Encode)?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)))
}
