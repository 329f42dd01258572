//! EXIF orientation utilities for automatic image rotation correction.
//!
//! Photos straight from a phone camera are usually stored sideways with an
//! EXIF orientation tag describing how to turn them upright. Everything that
//! reaches the inference step has already been normalised here.

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use std::io::Cursor;

#[allow(unused_imports)]
use log::{debug, warn, error};

/// Decodes image from bytes with EXIF orientation applied.
///
/// 1. Creates decoder from bytes
/// 2. Reads EXIF orientation (if present)
/// 3. Decodes to DynamicImage
/// 4. Rotates/mirrors it upright
///
/// Falls back to simple decode if decoder creation fails.
pub fn decode_with_exif_orientation(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| {
            error!("Failed to guess image format: {}", e);
            ImageError::IoError(e)
        })?;

    match reader.into_decoder() {
        Ok(mut decoder) => {
            // Missing tag or a format without EXIF support means upright
            let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

            let img = DynamicImage::from_decoder(decoder).map_err(|e| {
                error!("Failed to decode image: {}", e);
                e
            })?;

            Ok(apply_upright_rotation(img, orientation))
        }
        Err(e) => {
            warn!("Decoder creation failed, falling back to simple decode: {}", e);
            ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .map_err(ImageError::IoError)?
                .decode()
                .map_err(|e| {
                    error!("Failed to decode image: {}", e);
                    e
                })
        }
    }
}

/// Turns `img` upright according to `orientation`.
pub fn apply_upright_rotation(mut img: DynamicImage, orientation: Orientation) -> DynamicImage {
    if orientation != Orientation::NoTransforms {
        debug!("Applying EXIF orientation {:?} to {}x{} image", orientation, img.width(), img.height());
        img.apply_orientation(orientation);
    }
    img
}
