use crate::error::{PreviewError, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// A decoded, display-sized frame
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
    /// Position in the acquisition order, starting at 1
    pub sequence: u64,
}

impl PreviewFrame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(&self.image)
            .map_err(|e| PreviewError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Scale `image` to `height` rows, keeping its aspect ratio.
///
/// A `height` of 0 or one equal to the current height returns the image as is.
pub fn resize_to_height(image: RgbImage, height: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if height == 0 || h == 0 || h == height {
        return image;
    }
    let width = ((u64::from(w) * u64::from(height) + u64::from(h) / 2) / u64::from(h)).max(1);
    imageops::resize(&image, width as u32, height, FilterType::Triangle)
}
