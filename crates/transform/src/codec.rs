//! Image codec seam.
//!
//! The transform engine never parses image files itself. [`PngCodec`] is the
//! production codec: it accepts any format the `image` crate was built with,
//! converts to 8-bit luma, and always writes PNG.

use std::io::Cursor;

use image::{GrayImage, ImageFormat};

use crate::{PixelGrid, TransformError};

/// Converts between encoded image bytes and grayscale pixel grids.
pub trait ImageCodec: Send + Sync {
    /// Decodes `bytes` into a single-channel grid.
    fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, TransformError>;

    /// Encodes `grid` into image bytes.
    fn encode(&self, grid: &PixelGrid) -> Result<Vec<u8>, TransformError>;
}

/// `image`-backed codec producing PNG output.
#[derive(Copy, Clone, Debug, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, TransformError> {
        let img =
            image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
        let luma = img.into_luma8();
        let (width, height) = luma.dimensions();
        PixelGrid::from_samples(width as usize, height as usize, luma.into_raw())
    }

    fn encode(&self, grid: &PixelGrid) -> Result<Vec<u8>, TransformError> {
        let width = u32::try_from(grid.width())
            .map_err(|_| TransformError::Encode(format!("width {} too large", grid.width())))?;
        let height = u32::try_from(grid.height())
            .map_err(|_| TransformError::Encode(format!("height {} too large", grid.height())))?;

        let img = GrayImage::from_raw(width, height, grid.samples().to_vec()).ok_or_else(|| {
            TransformError::Encode(format!("buffer does not fit {width}x{height}"))
        })?;

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| TransformError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}
