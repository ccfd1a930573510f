//! Single-channel pixel grid with row-major storage.
//!
//! ```text
//! samples[y * width + x]
//! ```

use crate::TransformError;

/// A grayscale image, one byte per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelGrid {
    width: usize,
    height: usize,
    samples: Vec<u8>,
}

impl PixelGrid {
    /// Creates a zero-filled grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            samples: vec![0; width * height],
        }
    }

    /// Wraps existing samples. `samples.len()` must equal `width * height`.
    pub fn from_samples(
        width: usize,
        height: usize,
        samples: Vec<u8>,
    ) -> Result<Self, TransformError> {
        let expected = width * height;
        if samples.len() != expected {
            return Err(TransformError::Dimensions {
                width,
                height,
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<u8> {
        self.samples
    }

    /// Sample at column `x`, row `y`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        self.samples[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        self.samples[y * self.width + x] = value;
    }

    /// Row `y` as a slice.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.samples[start..start + self.width]
    }

    pub(crate) fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.width;
        &mut self.samples[start..start + self.width]
    }
}
