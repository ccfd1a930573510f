//! Pixel-grid transforms for imgrot.
//!
//! The engine works on single-channel (grayscale) grids only. Images enter
//! and leave through an [`ImageCodec`]; [`rotate_bytes`] is the
//! decode → transform → encode pipeline shared by the local worker pool and
//! the rotation server.
//!
//! # Geometry
//!
//! The two supported "rotations" are mirrors:
//!
//! ```text
//! Rotate180 (left-right)       Rotate270 (upside-down)
//! ┌───────┐    ┌───────┐       ┌───────┐    ┌───────┐
//! │ 1   2 │ -> │ 2   1 │       │ 1   2 │ -> │ 3   4 │
//! │ 3   4 │    │ 4   3 │       │ 3   4 │    │ 1   2 │
//! └───────┘    └───────┘       └───────┘    └───────┘
//! ```

pub mod angle;
pub mod codec;
pub mod error;
pub mod grid;
pub mod mirror;

pub use angle::Angle;
pub use codec::{ImageCodec, PngCodec};
pub use error::TransformError;
pub use grid::PixelGrid;
pub use mirror::rotate;

/// Decodes `bytes`, applies the transform for `angle`, and re-encodes.
pub fn rotate_bytes<C: ImageCodec + ?Sized>(
    codec: &C,
    bytes: &[u8],
    angle: Angle,
) -> Result<Vec<u8>, TransformError> {
    let grid = codec.decode(bytes)?;
    let rotated = rotate(&grid, angle);
    codec.encode(&rotated)
}
