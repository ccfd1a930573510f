//! Mirror transforms by coordinate remapping.
//!
//! Each output pixel is copied from exactly one source pixel; there is no
//! interpolation and the output always has the input's dimensions.

use crate::{Angle, PixelGrid};

/// Applies the transform for `angle` and returns a new grid.
///
/// - [`Angle::Rotate180`]: `out(x, y) = in(W-1-x, y)`
/// - [`Angle::Rotate270`]: `out(x, y) = in(x, H-1-y)`
pub fn rotate(src: &PixelGrid, angle: Angle) -> PixelGrid {
    let mut dst = PixelGrid::new(src.width(), src.height());
    rotate_into(src, angle, &mut dst);
    dst
}

/// Same as [`rotate`] but writes into a preallocated grid of equal size.
///
/// # Panics
///
/// Panics if `dst` does not have the same dimensions as `src`.
pub fn rotate_into(src: &PixelGrid, angle: Angle, dst: &mut PixelGrid) {
    assert_eq!(
        (src.width(), src.height()),
        (dst.width(), dst.height()),
        "destination grid must match source dimensions"
    );

    let max_y = src.height().saturating_sub(1);

    for y in 0..src.height() {
        match angle {
            Angle::Rotate180 => {
                let out = dst.row_mut(y);
                out.copy_from_slice(src.row(y));
                out.reverse();
            }
            Angle::Rotate270 => {
                dst.row_mut(y).copy_from_slice(src.row(max_y - y));
            }
        }
    }
}
