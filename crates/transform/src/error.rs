//! Transform error types.

/// Errors produced while decoding, transforming or encoding an image.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported rotation angle: {0} (expected 180 or 270)")]
    UnsupportedAngle(i64),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid grid: {width}x{height} needs {expected} samples, got {actual}")]
    Dimensions {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
}
