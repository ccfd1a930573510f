//! Supported rotation angles.

use std::fmt;
use std::str::FromStr;

use crate::TransformError;

/// A rotation request. Only 180 and 270 degrees exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Angle {
    /// Horizontal (left-right) mirror.
    Rotate180,
    /// Vertical (upside-down) mirror.
    Rotate270,
}

impl Angle {
    /// Angle in degrees.
    pub fn degrees(self) -> u16 {
        match self {
            Angle::Rotate180 => 180,
            Angle::Rotate270 => 270,
        }
    }
}

impl TryFrom<i64> for Angle {
    type Error = TransformError;

    fn try_from(degrees: i64) -> Result<Self, Self::Error> {
        match degrees {
            180 => Ok(Angle::Rotate180),
            270 => Ok(Angle::Rotate270),
            other => Err(TransformError::UnsupportedAngle(other)),
        }
    }
}

impl FromStr for Angle {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Unparsable input reports as angle -1, same as any other unsupported value.
        let degrees = s.trim().parse::<i64>().unwrap_or(-1);
        Angle::try_from(degrees)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}
