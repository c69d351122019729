//! Error type shared by every fallible skysep operation.
//!
//! Each variant maps onto one of the classic integer status codes so that
//! callers bridging to other environments can keep a stable numeric status,
//! while the `Display` implementation carries the dynamic detail (offending
//! sizes, limits that were hit).

use std::collections::TryReserveError;
use thiserror::Error;

/// Status code returned for success.
pub const RETURN_OK: i32 = 0;
/// Memory allocation failed.
pub const MEMORY_ALLOC_ERROR: i32 = 1;
/// Pixel stack overflow during extraction.
pub const PIXSTACK_FULL: i32 = 2;
/// Unsupported data type.
pub const ILLEGAL_DTYPE: i32 = 3;
/// Sub-pixel sampling factor out of range.
pub const ILLEGAL_SUBPIX: i32 = 4;
/// Ellipse coefficients do not describe an ellipse.
pub const NON_ELLIPSE_PARAMS: i32 = 5;
/// Aperture parameters out of range.
pub const ILLEGAL_APER_PARAMS: i32 = 6;
/// Sub-object budget exceeded while deblending.
pub const DEBLEND_OVERFLOW: i32 = 7;
/// Requested line is outside the buffered range.
pub const LINE_NOT_IN_BUF: i32 = 8;
/// Relative threshold requested without noise information.
pub const RELTHRESH_NO_NOISE: i32 = 9;
/// Noise interpretation not recognised.
pub const UNKNOWN_NOISE_TYPE: i32 = 10;
/// Too many objects open simultaneously during extraction.
pub const OBJECT_LIMIT: i32 = 11;
/// Background tile size is not positive.
pub const ILLEGAL_TILE_SIZE: i32 = 12;
/// Background filter size is not positive.
pub const ILLEGAL_FILTER_SIZE: i32 = 13;
/// Buffer dimensions do not match the image.
pub const DIMENSION_MISMATCH: i32 = 14;
/// Extraction parameters or kernel out of range.
pub const ILLEGAL_EXTRACT_PARAMS: i32 = 15;
/// Array is not laid out contiguously in row-major order.
pub const NON_CONTIGUOUS: i32 = 16;
/// Image has no pixels.
pub const EMPTY_IMAGE: i32 = 17;

/// Errors reported by background estimation, extraction and photometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SepError {
    #[error("memory allocation failed: {0}")]
    Memory(String),

    #[error(
        "pixel stack full: an object exceeded {limit} pixels; increase ExtractLimits::pixstack"
    )]
    PixStackFull { limit: usize },

    #[error(
        "object limit reached: more than {limit} objects open at once; increase ExtractLimits::object_limit"
    )]
    ObjectLimit { limit: usize },

    #[error("illegal subpix value {0}: must be >= {1}")]
    IllegalSubpix(i32, i32),

    #[error("ellipse parameters are not a valid ellipse: cxx={cxx}, cyy={cyy}, cxy={cxy}")]
    NonEllipseParams { cxx: f64, cyy: f64, cxy: f64 },

    #[error("illegal aperture parameters: {0}")]
    IllegalAperture(String),

    #[error("illegal background tile size {bw}x{bh}: both must be > 0")]
    IllegalTileSize { bw: usize, bh: usize },

    #[error("illegal background filter size {fw}x{fh}: both must be > 0")]
    IllegalFilterSize { fw: usize, fh: usize },

    #[error("{what} has {actual} elements, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("line {y} is outside the image (height {height})")]
    LineOutOfRange { y: usize, height: usize },

    #[error("illegal extraction parameters: {0}")]
    IllegalExtractParams(String),

    #[error("{what} array must be contiguous and row-major")]
    NonContiguous { what: &'static str },

    #[error("cannot {what} an empty image")]
    EmptyImage { what: &'static str },
}

impl SepError {
    /// Integer status code for this error.
    pub fn status(&self) -> i32 {
        match self {
            SepError::Memory(_) => MEMORY_ALLOC_ERROR,
            SepError::PixStackFull { .. } => PIXSTACK_FULL,
            SepError::ObjectLimit { .. } => OBJECT_LIMIT,
            SepError::IllegalSubpix(..) => ILLEGAL_SUBPIX,
            SepError::NonEllipseParams { .. } => NON_ELLIPSE_PARAMS,
            SepError::IllegalAperture(_) => ILLEGAL_APER_PARAMS,
            SepError::IllegalTileSize { .. } => ILLEGAL_TILE_SIZE,
            SepError::IllegalFilterSize { .. } => ILLEGAL_FILTER_SIZE,
            SepError::DimensionMismatch { .. } => DIMENSION_MISMATCH,
            SepError::LineOutOfRange { .. } => LINE_NOT_IN_BUF,
            SepError::IllegalExtractParams(_) => ILLEGAL_EXTRACT_PARAMS,
            SepError::NonContiguous { .. } => NON_CONTIGUOUS,
            SepError::EmptyImage { .. } => EMPTY_IMAGE,
        }
    }

    /// Allocation failure while reserving `what`.
    pub(crate) fn alloc(what: &str, err: TryReserveError) -> Self {
        SepError::Memory(format!("{what}: {err}"))
    }
}

/// Short fixed message for a status code (at most 60 characters).
pub fn status_message(status: i32) -> &'static str {
    match status {
        RETURN_OK => "OK (no error)",
        MEMORY_ALLOC_ERROR => "memory allocation",
        PIXSTACK_FULL => "internal pixel buffer full",
        ILLEGAL_DTYPE => "data type not supported",
        ILLEGAL_SUBPIX => "subpix value must be nonnegative",
        NON_ELLIPSE_PARAMS => "parameters do not describe ellipse",
        ILLEGAL_APER_PARAMS => "invalid aperture parameters",
        DEBLEND_OVERFLOW => "object deblending overflow",
        LINE_NOT_IN_BUF => "array line out of buffer",
        RELTHRESH_NO_NOISE => "relative threshold but image has noise_type of NONE",
        UNKNOWN_NOISE_TYPE => "image has unknown noise_type",
        OBJECT_LIMIT => "too many objects open during extraction",
        ILLEGAL_TILE_SIZE => "background tile size must be positive",
        ILLEGAL_FILTER_SIZE => "background filter size must be positive",
        DIMENSION_MISMATCH => "array dimensions do not match image",
        ILLEGAL_EXTRACT_PARAMS => "invalid extraction parameters",
        NON_CONTIGUOUS => "array is not contiguous",
        EMPTY_IMAGE => "image has no pixels",
        _ => "unrecognized error status",
    }
}

pub type Result<T> = std::result::Result<T, SepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_to_messages() {
        let err = SepError::PixStackFull { limit: 10 };
        assert_eq!(err.status(), PIXSTACK_FULL);
        assert_eq!(status_message(err.status()), "internal pixel buffer full");
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_messages_fit_fixed_width() {
        for status in 0..=20 {
            assert!(status_message(status).len() <= 60);
        }
        assert_eq!(status_message(999), "unrecognized error status");
    }

    #[test]
    fn test_usage_errors_have_distinct_statuses() {
        let errors = [
            SepError::IllegalAperture("r".to_string()),
            SepError::IllegalTileSize { bw: 0, bh: 1 },
            SepError::IllegalFilterSize { fw: 0, fh: 1 },
            SepError::IllegalExtractParams("minarea".to_string()),
            SepError::NonContiguous { what: "image" },
            SepError::EmptyImage {
                what: "estimate the background of",
            },
        ];
        let mut codes: Vec<i32> = errors.iter().map(SepError::status).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        for err in &errors {
            assert_ne!(status_message(err.status()), "unrecognized error status");
        }
    }

    #[test]
    fn test_detail_carries_dimensions() {
        let err = SepError::DimensionMismatch {
            what: "line buffer",
            expected: 64,
            actual: 32,
        };
        assert_eq!(err.to_string(), "line buffer has 32 elements, expected 64");
    }
}
