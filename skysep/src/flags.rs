//! Output and input flag sets.
//!
//! Bit values are kept identical to the classic Source Extractor / SEP
//! layout so catalogs remain comparable with other tools.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-object extraction flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ObjectFlags: u16 {
        /// Object is the result of deblending
        const MERGED = 0x0001;
        /// Object footprint touches the image boundary
        const TRUNC = 0x0002;
        /// Sub-object budget ran out while deblending this object
        const DOVERFLOW = 0x0004;
        /// x and y are fully correlated; moments were padded
        const SINGU = 0x0008;
    }
}

bitflags! {
    /// Result flags from aperture photometry, radii and centroiding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ApertureFlags: u16 {
        /// Aperture extends beyond the image
        const TRUNC = 0x0010;
        /// At least one pixel in the aperture is masked
        const HASMASKED = 0x0020;
        /// Every pixel in the aperture is masked
        const ALLMASKED = 0x0040;
        /// Non-positive area, numerator or denominator
        const NONPOSITIVE = 0x0080;
        /// Cumulative radial profile is not monotonic
        const NONMONOTONIC = 0x0100;
        /// Windowed centroid hit the iteration limit
        const NOT_CONVERGED = 0x0200;
    }
}

bitflags! {
    /// Input flags for aperture photometry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InputFlags: u16 {
        /// Exclude masked pixels without rescaling for the lost area
        const MASK_IGNORE = 0x0004;
    }
}
