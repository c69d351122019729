//! Aperture photometry, radii and windowed centroids.
//!
//! Apertures are placed on an [`ImageView`]. Pixel `(ix, iy)` covers
//! `[ix - 0.5, ix + 0.5) × [iy - 0.5, iy + 0.5)`, so integer coordinates
//! are pixel centres. `subpix == 0` selects exact geometric overlap where it
//! is available, otherwise each pixel cut by the aperture edge is sampled on
//! a `subpix × subpix` grid.

mod ellipse;
mod multi;
mod overlap;
mod radius;
mod sum;
mod windowed;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::flags::{ApertureFlags, InputFlags};
use crate::image::ImageView;

pub use ellipse::{ellipse_axes, ellipse_coeffs, set_ellipse};
pub use multi::{sum_circann_multi, MultiAnnulus};
pub use overlap::{circoverlap, ellipoverlap};
pub use radius::{flux_radius, kron_radius};
pub use windowed::{windowed, Windowed};

use sum::{sum_shape, Shape};

/// Options shared by the aperture sums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SumOptions {
    /// Segment filter: `0` disabled, `> 0` masks other segments,
    /// `< 0` keeps only segment `-id`
    pub id: i64,
    /// Sub-pixel sampling factor, `0` for exact overlap
    pub subpix: i32,
    pub flags: InputFlags,
}

impl Default for SumOptions {
    fn default() -> Self {
        Self {
            id: 0,
            subpix: 5,
            flags: InputFlags::empty(),
        }
    }
}

impl SumOptions {
    pub fn exact() -> Self {
        Self {
            subpix: 0,
            ..Default::default()
        }
    }
}

/// Result of a single aperture sum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ApertureSum {
    pub sum: f64,
    /// 1-σ error of `sum`
    pub sumerr: f64,
    /// Included area in pixels
    pub area: f64,
    pub flag: ApertureFlags,
}

/// Sum of pixel values within radius `r` of `(x, y)`.
pub fn sum_circle(image: &ImageView, x: f64, y: f64, r: f64, opts: &SumOptions) -> Result<ApertureSum> {
    sum_shape(image, x, y, Shape::Circle { r }, opts)
}

/// Sum of pixel values with `rin <= distance < rout` from `(x, y)`.
pub fn sum_circann(
    image: &ImageView,
    x: f64,
    y: f64,
    rin: f64,
    rout: f64,
    opts: &SumOptions,
) -> Result<ApertureSum> {
    sum_shape(image, x, y, Shape::CircAnnulus { rin, rout }, opts)
}

/// Sum within the ellipse of semi-axes `r·a`, `r·b` at angle `theta`.
#[allow(clippy::too_many_arguments)]
pub fn sum_ellipse(
    image: &ImageView,
    x: f64,
    y: f64,
    a: f64,
    b: f64,
    theta: f64,
    r: f64,
    opts: &SumOptions,
) -> Result<ApertureSum> {
    sum_shape(image, x, y, Shape::Ellipse { a, b, theta, r }, opts)
}

/// Sum between the ellipses scaled by `rin` and `rout`.
#[allow(clippy::too_many_arguments)]
pub fn sum_ellipann(
    image: &ImageView,
    x: f64,
    y: f64,
    a: f64,
    b: f64,
    theta: f64,
    rin: f64,
    rout: f64,
    opts: &SumOptions,
) -> Result<ApertureSum> {
    sum_shape(
        image,
        x,
        y,
        Shape::EllipAnnulus {
            a,
            b,
            theta,
            rin,
            rout,
        },
        opts,
    )
}
