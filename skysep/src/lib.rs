//! Source extraction and aperture photometry for astronomical images.
//!
//! The crate covers the three stages of a typical detection pipeline:
//!
//! - [`background`]: a smooth sky model from sigma-clipped tile statistics,
//!   interpolated with bicubic splines.
//! - [`extract`]: thresholding, connected-component labelling, deblending
//!   and cleaning of a background-subtracted image into a [`Catalog`].
//! - [`aperture`]: circular, elliptical and annular sums with exact or
//!   sub-pixel overlap, flux and Kron radii, and windowed centroids.
//!
//! All entry points take an [`ImageView`], which borrows the pixel data
//! together with optional noise, mask and segmentation arrays.
//!
//! ```no_run
//! use skysep::{extract, Background, BackgroundParams, ExtractParams, ImageView};
//!
//! # fn main() -> skysep::Result<()> {
//! let mut pixels = vec![0.0f32; 256 * 256];
//! let image = ImageView::new(&pixels, 256, 256)?;
//! let bkg = Background::new(&image, &BackgroundParams::default())?;
//! bkg.sub_array(&mut pixels)?;
//! let view = ImageView::new(&pixels, 256, 256)?;
//! let catalog = extract(&view, &ExtractParams {
//!     thresh: 1.5 * bkg.global_rms() as f64,
//!     ..Default::default()
//! })?;
//! println!("{} objects", catalog.len());
//! # Ok(())
//! # }
//! ```

pub mod aperture;
pub mod background;
pub mod error;
pub mod extract;
pub mod flags;
pub mod image;

pub use aperture::{
    ellipse_axes, ellipse_coeffs, flux_radius, kron_radius, set_ellipse, sum_circann,
    sum_circann_multi, sum_circle, sum_ellipann, sum_ellipse, windowed, ApertureSum, MultiAnnulus,
    SumOptions, Windowed,
};
pub use background::{Background, BackgroundParams};
pub use error::{status_message, Result, SepError};
pub use extract::{extract, Catalog, ExtractLimits, ExtractParams, Filter, Kernel, ThreshType};
pub use flags::{ApertureFlags, InputFlags, ObjectFlags};
pub use image::{ImageView, Noise, NoiseKind, PixelData, Segmentation};
