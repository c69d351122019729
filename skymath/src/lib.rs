//! skymath - numerical building blocks for skysep
//!
//! This crate holds the pieces of numerics that are independent of image
//! layout:
//!
//! - **Statistics** - medians and the clipped-histogram sky estimator
//! - **Spline** - natural cubic splines on unit-spaced nodes, used for the
//!   background surface
//!
//! # Example
//!
//! ```rust
//! use skymath::{robust_sky, natural_second_derivatives};
//!
//! let sky = robust_sky(&[1.0, 1.0, 1.0, 1.0]).unwrap();
//! assert!((sky.level - 1.0).abs() < 1e-6);
//!
//! let d2 = natural_second_derivatives(&[0.0_f32, 1.0, 0.0]);
//! assert!(d2[1] < 0.0);
//! ```

pub mod spline;
pub mod stats;

pub use spline::{evaluate, natural_second_derivatives};
pub use stats::{median_in_place, robust_sky, SkyEstimate};
