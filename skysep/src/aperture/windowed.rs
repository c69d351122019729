//! Iterative Gaussian-windowed centroid.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SepError};
use crate::flags::{ApertureFlags, InputFlags};
use crate::image::ImageView;

use super::sum::{check_subpix, excluded, Shape};

/// Window radius in units of the Gaussian sigma.
const WINDOW_NSIG: f64 = 4.0;
/// Each iteration moves by this multiple of the measured offset.
const STEP_FACTOR: f64 = 2.0;
const MAX_ITER: usize = 16;
/// Convergence threshold on the step length, in pixels.
const MIN_STEP: f64 = 2.0e-4;

/// Windowed centroid and how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Windowed {
    pub x: f64,
    pub y: f64,
    /// Iterations performed
    pub niter: usize,
    pub flag: ApertureFlags,
}

/// Refine the position `(x, y)` of a source by iterating a centroid weighted
/// with a Gaussian of width `sig`.
pub fn windowed(
    image: &ImageView,
    x: f64,
    y: f64,
    sig: f64,
    subpix: i32,
    inflag: InputFlags,
) -> Result<Windowed> {
    if !(sig > 0.0) {
        return Err(SepError::IllegalAperture(format!(
            "window sigma {sig} must be > 0"
        )));
    }
    let subpix = check_subpix(subpix)?;
    let w = image.width();
    let h = image.height();
    let shape = Shape::Circle {
        r: WINDOW_NSIG * sig,
    };
    let coverage = shape.coverage(subpix);
    let inv_two_sig2 = 1.0 / (2.0 * sig * sig);

    let (mut xc, mut yc) = (x, y);
    let mut flag = ApertureFlags::empty();
    let mut niter = 0;
    let mut converged = false;

    while niter < MAX_ITER {
        niter += 1;
        let bx = shape.pixel_box(xc, yc, w, h)?;
        flag |= bx.flag;

        let (mut tv, mut dxpos, mut dypos) = (0.0, 0.0, 0.0);
        for iy in bx.ymin..bx.ymax {
            let dy = iy as f64 - yc;
            for ix in bx.xmin..bx.xmax {
                let dx = ix as f64 - xc;
                let overlap = coverage(dx, dy);
                if overlap <= 0.0 {
                    continue;
                }
                if excluded(image, iy * w + ix, 0) {
                    flag |= ApertureFlags::HASMASKED;
                }
                let Some(value) = pixel_value(image, ix, iy, xc, yc, inflag) else {
                    continue;
                };
                let weight = value * overlap * (-(dx * dx + dy * dy) * inv_two_sig2).exp();
                tv += weight;
                dxpos += weight * dx;
                dypos += weight * dy;
            }
        }

        if !(tv > 0.0) {
            flag |= ApertureFlags::NONPOSITIVE;
            break;
        }

        let stepx = STEP_FACTOR * dxpos / tv;
        let stepy = STEP_FACTOR * dypos / tv;
        xc += stepx;
        yc += stepy;
        if stepx * stepx + stepy * stepy < MIN_STEP * MIN_STEP {
            converged = true;
            break;
        }
    }

    if !converged && !flag.contains(ApertureFlags::NONPOSITIVE) {
        flag |= ApertureFlags::NOT_CONVERGED;
        log::debug!("windowed centroid from ({x:.2}, {y:.2}) did not converge in {MAX_ITER} iterations");
    }

    Ok(Windowed {
        x: xc,
        y: yc,
        niter,
        flag,
    })
}

/// Value of pixel `(ix, iy)` for the centroid sum.
///
/// A masked pixel is replaced by its mirror image through the current
/// centre unless `MASK_IGNORE` is set or the mirror is unusable too, in
/// which case `None` is returned.
fn pixel_value(
    image: &ImageView,
    ix: usize,
    iy: usize,
    xc: f64,
    yc: f64,
    inflag: InputFlags,
) -> Option<f64> {
    let w = image.width();
    let i = iy * w + ix;
    if !excluded(image, i, 0) {
        return Some(image.value(i));
    }
    if inflag.contains(InputFlags::MASK_IGNORE) {
        return None;
    }
    let mx = (2.0 * xc - ix as f64).round();
    let my = (2.0 * yc - iy as f64).round();
    if mx < 0.0 || my < 0.0 || mx >= w as f64 || my >= image.height() as f64 {
        return None;
    }
    let j = my as usize * w + mx as usize;
    if excluded(image, j, 0) {
        None
    } else {
        Some(image.value(j))
    }
}
