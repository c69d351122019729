//! Flux sums in circular, elliptical and annular apertures.

use std::f64::consts::FRAC_PI_2;

use crate::error::{Result, SepError};
use crate::flags::{ApertureFlags, InputFlags};
use crate::image::ImageView;

use super::ellipse::{box_extent, ellipse_box_half_widths, ellipse_coeffs, PixelBox};
use super::overlap::{circoverlap, ellipoverlap};
use super::{ApertureSum, SumOptions};

/// Half the pixel diagonal: pixels whose centre is closer than this to the
/// aperture edge may be cut by it.
pub(crate) const HALF_DIAGONAL: f64 = 0.7072;

/// Aperture geometry relative to its centre.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Shape {
    Circle {
        r: f64,
    },
    CircAnnulus {
        rin: f64,
        rout: f64,
    },
    Ellipse {
        a: f64,
        b: f64,
        theta: f64,
        r: f64,
    },
    EllipAnnulus {
        a: f64,
        b: f64,
        theta: f64,
        rin: f64,
        rout: f64,
    },
}

/// Squared inner and outer limits of the band of partially covered pixels
/// around an edge at `r`. The inner limit is `None` when the band reaches the
/// centre, in which case no pixel is known to lie wholly inside the edge.
fn band(r: f64, half: f64) -> (Option<f64>, f64) {
    let inner = r - half;
    ((inner > 0.0).then_some(inner * inner), (r + half) * (r + half))
}

#[inline]
fn within(rpix2: f64, limit2: Option<f64>) -> bool {
    limit2.is_some_and(|l| rpix2 <= l)
}

/// Fraction of a unit pixel, offset `(dx, dy)` from the centre, for which
/// `inside` holds, sampled on a `subpix × subpix` grid.
pub(crate) fn subpixel_fraction<F: Fn(f64, f64) -> bool>(
    dx: f64,
    dy: f64,
    subpix: usize,
    inside: F,
) -> f64 {
    let scale = 1.0 / subpix as f64;
    let offset = 0.5 * (scale - 1.0);
    let mut count = 0usize;
    for sy in 0..subpix {
        let y = dy + offset + sy as f64 * scale;
        for sx in 0..subpix {
            if inside(dx + offset + sx as f64 * scale, y) {
                count += 1;
            }
        }
    }
    count as f64 * scale * scale
}

impl Shape {
    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(SepError::IllegalAperture(msg));
        match *self {
            Shape::Circle { r } if !(r >= 0.0) => bad(format!("radius {r} must be >= 0")),
            Shape::CircAnnulus { rin, rout } if !(rin >= 0.0 && rout >= rin) => {
                bad(format!("annulus radii {rin}..{rout} must satisfy 0 <= rin <= rout"))
            }
            Shape::Ellipse { a, b, theta, r }
                if !(a > 0.0 && b > 0.0 && r >= 0.0 && theta.abs() <= FRAC_PI_2) =>
            {
                bad(format!(
                    "ellipse a={a}, b={b}, theta={theta}, r={r} needs a, b > 0, r >= 0, |theta| <= pi/2"
                ))
            }
            Shape::EllipAnnulus {
                a,
                b,
                theta,
                rin,
                rout,
            } if !(a > 0.0 && b > 0.0 && rin >= 0.0 && rout >= rin && theta.abs() <= FRAC_PI_2) => {
                bad(format!(
                    "elliptical annulus a={a}, b={b}, theta={theta}, radii {rin}..{rout} out of range"
                ))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn pixel_box(&self, x: f64, y: f64, w: usize, h: usize) -> Result<PixelBox> {
        Ok(match *self {
            Shape::Circle { r } => box_extent(x, y, r, r, w, h),
            Shape::CircAnnulus { rout, .. } => box_extent(x, y, rout, rout, w, h),
            Shape::Ellipse { a, b, theta, r } => {
                let (cxx, cyy, cxy) = ellipse_coeffs(a, b, theta);
                let (dx, dy) = ellipse_box_half_widths(cxx, cyy, cxy, r)?;
                box_extent(x, y, dx, dy, w, h)
            }
            Shape::EllipAnnulus {
                a, b, theta, rout, ..
            } => {
                let (cxx, cyy, cxy) = ellipse_coeffs(a, b, theta);
                let (dx, dy) = ellipse_box_half_widths(cxx, cyy, cxy, rout)?;
                box_extent(x, y, dx, dy, w, h)
            }
        })
    }

    /// Builds the per-pixel coverage function for this shape.
    pub(crate) fn coverage(self, subpix: usize) -> impl Fn(f64, f64) -> f64 {
        let coeffs = match self {
            Shape::Ellipse { a, b, theta, .. } | Shape::EllipAnnulus { a, b, theta, .. } => {
                ellipse_coeffs(a, b, theta)
            }
            _ => (1.0, 1.0, 0.0),
        };
        move |dx: f64, dy: f64| -> f64 {
            let (cxx, cyy, cxy) = coeffs;
            let metric = |x: f64, y: f64| cxx * x * x + cyy * y * y + cxy * x * y;
            let rpix2 = metric(dx, dy);
            match self {
                Shape::Circle { r } => {
                    let (inner2, outer2) = band(r, HALF_DIAGONAL);
                    if rpix2 >= outer2 {
                        0.0
                    } else if within(rpix2, inner2) {
                        1.0
                    } else if subpix == 0 {
                        circoverlap(dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5, r)
                    } else {
                        subpixel_fraction(dx, dy, subpix, |x, y| metric(x, y) < r * r)
                    }
                }
                Shape::CircAnnulus { rin, rout } => {
                    let (in_inner2, in_outer2) = band(rin, HALF_DIAGONAL);
                    let (out_inner2, out_outer2) = band(rout, HALF_DIAGONAL);
                    if rpix2 >= out_outer2 || within(rpix2, in_inner2) {
                        0.0
                    } else if rpix2 > in_outer2 && within(rpix2, out_inner2) {
                        1.0
                    } else if subpix == 0 {
                        let (x0, y0, x1, y1) = (dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5);
                        circoverlap(x0, y0, x1, y1, rout) - circoverlap(x0, y0, x1, y1, rin)
                    } else {
                        subpixel_fraction(dx, dy, subpix, |x, y| {
                            let m = metric(x, y);
                            m >= rin * rin && m < rout * rout
                        })
                    }
                }
                Shape::Ellipse { a, b, theta, r } => {
                    let (inner2, outer2) = band(r, HALF_DIAGONAL / b);
                    if rpix2 >= outer2 {
                        0.0
                    } else if within(rpix2, inner2) {
                        1.0
                    } else if subpix == 0 {
                        ellipoverlap(dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5, r * a, r * b, theta)
                    } else {
                        subpixel_fraction(dx, dy, subpix, |x, y| metric(x, y) < r * r)
                    }
                }
                Shape::EllipAnnulus {
                    a,
                    b,
                    theta,
                    rin,
                    rout,
                } => {
                    let (in_inner2, in_outer2) = band(rin, HALF_DIAGONAL / b);
                    let (out_inner2, out_outer2) = band(rout, HALF_DIAGONAL / b);
                    if rpix2 >= out_outer2 || within(rpix2, in_inner2) {
                        0.0
                    } else if rpix2 > in_outer2 && within(rpix2, out_inner2) {
                        1.0
                    } else if subpix == 0 {
                        let (x0, y0, x1, y1) = (dx - 0.5, dy - 0.5, dx + 0.5, dy + 0.5);
                        ellipoverlap(x0, y0, x1, y1, rout * a, rout * b, theta)
                            - ellipoverlap(x0, y0, x1, y1, rin * a, rin * b, theta)
                    } else {
                        subpixel_fraction(dx, dy, subpix, |x, y| {
                            let m = metric(x, y);
                            m >= rin * rin && m < rout * rout
                        })
                    }
                }
            }
        }
    }
}

/// Whether pixel `i` is left out of sums for options `opts`.
#[inline]
pub(crate) fn excluded(image: &ImageView, i: usize, id: i64) -> bool {
    image.is_masked(i) || image.is_invalid(i) || image.is_segment_excluded(i, id)
}

pub(crate) fn check_subpix(subpix: i32) -> Result<usize> {
    if subpix < 0 {
        return Err(SepError::IllegalSubpix(subpix, 0));
    }
    Ok(subpix as usize)
}

/// Sum `shape` centred on `(x, y)`.
pub(crate) fn sum_shape(
    image: &ImageView,
    x: f64,
    y: f64,
    shape: Shape,
    opts: &SumOptions,
) -> Result<ApertureSum> {
    shape.validate()?;
    let subpix = check_subpix(opts.subpix)?;
    let (w, h) = (image.width(), image.height());
    let bx = shape.pixel_box(x, y, w, h)?;
    let coverage = shape.coverage(subpix);
    let noise = image.noise();

    let (mut tv, mut sigtv, mut totarea, mut maskarea) = (0.0, 0.0, 0.0, 0.0);
    for iy in bx.ymin..bx.ymax {
        let dy = iy as f64 - y;
        for ix in bx.xmin..bx.xmax {
            let overlap = coverage(ix as f64 - x, dy);
            if overlap <= 0.0 {
                continue;
            }
            let i = iy * w + ix;
            totarea += overlap;
            if excluded(image, i, opts.id) {
                maskarea += overlap;
            } else {
                tv += image.value(i) * overlap;
                sigtv += noise.variance(i) * overlap;
            }
        }
    }

    Ok(finish_sum(
        tv,
        sigtv,
        totarea,
        maskarea,
        bx.flag,
        opts.flags,
        image.gain(),
    ))
}

/// Apply mask correction, the Poisson term and result flags.
pub(crate) fn finish_sum(
    mut tv: f64,
    mut sigtv: f64,
    mut totarea: f64,
    maskarea: f64,
    mut flag: ApertureFlags,
    inflag: InputFlags,
    gain: f64,
) -> ApertureSum {
    if maskarea > 0.0 {
        flag |= ApertureFlags::HASMASKED;
        if maskarea >= totarea {
            flag |= ApertureFlags::ALLMASKED;
        }
        if inflag.contains(InputFlags::MASK_IGNORE) {
            totarea -= maskarea;
        } else if totarea > maskarea {
            let scale = totarea / (totarea - maskarea);
            tv *= scale;
            sigtv *= scale;
        }
    }
    if flag.contains(ApertureFlags::ALLMASKED) {
        tv = 0.0;
        sigtv = 0.0;
    }
    if gain > 0.0 && tv > 0.0 {
        sigtv += tv / gain;
    }
    if totarea <= 0.0 {
        flag |= ApertureFlags::NONPOSITIVE;
        totarea = totarea.max(0.0);
    }
    ApertureSum {
        sum: tv,
        sumerr: sigtv.sqrt(),
        area: totarea,
        flag,
    }
}
