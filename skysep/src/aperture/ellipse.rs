//! Ellipse representations and pixel-box helpers.
//!
//! An ellipse is either given by its semi-axes and position angle
//! `(a, b, theta)` or by the coefficients of
//! `cxx·dx² + cyy·dy² + cxy·dx·dy = r²`.

use crate::error::{Result, SepError};
use crate::flags::ApertureFlags;

/// Coefficients `(cxx, cyy, cxy)` of the ellipse with semi-axes `a`, `b`
/// and angle `theta` (radians, counter-clockwise from +x).
pub fn ellipse_coeffs(a: f64, b: f64, theta: f64) -> (f64, f64, f64) {
    let (sin, cos) = theta.sin_cos();
    let (a2, b2) = (a * a, b * b);
    let cxx = cos * cos / a2 + sin * sin / b2;
    let cyy = sin * sin / a2 + cos * cos / b2;
    let cxy = 2.0 * cos * sin * (1.0 / a2 - 1.0 / b2);
    (cxx, cyy, cxy)
}

/// Semi-axes and angle `(a, b, theta)` of the ellipse with coefficients
/// `cxx`, `cyy`, `cxy`.
///
/// Returns [`SepError::NonEllipseParams`] when the coefficients describe a
/// parabola, hyperbola or nothing at all.
pub fn ellipse_axes(cxx: f64, cyy: f64, cxy: f64) -> Result<(f64, f64, f64)> {
    let p = cxx + cyy;
    let q = cxx - cyy;
    let t = (q * q + cxy * cxy).sqrt();

    if !(p - t > 0.0) || !(cxx * cyy - 0.25 * cxy * cxy > 0.0) {
        return Err(SepError::NonEllipseParams { cxx, cyy, cxy });
    }

    let a = (2.0 / (p - t)).sqrt();
    let b = (2.0 / (p + t)).sqrt();
    let theta = if cxy == 0.0 && q == 0.0 {
        0.0
    } else {
        0.5 * (-cxy).atan2(-q)
    };
    Ok((a, b, theta))
}

/// Set every pixel of the `w × h` array whose centre lies within the ellipse
/// `cxx·dx² + cyy·dy² + cxy·dx·dy <= r²` around `(x, y)` to `val`.
#[allow(clippy::too_many_arguments)]
pub fn set_ellipse(
    arr: &mut [u8],
    w: usize,
    h: usize,
    x: f64,
    y: f64,
    cxx: f64,
    cyy: f64,
    cxy: f64,
    r: f64,
    val: u8,
) -> Result<()> {
    if arr.len() != w * h {
        return Err(SepError::DimensionMismatch {
            what: "ellipse stamp array",
            expected: w * h,
            actual: arr.len(),
        });
    }
    let (dxlim, dylim) = ellipse_box_half_widths(cxx, cyy, cxy, r)?;
    let bx = box_extent(x, y, dxlim, dylim, w, h);
    let r2 = r * r;
    for iy in bx.ymin..bx.ymax {
        let dy = iy as f64 - y;
        for ix in bx.xmin..bx.xmax {
            let dx = ix as f64 - x;
            if cxx * dx * dx + cyy * dy * dy + cxy * dx * dy <= r2 {
                arr[iy * w + ix] = val;
            }
        }
    }
    Ok(())
}

/// Half-widths of the axis-aligned box enclosing the ellipse at scale `r`.
pub(crate) fn ellipse_box_half_widths(cxx: f64, cyy: f64, cxy: f64, r: f64) -> Result<(f64, f64)> {
    let xden = cxx - cxy * cxy / (4.0 * cyy);
    let yden = cyy - cxy * cxy / (4.0 * cxx);
    if !(xden > 0.0) || !(yden > 0.0) {
        return Err(SepError::NonEllipseParams { cxx, cyy, cxy });
    }
    Ok((r / xden.sqrt(), r / yden.sqrt()))
}

/// Pixel box covering an aperture, clipped to the image.
///
/// `xmax` and `ymax` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelBox {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
    pub flag: ApertureFlags,
}

/// Box of pixels whose area may overlap an aperture of half-widths
/// `rx`, `ry` centred on `(x, y)`.
pub(crate) fn box_extent(x: f64, y: f64, rx: f64, ry: f64, w: usize, h: usize) -> PixelBox {
    let mut flag = ApertureFlags::empty();
    let mut clip = |lo: f64, hi: f64, size: usize| -> (usize, usize) {
        let lo = (lo + 0.5).floor();
        let hi = (hi + 1.499_999_9).floor();
        if lo < 0.0 || hi > size as f64 {
            flag |= ApertureFlags::TRUNC;
        }
        let lo = lo.clamp(0.0, size as f64) as usize;
        let hi = hi.clamp(0.0, size as f64) as usize;
        (lo, hi.max(lo))
    };
    let (xmin, xmax) = clip(x - rx, x + rx, w);
    let (ymin, ymax) = clip(y - ry, y + ry, h);
    PixelBox {
        xmin,
        xmax,
        ymin,
        ymax,
        flag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_axes_coeffs_round_trip() {
        for &(a, b, theta) in &[(3.0, 1.0, 0.3), (2.0, 1.5, -1.2), (5.0, 0.5, 1.5)] {
            let (cxx, cyy, cxy) = ellipse_coeffs(a, b, theta);
            let (a2, b2, t2) = ellipse_axes(cxx, cyy, cxy).unwrap();
            assert_relative_eq!(a, a2, epsilon = 1e-10);
            assert_relative_eq!(b, b2, epsilon = 1e-10);
            assert_relative_eq!(theta, t2, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_circle_coefficients() {
        let (cxx, cyy, cxy) = ellipse_coeffs(2.0, 2.0, 0.7);
        assert_relative_eq!(cxx, 0.25, epsilon = 1e-12);
        assert_relative_eq!(cyy, 0.25, epsilon = 1e-12);
        assert_relative_eq!(cxy, 0.0, epsilon = 1e-12);
        let (a, b, theta) = ellipse_axes(cxx, cyy, 0.0).unwrap();
        assert_relative_eq!(a, 2.0, epsilon = 1e-12);
        assert_relative_eq!(b, 2.0, epsilon = 1e-12);
        assert!(theta.abs() <= PI / 2.0);
    }

    #[test]
    fn test_degenerate_coefficients_rejected() {
        assert_eq!(
            ellipse_axes(1.0, -1.0, 0.0).unwrap_err(),
            SepError::NonEllipseParams {
                cxx: 1.0,
                cyy: -1.0,
                cxy: 0.0
            }
        );
        assert!(ellipse_axes(1.0, 1.0, 2.0).is_err());
        assert!(ellipse_axes(0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_set_ellipse_pixel_counts() {
        let mut arr = vec![0u8; 100];
        set_ellipse(&mut arr, 10, 10, 5.0, 5.0, 1.0, 1.0, 0.0, 1.001, 1).unwrap();
        assert_eq!(arr.iter().filter(|&&v| v == 1).count(), 5);

        let mut arr = vec![0u8; 100];
        set_ellipse(&mut arr, 10, 10, 5.0, 5.0, 1.0, 1.0, 0.0, 2.001, 1).unwrap();
        assert_eq!(arr.iter().filter(|&&v| v == 1).count(), 13);
    }

    #[test]
    fn test_set_ellipse_dimension_check() {
        let mut arr = vec![0u8; 10];
        assert!(matches!(
            set_ellipse(&mut arr, 4, 4, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1),
            Err(SepError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_box_extent_clips() {
        let bx = box_extent(5.0, 5.0, 2.0, 2.0, 100, 100);
        assert_eq!((bx.xmin, bx.xmax, bx.ymin, bx.ymax), (3, 8, 3, 8));
        assert!(bx.flag.is_empty());

        let bx = box_extent(-50.0, 5.0, 2.0, 2.0, 100, 100);
        assert_eq!(bx.xmin, bx.xmax);
        assert!(bx.flag.contains(ApertureFlags::TRUNC));

        let bx = box_extent(98.5, 1.0, 3.0, 3.0, 100, 100);
        assert_eq!((bx.xmax, bx.ymin), (100, 0));
        assert!(bx.flag.contains(ApertureFlags::TRUNC));
    }
}
