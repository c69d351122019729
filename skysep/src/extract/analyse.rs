//! Shape and flux measurements of a pixel list.

use crate::flags::ObjectFlags;

use super::scan::PixelRecord;

/// Determinant below which x and y are treated as fully correlated.
const SINGULAR_DET: f64 = 0.00694;
/// Padding added to x2 and y2 for singular objects (variance of a uniform
/// pixel).
const SINGULAR_PAD: f64 = 1.0 / 12.0;

/// Everything measured for one object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct ObjectParams {
    pub thresh: f32,
    /// Level at which the object was separated during deblending
    pub mthresh: f32,
    pub npix: usize,
    pub tnpix: usize,
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
    pub xy: f64,
    pub errx2: f64,
    pub erry2: f64,
    pub errxy: f64,
    pub a: f32,
    pub b: f32,
    pub theta: f32,
    pub cxx: f32,
    pub cyy: f32,
    pub cxy: f32,
    pub cflux: f32,
    pub flux: f32,
    pub cpeak: f32,
    pub peak: f32,
    pub xcpeak: usize,
    pub ycpeak: usize,
    pub xpeak: usize,
    pub ypeak: usize,
    pub flag: ObjectFlags,
}

/// Measure `pixels` (non-empty) on a `width × height` image.
///
/// `flag` carries bits decided upstream (deblending); shape bits are added
/// here.
pub(crate) fn analyse(
    pixels: &[PixelRecord],
    width: usize,
    height: usize,
    gain: f64,
    thresh: f32,
    mthresh: f32,
    flag: ObjectFlags,
) -> ObjectParams {
    let mut p = ObjectParams {
        thresh,
        mthresh,
        npix: pixels.len(),
        xmin: usize::MAX,
        ymin: usize::MAX,
        peak: f32::NEG_INFINITY,
        cpeak: f32::NEG_INFINITY,
        flag,
        ..Default::default()
    };

    for px in pixels {
        p.xmin = p.xmin.min(px.x);
        p.xmax = p.xmax.max(px.x);
        p.ymin = p.ymin.min(px.y);
        p.ymax = p.ymax.max(px.y);
        if px.value > px.thresh {
            p.tnpix += 1;
        }
        if px.value > p.peak {
            p.peak = px.value;
            p.xpeak = px.x;
            p.ypeak = px.y;
        }
        if px.cvalue > p.cpeak {
            p.cpeak = px.cvalue;
            p.xcpeak = px.x;
            p.ycpeak = px.y;
        }
        p.flux += px.value;
        p.cflux += px.cvalue;
    }

    // Accumulate relative to the bbox corner to limit cancellation
    let (x0, y0) = (p.xmin as f64, p.ymin as f64);
    let weighted = pixels.iter().map(|px| px.value as f64).sum::<f64>() > 0.0;
    let weight = |px: &PixelRecord| if weighted { px.value as f64 } else { 1.0 };

    let (mut sw, mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for px in pixels {
        let w = weight(px);
        let (dx, dy) = (px.x as f64 - x0, px.y as f64 - y0);
        sw += w;
        sx += w * dx;
        sy += w * dy;
        sxx += w * dx * dx;
        syy += w * dy * dy;
        sxy += w * dx * dy;
    }
    let mx = sx / sw;
    let my = sy / sw;
    p.x = mx + x0;
    p.y = my + y0;
    let mut x2 = (sxx / sw - mx * mx).max(0.0);
    let mut y2 = (syy / sw - my * my).max(0.0);
    let xy = sxy / sw - mx * my;

    // Position errors from per-pixel variance plus the Poisson term
    let (mut ex2, mut ey2, mut exy) = (0.0, 0.0, 0.0);
    for px in pixels {
        let mut var = px.var as f64;
        if gain > 0.0 && px.value > 0.0 {
            var += px.value as f64 / gain;
        }
        let (dx, dy) = (px.x as f64 - p.x, px.y as f64 - p.y);
        ex2 += var * dx * dx;
        ey2 += var * dy * dy;
        exy += var * dx * dy;
    }
    let norm = sw * sw;
    p.errx2 = ex2 / norm;
    p.erry2 = ey2 / norm;
    p.errxy = exy / norm;

    if x2 * y2 - xy * xy < SINGULAR_DET {
        x2 += SINGULAR_PAD;
        y2 += SINGULAR_PAD;
        p.flag |= ObjectFlags::SINGU;
    }
    p.x2 = x2;
    p.y2 = y2;
    p.xy = xy;

    let det = x2 * y2 - xy * xy;
    let half_diff = 0.5 * (x2 - y2);
    let root = (half_diff * half_diff + xy * xy).sqrt();
    let mean = 0.5 * (x2 + y2);
    p.a = (mean + root).sqrt() as f32;
    p.b = (mean - root).max(0.0).sqrt() as f32;
    p.theta = (0.5 * (2.0 * xy).atan2(x2 - y2)) as f32;
    p.cxx = (y2 / det) as f32;
    p.cyy = (x2 / det) as f32;
    p.cxy = (-2.0 * xy / det) as f32;

    if p.xmin == 0 || p.ymin == 0 || p.xmax + 1 >= width || p.ymax + 1 >= height {
        p.flag |= ObjectFlags::TRUNC;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn px(x: usize, y: usize, value: f32) -> PixelRecord {
        PixelRecord {
            x,
            y,
            value,
            cvalue: value,
            var: 1.0,
            thresh: 0.5,
            dthresh: 0.5,
        }
    }

    #[test]
    fn test_symmetric_cross() {
        let pixels = vec![
            px(5, 4, 1.0),
            px(4, 5, 1.0),
            px(5, 5, 4.0),
            px(6, 5, 1.0),
            px(5, 6, 1.0),
        ];
        let p = analyse(&pixels, 20, 20, 0.0, 0.5, 0.5, ObjectFlags::empty());
        assert_relative_eq!(p.x, 5.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 5.0, epsilon = 1e-12);
        assert_relative_eq!(p.x2, 0.25, epsilon = 1e-12);
        assert_relative_eq!(p.xy, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.a, p.b, epsilon = 1e-6);
        assert_eq!(p.npix, 5);
        assert_eq!(p.tnpix, 5);
        assert_eq!((p.xpeak, p.ypeak), (5, 5));
        assert_eq!(p.flux, 8.0);
        // errx2 = Σ var dx² / (Σ v)² = 2 / 64
        assert_relative_eq!(p.errx2, 2.0 / 64.0, epsilon = 1e-12);
        assert!(!p.flag.contains(ObjectFlags::TRUNC));
    }

    #[test]
    fn test_line_is_singular() {
        let pixels: Vec<_> = (0..5).map(|x| px(x + 3, 7, 1.0)).collect();
        let p = analyse(&pixels, 20, 20, 0.0, 0.5, 0.5, ObjectFlags::empty());
        assert!(p.flag.contains(ObjectFlags::SINGU));
        assert_relative_eq!(p.y2, 1.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(p.x2, 2.0 + 1.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(p.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_negative_flux_uses_unweighted_moments() {
        let pixels = vec![px(1, 1, -1.0), px(3, 1, -1.0), px(2, 2, -1.0)];
        let p = analyse(&pixels, 10, 10, 0.0, 0.5, 0.5, ObjectFlags::empty());
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 4.0 / 3.0, epsilon = 1e-12);
        assert_eq!(p.tnpix, 0);
    }

    #[test]
    fn test_edge_object_truncated() {
        let pixels = vec![px(0, 3, 1.0), px(1, 3, 2.0), px(0, 4, 1.0), px(1, 4, 1.0)];
        let p = analyse(&pixels, 10, 10, 0.0, 0.5, 0.5, ObjectFlags::MERGED);
        assert!(p.flag.contains(ObjectFlags::TRUNC | ObjectFlags::MERGED));
    }

    #[test]
    fn test_diagonal_orientation() {
        let pixels: Vec<_> = (0..6)
            .flat_map(|i| [px(2 + i, 2 + i, 2.0), px(3 + i, 2 + i, 1.0)])
            .collect();
        let p = analyse(&pixels, 20, 20, 0.0, 0.5, 0.5, ObjectFlags::empty());
        assert!(p.theta > 0.6 && p.theta < 0.9, "theta {}", p.theta);
        assert!(p.a > 2.0 * p.b);
    }
}
