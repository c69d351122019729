//! Flux-fraction and Kron radii.

use crate::error::{Result, SepError};
use crate::flags::ApertureFlags;
use crate::image::ImageView;

use super::ellipse::{box_extent, ellipse_box_half_widths};
use super::multi::sum_circann_multi;
use super::sum::excluded;
use super::SumOptions;

/// Number of annuli sampled for the cumulative radial profile.
const FLUX_RADIUS_BINS: usize = 64;

/// Radii enclosing each fraction in `fluxfrac` of the total flux.
///
/// The profile is built from 64 annuli out to `rmax`. The total is
/// `fluxtot` when given, otherwise the flux within `rmax`. Radii are
/// linearly interpolated within an annulus and never exceed `rmax`.
pub fn flux_radius(
    image: &ImageView,
    x: f64,
    y: f64,
    rmax: f64,
    opts: &SumOptions,
    fluxtot: Option<f64>,
    fluxfrac: &[f64],
) -> Result<(Vec<f64>, ApertureFlags)> {
    let profile = sum_circann_multi(image, x, y, rmax, FLUX_RADIUS_BINS, opts)?;
    let mut flag = profile.flag;
    if profile.sum.iter().any(|&s| s < 0.0) {
        flag |= ApertureFlags::NONMONOTONIC;
    }

    let cumulative: Vec<f64> = profile
        .sum
        .iter()
        .scan(0.0, |acc, &s| {
            *acc += s;
            Some(*acc)
        })
        .collect();
    let total = fluxtot.unwrap_or_else(|| cumulative.last().copied().unwrap_or(0.0));
    let step = rmax / FLUX_RADIUS_BINS as f64;

    let radii = fluxfrac
        .iter()
        .map(|&frac| {
            let target = frac * total;
            match cumulative.iter().position(|&c| c >= target) {
                Some(i) => {
                    let f0 = if i == 0 { 0.0 } else { cumulative[i - 1] };
                    let denom = cumulative[i] - f0;
                    let within = if denom > 0.0 {
                        (target - f0) / denom
                    } else {
                        0.0
                    };
                    (step * (i as f64 + within)).clamp(0.0, rmax)
                }
                None => rmax,
            }
        })
        .collect();

    Ok((radii, flag))
}

/// First-moment (Kron) radius within the ellipse
/// `cxx·dx² + cyy·dy² + cxy·dx·dy <= r²`.
///
/// Returns 0 with [`ApertureFlags::ALLMASKED`] when no pixel is usable and
/// 0 with [`ApertureFlags::NONPOSITIVE`] when the weighted sums are not
/// positive.
#[allow(clippy::too_many_arguments)]
pub fn kron_radius(
    image: &ImageView,
    x: f64,
    y: f64,
    cxx: f64,
    cyy: f64,
    cxy: f64,
    r: f64,
    id: i64,
) -> Result<(f64, ApertureFlags)> {
    if !(r >= 0.0) {
        return Err(SepError::IllegalAperture(format!(
            "kron radius scale {r} must be >= 0"
        )));
    }
    let (dx, dy) = ellipse_box_half_widths(cxx, cyy, cxy, r)?;
    let w = image.width();
    let bx = box_extent(x, y, dx, dy, w, image.height());
    let r2 = r * r;

    let mut flag = bx.flag;
    let (mut r1, mut v1, mut area) = (0.0, 0.0, 0usize);
    for iy in bx.ymin..bx.ymax {
        let dy = iy as f64 - y;
        for ix in bx.xmin..bx.xmax {
            let dx = ix as f64 - x;
            let rpix2 = cxx * dx * dx + cyy * dy * dy + cxy * dx * dy;
            if rpix2 > r2 {
                continue;
            }
            let i = iy * w + ix;
            if excluded(image, i, id) {
                flag |= ApertureFlags::HASMASKED;
                continue;
            }
            let v = image.value(i);
            r1 += rpix2.sqrt() * v;
            v1 += v;
            area += 1;
        }
    }

    if area == 0 {
        return Ok((0.0, flag | ApertureFlags::ALLMASKED));
    }
    if r1 <= 0.0 || v1 <= 0.0 {
        return Ok((0.0, flag | ApertureFlags::NONPOSITIVE));
    }
    Ok((r1 / v1, flag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian(w: usize, h: usize, x0: f64, y0: f64, sigma: f64) -> Vec<f64> {
        let mut data = vec![0.0; w * h];
        for y in 0..h {
            for x in 0..w {
                let r2 = (x as f64 - x0).powi(2) + (y as f64 - y0).powi(2);
                data[y * w + x] = (-r2 / (2.0 * sigma * sigma)).exp();
            }
        }
        data
    }

    #[test]
    fn test_half_light_radius_of_gaussian() {
        let sigma = 2.0;
        let data = gaussian(60, 60, 30.0, 30.0, sigma);
        let img = ImageView::new(&data, 60, 60).unwrap();
        let (radii, flag) =
            flux_radius(&img, 30.0, 30.0, 20.0, &SumOptions::default(), None, &[0.5, 0.9]).unwrap();
        assert!(flag.is_empty());
        // r_half = σ·sqrt(2 ln 2) for a circular Gaussian
        let expected = sigma * (2.0 * 2f64.ln()).sqrt();
        assert_relative_eq!(radii[0], expected, max_relative = 0.03);
        assert!(radii[1] > radii[0]);
    }

    #[test]
    fn test_flux_radius_clamps_to_rmax() {
        let data = gaussian(40, 40, 20.0, 20.0, 2.0);
        let img = ImageView::new(&data, 40, 40).unwrap();
        let (radii, _) =
            flux_radius(&img, 20.0, 20.0, 5.0, &SumOptions::default(), Some(1e6), &[0.5]).unwrap();
        assert_eq!(radii[0], 5.0);
    }

    #[test]
    fn test_negative_profile_flagged() {
        let data = vec![-1.0f32; 400];
        let img = ImageView::new(&data, 20, 20).unwrap();
        let (_, flag) =
            flux_radius(&img, 10.0, 10.0, 5.0, &SumOptions::default(), None, &[0.5]).unwrap();
        assert!(flag.contains(ApertureFlags::NONMONOTONIC));
    }

    #[test]
    fn test_kron_radius_of_flat_disk() {
        // uniform disk of radius R has <r> = 2R/3
        let data = vec![1.0f32; 60 * 60];
        let img = ImageView::new(&data, 60, 60).unwrap();
        let (kr, flag) = kron_radius(&img, 30.0, 30.0, 1.0, 1.0, 0.0, 15.0, 0).unwrap();
        assert!(flag.is_empty());
        assert_relative_eq!(kr, 10.0, max_relative = 0.02);
    }

    #[test]
    fn test_kron_radius_degenerate_inputs() {
        let data = vec![-1.0f32; 400];
        let img = ImageView::new(&data, 20, 20).unwrap();
        let (kr, flag) = kron_radius(&img, 10.0, 10.0, 1.0, 1.0, 0.0, 4.0, 0).unwrap();
        assert_eq!(kr, 0.0);
        assert!(flag.contains(ApertureFlags::NONPOSITIVE));

        let mask = vec![1u8; 400];
        let img = img.with_mask(&mask, 0.0).unwrap();
        let (kr, flag) = kron_radius(&img, 10.0, 10.0, 1.0, 1.0, 0.0, 4.0, 0).unwrap();
        assert_eq!(kr, 0.0);
        assert!(flag.contains(ApertureFlags::ALLMASKED));
    }
}
