//! Concentric annuli summed in a single pass over the pixels.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SepError};
use crate::flags::ApertureFlags;
use crate::image::ImageView;

use super::ellipse::box_extent;
use super::sum::{excluded, finish_sum, HALF_DIAGONAL};
use super::SumOptions;

/// Sums in `n` equal-width annuli covering radii `[0, rmax)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiAnnulus {
    pub sum: Vec<f64>,
    pub sumvar: Vec<f64>,
    pub area: Vec<f64>,
    pub maskarea: Vec<f64>,
    pub flag: ApertureFlags,
}

/// Sum `n` annuli of width `rmax / n` around `(x, y)`.
///
/// Only sub-pixel sampling is supported, so `opts.subpix` must be at
/// least 1. Mask correction and the Poisson term are applied per annulus.
pub fn sum_circann_multi(
    image: &ImageView,
    x: f64,
    y: f64,
    rmax: f64,
    n: usize,
    opts: &SumOptions,
) -> Result<MultiAnnulus> {
    if opts.subpix < 1 {
        return Err(SepError::IllegalSubpix(opts.subpix, 1));
    }
    if !(rmax >= 0.0) || n == 0 {
        return Err(SepError::IllegalAperture(format!(
            "multi-annulus rmax={rmax}, n={n} needs rmax >= 0 and n >= 1"
        )));
    }
    let subpix = opts.subpix as usize;
    let (w, h) = (image.width(), image.height());
    let step = rmax / n as f64;
    let stepinv = if step > 0.0 { 1.0 / step } else { 0.0 };
    let rmax2 = rmax * rmax;
    let outer2 = (rmax + HALF_DIAGONAL).powi(2);

    let mut sum = zeros(n)?;
    let mut sumvar = zeros(n)?;
    let mut area = zeros(n)?;
    let mut maskarea = zeros(n)?;

    let bx = box_extent(x, y, rmax, rmax, w, h);
    let noise = image.noise();
    let scale = 1.0 / subpix as f64;
    let offset = 0.5 * (scale - 1.0);
    let subarea = scale * scale;

    for iy in bx.ymin..bx.ymax {
        let dy = iy as f64 - y;
        for ix in bx.xmin..bx.xmax {
            let dx = ix as f64 - x;
            let rpix2 = dx * dx + dy * dy;
            if rpix2 >= outer2 {
                continue;
            }
            let i = iy * w + ix;
            let masked = excluded(image, i, opts.id);
            let (value, var) = if masked {
                (0.0, 0.0)
            } else {
                (image.value(i), noise.variance(i))
            };
            let mut add = |j: usize, overlap: f64| {
                area[j] += overlap;
                if masked {
                    maskarea[j] += overlap;
                } else {
                    sum[j] += value * overlap;
                    sumvar[j] += var * overlap;
                }
            };

            let rpix = rpix2.sqrt();
            let j = (rpix * stepinv) as usize;
            let whole = j < n
                && rpix - j as f64 * step > HALF_DIAGONAL
                && (j + 1) as f64 * step - rpix > HALF_DIAGONAL;
            if whole {
                add(j, 1.0);
                continue;
            }
            for sy in 0..subpix {
                let py = dy + offset + sy as f64 * scale;
                for sx in 0..subpix {
                    let px = dx + offset + sx as f64 * scale;
                    let r2 = px * px + py * py;
                    if r2 < rmax2 {
                        let j = ((r2.sqrt() * stepinv) as usize).min(n - 1);
                        add(j, subarea);
                    }
                }
            }
        }
    }

    let mut flag = bx.flag;
    let mut all_masked = true;
    let mut total_area = 0.0;
    for j in 0..n {
        let s = finish_sum(
            sum[j],
            sumvar[j],
            area[j],
            maskarea[j],
            ApertureFlags::empty(),
            opts.flags,
            image.gain(),
        );
        sum[j] = s.sum;
        sumvar[j] = s.sumerr * s.sumerr;
        area[j] = s.area;
        flag |= s.flag & ApertureFlags::HASMASKED;
        all_masked &= s.flag.contains(ApertureFlags::ALLMASKED);
        total_area += area[j];
    }
    if all_masked {
        flag |= ApertureFlags::ALLMASKED;
    }
    if total_area <= 0.0 {
        flag |= ApertureFlags::NONPOSITIVE;
    }

    log::trace!(
        "multi-annulus at ({x:.2}, {y:.2}): {n} annuli to r={rmax}, flag {:?}",
        flag
    );

    Ok(MultiAnnulus {
        sum,
        sumvar,
        area,
        maskarea,
        flag,
    })
}

fn zeros(n: usize) -> Result<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|e| SepError::alloc("annulus sums", e))?;
    v.resize(n, 0.0);
    Ok(v)
}
