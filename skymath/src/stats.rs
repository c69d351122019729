//! Robust statistics for sky-level estimation
//!
//! The sky estimator follows the Source Extractor recipe: a crude mean and
//! standard deviation, a ±2σ clip, then an iterative ±3σ clip carried out on
//! a quantised histogram. When the clipped distribution is not too skewed the
//! location is the mode estimate `2.5 × median − 1.5 × mean`, otherwise the
//! clipped median.

/// Number of σ covered on each side of the mean by the quantised histogram.
const QUANTIF_NSIGMA: f64 = 5.0;
/// Upper bound on histogram levels.
const QUANTIF_NMAXLEVELS: usize = 4096;
/// Mean number of samples per histogram level.
const QUANTIF_AMIN: f64 = 4.0;
/// Relative σ change treated as convergence.
const CLIP_EPS: f64 = 1e-4;
const CLIP_MAX_ITER: usize = 100;

/// Location and scale of a sample as produced by [`robust_sky`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyEstimate {
    /// Sky level (mode estimate or clipped median)
    pub level: f64,
    /// Clipped standard deviation
    pub sigma: f64,
}

/// Median of a small f32 buffer, reordering it in place.
///
/// Used for spatial filtering of background nodes, where the window is a few
/// tiles wide. Returns 0 for an empty buffer.
pub fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *m;
    if values.len() % 2 == 1 {
        return upper;
    }
    let lower = values[..mid]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    0.5 * (lower + upper)
}

/// Mean and population standard deviation of the values inside `[lo, hi]`.
///
/// Returns `None` when no value falls inside the range.
pub fn mean_sigma_in_range(values: &[f32], lo: f64, hi: f64) -> Option<(f64, f64, usize)> {
    let mut sum = 0.0;
    let mut sum2 = 0.0;
    let mut n = 0usize;
    for &v in values {
        let v = v as f64;
        if v >= lo && v <= hi {
            sum += v;
            sum2 += v * v;
            n += 1;
        }
    }
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let var = (sum2 / n as f64 - mean * mean).max(0.0);
    Some((mean, var.sqrt(), n))
}

/// Robust sky level and noise of a set of pixel values.
///
/// The caller is expected to have removed masked and invalid samples.
/// Returns `None` for an empty sample.
pub fn robust_sky(values: &[f32]) -> Option<SkyEstimate> {
    let (mean, sigma, _) = mean_sigma_in_range(values, f64::NEG_INFINITY, f64::INFINITY)?;

    // First-pass ±2σ clip on the raw values
    let (mean, sigma, n) =
        mean_sigma_in_range(values, mean - 2.0 * sigma, mean + 2.0 * sigma).unwrap_or((
            mean,
            sigma,
            values.len(),
        ));

    let step = (2.0 / std::f64::consts::PI).sqrt() * QUANTIF_NSIGMA / QUANTIF_AMIN;
    let nlevels = ((step * n as f64 + 1.0) as usize).clamp(1, QUANTIF_NMAXLEVELS);
    let qscale = if sigma > 0.0 {
        2.0 * QUANTIF_NSIGMA * sigma / nlevels as f64
    } else {
        1.0
    };
    let qzero = mean - QUANTIF_NSIGMA * sigma;

    let mut histogram = vec![0u64; nlevels];
    for &v in values {
        let bin = ((v as f64 - qzero) / qscale + 0.5).floor();
        if bin >= 0.0 && (bin as usize) < nlevels {
            histogram[bin as usize] += 1;
        }
    }

    let (hmean, hmedian, hsigma) = clipped_histogram_stats(&histogram);

    let level = if hsigma > 0.0 {
        if ((hmean - hmedian) / hsigma).abs() < 0.3 {
            qzero + (2.5 * hmedian - 1.5 * hmean) * qscale
        } else {
            qzero + hmedian * qscale
        }
    } else {
        qzero + hmean * qscale
    };

    Some(SkyEstimate {
        level,
        sigma: hsigma * qscale,
    })
}

/// Iterative ±3σ clipping on a histogram, in level units.
///
/// Returns `(mean, median, sigma)` of the final clipped histogram.
fn clipped_histogram_stats(histogram: &[u64]) -> (f64, f64, f64) {
    let nlevels = histogram.len();
    let mut lcut = 0usize;
    let mut hcut = nlevels - 1;
    let mut mean = 0.0;
    let mut med = 0.0;
    let mut sig = 10.0 * nlevels as f64;
    let mut sig_prev = 1.0;

    for _ in 0..CLIP_MAX_ITER {
        if sig < 0.1 || (sig / sig_prev - 1.0).abs() <= CLIP_EPS {
            break;
        }
        sig_prev = sig;

        let window = &histogram[lcut..=hcut];
        let total: u64 = window.iter().sum();
        if total == 0 {
            sig = 0.0;
            break;
        }

        let mut sum = 0.0;
        let mut sum2 = 0.0;
        for (offset, &count) in window.iter().enumerate() {
            let level = (lcut + offset) as f64;
            sum += count as f64 * level;
            sum2 += count as f64 * level * level;
        }
        mean = sum / total as f64;
        let var = sum2 / total as f64 - mean * mean;
        sig = if var > 0.0 { var.sqrt() } else { 0.0 };

        // Median by interpolation inside the bin holding the half-count
        let half = total as f64 / 2.0;
        let mut cumulative = 0.0;
        med = (lcut + window.len() - 1) as f64;
        for (offset, &count) in window.iter().enumerate() {
            let next = cumulative + count as f64;
            if next >= half && count > 0 {
                med = (lcut + offset) as f64 - 0.5 + (half - cumulative) / count as f64;
                break;
            }
            cumulative = next;
        }

        let lo = (med - 3.0 * sig).round();
        let hi = (med + 3.0 * sig).round();
        lcut = if lo > 0.0 { lo as usize } else { 0 };
        hcut = if hi < (nlevels - 1) as f64 {
            hi.max(0.0) as usize
        } else {
            nlevels - 1
        };
        if hcut < lcut {
            hcut = lcut;
        }
    }

    (mean, med, sig)
}
