//! Removal of spurious detections in the wings of bright objects.
//!
//! Each object is modelled as a Moffat profile `amp·(1 + α·r²)^(−β)` with
//! `r²` measured in its own ellipse metric. A fainter neighbour whose
//! detection level lies below the brighter model at its centre is folded
//! into the brighter object.

use log::debug;

use super::analyse::{analyse, ObjectParams};
use super::scan::PixelRecord;

/// Neighbours further than this many summed semi-major axes are ignored.
const CLEAN_ZONE: f64 = 10.0;

/// A measured object awaiting cleaning.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub pixels: Vec<PixelRecord>,
    pub params: ObjectParams,
}

/// Moffat model of a bright object.
struct Profile {
    amp: f64,
    alpha: f64,
}

impl Profile {
    fn of(p: &ObjectParams, beta: f64) -> Option<Self> {
        let (a, b) = (p.a as f64, p.b as f64);
        let thresh = p.thresh as f64;
        if a <= 0.0 || b <= 0.0 || thresh <= 0.0 || p.npix == 0 {
            return None;
        }
        let amp = p.cflux as f64 / (2.0 * std::f64::consts::PI * a * b);
        if amp <= thresh {
            return None;
        }
        let alpha = ((amp / thresh).powf(1.0 / beta) - 1.0) * std::f64::consts::PI * a * b
            / p.npix as f64;
        Some(Self { amp, alpha })
    }

    /// Model value at `(x, y)` relative to object `p`; `amp` at its centre.
    fn at(&self, p: &ObjectParams, x: f64, y: f64, beta: f64) -> f64 {
        let (dx, dy) = (x - p.x, y - p.y);
        let r2 = p.cxx as f64 * dx * dx + p.cyy as f64 * dy * dy + p.cxy as f64 * dx * dy;
        self.amp * (1.0 + self.alpha * r2.max(0.0)).powf(-beta)
    }
}

/// Merge faint objects swamped by brighter neighbours.
pub(crate) fn clean(
    mut objects: Vec<Candidate>,
    beta: f64,
    width: usize,
    height: usize,
    gain: f64,
) -> Vec<Candidate> {
    if beta <= 0.0 || objects.len() < 2 {
        return objects;
    }
    let mut order: Vec<usize> = (0..objects.len()).collect();
    order.sort_by(|&i, &j| objects[j].params.cflux.total_cmp(&objects[i].params.cflux));

    let mut alive = vec![true; objects.len()];
    let mut eaten = 0usize;
    for (rank, &i) in order.iter().enumerate() {
        if !alive[i] {
            continue;
        }
        let bright = objects[i].params;
        let Some(profile) = Profile::of(&bright, beta) else {
            continue;
        };

        let mut absorbed = Vec::new();
        for &j in &order[rank + 1..] {
            if !alive[j] {
                continue;
            }
            let faint = &objects[j].params;
            let (dx, dy) = (faint.x - bright.x, faint.y - bright.y);
            let reach = (bright.a as f64 + faint.a as f64) * CLEAN_ZONE;
            if dx * dx + dy * dy >= reach * reach {
                continue;
            }
            if profile.at(&bright, faint.x, faint.y, beta) > faint.mthresh as f64 {
                absorbed.push(j);
            }
        }
        if absorbed.is_empty() {
            continue;
        }

        for j in absorbed {
            alive[j] = false;
            eaten += 1;
            let pixels = std::mem::take(&mut objects[j].pixels);
            objects[i].pixels.extend(pixels);
        }
        objects[i].pixels.sort_unstable_by_key(|p| (p.y, p.x));
        objects[i].params = analyse(
            &objects[i].pixels,
            width,
            height,
            gain,
            bright.thresh,
            bright.mthresh,
            bright.flag,
        );
    }

    if eaten > 0 {
        debug!("cleaning merged {eaten} objects into brighter neighbours");
    }
    objects
        .into_iter()
        .zip(alive)
        .filter_map(|(obj, keep)| keep.then_some(obj))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ObjectFlags;

    fn blob(cx: usize, cy: usize, peak: f32, r: i64) -> Candidate {
        let mut pixels = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let v = peak * (-((dx * dx + dy * dy) as f32) / 4.0).exp() + 1.0;
                pixels.push(PixelRecord {
                    x: (cx as i64 + dx) as usize,
                    y: (cy as i64 + dy) as usize,
                    value: v,
                    cvalue: v,
                    var: 0.0,
                    thresh: 1.0,
                    dthresh: 1.0,
                });
            }
        }
        let params = analyse(&pixels, 200, 200, 0.0, 1.0, 1.0, ObjectFlags::empty());
        Candidate { pixels, params }
    }

    #[test]
    fn test_faint_neighbour_is_absorbed() {
        // Inside the bright isophote, where the model exceeds the faint level
        let objects = vec![blob(50, 50, 1000.0, 6), blob(55, 50, 0.5, 1)];
        let npix: usize = objects.iter().map(|o| o.pixels.len()).sum();
        let out = clean(objects, 1.0, 200, 200, 0.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].params.npix, npix);
    }

    #[test]
    fn test_profile_peaks_at_centre() {
        let bright = blob(50, 50, 1000.0, 6).params;
        let profile = Profile::of(&bright, 1.0).unwrap();
        let centre = profile.at(&bright, bright.x, bright.y, 1.0);
        assert_eq!(centre, profile.amp);
        let near = profile.at(&bright, bright.x + 1.0, bright.y, 1.0);
        let far = profile.at(&bright, bright.x + 4.0, bright.y, 1.0);
        assert!(centre > near && near > far && far > 0.0);
    }

    #[test]
    fn test_distant_objects_survive() {
        let objects = vec![blob(30, 30, 1000.0, 6), blob(150, 150, 50.0, 3)];
        let out = clean(objects, 1.0, 200, 200, 0.0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_comparable_neighbours_survive() {
        let objects = vec![blob(50, 50, 100.0, 4), blob(62, 50, 100.0, 4)];
        let out = clean(objects, 1.0, 200, 200, 0.0);
        assert_eq!(out.len(), 2);
    }
}
