//! Multi-threshold deblending.
//!
//! An object is re-thresholded at `nthresh - 1` exponentially spaced levels
//! between its detection threshold and its peak. The pieces found at each
//! level form a tree; branches that each carry a significant share of the
//! total flux become separate objects, and the pixels left between them go
//! to the most likely branch.

use log::{debug, warn};

use crate::flags::ObjectFlags;

use super::analyse::analyse;
use super::scan::PixelRecord;

/// Deblending settings, lifted from `ExtractParams`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeblendConfig {
    pub nthresh: usize,
    pub cont: f64,
    pub minarea: usize,
    pub sub_object_limit: usize,
}

/// One object produced by deblending.
#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub pixels: Vec<PixelRecord>,
    pub mthresh: f32,
    pub flag: ObjectFlags,
}

#[derive(Debug)]
struct Node {
    /// Indices into the parent object's pixel list
    pixels: Vec<usize>,
    level: f32,
    flux: f64,
    children: Vec<usize>,
}

/// Split `pixels` (one detected object) at threshold `thresh`.
pub(crate) fn deblend(
    pixels: Vec<PixelRecord>,
    thresh: f32,
    width: usize,
    height: usize,
    cfg: &DeblendConfig,
) -> Vec<Fragment> {
    if cfg.nthresh <= 1 || cfg.cont >= 1.0 || pixels.len() < 2 * cfg.minarea.max(1) {
        return vec![Fragment {
            pixels,
            mthresh: thresh,
            flag: ObjectFlags::empty(),
        }];
    }

    let (tree, overflow) = build_tree(&pixels, thresh, cfg);
    let mut flag = ObjectFlags::empty();
    if overflow {
        warn!(
            "deblending stopped early: sub-object limit {} reached",
            cfg.sub_object_limit
        );
        flag |= ObjectFlags::DOVERFLOW;
    }

    let root_flux = tree[0].flux;
    let finals = resolve(&tree, 0, cfg.cont * root_flux);
    if finals.len() < 2 {
        return vec![Fragment {
            pixels,
            mthresh: thresh,
            flag,
        }];
    }
    debug!(
        "deblended object of {} pixels into {} components",
        pixels.len(),
        finals.len()
    );

    // Owner of every pixel; unassigned pixels go to the likeliest component
    let mut owner: Vec<Option<usize>> = vec![None; pixels.len()];
    for (k, &node) in finals.iter().enumerate() {
        for &i in &tree[node].pixels {
            owner[i] = Some(k);
        }
    }
    let shapes: Vec<_> = finals
        .iter()
        .map(|&node| {
            let own: Vec<PixelRecord> = tree[node].pixels.iter().map(|&i| pixels[i]).collect();
            analyse(&own, width, height, 0.0, thresh, tree[node].level, flag)
        })
        .collect();

    for (i, px) in pixels.iter().enumerate() {
        if owner[i].is_some() {
            continue;
        }
        let mut best = (0usize, f64::NEG_INFINITY, f64::INFINITY);
        for (k, s) in shapes.iter().enumerate() {
            let dx = px.x as f64 - s.x;
            let dy = px.y as f64 - s.y;
            let d2 = s.cxx as f64 * dx * dx + s.cyy as f64 * dy * dy + s.cxy as f64 * dx * dy;
            let ab = s.a as f64 * s.b as f64;
            let amp = if ab > 0.0 {
                s.cflux as f64 * (-0.5 * d2).exp() / (2.0 * std::f64::consts::PI * ab)
            } else {
                0.0
            };
            let better = if amp > 0.0 || best.1 > 0.0 {
                amp > best.1
            } else {
                d2 < best.2
            };
            if better {
                best = (k, amp, d2);
            }
        }
        owner[i] = Some(best.0);
    }

    let mut fragments: Vec<Fragment> = finals
        .iter()
        .map(|&node| Fragment {
            pixels: Vec::with_capacity(tree[node].pixels.len()),
            mthresh: tree[node].level,
            flag: flag | ObjectFlags::MERGED,
        })
        .collect();
    for (i, px) in pixels.into_iter().enumerate() {
        if let Some(k) = owner[i] {
            fragments[k].pixels.push(px);
        }
    }
    fragments
}

/// Threshold levels `t·(cpeak/t)^(k/n)`, or linear when `t <= 0`.
fn levels(thresh: f32, cpeak: f32, nthresh: usize) -> Vec<f32> {
    let (t, peak) = (thresh as f64, cpeak as f64);
    (1..nthresh)
        .map(|k| {
            let f = k as f64 / nthresh as f64;
            if t > 0.0 && peak > t {
                (t * (peak / t).powf(f)) as f32
            } else {
                (t + (peak - t) * f) as f32
            }
        })
        .collect()
}

/// Build the level tree. Returns the nodes (root first) and whether the
/// node budget ran out.
fn build_tree(pixels: &[PixelRecord], thresh: f32, cfg: &DeblendConfig) -> (Vec<Node>, bool) {
    let cpeak = pixels
        .iter()
        .map(|p| p.cvalue)
        .fold(f32::NEG_INFINITY, f32::max);
    let mut tree = vec![Node {
        pixels: (0..pixels.len()).collect(),
        level: thresh,
        flux: pixels.iter().map(|p| p.cvalue as f64).sum(),
        children: Vec::new(),
    }];
    let mut frontier = vec![0usize];

    for level in levels(thresh, cpeak, cfg.nthresh) {
        let mut next = Vec::new();
        for &parent in &frontier {
            let above: Vec<usize> = tree[parent]
                .pixels
                .iter()
                .copied()
                .filter(|&i| pixels[i].cvalue > level)
                .collect();
            for group in components(pixels, &above) {
                if group.len() < cfg.minarea {
                    continue;
                }
                if tree.len() >= cfg.sub_object_limit {
                    return (tree, true);
                }
                let flux = group.iter().map(|&i| pixels[i].cvalue as f64).sum();
                tree.push(Node {
                    pixels: group,
                    level,
                    flux,
                    children: Vec::new(),
                });
                let child = tree.len() - 1;
                tree[parent].children.push(child);
                next.push(child);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    (tree, false)
}

/// Final components under `node`.
fn resolve(tree: &[Node], node: usize, min_flux: f64) -> Vec<usize> {
    let significant: Vec<usize> = tree[node]
        .children
        .iter()
        .copied()
        .filter(|&c| tree[c].flux > min_flux)
        .collect();
    match significant.len() {
        0 => vec![node],
        1 => {
            let below = resolve(tree, significant[0], min_flux);
            if below.len() >= 2 {
                below
            } else {
                vec![node]
            }
        }
        _ => significant
            .into_iter()
            .flat_map(|c| resolve(tree, c, min_flux))
            .collect(),
    }
}

/// 8-connected groups among `subset`, via union-find.
///
/// Neighbours are found by binary search in the subset sorted by raster
/// position, so memory stays proportional to the subset size however sparse
/// the object is.
fn components(pixels: &[PixelRecord], subset: &[usize]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = subset.to_vec();
    order.sort_unstable_by_key(|&i| (pixels[i].y, pixels[i].x));
    let keys: Vec<(usize, usize)> = order.iter().map(|&i| (pixels[i].y, pixels[i].x)).collect();

    let mut parent: Vec<usize> = (0..order.len()).collect();
    for (k, &(y, x)) in keys.iter().enumerate() {
        // Already-visited neighbours in raster order: W, NW, N, NE
        let (west, north) = (x > 0, y > 0);
        let neighbours = [
            west.then(|| (y, x - 1)),
            (west && north).then(|| (y - 1, x - 1)),
            north.then(|| (y - 1, x)),
            north.then(|| (y - 1, x + 1)),
        ];
        for key in neighbours.into_iter().flatten() {
            if let Ok(j) = keys[..k].binary_search(&key) {
                union_labels(&mut parent, k, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root = vec![usize::MAX; order.len()];
    for (k, &i) in order.iter().enumerate() {
        let root = find_root(&mut parent, k);
        if group_of_root[root] == usize::MAX {
            group_of_root[root] = groups.len();
            groups.push(Vec::new());
        }
        groups[group_of_root[root]].push(i);
    }
    groups
}

fn find_root(parent: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parent[current] {
        parent[current] = parent[parent[current]];
        current = parent[current];
    }
    current
}

fn union_labels(parent: &mut [usize], a: usize, b: usize) {
    let ra = find_root(parent, a);
    let rb = find_root(parent, b);
    if ra < rb {
        parent[rb] = ra;
    } else if rb < ra {
        parent[ra] = rb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cfg() -> DeblendConfig {
        DeblendConfig {
            nthresh: 32,
            cont: 0.005,
            minarea: 3,
            sub_object_limit: 1024,
        }
    }

    /// Two Gaussian peaks on a shared pedestal, above threshold 1.
    fn double_peak(sep: f64, amp2: f64) -> Vec<PixelRecord> {
        let mut pixels = Vec::new();
        for y in 0..15 {
            for x in 0..30 {
                let g = |cx: f64, amp: f64| {
                    let r2 = (x as f64 - cx).powi(2) + (y as f64 - 7.0).powi(2);
                    amp * (-r2 / (2.0 * 1.5 * 1.5)).exp()
                };
                let v = (g(15.0 - sep / 2.0, 100.0) + g(15.0 + sep / 2.0, amp2) + 1.5) as f32;
                pixels.push(PixelRecord {
                    x,
                    y,
                    value: v,
                    cvalue: v,
                    var: 0.0,
                    thresh: 1.0,
                    dthresh: 1.0,
                });
            }
        }
        pixels
    }

    #[test]
    fn test_levels_geometric() {
        let l = levels(1.0, 100.0, 4);
        assert_eq!(l.len(), 3);
        assert_relative_eq!(l[1], 10.0, epsilon = 1e-4);
        let lin = levels(0.0, 8.0, 4);
        assert_relative_eq!(lin[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_two_peaks_split() {
        let pixels = double_peak(10.0, 80.0);
        let n = pixels.len();
        let out = deblend(pixels, 1.0, 100, 100, &cfg());
        assert_eq!(out.len(), 2);
        assert_eq!(out.iter().map(|f| f.pixels.len()).sum::<usize>(), n);
        for f in &out {
            assert!(f.flag.contains(ObjectFlags::MERGED));
            assert!(f.mthresh > 1.0);
        }
    }

    #[test]
    fn test_faint_companion_not_split_at_high_contrast() {
        let pixels = double_peak(10.0, 3.0);
        let mut config = cfg();
        config.cont = 0.5;
        let out = deblend(pixels, 1.0, 100, 100, &config);
        assert_eq!(out.len(), 1);
        assert!(!out[0].flag.contains(ObjectFlags::MERGED));
    }

    #[test]
    fn test_disabled_deblending() {
        let pixels = double_peak(10.0, 80.0);
        let mut config = cfg();
        config.nthresh = 1;
        assert_eq!(deblend(pixels, 1.0, 100, 100, &config).len(), 1);
    }

    #[test]
    fn test_node_budget_sets_overflow() {
        let pixels = double_peak(10.0, 80.0);
        let mut config = cfg();
        config.sub_object_limit = 2;
        let out = deblend(pixels, 1.0, 100, 100, &config);
        assert!(out.iter().all(|f| f.flag.contains(ObjectFlags::DOVERFLOW)));
    }

    #[test]
    fn test_components_eight_connected() {
        let pixels: Vec<PixelRecord> = [(0, 0), (1, 1), (3, 0), (3, 1)]
            .iter()
            .map(|&(x, y)| PixelRecord {
                x,
                y,
                value: 1.0,
                cvalue: 1.0,
                var: 0.0,
                thresh: 0.0,
                dthresh: 0.0,
            })
            .collect();
        let groups = components(&pixels, &[0, 1, 2, 3]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_components_of_sparse_diagonal() {
        // A long diagonal line spans a huge bounding box but is one group
        let n = 5000;
        let pixels: Vec<PixelRecord> = (0..n)
            .map(|k| PixelRecord {
                x: k,
                y: k,
                value: 1.0,
                cvalue: 1.0,
                var: 0.0,
                thresh: 0.0,
                dthresh: 0.0,
            })
            .collect();
        let subset: Vec<usize> = (0..n).rev().collect();
        let groups = components(&pixels, &subset);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), n);

        // Dropping every other pixel breaks the diagonal apart
        let every_other: Vec<usize> = (0..n).step_by(2).collect();
        assert_eq!(components(&pixels, &every_other).len(), n / 2);
    }
}
