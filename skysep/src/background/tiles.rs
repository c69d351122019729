//! Per-tile sky statistics and spatial filtering of the tile grid.

use log::{debug, warn};
use rayon::prelude::*;
use skymath::{median_in_place, robust_sky};

use crate::image::ImageView;

/// A tile needs at least this fraction of usable pixels to be trusted.
const MIN_GOOD_FRACTION: f64 = 0.5;

/// Sky statistics of one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TileStat {
    pub back: f32,
    pub sigma: f32,
    /// Number of image pixels covered by the (possibly clipped) tile
    pub area: usize,
    pub good: bool,
}

/// Geometry of the tile grid laid over an image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TileGrid {
    pub width: usize,
    pub height: usize,
    pub bw: usize,
    pub bh: usize,
    pub nx: usize,
    pub ny: usize,
}

impl TileGrid {
    pub fn new(width: usize, height: usize, bw: usize, bh: usize) -> Self {
        Self {
            width,
            height,
            bw,
            bh,
            nx: width.div_ceil(bw),
            ny: height.div_ceil(bh),
        }
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    /// Pixel ranges `(x0..x1, y0..y1)` of tile `t`, clipped to the image.
    fn bounds(&self, t: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let (tx, ty) = (t % self.nx, t / self.nx);
        let x0 = tx * self.bw;
        let y0 = ty * self.bh;
        (
            x0..(x0 + self.bw).min(self.width),
            y0..(y0 + self.bh).min(self.height),
        )
    }
}

/// Compute robust statistics for every tile, in parallel over tiles.
pub(crate) fn tile_statistics(image: &ImageView, grid: &TileGrid) -> Vec<TileStat> {
    (0..grid.len())
        .into_par_iter()
        .map(|t| {
            let (xs, ys) = grid.bounds(t);
            let area = xs.len() * ys.len();
            let mut samples = Vec::with_capacity(area);
            for y in ys {
                let row = y * image.width();
                for x in xs.clone() {
                    let i = row + x;
                    if !image.is_masked(i) && !image.is_invalid(i) {
                        samples.push(image.value(i) as f32);
                    }
                }
            }

            let enough = samples.len() as f64 >= MIN_GOOD_FRACTION * area as f64;
            match robust_sky(&samples) {
                Some(sky) if enough => TileStat {
                    back: sky.level as f32,
                    sigma: sky.sigma as f32,
                    area,
                    good: true,
                },
                _ => TileStat {
                    back: 0.0,
                    sigma: 0.0,
                    area,
                    good: false,
                },
            }
        })
        .collect()
}

/// Replace bad tiles by the mean of their nearest good tiles.
pub(crate) fn fill_bad_tiles(stats: &mut [TileStat], grid: &TileGrid) {
    let good: Vec<usize> = (0..stats.len()).filter(|&t| stats[t].good).collect();
    let nbad = stats.len() - good.len();
    if nbad == 0 {
        return;
    }
    if good.is_empty() {
        warn!(
            "all {} background tiles are masked or invalid; background set to zero",
            stats.len()
        );
        return;
    }
    debug!("interpolating {nbad} bad background tiles");

    let snapshot: Vec<TileStat> = stats.to_vec();
    for (t, stat) in stats.iter_mut().enumerate() {
        if stat.good {
            continue;
        }
        let (tx, ty) = ((t % grid.nx) as i64, (t / grid.nx) as i64);
        let mut best = i64::MAX;
        let (mut back, mut sigma, mut count) = (0.0_f64, 0.0_f64, 0usize);
        for &g in &good {
            let (gx, gy) = ((g % grid.nx) as i64, (g / grid.nx) as i64);
            let d = (gx - tx).pow(2) + (gy - ty).pow(2);
            if d < best {
                best = d;
                back = 0.0;
                sigma = 0.0;
                count = 0;
            }
            if d == best {
                back += snapshot[g].back as f64;
                sigma += snapshot[g].sigma as f64;
                count += 1;
            }
        }
        stat.back = (back / count as f64) as f32;
        stat.sigma = (sigma / count as f64) as f32;
    }
}

/// Median-filter the tile grid over a `fw × fh` window.
///
/// With `fthresh > 0` a node only takes its filtered value when it differs
/// from the raw one by no more than `fthresh`; larger departures are kept as
/// genuine structure. Sigma follows the same decision as the background.
pub(crate) fn median_filter(
    back: &mut [f32],
    sigma: &mut [f32],
    grid: &TileGrid,
    fw: usize,
    fh: usize,
    fthresh: f64,
) {
    if fw <= 1 && fh <= 1 {
        return;
    }
    let (hw, hh) = ((fw / 2) as i64, (fh / 2) as i64);
    let (nx, ny) = (grid.nx as i64, grid.ny as i64);
    let raw_back = back.to_vec();
    let raw_sigma = sigma.to_vec();
    let mut bwin = Vec::with_capacity(fw * fh);
    let mut swin = Vec::with_capacity(fw * fh);

    for iy in 0..ny {
        for ix in 0..nx {
            bwin.clear();
            swin.clear();
            for py in (iy - hh).max(0)..=(iy + hh).min(ny - 1) {
                for px in (ix - hw).max(0)..=(ix + hw).min(nx - 1) {
                    let j = (py * nx + px) as usize;
                    bwin.push(raw_back[j]);
                    swin.push(raw_sigma[j]);
                }
            }
            let i = (iy * nx + ix) as usize;
            let med = median_in_place(&mut bwin);
            if fthresh > 0.0 && ((med - raw_back[i]) as f64).abs() > fthresh {
                continue;
            }
            back[i] = med;
            sigma[i] = median_in_place(&mut swin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(back: f32, good: bool) -> TileStat {
        TileStat {
            back,
            sigma: back / 10.0,
            area: 4,
            good,
        }
    }

    #[test]
    fn test_grid_counts_partial_tiles() {
        let grid = TileGrid::new(10, 7, 4, 4);
        assert_eq!((grid.nx, grid.ny), (3, 2));
        let (xs, ys) = grid.bounds(5);
        assert_eq!(xs, 8..10);
        assert_eq!(ys, 4..7);
    }

    #[test]
    fn test_fill_bad_tiles_uses_nearest() {
        let grid = TileGrid::new(12, 4, 4, 4);
        let mut stats = vec![stat(1.0, true), stat(0.0, false), stat(3.0, true)];
        fill_bad_tiles(&mut stats, &grid);
        // Equidistant neighbours are averaged
        assert_eq!(stats[1].back, 2.0);
        assert!(!stats[1].good);
    }

    #[test]
    fn test_median_filter_removes_spike() {
        let grid = TileGrid::new(12, 12, 4, 4);
        let mut back = vec![1.0_f32; 9];
        back[4] = 50.0;
        let mut sigma = vec![0.5_f32; 9];
        median_filter(&mut back, &mut sigma, &grid, 3, 3, 0.0);
        assert_eq!(back[4], 1.0);
    }

    #[test]
    fn test_median_filter_threshold_smooths_small_differences() {
        let grid = TileGrid::new(12, 12, 4, 4);
        let mut back = vec![1.0_f32; 9];
        back[4] = 1.2;
        let mut sigma = vec![0.5_f32; 9];
        sigma[4] = 0.9;
        median_filter(&mut back, &mut sigma, &grid, 3, 3, 0.5);
        assert_eq!(back[4], 1.0);
        assert_eq!(sigma[4], 0.5);
    }

    #[test]
    fn test_median_filter_threshold_keeps_large_differences() {
        let grid = TileGrid::new(12, 12, 4, 4);
        let mut back = vec![1.0_f32; 9];
        back[4] = 5.0;
        let mut sigma = vec![0.5_f32; 9];
        sigma[4] = 0.9;
        median_filter(&mut back, &mut sigma, &grid, 3, 3, 0.5);
        assert_eq!(back[4], 5.0);
        assert_eq!(sigma[4], 0.9);

        // a difference of exactly fthresh is still smoothed
        back[4] = 1.5;
        median_filter(&mut back, &mut sigma, &grid, 3, 3, 0.5);
        assert_eq!(back[4], 1.0);
        assert_eq!(sigma[4], 0.5);
    }
}
