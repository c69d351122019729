//! Spatially varying sky background and noise model.
//!
//! The image is cut into `bw × bh` tiles. Each tile gets a robust sky level
//! and σ (see [`skymath::robust_sky`]); tiles without enough usable pixels are
//! filled from their nearest good neighbours, then the grid of tile values is
//! median filtered. Full-resolution maps are a bicubic spline through the
//! tile nodes.

mod tiles;

use log::debug;
use ndarray::Array2;
use num_traits::{Bounded, NumCast, ToPrimitive};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use skymath::spline::{evaluate, evaluate_segment, natural_second_derivatives, segment};

use crate::error::{Result, SepError};
use crate::image::{saturating_cast, ImageView};
use tiles::{fill_bad_tiles, median_filter, tile_statistics, TileGrid};

/// Tile and filter sizes for background estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundParams {
    /// Tile width in pixels
    pub bw: usize,
    /// Tile height in pixels
    pub bh: usize,
    /// Median filter width in tiles
    pub fw: usize,
    /// Median filter height in tiles
    pub fh: usize,
    /// Largest difference for which a node takes its filtered value (0 = always)
    pub fthresh: f64,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            bw: 64,
            bh: 64,
            fw: 3,
            fh: 3,
            fthresh: 0.0,
        }
    }
}

/// Which map to evaluate along a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Map {
    Back,
    Rms,
}

/// Background model of one image.
///
/// Independent of the image after construction.
#[derive(Debug, Clone)]
pub struct Background {
    grid: TileGrid,
    global: f32,
    global_rms: f32,
    back: Vec<f32>,
    dback: Vec<f32>,
    sigma: Vec<f32>,
    dsigma: Vec<f32>,
}

impl Background {
    /// Estimate the background of `image`.
    ///
    /// Honours the image mask and skips NaN or very negative pixels.
    pub fn new(image: &ImageView, params: &BackgroundParams) -> Result<Self> {
        let BackgroundParams {
            bw,
            bh,
            fw,
            fh,
            fthresh,
        } = *params;
        if bw == 0 || bh == 0 {
            return Err(SepError::IllegalTileSize { bw, bh });
        }
        if fw == 0 || fh == 0 {
            return Err(SepError::IllegalFilterSize { fw, fh });
        }
        if image.pixel_count() == 0 {
            return Err(SepError::EmptyImage {
                what: "estimate the background of",
            });
        }

        let grid = TileGrid::new(image.width(), image.height(), bw, bh);
        debug!(
            "background: {}x{} image, {}x{} tiles of {}x{}",
            image.width(),
            image.height(),
            grid.nx,
            grid.ny,
            bw,
            bh
        );

        let mut stats = tile_statistics(image, &grid);
        fill_bad_tiles(&mut stats, &grid);

        let n = grid.len();
        let mut back = Vec::new();
        back.try_reserve_exact(n)
            .map_err(|e| SepError::alloc("background nodes", e))?;
        let mut sigma = Vec::new();
        sigma
            .try_reserve_exact(n)
            .map_err(|e| SepError::alloc("background nodes", e))?;
        back.extend(stats.iter().map(|s| s.back));
        sigma.extend(stats.iter().map(|s| s.sigma));

        median_filter(&mut back, &mut sigma, &grid, fw, fh, fthresh);

        // Global values are weighted by the number of pixels in each tile
        let total_area: usize = stats.iter().map(|s| s.area).sum();
        let weighted = |nodes: &[f32]| -> f32 {
            let sum: f64 = nodes
                .iter()
                .zip(&stats)
                .map(|(&v, s)| v as f64 * s.area as f64)
                .sum();
            (sum / total_area as f64) as f32
        };
        let global = weighted(&back);
        let global_rms = weighted(&sigma);

        let dback = column_derivatives(&back, &grid);
        let dsigma = column_derivatives(&sigma, &grid);

        debug!("background: global {global}, global rms {global_rms}");
        Ok(Self {
            grid,
            global,
            global_rms,
            back,
            dback,
            sigma,
            dsigma,
        })
    }

    /// Area-weighted mean background level.
    pub fn global(&self) -> f32 {
        self.global
    }

    /// Area-weighted mean background noise.
    pub fn global_rms(&self) -> f32 {
        self.global_rms
    }

    pub fn width(&self) -> usize {
        self.grid.width
    }

    pub fn height(&self) -> usize {
        self.grid.height
    }

    /// Number of tiles along x and y.
    pub fn tile_counts(&self) -> (usize, usize) {
        (self.grid.nx, self.grid.ny)
    }

    /// Background at `(x, y)` by bilinear interpolation between tile nodes.
    ///
    /// Coordinates outside the node grid are clamped to the edge nodes.
    pub fn pix(&self, x: usize, y: usize) -> f32 {
        let TileGrid { nx, ny, bw, bh, .. } = self.grid;
        let node = |coord: usize, size: usize, count: usize| -> (usize, usize, f32) {
            let t = (coord as f32 / size as f32 - 0.5).max(0.0);
            let i = (t as usize).min(count - 1);
            let j = (i + 1).min(count - 1);
            let frac = if i == j { 0.0 } else { t - i as f32 };
            (i, j, frac)
        };
        let (x0, x1, fx) = node(x, bw, nx);
        let (y0, y1, fy) = node(y, bh, ny);
        let at = |ix: usize, iy: usize| self.back[iy * nx + ix];
        (1.0 - fx) * (1.0 - fy) * at(x0, y0)
            + fx * (1.0 - fy) * at(x1, y0)
            + (1.0 - fx) * fy * at(x0, y1)
            + fx * fy * at(x1, y1)
    }

    /// Evaluate the background along line `y` into `line`.
    pub fn back_line<T: NumCast + Bounded + Copy + Send>(&self, y: usize, line: &mut [T]) -> Result<()> {
        self.check_line(y, line.len())?;
        let values = self.evaluate_line(Map::Back, y);
        for (out, v) in line.iter_mut().zip(values) {
            *out = saturating_cast(v as f64);
        }
        Ok(())
    }

    /// Evaluate the background noise along line `y` into `line`.
    pub fn rms_line<T: NumCast + Bounded + Copy + Send>(&self, y: usize, line: &mut [T]) -> Result<()> {
        self.check_line(y, line.len())?;
        let values = self.evaluate_line(Map::Rms, y);
        for (out, v) in line.iter_mut().zip(values) {
            *out = saturating_cast(v as f64);
        }
        Ok(())
    }

    /// Subtract the background from line `y` of `line` in place.
    pub fn sub_line<T: NumCast + Bounded + Copy + Send>(&self, y: usize, line: &mut [T]) -> Result<()> {
        self.check_line(y, line.len())?;
        let values = self.evaluate_line(Map::Back, y);
        for (out, v) in line.iter_mut().zip(values) {
            *out = saturating_cast(out.to_f64().unwrap_or(f64::NAN) - v as f64);
        }
        Ok(())
    }

    /// Evaluate the full background map into `array` (row-major).
    pub fn back_array<T: NumCast + Bounded + Copy + Send>(&self, array: &mut [T]) -> Result<()> {
        self.fill_array(array, |y, row| self.back_line(y, row))
    }

    /// Evaluate the full noise map into `array` (row-major).
    pub fn rms_array<T: NumCast + Bounded + Copy + Send>(&self, array: &mut [T]) -> Result<()> {
        self.fill_array(array, |y, row| self.rms_line(y, row))
    }

    /// Subtract the background from the full image in `array` (row-major).
    pub fn sub_array<T: NumCast + Bounded + Copy + Send>(&self, array: &mut [T]) -> Result<()> {
        self.fill_array(array, |y, row| self.sub_line(y, row))
    }

    /// Background map as an owned `(height, width)` array.
    pub fn back_image(&self) -> Array2<f32> {
        let mut out = Array2::zeros((self.grid.height, self.grid.width));
        self.fill_ndarray(&mut out, Map::Back);
        out
    }

    /// Noise map as an owned `(height, width)` array.
    pub fn rms_image(&self) -> Array2<f32> {
        let mut out = Array2::zeros((self.grid.height, self.grid.width));
        self.fill_ndarray(&mut out, Map::Rms);
        out
    }

    fn fill_ndarray(&self, out: &mut Array2<f32>, map: Map) {
        out.outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(y, mut row)| {
                for (o, v) in row.iter_mut().zip(self.evaluate_line(map, y)) {
                    *o = v;
                }
            });
    }

    fn fill_array<T, F>(&self, array: &mut [T], op: F) -> Result<()>
    where
        T: NumCast + Bounded + Copy + Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync,
    {
        let expected = self.grid.width * self.grid.height;
        if array.len() != expected {
            return Err(SepError::DimensionMismatch {
                what: "background array",
                expected,
                actual: array.len(),
            });
        }
        array
            .par_chunks_mut(self.grid.width)
            .enumerate()
            .try_for_each(|(y, row)| op(y, row))
    }

    fn check_line(&self, y: usize, len: usize) -> Result<()> {
        if y >= self.grid.height {
            return Err(SepError::LineOutOfRange {
                y,
                height: self.grid.height,
            });
        }
        if len != self.grid.width {
            return Err(SepError::DimensionMismatch {
                what: "line buffer",
                expected: self.grid.width,
                actual: len,
            });
        }
        Ok(())
    }

    /// Spline-interpolated values of `map` along image line `y`.
    fn evaluate_line(&self, map: Map, y: usize) -> Vec<f32> {
        let TileGrid {
            nx, ny, bw, bh, width, ..
        } = self.grid;
        let (nodes, d2) = match map {
            Map::Back => (&self.back, &self.dback),
            Map::Rms => (&self.sigma, &self.dsigma),
        };

        // Interpolate each node column at this y
        let row: Vec<f32> = if ny > 1 {
            let (iy, dt) = segment(y as f32 / bh as f32 - 0.5, ny);
            (0..nx)
                .map(|ix| {
                    let (a, b) = (iy * nx + ix, (iy + 1) * nx + ix);
                    evaluate_segment(nodes[a], nodes[b], d2[a], d2[b], dt)
                })
                .collect()
        } else {
            nodes[..nx].to_vec()
        };

        if nx == 1 {
            return vec![row[0]; width];
        }
        let d2x = natural_second_derivatives(&row);
        (0..width)
            .map(|x| evaluate(&row, &d2x, x as f32 / bw as f32 - 0.5))
            .collect()
    }
}

/// Second derivatives of every node column, laid out like the nodes.
fn column_derivatives(nodes: &[f32], grid: &TileGrid) -> Vec<f32> {
    let (nx, ny) = (grid.nx, grid.ny);
    let mut out = vec![0.0_f32; nodes.len()];
    if ny < 3 {
        return out;
    }
    for ix in 0..nx {
        let column: Vec<f32> = (0..ny).map(|iy| nodes[iy * nx + ix]).collect();
        for (iy, d) in natural_second_derivatives(&column).into_iter().enumerate() {
            out[iy * nx + ix] = d;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(bw: usize, bh: usize, fw: usize, fh: usize) -> BackgroundParams {
        BackgroundParams {
            bw,
            bh,
            fw,
            fh,
            fthresh: 0.0,
        }
    }

    #[test]
    fn test_constant_image() {
        let data = vec![0.1_f32; 64 * 48];
        let image = ImageView::new(&data, 64, 48).unwrap();
        let bkg = Background::new(&image, &params(16, 16, 3, 3)).unwrap();
        assert_relative_eq!(bkg.global(), 0.1, epsilon = 1e-6);
        assert_eq!(bkg.global_rms(), 0.0);
        assert_eq!(bkg.tile_counts(), (4, 3));

        let mut line = vec![0.0_f64; 64];
        bkg.back_line(10, &mut line).unwrap();
        for v in line {
            assert_relative_eq!(v, 0.1, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let data = vec![0.0_f32; 16];
        let image = ImageView::new(&data, 4, 4).unwrap();
        assert_eq!(
            Background::new(&image, &params(0, 4, 1, 1)).unwrap_err(),
            SepError::IllegalTileSize { bw: 0, bh: 4 }
        );
        assert_eq!(
            Background::new(&image, &params(4, 4, 1, 0)).unwrap_err(),
            SepError::IllegalFilterSize { fw: 1, fh: 0 }
        );

        let empty: Vec<f32> = Vec::new();
        let image = ImageView::new(&empty, 0, 0).unwrap();
        let err = Background::new(&image, &params(4, 4, 1, 1)).unwrap_err();
        assert_eq!(err.status(), crate::error::EMPTY_IMAGE);
    }

    #[test]
    fn test_masked_pixels_are_ignored() {
        let mut data = vec![0.1_f32; 36];
        let mut mask = vec![0u8; 36];
        for i in [3, 7, 8, 20] {
            data[i] = 100.0;
            mask[i] = 1;
        }
        let image = ImageView::new(&data, 6, 6)
            .unwrap()
            .with_mask(&mask, 0.0)
            .unwrap();
        let bkg = Background::new(&image, &params(3, 3, 1, 1)).unwrap();
        assert_relative_eq!(bkg.global(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_fully_masked_tile_is_filled() {
        let data = vec![2.0_f32; 8 * 4];
        let mut mask = vec![0u8; 8 * 4];
        for y in 0..4 {
            for x in 4..8 {
                mask[y * 8 + x] = 1;
            }
        }
        let image = ImageView::new(&data, 8, 4)
            .unwrap()
            .with_mask(&mask, 0.0)
            .unwrap();
        let bkg = Background::new(&image, &params(4, 4, 1, 1)).unwrap();
        assert_relative_eq!(bkg.pix(6, 2), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_line_buffer_checks() {
        let data = vec![1.0_f32; 20];
        let image = ImageView::new(&data, 5, 4).unwrap();
        let bkg = Background::new(&image, &params(2, 2, 1, 1)).unwrap();
        let mut short = vec![0.0_f32; 4];
        assert!(matches!(
            bkg.back_line(0, &mut short),
            Err(SepError::DimensionMismatch { .. })
        ));
        let mut line = vec![0.0_f32; 5];
        assert_eq!(
            bkg.rms_line(4, &mut line).unwrap_err(),
            SepError::LineOutOfRange { y: 4, height: 4 }
        );
    }

    #[test]
    fn test_sub_array_integer_output() {
        let data = vec![10_i32; 16];
        let image = ImageView::new(&data, 4, 4).unwrap();
        let bkg = Background::new(&image, &params(2, 2, 1, 1)).unwrap();
        let mut out = data.clone();
        bkg.sub_array(&mut out).unwrap();
        assert!(out.iter().all(|&v| v == 0));

        // u8 output clamps below zero instead of wrapping
        let mut bytes = vec![5_u8; 16];
        bkg.sub_array(&mut bytes).unwrap();
        assert!(bytes.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_back_image_matches_lines() {
        let data: Vec<f32> = (0..32 * 32).map(|i| (i % 32) as f32 * 0.1).collect();
        let image = ImageView::new(&data, 32, 32).unwrap();
        let bkg = Background::new(&image, &params(8, 8, 1, 1)).unwrap();
        let map = bkg.back_image();
        let mut line = vec![0.0_f32; 32];
        bkg.back_line(17, &mut line).unwrap();
        for (x, v) in line.iter().enumerate() {
            assert_eq!(map[[17, x]], *v);
        }
    }
}
