//! Detection filtering over a rolling buffer of image rows.
//!
//! Only `kernel.height()` input rows are held at any time. Each filtered row
//! carries the detection value and the detection threshold of every pixel, so
//! the scanner can compare the two without knowing which filter ran.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SepError};
use crate::image::ImageView;

/// Convolution kernel, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Kernel {
    pub fn new(data: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SepError::IllegalExtractParams(format!(
                "kernel size {width}x{height} must be positive"
            )));
        }
        if data.len() != width * height {
            return Err(SepError::DimensionMismatch {
                what: "kernel",
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Kernel scaled to unit sum. Zero-sum kernels are returned unchanged.
    fn normalized(&self) -> Vec<f32> {
        let sum: f32 = self.data.iter().sum();
        if sum == 0.0 {
            return self.data.clone();
        }
        self.data.iter().map(|&k| k / sum).collect()
    }
}

impl Default for Kernel {
    /// The 3×3 pyramid `[1 2 1; 2 4 2; 1 2 1]`.
    fn default() -> Self {
        Self {
            width: 3,
            height: 3,
            data: vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0],
        }
    }
}

/// Per-pixel detection threshold in data units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PixelThreshold {
    pub thresh: f32,
    /// Scale `thresh` by the local noise σ
    pub relative: bool,
}

/// One buffered input row.
#[derive(Debug, Clone, Default)]
pub(crate) struct InputRow {
    /// Pixel values; masked and invalid pixels read as 0
    pub data: Vec<f32>,
    /// Noise variance, 0 when unknown
    pub var: Vec<f32>,
    /// Data-unit detection threshold
    pub thresh: Vec<f32>,
    pub masked: Vec<bool>,
}

impl InputRow {
    fn with_width(width: usize) -> Result<Self> {
        let mut row = Self::default();
        for buf in [&mut row.data, &mut row.var, &mut row.thresh] {
            buf.try_reserve_exact(width)
                .map_err(|e| SepError::alloc("line buffer", e))?;
            buf.resize(width, 0.0);
        }
        row.masked
            .try_reserve_exact(width)
            .map_err(|e| SepError::alloc("line buffer", e))?;
        row.masked.resize(width, false);
        Ok(row)
    }

    fn read(&mut self, image: &ImageView, y: usize, threshold: PixelThreshold) {
        let width = image.width();
        let noise = image.noise();
        for x in 0..width {
            let i = y * width + x;
            let unusable = image.is_masked(i) || image.is_invalid(i);
            self.masked[x] = unusable;
            self.data[x] = if unusable { 0.0 } else { image.value(i) as f32 };
            self.var[x] = if unusable {
                0.0
            } else {
                noise.variance(i) as f32
            };
            self.thresh[x] = if threshold.relative {
                threshold.thresh * noise.stddev(i) as f32
            } else {
                threshold.thresh
            };
        }
    }
}

/// Filter applied before thresholding.
#[derive(Debug, Clone)]
pub(crate) enum DetectFilter {
    Plain,
    Conv(Vec<f32>),
    /// Matched filter; pixels are compared against this S/N threshold
    Matched(Vec<f32>, f32),
}

/// Rolling window of input rows with filtered output.
pub(crate) struct LineFilter<'i, 'a> {
    image: &'i ImageView<'a>,
    threshold: PixelThreshold,
    filter: DetectFilter,
    kw: usize,
    kh: usize,
    /// Threshold map follows the noise and must be filtered too
    varying_thresh: bool,
    rows: VecDeque<InputRow>,
    /// Image row held at the front of `rows`
    first: usize,
}

impl<'i, 'a> LineFilter<'i, 'a> {
    pub fn new(
        image: &'i ImageView<'a>,
        kernel: Option<&Kernel>,
        matched: bool,
        threshold: PixelThreshold,
        snr_thresh: f32,
    ) -> Result<Self> {
        let (filter, kw, kh) = match kernel {
            None => (DetectFilter::Plain, 1, 1),
            Some(k) if matched => (
                DetectFilter::Matched(k.data().to_vec(), snr_thresh),
                k.width(),
                k.height(),
            ),
            Some(k) => (DetectFilter::Conv(k.normalized()), k.width(), k.height()),
        };
        let varying_thresh =
            threshold.relative && matches!(image.noise(), crate::image::Noise::Array { .. });

        let capacity = kh.min(image.height().max(1));
        let mut rows = VecDeque::new();
        rows.try_reserve_exact(capacity)
            .map_err(|e| SepError::alloc("line buffer", e))?;
        Ok(Self {
            image,
            threshold,
            filter,
            kw,
            kh,
            varying_thresh,
            rows,
            first: 0,
        })
    }

    /// Buffered input row `y`.
    pub fn row(&self, y: usize) -> Result<&InputRow> {
        y.checked_sub(self.first)
            .and_then(|k| self.rows.get(k))
            .ok_or(SepError::LineOutOfRange {
                y,
                height: self.image.height(),
            })
    }

    /// Make sure every row the kernel needs around `y` is buffered.
    fn advance_to(&mut self, y: usize) -> Result<()> {
        let height = self.image.height();
        let last = (y + self.kh / 2).min(height - 1);
        while self.first + self.rows.len() <= last {
            let next = self.first + self.rows.len();
            let mut row = if self.rows.len() == self.kh {
                self.first += 1;
                self.rows.pop_front().unwrap_or_default()
            } else {
                InputRow::with_width(self.image.width())?
            };
            row.read(self.image, next, self.threshold);
            self.rows.push_back(row);
        }
        Ok(())
    }

    /// Filter image row `y` into `value` and `thresh`.
    ///
    /// Rows must be requested in increasing order.
    pub fn filter_row(&mut self, y: usize, value: &mut [f32], thresh: &mut [f32]) -> Result<()> {
        self.advance_to(y)?;
        let width = self.image.width();
        let height = self.image.height() as i64;
        let (hw, hh) = ((self.kw / 2) as i64, (self.kh / 2) as i64);

        // Kernel taps that fall inside the image, as (kernel index, row, dx)
        let mut taps = Vec::with_capacity(self.kw * self.kh);
        for ky in 0..self.kh as i64 {
            let iy = y as i64 + ky - hh;
            if iy < 0 || iy >= height {
                continue;
            }
            let row = self.row(iy as usize)?;
            for kx in 0..self.kw as i64 {
                taps.push(((ky * self.kw as i64 + kx) as usize, row, kx - hw));
            }
        }

        let center = self.row(y)?;
        for x in 0..width {
            let xi = x as i64;
            match &self.filter {
                DetectFilter::Plain => {
                    value[x] = center.data[x];
                    thresh[x] = center.thresh[x];
                }
                DetectFilter::Conv(k) => {
                    let (mut sum, mut tsum) = (0.0_f32, 0.0_f32);
                    for &(ki, row, dx) in &taps {
                        let px = xi + dx;
                        if px < 0 || px >= width as i64 {
                            continue;
                        }
                        sum += k[ki] * row.data[px as usize];
                        tsum += k[ki] * row.thresh[px as usize];
                    }
                    value[x] = sum;
                    thresh[x] = if self.varying_thresh {
                        tsum
                    } else {
                        center.thresh[x]
                    };
                }
                DetectFilter::Matched(k, snr) => {
                    let (mut num, mut den) = (0.0_f64, 0.0_f64);
                    for &(ki, row, dx) in &taps {
                        let px = xi + dx;
                        if px < 0 || px >= width as i64 {
                            continue;
                        }
                        let var = row.var[px as usize] as f64;
                        if var <= 0.0 {
                            continue;
                        }
                        let kv = k[ki] as f64;
                        num += kv * row.data[px as usize] as f64 / var;
                        den += kv * kv / var;
                    }
                    value[x] = if den > 0.0 {
                        (num / den.sqrt()) as f32
                    } else {
                        0.0
                    };
                    thresh[x] = *snr;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Noise, NoiseKind};
    use approx::assert_relative_eq;

    const ABS: PixelThreshold = PixelThreshold {
        thresh: 1.0,
        relative: false,
    };

    #[test]
    fn test_kernel_validation() {
        assert!(Kernel::new(vec![1.0; 4], 2, 3).is_err());
        assert!(Kernel::new(vec![], 0, 3).is_err());
        let k = Kernel::default().normalized();
        assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(k[4], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_plain_filter_passes_data_through() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let image = ImageView::new(&data, 4, 3).unwrap();
        let mut filter = LineFilter::new(&image, None, false, ABS, 0.0).unwrap();
        let (mut v, mut t) = (vec![0.0; 4], vec![0.0; 4]);
        filter.filter_row(1, &mut v, &mut t).unwrap();
        assert_eq!(v, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(t, vec![1.0; 4]);
    }

    #[test]
    fn test_convolution_preserves_flat_interior() {
        let data = vec![2.0_f32; 25];
        let image = ImageView::new(&data, 5, 5).unwrap();
        let kernel = Kernel::default();
        let mut filter = LineFilter::new(&image, Some(&kernel), false, ABS, 0.0).unwrap();
        let (mut v, mut t) = (vec![0.0; 5], vec![0.0; 5]);
        for y in 0..5 {
            filter.filter_row(y, &mut v, &mut t).unwrap();
            if y == 2 {
                assert_relative_eq!(v[2], 2.0, epsilon = 1e-6);
                // Corner taps outside the image are dropped
                assert!(v[0] < 2.0);
            }
        }
        assert!(filter.rows.len() <= kernel.height());
        assert!(filter.row(0).is_err());
    }

    #[test]
    fn test_matched_filter_signal_to_noise() {
        // Single bright pixel with unit variance: S/N of the centre tap
        let mut data = vec![0.0_f32; 9];
        data[4] = 3.0;
        let image = ImageView::new(&data, 3, 3)
            .unwrap()
            .with_noise(Noise::Scalar {
                value: 1.0,
                kind: NoiseKind::Variance,
            })
            .unwrap();
        let kernel = Kernel::new(vec![1.0], 1, 1).unwrap();
        let mut filter = LineFilter::new(&image, Some(&kernel), true, ABS, 1.5).unwrap();
        let (mut v, mut t) = (vec![0.0; 3], vec![0.0; 3]);
        filter.filter_row(1, &mut v, &mut t).unwrap();
        assert_relative_eq!(v[1], 3.0, epsilon = 1e-6);
        assert_eq!(t[1], 1.5);
    }

    #[test]
    fn test_masked_pixels_read_as_zero() {
        let data = vec![5.0_f32; 4];
        let mask = vec![0u8, 1, 0, 0];
        let image = ImageView::new(&data, 2, 2)
            .unwrap()
            .with_mask(&mask, 0.0)
            .unwrap();
        let mut filter = LineFilter::new(&image, None, false, ABS, 0.0).unwrap();
        let (mut v, mut t) = (vec![0.0; 2], vec![0.0; 2]);
        filter.filter_row(0, &mut v, &mut t).unwrap();
        assert_eq!(v, vec![5.0, 0.0]);
        assert!(filter.row(0).unwrap().masked[1]);
    }
}
