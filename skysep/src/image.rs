//! Non-owning image views over typed pixel buffers.
//!
//! An [`ImageView`] bundles the data array with its optional companions: a
//! noise array (or a scalar noise value), a mask with its threshold, and a
//! segmentation map. All buffers are borrowed; the view is cheap to build per
//! call.
//!
//! # Supported element types
//!
//! Input buffers are wrapped in [`PixelData`], a sum type over `u8`, `i32`,
//! `f32` and `f64` slices. Every algorithm reads through the single conversion
//! point [`PixelData::get`], so no algorithm is duplicated per type. Output
//! buffers (background lines and arrays) are generic over any
//! `num_traits::NumCast` type and saturate at its bounds.
//!
//! # Coordinate System
//! - Pixels are stored row-major: index `y * width + x`
//! - Pixel `(x, y)` covers `[x - 0.5, x + 0.5] × [y - 0.5, y + 0.5]`

use std::collections::BTreeMap;

use ndarray::ArrayView2;
use num_traits::{Bounded, NumCast};

use crate::error::{Result, SepError};

/// Pixels at or below `-BIG` are treated as invalid.
pub(crate) const BIG: f64 = 1e30;

/// Convert `value` to an output element type, clamping values outside the
/// type's range (and NaN for integer types) to its bounds.
#[inline]
pub(crate) fn saturating_cast<T: NumCast + Bounded>(value: f64) -> T {
    num_traits::cast(value).unwrap_or_else(|| {
        if value > 0.0 {
            T::max_value()
        } else {
            T::min_value()
        }
    })
}

/// Borrowed pixel buffer of one of the supported element types.
#[derive(Debug, Clone, Copy)]
pub enum PixelData<'a> {
    U8(&'a [u8]),
    I32(&'a [i32]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl<'a> PixelData<'a> {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(d) => d.len(),
            PixelData::I32(d) => d.len(),
            PixelData::F32(d) => d.len(),
            PixelData::F64(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at linear index `i`, converted to f64.
    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        match self {
            PixelData::U8(d) => d[i] as f64,
            PixelData::I32(d) => d[i] as f64,
            PixelData::F32(d) => d[i] as f64,
            PixelData::F64(d) => d[i],
        }
    }

    /// Copy `out.len()` values starting at `start` into `out` as f32.
    pub fn read_into(&self, start: usize, out: &mut [f32]) {
        let end = start + out.len();
        match self {
            PixelData::U8(d) => out
                .iter_mut()
                .zip(&d[start..end])
                .for_each(|(o, &v)| *o = v as f32),
            PixelData::I32(d) => out
                .iter_mut()
                .zip(&d[start..end])
                .for_each(|(o, &v)| *o = v as f32),
            PixelData::F32(d) => out.copy_from_slice(&d[start..end]),
            PixelData::F64(d) => out
                .iter_mut()
                .zip(&d[start..end])
                .for_each(|(o, &v)| *o = v as f32),
        }
    }

    /// Short name of the element type, for diagnostics.
    pub fn dtype(&self) -> &'static str {
        match self {
            PixelData::U8(_) => "u8",
            PixelData::I32(_) => "i32",
            PixelData::F32(_) => "f32",
            PixelData::F64(_) => "f64",
        }
    }
}

macro_rules! impl_from_slice {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl<'a> From<&'a [$t]> for PixelData<'a> {
                fn from(data: &'a [$t]) -> Self {
                    PixelData::$variant(data)
                }
            }

            impl<'a> From<&'a Vec<$t>> for PixelData<'a> {
                fn from(data: &'a Vec<$t>) -> Self {
                    PixelData::$variant(data.as_slice())
                }
            }
        )*
    };
}

impl_from_slice!(u8 => U8, i32 => I32, f32 => F32, f64 => F64);

/// Interpretation of a noise value or array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// 1-σ standard deviation
    StdDev,
    /// Variance (σ²)
    Variance,
}

/// Per-image noise description.
#[derive(Debug, Clone, Copy, Default)]
pub enum Noise<'a> {
    /// No noise information
    #[default]
    None,
    /// A single value valid for every pixel
    Scalar { value: f64, kind: NoiseKind },
    /// A per-pixel array with the same shape as the data
    Array { data: PixelData<'a>, kind: NoiseKind },
}

impl Noise<'_> {
    pub fn is_none(&self) -> bool {
        matches!(self, Noise::None)
    }

    /// Variance at pixel `i`, or 0 when no noise is known.
    #[inline]
    pub fn variance(&self, i: usize) -> f64 {
        match *self {
            Noise::None => 0.0,
            Noise::Scalar { value, kind } => to_variance(value, kind),
            Noise::Array { data, kind } => to_variance(data.get(i), kind),
        }
    }

    /// Standard deviation at pixel `i`, or 0 when no noise is known.
    #[inline]
    pub fn stddev(&self, i: usize) -> f64 {
        match *self {
            Noise::None => 0.0,
            Noise::Scalar { value, kind } => to_stddev(value, kind),
            Noise::Array { data, kind } => to_stddev(data.get(i), kind),
        }
    }
}

#[inline]
fn to_variance(value: f64, kind: NoiseKind) -> f64 {
    match kind {
        NoiseKind::StdDev => value * value,
        NoiseKind::Variance => value,
    }
}

#[inline]
fn to_stddev(value: f64, kind: NoiseKind) -> f64 {
    match kind {
        NoiseKind::StdDev => value,
        NoiseKind::Variance => value.max(0.0).sqrt(),
    }
}

/// Segmentation map with its precomputed id census.
#[derive(Debug, Clone)]
pub struct Segmentation<'a> {
    data: PixelData<'a>,
    ids: Vec<i64>,
    counts: Vec<i64>,
}

impl<'a> Segmentation<'a> {
    /// Wrap a segmentation buffer and count the pixels of each non-zero id.
    pub fn new(data: impl Into<PixelData<'a>>) -> Self {
        let data = data.into();
        let mut census: BTreeMap<i64, i64> = BTreeMap::new();
        for i in 0..data.len() {
            let id = data.get(i) as i64;
            if id != 0 {
                *census.entry(id).or_insert(0) += 1;
            }
        }
        let (ids, counts) = census.into_iter().unzip();
        Self { data, ids, counts }
    }

    /// Segment id at pixel `i` (0 is sky).
    #[inline]
    pub fn id(&self, i: usize) -> i64 {
        self.data.get(i) as i64
    }

    /// Unique non-zero ids, ascending.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Pixel counts matching [`Segmentation::ids`].
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Image data plus optional noise, mask and segmentation overlays.
#[derive(Debug, Clone)]
pub struct ImageView<'a> {
    width: usize,
    height: usize,
    data: PixelData<'a>,
    noise: Noise<'a>,
    mask: Option<PixelData<'a>>,
    maskthresh: f64,
    segmap: Option<Segmentation<'a>>,
    gain: f64,
}

impl<'a> ImageView<'a> {
    /// Create a view over `width × height` row-major pixels.
    pub fn new(data: impl Into<PixelData<'a>>, width: usize, height: usize) -> Result<Self> {
        let data = data.into();
        check_len("data", data.len(), width * height)?;
        Ok(Self {
            width,
            height,
            data,
            noise: Noise::None,
            mask: None,
            maskthresh: 0.0,
            segmap: None,
            gain: 0.0,
        })
    }

    /// Create a view from a standard-layout ndarray view.
    pub fn from_array<T>(array: ArrayView2<'a, T>) -> Result<Self>
    where
        &'a [T]: Into<PixelData<'a>>,
    {
        let (height, width) = array.dim();
        let slice = array
            .to_slice()
            .ok_or(SepError::NonContiguous { what: "image" })?;
        Self::new(slice, width, height)
    }

    /// Attach noise information.
    pub fn with_noise(mut self, noise: Noise<'a>) -> Result<Self> {
        if let Noise::Array { data, .. } = noise {
            check_len("noise", data.len(), self.pixel_count())?;
        }
        self.noise = noise;
        Ok(self)
    }

    /// Attach a mask; pixels with `mask > maskthresh` are masked.
    pub fn with_mask(mut self, mask: impl Into<PixelData<'a>>, maskthresh: f64) -> Result<Self> {
        let mask = mask.into();
        check_len("mask", mask.len(), self.pixel_count())?;
        self.mask = Some(mask);
        self.maskthresh = maskthresh;
        Ok(self)
    }

    /// Attach a segmentation map.
    pub fn with_segmap(mut self, segmap: Segmentation<'a>) -> Result<Self> {
        check_len("segmentation map", segmap.len(), self.pixel_count())?;
        self.segmap = Some(segmap);
        Ok(self)
    }

    /// Set the gain in counts per data unit (0 disables the Poisson term).
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn data(&self) -> PixelData<'a> {
        self.data
    }

    pub fn noise(&self) -> &Noise<'a> {
        &self.noise
    }

    pub fn segmap(&self) -> Option<&Segmentation<'a>> {
        self.segmap.as_ref()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    #[inline]
    pub fn value(&self, i: usize) -> f64 {
        self.data.get(i)
    }

    /// True when the mask flags pixel `i`.
    #[inline]
    pub fn is_masked(&self, i: usize) -> bool {
        self.mask.map_or(false, |m| m.get(i) > self.maskthresh)
    }

    /// True when pixel `i` holds an unusable value (NaN or `<= -1e30`).
    #[inline]
    pub fn is_invalid(&self, i: usize) -> bool {
        let v = self.data.get(i);
        v.is_nan() || v <= -BIG
    }

    /// Whether pixel `i` is excluded for segment filter `id`.
    ///
    /// `id == 0` disables filtering; `id > 0` excludes pixels belonging to
    /// other segments (sky pixels are kept); `id < 0` keeps only pixels of
    /// segment `-id`.
    #[inline]
    pub fn is_segment_excluded(&self, i: usize, id: i64) -> bool {
        match (&self.segmap, id) {
            (_, 0) | (None, _) => false,
            (Some(seg), id) if id > 0 => {
                let s = seg.id(i);
                s > 0 && s != id
            }
            (Some(seg), id) => seg.id(i) != -id,
        }
    }
}

fn check_len(what: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(SepError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_saturating_cast_bounds() {
        assert_eq!(saturating_cast::<u8>(-3.0), 0);
        assert_eq!(saturating_cast::<u8>(300.0), 255);
        assert_eq!(saturating_cast::<u8>(12.7), 12);
        assert_eq!(saturating_cast::<i32>(f64::NAN), i32::MIN);
        assert_eq!(saturating_cast::<f64>(-2.5), -2.5);
    }

    #[test]
    fn test_all_dtypes_read_the_same() {
        let f64s = vec![1.0_f64, 2.0, 3.0, 4.0];
        let f32s = vec![1.0_f32, 2.0, 3.0, 4.0];
        let i32s = vec![1_i32, 2, 3, 4];
        let u8s = vec![1_u8, 2, 3, 4];
        let views = [
            ImageView::new(&f64s, 2, 2).unwrap(),
            ImageView::new(&f32s, 2, 2).unwrap(),
            ImageView::new(&i32s, 2, 2).unwrap(),
            ImageView::new(&u8s, 2, 2).unwrap(),
        ];
        for view in &views {
            assert_eq!(view.value(3), 4.0);
            let mut row = [0.0_f32; 2];
            view.data().read_into(2, &mut row);
            assert_eq!(row, [3.0, 4.0]);
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let data = vec![0.0_f32; 6];
        let err = ImageView::new(&data, 4, 2).unwrap_err();
        assert_eq!(
            err,
            SepError::DimensionMismatch {
                what: "data",
                expected: 8,
                actual: 6
            }
        );

        let view = ImageView::new(&data, 3, 2).unwrap();
        let mask = vec![0_u8; 5];
        assert!(view.with_mask(&mask, 0.0).is_err());
    }

    #[test]
    fn test_noise_conversions() {
        let noise = Noise::Scalar {
            value: 4.0,
            kind: NoiseKind::Variance,
        };
        assert_eq!(noise.stddev(0), 2.0);
        assert_eq!(noise.variance(0), 4.0);

        let sigmas = vec![3.0_f32, 1.0];
        let noise = Noise::Array {
            data: PixelData::from(&sigmas),
            kind: NoiseKind::StdDev,
        };
        assert_eq!(noise.variance(0), 9.0);
        assert_eq!(Noise::None.variance(0), 0.0);
    }

    #[test]
    fn test_mask_and_invalid_pixels() {
        let data = vec![1.0_f64, f64::NAN, -2e30, 4.0];
        let mask = vec![0.0_f32, 0.0, 0.0, 1.0];
        let view = ImageView::new(&data, 2, 2)
            .unwrap()
            .with_mask(&mask, 0.5)
            .unwrap();
        assert!(!view.is_masked(0));
        assert!(view.is_masked(3));
        assert!(view.is_invalid(1));
        assert!(view.is_invalid(2));
        assert!(!view.is_invalid(0));
    }

    #[test]
    fn test_segmentation_census_and_filter() {
        let data = vec![0.0_f32; 6];
        let seg = vec![0_i32, 1, 1, 2, 2, 2];
        let segmap = Segmentation::new(&seg);
        assert_eq!(segmap.ids(), &[1, 2]);
        assert_eq!(segmap.counts(), &[2, 3]);

        let view = ImageView::new(&data, 3, 2)
            .unwrap()
            .with_segmap(segmap)
            .unwrap();
        // Positive id: other segments excluded, sky kept
        assert!(!view.is_segment_excluded(0, 1));
        assert!(!view.is_segment_excluded(1, 1));
        assert!(view.is_segment_excluded(3, 1));
        // Negative id: only the matching segment kept
        assert!(view.is_segment_excluded(0, -2));
        assert!(!view.is_segment_excluded(4, -2));
        // Zero disables filtering
        assert!(!view.is_segment_excluded(3, 0));
    }

    #[test]
    fn test_from_array() {
        let array = Array2::<f32>::from_shape_fn((3, 4), |(y, x)| (y * 4 + x) as f32);
        let view = ImageView::from_array(array.view()).unwrap();
        assert_eq!(view.width(), 4);
        assert_eq!(view.height(), 3);
        assert_eq!(view.value(5), 5.0);

        let err = ImageView::from_array(array.t()).unwrap_err();
        assert_eq!(err, SepError::NonContiguous { what: "image" });
        assert_eq!(err.status(), crate::error::NON_CONTIGUOUS);
    }
}
