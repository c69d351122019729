//! Source extraction: filtering, thresholding, linking, deblending and
//! cleaning.
//!
//! [`extract`] expects background-subtracted data. The image is streamed
//! row by row through the detection filter; only the rows the kernel spans
//! are held in memory, and the number of simultaneously open objects and
//! their pixels are bounded by [`ExtractLimits`].

mod analyse;
mod catalog;
mod clean;
mod deblend;
mod filter;
mod scan;

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SepError};
use crate::flags::ObjectFlags;
use crate::image::ImageView;

pub use catalog::Catalog;
pub use filter::Kernel;

use analyse::analyse;
use clean::{clean, Candidate};
use deblend::{deblend, DeblendConfig};
use filter::{LineFilter, PixelThreshold};
use scan::{PixelRecord, Scanner};

/// How `ExtractParams::thresh` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreshType {
    /// In units of the noise σ (absolute when the image has no noise)
    #[default]
    Relative,
    /// In data units
    Absolute,
}

/// Detection filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    None,
    /// Convolution with a kernel normalised to unit sum
    Conv(Kernel),
    /// Noise-weighted matched filter; falls back to convolution when the
    /// image has no noise
    Matched(Kernel),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Conv(Kernel::default())
    }
}

/// Resource bounds for one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractLimits {
    /// Maximum pixels held by open objects
    pub pixstack: usize,
    /// Maximum simultaneously open objects
    pub object_limit: usize,
    /// Maximum deblending tree nodes per object
    pub sub_object_limit: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            pixstack: 300_000,
            object_limit: 1024,
            sub_object_limit: 1024,
        }
    }
}

/// Extraction settings. Defaults follow Source Extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractParams {
    pub thresh: f64,
    pub thresh_type: ThreshType,
    pub minarea: usize,
    pub filter: Filter,
    pub deblend_nthresh: usize,
    pub deblend_cont: f64,
    pub clean: bool,
    pub clean_param: f64,
    pub limits: ExtractLimits,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            thresh: 1.5,
            thresh_type: ThreshType::Relative,
            minarea: 5,
            filter: Filter::default(),
            deblend_nthresh: 32,
            deblend_cont: 0.005,
            clean: true,
            clean_param: 1.0,
            limits: ExtractLimits::default(),
        }
    }
}

impl ExtractParams {
    fn validate(&self) -> Result<()> {
        if !self.thresh.is_finite() {
            return Err(SepError::IllegalExtractParams(format!(
                "threshold must be finite, got {}",
                self.thresh
            )));
        }
        if self.minarea == 0 {
            return Err(SepError::IllegalExtractParams(
                "minarea must be at least 1".to_string(),
            ));
        }
        if self.deblend_cont.is_nan() || self.deblend_cont < 0.0 {
            return Err(SepError::IllegalExtractParams(format!(
                "deblend_cont must be non-negative, got {}",
                self.deblend_cont
            )));
        }
        let ExtractLimits {
            pixstack,
            object_limit,
            sub_object_limit,
        } = self.limits;
        if pixstack == 0 || object_limit == 0 || sub_object_limit == 0 {
            return Err(SepError::IllegalExtractParams(
                "extraction limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Detect and measure objects in background-subtracted `image`.
///
/// When the image carries a segmentation map, each positive segment id
/// becomes one object and no thresholding, deblending or cleaning is done.
pub fn extract(image: &ImageView, params: &ExtractParams) -> Result<Catalog> {
    params.validate()?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Ok(Catalog::default());
    }

    let has_noise = !image.noise().is_none();
    let relative = params.thresh_type == ThreshType::Relative && has_noise;
    if params.thresh_type == ThreshType::Relative && !has_noise {
        debug!("relative threshold without noise; using {} as absolute", params.thresh);
    }
    let threshold = PixelThreshold {
        thresh: params.thresh as f32,
        relative,
    };
    let (kernel, matched) = match &params.filter {
        Filter::None => (None, false),
        Filter::Conv(k) => (Some(k), false),
        Filter::Matched(k) => (Some(k), has_noise),
    };
    let mut filter = LineFilter::new(image, kernel, matched, threshold, params.thresh as f32)?;

    let gain = image.gain();
    let cfg = DeblendConfig {
        nthresh: params.deblend_nthresh,
        cont: params.deblend_cont,
        minarea: params.minarea,
        sub_object_limit: params.limits.sub_object_limit,
    };
    let split = |closed: Vec<Vec<PixelRecord>>| split_objects(closed, &cfg, width, height, gain);

    let mut value = vec![0.0_f32; width];
    let mut dthresh = vec![0.0_f32; width];
    let mut row_pixels = Vec::with_capacity(width);
    let mut scanner = Scanner::new(params.limits.pixstack, params.limits.object_limit);
    // Objects are deblended and measured as soon as the scan closes them, so
    // raw pixel records never outlive the pixel stack.
    let mut objects: Vec<Candidate> = Vec::new();
    let mut segments: BTreeMap<i64, Vec<PixelRecord>> = BTreeMap::new();

    for y in 0..height {
        filter.filter_row(y, &mut value, &mut dthresh)?;
        let input = filter.row(y)?;
        row_pixels.clear();
        for x in 0..width {
            if input.masked[x] {
                continue;
            }
            let record = PixelRecord {
                x,
                y,
                value: input.data[x],
                cvalue: value[x],
                var: input.var[x],
                thresh: input.thresh[x],
                dthresh: dthresh[x],
            };
            match image.segmap() {
                Some(seg) => {
                    let id = seg.id(y * width + x);
                    if id > 0 {
                        segments.entry(id).or_default().push(record);
                    }
                }
                None if value[x] > dthresh[x] => row_pixels.push(record),
                None => {}
            }
        }
        if image.segmap().is_none() {
            let closed = scanner.push_row(&row_pixels)?;
            if !closed.is_empty() {
                objects.extend(split(closed));
            }
        }
    }
    objects.extend(split(scanner.finish()));

    let candidates: Vec<Candidate> = if image.segmap().is_some() {
        segments
            .into_values()
            .map(|pixels| {
                let thresh = object_threshold(&pixels);
                let params = analyse(
                    &pixels,
                    width,
                    height,
                    gain,
                    thresh,
                    thresh,
                    ObjectFlags::empty(),
                );
                Candidate { pixels, params }
            })
            .collect()
    } else {
        debug!("extract: {} objects after deblending", objects.len());
        if params.clean {
            clean(objects, params.clean_param, width, height, gain)
        } else {
            objects
        }
    };

    let mut catalog = Catalog::default();
    for c in &candidates {
        catalog.push(&c.params, c.pixels.iter().map(|p| p.y * width + p.x));
    }
    debug!("extract: {} objects in catalog", catalog.len());
    Ok(catalog)
}

/// Deblend and measure the objects closed by one scan step, in parallel,
/// keeping their order.
fn split_objects(
    closed: Vec<Vec<PixelRecord>>,
    cfg: &DeblendConfig,
    width: usize,
    height: usize,
    gain: f64,
) -> Vec<Candidate> {
    let pieces: Vec<Vec<Candidate>> = closed
        .into_par_iter()
        .filter(|pixels| pixels.len() >= cfg.minarea)
        .map(|pixels| {
            let thresh = object_threshold(&pixels);
            deblend(pixels, thresh, width, height, cfg)
                .into_iter()
                .map(|frag| {
                    let params = analyse(
                        &frag.pixels,
                        width,
                        height,
                        gain,
                        thresh,
                        frag.mthresh,
                        frag.flag,
                    );
                    Candidate {
                        pixels: frag.pixels,
                        params,
                    }
                })
                .collect()
        })
        .collect();
    pieces.into_iter().flatten().collect()
}

/// Detection threshold at the filtered peak of an object.
fn object_threshold(pixels: &[PixelRecord]) -> f32 {
    pixels
        .iter()
        .max_by(|a, b| a.cvalue.total_cmp(&b.cvalue))
        .map_or(0.0, |p| p.dthresh)
}
