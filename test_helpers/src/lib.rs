//! Synthetic sky images for skysep tests.
//!
//! Images are built from a flat or sloped background, circular Gaussian
//! sources and seeded Gaussian noise, so every test run sees the same pixels.

use ndarray::Array2;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("invalid noise sigma {0}")]
    InvalidNoise(f64),
    #[error("source at ({x}, {y}) has non-positive sigma {sigma}")]
    InvalidSource { x: f64, y: f64, sigma: f64 },
    #[error("array shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// A circular Gaussian source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    /// Integrated flux
    pub flux: f64,
    pub sigma: f64,
}

impl Source {
    pub fn new(x: f64, y: f64, flux: f64, sigma: f64) -> Self {
        Self { x, y, flux, sigma }
    }

    /// Peak pixel value of the continuous profile.
    pub fn amplitude(&self) -> f64 {
        self.flux / (2.0 * std::f64::consts::PI * self.sigma * self.sigma)
    }
}

/// Builder for a synthetic image.
#[derive(Debug, Clone)]
pub struct SkyBuilder {
    width: usize,
    height: usize,
    background: f64,
    slope: (f64, f64),
    noise_sigma: f64,
    seed: u64,
    sources: Vec<Source>,
}

impl SkyBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            background: 0.0,
            slope: (0.0, 0.0),
            noise_sigma: 0.0,
            seed: 42,
            sources: Vec::new(),
        }
    }

    pub fn background(mut self, level: f64) -> Self {
        self.background = level;
        self
    }

    /// Add a linear gradient of `dx` per column and `dy` per row.
    pub fn slope(mut self, dx: f64, dy: f64) -> Self {
        self.slope = (dx, dy);
        self
    }

    pub fn noise(mut self, sigma: f64, seed: u64) -> Self {
        self.noise_sigma = sigma;
        self.seed = seed;
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Render to a row-major `f32` buffer.
    pub fn render(&self) -> Result<Vec<f32>, TestHelperError> {
        let mut data = vec![0.0f64; self.width * self.height];
        for (i, v) in data.iter_mut().enumerate() {
            let (x, y) = ((i % self.width) as f64, (i / self.width) as f64);
            *v = self.background + self.slope.0 * x + self.slope.1 * y;
        }
        for s in &self.sources {
            add_gaussian(&mut data, self.width, self.height, s)?;
        }
        if self.noise_sigma > 0.0 {
            let normal = Normal::new(0.0, self.noise_sigma)
                .map_err(|_| TestHelperError::InvalidNoise(self.noise_sigma))?;
            let mut rng = StdRng::seed_from_u64(self.seed);
            data.iter_mut().for_each(|v| *v += normal.sample(&mut rng));
        } else if self.noise_sigma < 0.0 || self.noise_sigma.is_nan() {
            return Err(TestHelperError::InvalidNoise(self.noise_sigma));
        }
        Ok(data.into_iter().map(|v| v as f32).collect())
    }

    /// Render to an `(height, width)` array.
    pub fn render_array(&self) -> Result<Array2<f32>, TestHelperError> {
        let data = self.render()?;
        Ok(Array2::from_shape_vec((self.height, self.width), data)?)
    }
}

/// Add a Gaussian sampled at pixel centres, truncated at 6σ.
pub fn add_gaussian(
    data: &mut [f64],
    width: usize,
    height: usize,
    s: &Source,
) -> Result<(), TestHelperError> {
    if !(s.sigma > 0.0) {
        return Err(TestHelperError::InvalidSource {
            x: s.x,
            y: s.y,
            sigma: s.sigma,
        });
    }
    let amp = s.amplitude();
    let reach = 6.0 * s.sigma;
    let x0 = (s.x - reach).floor().max(0.0) as usize;
    let x1 = ((s.x + reach).ceil() as usize).min(width.saturating_sub(1));
    let y0 = (s.y - reach).floor().max(0.0) as usize;
    let y1 = ((s.y + reach).ceil() as usize).min(height.saturating_sub(1));
    let inv = 1.0 / (2.0 * s.sigma * s.sigma);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let r2 = (x as f64 - s.x).powi(2) + (y as f64 - s.y).powi(2);
            data[y * width + x] += amp * (-r2 * inv).exp();
        }
    }
    Ok(())
}

/// Pure noise field: 256×256, mean 0, σ = 1.
pub static NOISE_FIELD: Lazy<Vec<f32>> = Lazy::new(|| {
    SkyBuilder::new(256, 256)
        .noise(1.0, 7)
        .render()
        .expect("noise field parameters are valid")
});

/// Field of well separated sources on a sky of 100 with σ = 2 noise.
pub static STAR_FIELD_SOURCES: Lazy<Vec<Source>> = Lazy::new(|| {
    vec![
        Source::new(40.3, 50.7, 2000.0, 1.8),
        Source::new(120.0, 40.0, 5000.0, 2.0),
        Source::new(200.6, 90.2, 1200.0, 1.5),
        Source::new(70.0, 180.0, 8000.0, 2.5),
        Source::new(180.4, 200.1, 3000.0, 2.0),
    ]
});

/// The image described by [`STAR_FIELD_SOURCES`], 256×256.
pub static STAR_FIELD: Lazy<Vec<f32>> = Lazy::new(|| {
    STAR_FIELD_SOURCES
        .iter()
        .fold(SkyBuilder::new(256, 256).background(100.0).noise(2.0, 11), |b, s| {
            b.source(*s)
        })
        .render()
        .expect("star field sources are valid")
});
