//! Struct-of-arrays object catalog.

use serde::{Deserialize, Serialize};

use crate::flags::ObjectFlags;

use super::analyse::ObjectParams;

/// Detected objects, one entry per index in every field.
///
/// Pixel membership is packed into `objects_pix` (linear indices `y·width + x`)
/// with `pix_spans[i] = (offset, len)` selecting the pixels of object `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Detection threshold of the object (detection units)
    pub thresh: Vec<f32>,
    /// Pixels above threshold in the filtered image
    pub npix: Vec<usize>,
    /// Pixels above threshold in the unfiltered image
    pub tnpix: Vec<usize>,
    pub xmin: Vec<usize>,
    pub xmax: Vec<usize>,
    pub ymin: Vec<usize>,
    pub ymax: Vec<usize>,
    /// Barycenter
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Second moments
    pub x2: Vec<f64>,
    pub y2: Vec<f64>,
    pub xy: Vec<f64>,
    /// Variance of the barycenter
    pub errx2: Vec<f64>,
    pub erry2: Vec<f64>,
    pub errxy: Vec<f64>,
    /// Ellipse semi-axes and position angle (radians, counter-clockwise
    /// from +x)
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub theta: Vec<f32>,
    /// Ellipse coefficients
    pub cxx: Vec<f32>,
    pub cyy: Vec<f32>,
    pub cxy: Vec<f32>,
    /// Sum of filtered pixel values
    pub cflux: Vec<f32>,
    /// Sum of unfiltered pixel values
    pub flux: Vec<f32>,
    pub cpeak: Vec<f32>,
    pub peak: Vec<f32>,
    pub xcpeak: Vec<usize>,
    pub ycpeak: Vec<usize>,
    pub xpeak: Vec<usize>,
    pub ypeak: Vec<usize>,
    pub flag: Vec<ObjectFlags>,
    pub objects_pix: Vec<usize>,
    pub pix_spans: Vec<(usize, usize)>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Linear pixel indices of object `i`.
    pub fn pixels(&self, i: usize) -> &[usize] {
        let (offset, len) = self.pix_spans[i];
        &self.objects_pix[offset..offset + len]
    }

    pub(crate) fn push(&mut self, p: &ObjectParams, pixels: impl IntoIterator<Item = usize>) {
        let offset = self.objects_pix.len();
        self.objects_pix.extend(pixels);
        self.pix_spans
            .push((offset, self.objects_pix.len() - offset));

        self.thresh.push(p.thresh);
        self.npix.push(p.npix);
        self.tnpix.push(p.tnpix);
        self.xmin.push(p.xmin);
        self.xmax.push(p.xmax);
        self.ymin.push(p.ymin);
        self.ymax.push(p.ymax);
        self.x.push(p.x);
        self.y.push(p.y);
        self.x2.push(p.x2);
        self.y2.push(p.y2);
        self.xy.push(p.xy);
        self.errx2.push(p.errx2);
        self.erry2.push(p.erry2);
        self.errxy.push(p.errxy);
        self.a.push(p.a);
        self.b.push(p.b);
        self.theta.push(p.theta);
        self.cxx.push(p.cxx);
        self.cyy.push(p.cyy);
        self.cxy.push(p.cxy);
        self.cflux.push(p.cflux);
        self.flux.push(p.flux);
        self.cpeak.push(p.cpeak);
        self.peak.push(p.peak);
        self.xcpeak.push(p.xcpeak);
        self.ycpeak.push(p.ycpeak);
        self.xpeak.push(p.xpeak);
        self.ypeak.push(p.ypeak);
        self.flag.push(p.flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_select_object_pixels() {
        let mut cat = Catalog::default();
        let p = ObjectParams {
            npix: 2,
            ..Default::default()
        };
        cat.push(&p, [3, 4]);
        let p = ObjectParams {
            npix: 3,
            ..Default::default()
        };
        cat.push(&p, [10, 11, 12]);
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.pixels(1), &[10, 11, 12]);
        assert_eq!(cat.npix.iter().sum::<usize>(), cat.objects_pix.len());
    }
}
