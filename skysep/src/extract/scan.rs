//! Single-pass linking of above-threshold pixels into objects.
//!
//! Runs of detected pixels on each row are attached to the objects of
//! touching runs on the previous row (8-connectivity). Objects that touch
//! through a run are merged, and an object that gains no pixels on a row is
//! complete and handed back to the caller.

use crate::error::{Result, SepError};

/// One pixel of a detected object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PixelRecord {
    pub x: usize,
    pub y: usize,
    /// Unfiltered value
    pub value: f32,
    /// Filtered (detection) value
    pub cvalue: f32,
    /// Noise variance
    pub var: f32,
    /// Data-unit threshold of the unfiltered pixel
    pub thresh: f32,
    /// Threshold in detection units
    pub dthresh: f32,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    x0: usize,
    /// Inclusive
    x1: usize,
    object: usize,
}

/// Bounded linker state.
pub(crate) struct Scanner {
    pixstack: usize,
    object_limit: usize,
    /// Slots of open objects; `None` marks a free slot
    open: Vec<Option<Vec<PixelRecord>>>,
    free: Vec<usize>,
    nopen: usize,
    /// Pixels held by open objects
    held: usize,
    prev_runs: Vec<Run>,
    cur_runs: Vec<Run>,
    touched: Vec<bool>,
}

impl Scanner {
    pub fn new(pixstack: usize, object_limit: usize) -> Self {
        Self {
            pixstack,
            object_limit,
            open: Vec::new(),
            free: Vec::new(),
            nopen: 0,
            held: 0,
            prev_runs: Vec::new(),
            cur_runs: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Link one row of detected pixels and return the objects it completed.
    ///
    /// `pixels` holds the detected pixels of row `y` in increasing `x`.
    pub fn push_row(&mut self, pixels: &[PixelRecord]) -> Result<Vec<Vec<PixelRecord>>> {
        self.cur_runs.clear();
        self.touched.iter_mut().for_each(|t| *t = false);

        let mut start = 0;
        while start < pixels.len() {
            let mut end = start + 1;
            while end < pixels.len() && pixels[end].x == pixels[end - 1].x + 1 {
                end += 1;
            }
            self.link_run(&pixels[start..end])?;
            start = end;
        }

        // Objects without a run on this row are complete
        let mut done = Vec::new();
        for slot in 0..self.open.len() {
            if self.open[slot].is_some() && !self.touched[slot] {
                done.push(self.close(slot));
            }
        }
        std::mem::swap(&mut self.prev_runs, &mut self.cur_runs);
        Ok(done)
    }

    /// Close every object still open.
    pub fn finish(&mut self) -> Vec<Vec<PixelRecord>> {
        let mut done = Vec::new();
        for slot in 0..self.open.len() {
            if self.open[slot].is_some() {
                done.push(self.close(slot));
            }
        }
        self.prev_runs.clear();
        done
    }

    fn link_run(&mut self, run: &[PixelRecord]) -> Result<()> {
        let (x0, x1) = (run[0].x, run[run.len() - 1].x);

        let mut target: Option<usize> = None;
        for i in 0..self.prev_runs.len() {
            let prev = self.prev_runs[i];
            if prev.x1 + 1 < x0 || prev.x0 > x1 + 1 {
                continue;
            }
            match target {
                None => target = Some(prev.object),
                Some(t) if t != prev.object => self.merge(t, prev.object),
                Some(_) => {}
            }
        }

        let object = match target {
            Some(t) => t,
            None => self.allocate()?,
        };
        self.held += run.len();
        if self.held > self.pixstack {
            return Err(SepError::PixStackFull {
                limit: self.pixstack,
            });
        }
        if let Some(pixels) = self.open[object].as_mut() {
            pixels.extend_from_slice(run);
        }
        self.touched[object] = true;
        self.cur_runs.push(Run { x0, x1, object });
        Ok(())
    }

    fn allocate(&mut self) -> Result<usize> {
        if self.nopen >= self.object_limit {
            return Err(SepError::ObjectLimit {
                limit: self.object_limit,
            });
        }
        self.nopen += 1;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.open[slot] = Some(Vec::new());
                slot
            }
            None => {
                self.open.push(Some(Vec::new()));
                self.touched.push(false);
                self.open.len() - 1
            }
        };
        Ok(slot)
    }

    /// Move the pixels of `from` into `into` and retarget its runs.
    fn merge(&mut self, into: usize, from: usize) {
        if let Some(pixels) = self.open[from].take() {
            if let Some(dst) = self.open[into].as_mut() {
                dst.extend(pixels);
            }
        }
        self.touched[into] |= self.touched[from];
        self.touched[from] = false;
        for run in self.prev_runs.iter_mut().chain(self.cur_runs.iter_mut()) {
            if run.object == from {
                run.object = into;
            }
        }
        self.free.push(from);
        self.nopen -= 1;
    }

    fn close(&mut self, slot: usize) -> Vec<PixelRecord> {
        let mut pixels = self.open[slot].take().unwrap_or_default();
        self.held -= pixels.len();
        self.nopen -= 1;
        self.free.push(slot);
        pixels.sort_unstable_by_key(|p| (p.y, p.x));
        pixels
    }
}
