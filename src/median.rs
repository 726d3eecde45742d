use crate::error::Error;
use crate::subtractor::{BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Per-pixel, per-channel median of `frames`, which must share one size.
pub fn median_frame(frames: &[RgbImage]) -> Result<RgbImage, Error> {
    let first = frames.first().ok_or(Error::NoFrames)?;
    let (w, h) = first.dimensions();

    if let Some(other) = frames.iter().find(|f| f.dimensions() != (w, h)) {
        return Err(Error::FrameSize {
            expected: (w, h),
            got: other.dimensions(),
        });
    }

    let len = first.as_raw().len();
    let mut column = Vec::with_capacity(frames.len());
    let mut out = Vec::with_capacity(len);

    for i in 0..len {
        column.clear();
        column.extend(frames.iter().map(|f| f.as_raw()[i]));
        column.sort_unstable();

        let mid = column.len() / 2;
        let value = if column.len() % 2 == 0 {
            ((column[mid - 1] as u16 + column[mid] as u16) / 2) as u8
        } else {
            column[mid]
        };
        out.push(value);
    }

    RgbImage::from_raw(w, h, out).ok_or(Error::FrameSize {
        expected: (w, h),
        got: (w, h),
    })
}

/// `n` distinct frame indices out of `total`, ascending.
pub fn sample_indices(total: usize, n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, total, n.min(total)).into_vec();
    picked.sort_unstable();
    picked
}

/// Fixed background: grey difference to a median frame, thresholded with
/// Otsu's level per frame.
pub struct MedianDifference {
    background: GrayImage,
}

impl MedianDifference {
    pub fn new(background: &RgbImage) -> Self {
        Self {
            background: imageops::grayscale(background),
        }
    }

    pub fn from_frames(frames: &[RgbImage]) -> Result<Self, Error> {
        Ok(Self::new(&median_frame(frames)?))
    }

    #[inline]
    pub fn background(&self) -> &GrayImage {
        &self.background
    }

    pub fn difference(&self, frame: &RgbImage) -> Result<GrayImage, Error> {
        if frame.dimensions() != self.background.dimensions() {
            return Err(Error::FrameSize {
                expected: self.background.dimensions(),
                got: frame.dimensions(),
            });
        }

        let gray = imageops::grayscale(frame);
        let (w, h) = gray.dimensions();

        Ok(GrayImage::from_fn(w, h, |x, y| {
            let a = gray.get_pixel(x, y)[0];
            let b = self.background.get_pixel(x, y)[0];
            Luma([a.abs_diff(b)])
        }))
    }
}

impl BackgroundSubtractor for MedianDifference {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        let mut diff = self.difference(frame)?;
        let level = otsu_level(&diff);

        // an identical frame has no second class to separate
        let flat = diff.pixels().all(|p| p[0] == level);
        for p in diff.pixels_mut() {
            p[0] = if !flat && p[0] > level { FOREGROUND } else { BACKGROUND };
        }

        Ok(diff)
    }

    #[inline]
    fn name(&self) -> &'static str {
        "MEDIAN"
    }
}
