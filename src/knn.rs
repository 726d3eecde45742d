use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::subtractor::{self, BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use ndarray::Zip;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TERMS: usize = 3;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct KnnParams {
    pub history: u32,
    /// squared RGB distance under which a sample matches
    pub dist2_threshold: f32,
    /// samples kept for each of the short, mid and long term memories
    pub n_samples: usize,
    /// matching background samples needed to call a pixel background
    pub k_nn: usize,
    pub detect_shadows: bool,
    pub shadow_value: u8,
    pub shadow_threshold: f32,
    pub seed: u64,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            history: 500,
            dist2_threshold: 400.0,
            n_samples: 7,
            k_nn: 3,
            detect_shadows: true,
            shadow_value: 127,
            shadow_threshold: 0.5,
            seed: 0x5eed,
        }
    }
}

/// Non-parametric model: per pixel a few remembered samples in three
/// memories refreshed at different rates. A pixel is background when at
/// least `k_nn` remembered background samples lie close to it.
pub struct Knn {
    params: KnnParams,
    dims: Option<(u32, u32)>,
    frames: u64,
    periods: [u64; TERMS],
    rng: StdRng,
    // (pixels, TERMS * n_samples * 3)
    samples: Array2<f32>,
    // (pixels, TERMS * n_samples); 1 when the sample was background
    included: Array2<u8>,
    // (pixels, TERMS); next slot to overwrite in each memory
    cursor: Array2<u8>,
    // (pixels, TERMS); per-pixel refresh offset
    phase: Array2<u64>,
}

impl Knn {
    pub fn new(mut params: KnnParams) -> Self {
        params.n_samples = params.n_samples.clamp(1, u8::MAX as usize);
        params.k_nn = params.k_nn.max(1);

        Self {
            periods: refresh_periods(params.history, params.n_samples),
            rng: StdRng::seed_from_u64(params.seed),
            params,
            dims: None,
            frames: 0,
            samples: Array2::zeros((0, 0)),
            included: Array2::zeros((0, 0)),
            cursor: Array2::zeros((0, 0)),
            phase: Array2::zeros((0, 0)),
        }
    }

    /// Every memory starts filled with the first frame.
    fn bootstrap(&mut self, frame: &RgbImage) {
        let ns = self.params.n_samples;
        let pixels = subtractor::pixels_f32(frame);
        let n = pixels.nrows();

        self.samples = Array2::zeros((n, TERMS * ns * 3));
        for (mut row, px) in self.samples.rows_mut().into_iter().zip(pixels.rows()) {
            for s in 0..TERMS * ns {
                for c in 0..3 {
                    row[s * 3 + c] = px[c];
                }
            }
        }

        self.included = Array2::ones((n, TERMS * ns));
        self.cursor = Array2::zeros((n, TERMS));

        let periods = self.periods;
        let rng = &mut self.rng;
        self.phase = Array2::from_shape_fn((n, TERMS), |(_, t)| rng.gen_range(0..periods[t]));
    }
}

/// Frames between refreshes of one slot of the short, mid and long memory.
fn refresh_periods(history: u32, n_samples: usize) -> [u64; TERMS] {
    let decay = (1.0 - 1.0 / history.max(2) as f64).ln();
    let k_short = (0.7f64.ln() / decay) as u64 + 1;
    let k_mid = ((0.4f64.ln() / decay) as u64 + 1).saturating_sub(k_short).max(1);
    let k_long = ((0.1f64.ln() / decay) as u64 + 1)
        .saturating_sub(k_short + k_mid)
        .max(1);

    let ns = n_samples as u64;
    [k_short / ns + 1, k_mid / ns + 1, k_long / ns + 1]
}

impl BackgroundSubtractor for Knn {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        let (w, h) = frame.dimensions();
        if subtractor::check_dims(&mut self.dims, frame)? {
            self.bootstrap(frame);
        }

        self.frames += 1;
        let frames = self.frames;
        let periods = self.periods;
        let params = self.params;
        let rng = &mut self.rng;
        let pixels = subtractor::pixels_f32(frame);
        let mut mask = Array1::<u8>::zeros((w * h) as usize);

        Zip::from(self.samples.rows_mut())
            .and(self.included.rows_mut())
            .and(self.cursor.rows_mut())
            .and(self.phase.rows())
            .and(pixels.rows())
            .and(&mut mask)
            .for_each(|mut samples, mut included, mut cursor, phase, x, out| {
                let x = [x[0], x[1], x[2]];
                let (value, seen) = classify(&params, &samples, &included, x);
                *out = value;

                // long from mid, mid from short, short from the frame
                for t in (0..TERMS).rev() {
                    if (frames + phase[t]) % periods[t] != 0 {
                        continue;
                    }

                    let ns = params.n_samples;
                    let slot = cursor[t] as usize;
                    cursor[t] = ((slot + 1) % ns) as u8;
                    let dest = t * ns + slot;

                    if t == 0 {
                        for c in 0..3 {
                            samples[dest * 3 + c] = x[c];
                        }
                        included[dest] = seen as u8;
                    } else {
                        let src = (t - 1) * ns + rng.gen_range(0..ns);
                        for c in 0..3 {
                            samples[dest * 3 + c] = samples[src * 3 + c];
                        }
                        included[dest] = included[src];
                    }
                }
            });

        Ok(subtractor::into_mask(w, h, mask))
    }

    #[inline]
    fn name(&self) -> &'static str {
        "KNN"
    }
}

/// Returns the mask value and whether the value was seen before at all.
fn classify(
    p: &KnnParams,
    samples: &ArrayViewMut1<f32>,
    included: &ArrayViewMut1<u8>,
    x: [f32; 3],
) -> (u8, bool) {
    let mut matches = 0;
    let mut seen = false;

    for s in 0..included.len() {
        let d2: f32 = (0..3).map(|c| (samples[s * 3 + c] - x[c]).powi(2)).sum();

        if d2 < p.dist2_threshold {
            seen = true;
            if included[s] != 0 {
                matches += 1;
                if matches >= p.k_nn {
                    return (BACKGROUND, true);
                }
            }
        }
    }

    if p.detect_shadows && is_shadow(p, samples, included, x) {
        return (p.shadow_value, seen);
    }

    (FOREGROUND, seen)
}

fn is_shadow(
    p: &KnnParams,
    samples: &ArrayViewMut1<f32>,
    included: &ArrayViewMut1<u8>,
    x: [f32; 3],
) -> bool {
    let mut matches = 0;

    for s in 0..included.len() {
        if included[s] == 0 {
            continue;
        }

        let m = [samples[s * 3], samples[s * 3 + 1], samples[s * 3 + 2]];
        let numerator = m[0] * x[0] + m[1] * x[1] + m[2] * x[2];
        let denominator = m[0] * m[0] + m[1] * m[1] + m[2] * m[2];

        if denominator == 0.0 {
            continue;
        }

        if numerator <= denominator && numerator >= p.shadow_threshold * denominator {
            let a = numerator / denominator;
            let dist2a: f32 = (0..3).map(|c| (a * m[c] - x[c]).powi(2)).sum();

            if dist2a < p.dist2_threshold * a * a {
                matches += 1;
                if matches >= p.k_nn {
                    return true;
                }
            }
        }
    }

    false
}
