use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::subtractor::{self, BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use ndarray::Zip;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Mog2Params {
    pub history: u32,
    /// squared Mahalanobis distance deciding background membership
    pub var_threshold: f32,
    pub detect_shadows: bool,
    pub shadow_value: u8,
    /// darkening ratio still accepted as shadow
    pub shadow_threshold: f32,
    pub n_mixtures: usize,
    pub background_ratio: f32,
    /// squared distance under which a sample updates an existing mode
    pub var_threshold_gen: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    pub complexity_reduction: f32,
    /// fixed learning rate; derived from `history` when unset
    pub learning_rate: Option<f32>,
}

impl Default for Mog2Params {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            detect_shadows: true,
            shadow_value: 127,
            shadow_threshold: 0.5,
            n_mixtures: 5,
            background_ratio: 0.9,
            var_threshold_gen: 9.0,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            learning_rate: None,
        }
    }
}

/// Adaptive Gaussian mixture per pixel with a variable number of modes.
pub struct Mog2 {
    params: Mog2Params,
    dims: Option<(u32, u32)>,
    frames: u64,
    // (pixels, modes)
    weights: Array2<f32>,
    variances: Array2<f32>,
    // (pixels, modes * 3)
    means: Array2<f32>,
    modes: Array1<u8>,
}

impl Mog2 {
    pub fn new(mut params: Mog2Params) -> Self {
        params.n_mixtures = params.n_mixtures.clamp(1, u8::MAX as usize);

        Self {
            params,
            dims: None,
            frames: 0,
            weights: Array2::zeros((0, 0)),
            variances: Array2::zeros((0, 0)),
            means: Array2::zeros((0, 0)),
            modes: Array1::zeros(0),
        }
    }

    fn allocate(&mut self, w: u32, h: u32) {
        let n = (w * h) as usize;
        let k = self.params.n_mixtures;

        self.weights = Array2::zeros((n, k));
        self.variances = Array2::zeros((n, k));
        self.means = Array2::zeros((n, k * 3));
        self.modes = Array1::zeros(n);
    }

    fn learning_rate(&self) -> f32 {
        match self.params.learning_rate {
            Some(rate) if rate >= 0.0 && self.frames > 1 => rate,
            _ => 1.0 / (2 * self.frames).min(self.params.history.max(1) as u64) as f32,
        }
    }
}

impl BackgroundSubtractor for Mog2 {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        let (w, h) = frame.dimensions();
        if subtractor::check_dims(&mut self.dims, frame)? {
            self.allocate(w, h);
        }

        self.frames += 1;
        let alpha = self.learning_rate();
        let params = self.params;
        let pixels = subtractor::pixels_f32(frame);
        let mut mask = Array1::<u8>::zeros((w * h) as usize);

        Zip::from(self.weights.rows_mut())
            .and(self.variances.rows_mut())
            .and(self.means.rows_mut())
            .and(&mut self.modes)
            .and(pixels.rows())
            .and(&mut mask)
            .for_each(|mut wt, mut var, mut mu, n, x, out| {
                let sample = [x[0], x[1], x[2]];
                *out = update_pixel(&params, alpha, &mut wt, &mut var, &mut mu, n, sample);
            });

        Ok(subtractor::into_mask(w, h, mask))
    }

    #[inline]
    fn name(&self) -> &'static str {
        "MOG2"
    }
}

fn swap_modes(
    wt: &mut ArrayViewMut1<f32>,
    var: &mut ArrayViewMut1<f32>,
    mu: &mut ArrayViewMut1<f32>,
    a: usize,
    b: usize,
) {
    wt.swap(a, b);
    var.swap(a, b);
    for c in 0..3 {
        mu.swap(a * 3 + c, b * 3 + c);
    }
}

fn update_pixel(
    p: &Mog2Params,
    alpha: f32,
    wt: &mut ArrayViewMut1<f32>,
    var: &mut ArrayViewMut1<f32>,
    mu: &mut ArrayViewMut1<f32>,
    nmodes: &mut u8,
    x: [f32; 3],
) -> u8 {
    let alpha1 = 1.0 - alpha;
    let prune = -alpha * p.complexity_reduction;

    let mut n = *nmodes as usize;
    let mut fits = false;
    let mut background = false;
    let mut total = 0.0;

    for mode in 0..n {
        let mut weight = alpha1 * wt[mode] + prune;
        let mut slot = mode;

        if !fits {
            let v = var[mode];
            let d = [
                mu[mode * 3] - x[0],
                mu[mode * 3 + 1] - x[1],
                mu[mode * 3 + 2] - x[2],
            ];
            let dist2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];

            if total < p.background_ratio && dist2 < p.var_threshold * v {
                background = true;
            }

            if dist2 < p.var_threshold_gen * v {
                fits = true;
                weight += alpha;

                let k = alpha / weight;
                for c in 0..3 {
                    mu[mode * 3 + c] -= k * d[c];
                }
                var[mode] = (v + k * (dist2 - v)).clamp(p.var_min, p.var_max);

                while slot > 0 && weight >= wt[slot - 1] {
                    swap_modes(wt, var, mu, slot, slot - 1);
                    slot -= 1;
                }
            }
        }

        if weight < -prune {
            weight = 0.0;
        }

        wt[slot] = weight;
        total += weight;
    }

    // pruned modes have zero weight and sit at the tail
    while n > 0 && wt[n - 1] <= 0.0 {
        n -= 1;
    }

    if total > 0.0 {
        for m in 0..n {
            wt[m] /= total;
        }
    }

    if !fits && alpha > 0.0 {
        let slot = if n == p.n_mixtures {
            n - 1
        } else {
            n += 1;
            n - 1
        };

        if n == 1 {
            wt[slot] = 1.0;
        } else {
            wt[slot] = alpha;
            for m in 0..n - 1 {
                wt[m] *= alpha1;
            }
        }

        for c in 0..3 {
            mu[slot * 3 + c] = x[c];
        }
        var[slot] = p.var_init;

        let mut slot = slot;
        while slot > 0 && wt[slot] >= wt[slot - 1] {
            swap_modes(wt, var, mu, slot, slot - 1);
            slot -= 1;
        }
    }

    *nmodes = n as u8;

    if background {
        BACKGROUND
    } else if p.detect_shadows && is_shadow(p, wt, var, mu, n, x) {
        p.shadow_value
    } else {
        FOREGROUND
    }
}

/// A sample is shadow when it is a darker copy of a background mode: its
/// projection onto the mode mean scales it by `shadow_threshold..=1` and
/// the residual stays within the variance bound.
fn is_shadow(
    p: &Mog2Params,
    wt: &ArrayViewMut1<f32>,
    var: &ArrayViewMut1<f32>,
    mu: &ArrayViewMut1<f32>,
    n: usize,
    x: [f32; 3],
) -> bool {
    let mut total = 0.0;

    for mode in 0..n {
        let m = [mu[mode * 3], mu[mode * 3 + 1], mu[mode * 3 + 2]];
        let numerator = m[0] * x[0] + m[1] * x[1] + m[2] * x[2];
        let denominator = m[0] * m[0] + m[1] * m[1] + m[2] * m[2];

        if denominator == 0.0 {
            return false;
        }

        if numerator <= denominator && numerator >= p.shadow_threshold * denominator {
            let a = numerator / denominator;
            let dist2a: f32 = (0..3).map(|c| (a * m[c] - x[c]).powi(2)).sum();

            if dist2a < p.var_threshold * var[mode] * a * a {
                return true;
            }
        }

        total += wt[mode];
        if total > p.background_ratio {
            return false;
        }
    }

    false
}
