use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::subtractor::{self, BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use ndarray::Zip;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct MogParams {
    pub history: u32,
    pub n_mixtures: usize,
    pub background_ratio: f32,
    pub noise_sigma: f32,
    /// match distance in standard deviations
    pub var_threshold: f32,
    pub initial_weight: f32,
    pub learning_rate: Option<f32>,
}

impl Default for MogParams {
    fn default() -> Self {
        Self {
            history: 200,
            n_mixtures: 5,
            background_ratio: 0.7,
            noise_sigma: 15.0,
            var_threshold: 2.5,
            initial_weight: 0.05,
            learning_rate: None,
        }
    }
}

/// Fixed-size Gaussian mixture per pixel with per-channel variances, modes
/// kept sorted by `weight / sigma`.
pub struct Mog {
    params: MogParams,
    dims: Option<(u32, u32)>,
    frames: u64,
    // (pixels, mixtures)
    weights: Array2<f32>,
    // (pixels, mixtures * 3)
    means: Array2<f32>,
    variances: Array2<f32>,
}

impl Mog {
    pub fn new(mut params: MogParams) -> Self {
        params.n_mixtures = params.n_mixtures.max(1);

        Self {
            params,
            dims: None,
            frames: 0,
            weights: Array2::zeros((0, 0)),
            means: Array2::zeros((0, 0)),
            variances: Array2::zeros((0, 0)),
        }
    }

    fn allocate(&mut self, w: u32, h: u32) {
        let n = (w * h) as usize;
        let k = self.params.n_mixtures;

        self.weights = Array2::zeros((n, k));
        self.means = Array2::zeros((n, k * 3));
        self.variances = Array2::zeros((n, k * 3));
    }

    fn learning_rate(&self) -> f32 {
        match self.params.learning_rate {
            Some(rate) if rate > 0.0 => rate,
            _ => 1.0 / self.frames.min(self.params.history.max(1) as u64) as f32,
        }
    }
}

impl BackgroundSubtractor for Mog {
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
            .and(self.means.rows_mut())
            .and(self.variances.rows_mut())
            .and(pixels.rows())
            .and(&mut mask)
            .for_each(|mut wt, mut mu, mut var, x, out| {
                let sample = [x[0], x[1], x[2]];
                *out = update_pixel(&params, alpha, &mut wt, &mut mu, &mut var, sample);
            });

        Ok(subtractor::into_mask(w, h, mask))
    }

    #[inline]
    fn name(&self) -> &'static str {
        "MOG"
    }
}

#[inline]
fn sort_key(wt: &ArrayViewMut1<f32>, var: &ArrayViewMut1<f32>, k: usize) -> f32 {
    let spread = var[k * 3] + var[k * 3 + 1] + var[k * 3 + 2];
    wt[k] / spread.max(f32::EPSILON).sqrt()
}

fn swap_modes(
    wt: &mut ArrayViewMut1<f32>,
    mu: &mut ArrayViewMut1<f32>,
    var: &mut ArrayViewMut1<f32>,
    a: usize,
    b: usize,
) {
    wt.swap(a, b);
    for c in 0..3 {
        mu.swap(a * 3 + c, b * 3 + c);
        var.swap(a * 3 + c, b * 3 + c);
    }
}

fn bubble_up(
    wt: &mut ArrayViewMut1<f32>,
    mu: &mut ArrayViewMut1<f32>,
    var: &mut ArrayViewMut1<f32>,
    mut k: usize,
) -> usize {
    while k > 0 && sort_key(wt, var, k) > sort_key(wt, var, k - 1) {
        swap_modes(wt, mu, var, k, k - 1);
        k -= 1;
    }
    k
}

fn update_pixel(
    p: &MogParams,
    alpha: f32,
    wt: &mut ArrayViewMut1<f32>,
    mu: &mut ArrayViewMut1<f32>,
    var: &mut ArrayViewMut1<f32>,
    x: [f32; 3],
) -> u8 {
    let k_max = p.n_mixtures;
    let threshold = p.var_threshold * p.var_threshold;
    let min_var = p.noise_sigma * p.noise_sigma;
    let init_var = min_var * 4.0;

    let mut hit = None;
    let mut k = 0;

    while k < k_max {
        let w = wt[k];
        if w < f32::EPSILON {
            break;
        }

        let d = [
            x[0] - mu[k * 3],
            x[1] - mu[k * 3 + 1],
            x[2] - mu[k * 3 + 2],
        ];
        let dist2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        let spread = var[k * 3] + var[k * 3 + 1] + var[k * 3 + 2];

        if dist2 < threshold * spread {
            wt[k] = w + alpha * (1.0 - w);
            for c in 0..3 {
                mu[k * 3 + c] += alpha * d[c];
                var[k * 3 + c] = (var[k * 3 + c] + alpha * (d[c] * d[c] - var[k * 3 + c])).max(min_var);
            }

            hit = Some(bubble_up(wt, mu, var, k));
            break;
        }

        k += 1;
    }

    let hit = match hit {
        Some(slot) => slot,
        None => {
            // replace the weakest mode, or take the first unused one
            let slot = k.min(k_max - 1);
            wt[slot] = p.initial_weight;
            for c in 0..3 {
                mu[slot * 3 + c] = x[c];
                var[slot * 3 + c] = init_var;
            }

            bubble_up(wt, mu, var, slot)
        }
    };

    // decay everything but the hit so the weights sum to one
    let mut total = 0.0;
    for k in 0..k_max {
        if k != hit {
            wt[k] *= 1.0 - alpha;
        }
        total += wt[k];
    }

    let mut foreground_from = k_max;
    let mut cumulative = 0.0;
    for k in 0..k_max {
        if total > 0.0 {
            wt[k] /= total;
        }
        cumulative += wt[k];
        if cumulative > p.background_ratio && foreground_from == k_max {
            foreground_from = k + 1;
        }
    }

    if hit >= foreground_from {
        FOREGROUND
    } else {
        BACKGROUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtractor::testing;
    use image::Rgb;

    #[test]
    fn learns_static_scene() {
        testing::learns_static_scene(Mog::new(MogParams::default()), 30);
    }

    #[test]
    fn rejects_resized_frames() {
        testing::rejects_resized_frames(Mog::new(MogParams::default()));
    }

    #[test]
    fn first_frame_is_background() {
        let mut model = Mog::new(MogParams::default());
        let mask = model
            .apply(&RgbImage::from_pixel(6, 6, Rgb([30, 60, 90])))
            .unwrap();

        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn weights_sum_to_one() {
        let mut model = Mog::new(MogParams::default());
        let colors = [[10u8, 10, 10], [200, 10, 10], [10, 200, 10], [10, 10, 200]];
        for i in 0..25 {
            let frame = RgbImage::from_pixel(3, 3, Rgb(colors[i % colors.len()]));
            model.apply(&frame).unwrap();
        }

        for row in model.weights.rows() {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-3, "weights sum to {}", sum);
        }
    }
}
