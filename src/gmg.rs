use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::subtractor::{self, BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::median_filter;
use ndarray::prelude::*;
use ndarray::Zip;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct GmgParams {
    pub max_features: usize,
    pub learning_rate: f32,
    /// frames spent only learning; their masks are empty
    pub initialization_frames: u32,
    pub quantization_levels: u32,
    pub background_prior: f32,
    pub decision_threshold: f32,
    /// median window size, 0 or 1 disables smoothing
    pub smoothing_size: u32,
    pub update_background_model: bool,
}

impl Default for GmgParams {
    fn default() -> Self {
        Self {
            max_features: 64,
            learning_rate: 0.025,
            initialization_frames: 120,
            quantization_levels: 16,
            background_prior: 0.8,
            decision_threshold: 0.8,
            smoothing_size: 7,
            update_background_model: true,
        }
    }
}

/// Per-pixel histogram of quantized colours; the foreground probability of
/// a sample follows from Bayes' rule with the histogram as likelihood.
pub struct Gmg {
    params: GmgParams,
    dims: Option<(u32, u32)>,
    frames: u32,
    // (pixels, max_features)
    features: Array2<u32>,
    weights: Array2<f32>,
    used: Array1<u8>,
}

impl Gmg {
    pub fn new(mut params: GmgParams) -> Self {
        params.max_features = params.max_features.clamp(1, u8::MAX as usize);
        params.quantization_levels = params.quantization_levels.clamp(1, 256);

        Self {
            params,
            dims: None,
            frames: 0,
            features: Array2::zeros((0, 0)),
            weights: Array2::zeros((0, 0)),
            used: Array1::zeros(0),
        }
    }

    fn allocate(&mut self, w: u32, h: u32) {
        let n = (w * h) as usize;

        self.features = Array2::zeros((n, self.params.max_features));
        self.weights = Array2::zeros((n, self.params.max_features));
        self.used = Array1::zeros(n);
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.frames >= self.params.initialization_frames
    }
}

/// Colour index of a pixel after quantizing each channel to `levels` bins.
#[inline]
fn quantize(x: ArrayView1<f32>, levels: u32) -> u32 {
    let q = |v: f32| ((v as u32 * levels) / 256).min(levels - 1);
    (q(x[0]) * levels + q(x[1])) * levels + q(x[2])
}

fn likelihood(features: &ArrayViewMut1<u32>, weights: &ArrayViewMut1<f32>, used: usize, color: u32) -> f32 {
    (0..used)
        .find(|&i| features[i] == color)
        .map(|i| weights[i])
        .unwrap_or(0.0)
}

/// Adds `weight` to the colour's bin, evicting the lightest bin when full.
fn insert(
    features: &mut ArrayViewMut1<u32>,
    weights: &mut ArrayViewMut1<f32>,
    used: &mut u8,
    color: u32,
    weight: f32,
) {
    let n = *used as usize;

    if let Some(i) = (0..n).find(|&i| features[i] == color) {
        weights[i] += weight;
        return;
    }

    let slot = if n < features.len() {
        *used += 1;
        n
    } else {
        (0..n)
            .min_by(|&a, &b| weights[a].total_cmp(&weights[b]))
            .unwrap_or(0)
    };

    features[slot] = color;
    weights[slot] = weight;
}

fn normalize(weights: &mut ArrayViewMut1<f32>, used: usize) {
    let total: f32 = (0..used).map(|i| weights[i]).sum();
    if total > 0.0 {
        for i in 0..used {
            weights[i] /= total;
        }
    }
}

impl BackgroundSubtractor for Gmg {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        let (w, h) = frame.dimensions();
        if subtractor::check_dims(&mut self.dims, frame)? {
            self.allocate(w, h);
        }

        let p = self.params;
        let pixels = subtractor::pixels_f32(frame);

        if !self.is_initialized() {
            let last = self.frames + 1 == p.initialization_frames;

            Zip::from(self.features.rows_mut())
                .and(self.weights.rows_mut())
                .and(&mut self.used)
                .and(pixels.rows())
                .for_each(|mut features, mut weights, used, x| {
                    let color = quantize(x, p.quantization_levels);
                    insert(&mut features, &mut weights, used, color, 1.0);
                    if last {
                        normalize(&mut weights, *used as usize);
                    }
                });

            self.frames += 1;
            return Ok(GrayImage::new(w, h));
        }

        // foreground probability scaled to 0..=255 for median smoothing
        let mut probability = Array1::<u8>::zeros((w * h) as usize);

        Zip::from(self.features.rows_mut())
            .and(self.weights.rows_mut())
            .and(&mut self.used)
            .and(pixels.rows())
            .and(&mut probability)
            .for_each(|mut features, mut weights, used, x, out| {
                let color = quantize(x, p.quantization_levels);
                let l = likelihood(&features, &weights, *used as usize, color);

                let numerator = l * p.background_prior;
                let denominator = numerator + (1.0 - l) * (1.0 - p.background_prior);
                let background = if denominator > 0.0 { numerator / denominator } else { 0.0 };
                *out = ((1.0 - background) * 255.0).round() as u8;

                if p.update_background_model {
                    for i in 0..*used as usize {
                        weights[i] *= 1.0 - p.learning_rate;
                    }
                    insert(&mut features, &mut weights, used, color, p.learning_rate);
                    normalize(&mut weights, *used as usize);
                }
            });

        self.frames = self.frames.saturating_add(1);

        let mut posterior = subtractor::into_mask(w, h, probability);
        if p.smoothing_size > 1 {
            let radius = p.smoothing_size / 2;
            posterior = median_filter(&posterior, radius, radius);
        }

        let cut = p.decision_threshold * 255.0;
        Ok(GrayImage::from_fn(w, h, |x, y| {
            if posterior.get_pixel(x, y)[0] as f32 > cut {
                Luma([FOREGROUND])
            } else {
                Luma([BACKGROUND])
            }
        }))
    }

    #[inline]
    fn name(&self) -> &'static str {
        "GMG"
    }
}
