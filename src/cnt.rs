use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::subtractor::{self, BackgroundSubtractor, BACKGROUND, FOREGROUND};

use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use ndarray::Zip;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CntParams {
    /// frames a value must hold before it becomes background
    pub min_pixel_stability: u32,
    pub max_pixel_stability: u32,
    /// keep a long-standing background through short disturbances
    pub use_history: bool,
    /// grey level difference still counted as "unchanged"
    pub threshold: u8,
}

impl Default for CntParams {
    fn default() -> Self {
        Self {
            min_pixel_stability: 15,
            max_pixel_stability: 15 * 60,
            use_history: true,
            threshold: 30,
        }
    }
}

/// Stability counting on grey levels: a value that stays put long enough
/// becomes the background, anything far from it is foreground.
pub struct Cnt {
    params: CntParams,
    dims: Option<(u32, u32)>,
    previous: Array1<u8>,
    background: Array1<u8>,
    has_background: Array1<bool>,
    stability: Array1<u32>,
    // stability of the current background when it was adopted
    history: Array1<u32>,
}

impl Cnt {
    pub fn new(mut params: CntParams) -> Self {
        params.min_pixel_stability = params.min_pixel_stability.max(1);
        params.max_pixel_stability = params.max_pixel_stability.max(params.min_pixel_stability);

        Self {
            params,
            dims: None,
            previous: Array1::zeros(0),
            background: Array1::zeros(0),
            has_background: Array1::from_elem(0, false),
            stability: Array1::zeros(0),
            history: Array1::zeros(0),
        }
    }

    fn allocate(&mut self, gray: &[u8]) {
        let n = gray.len();

        self.previous = Array1::from(gray.to_vec());
        self.background = Array1::zeros(n);
        self.has_background = Array1::from_elem(n, false);
        self.stability = Array1::zeros(n);
        self.history = Array1::zeros(n);
    }
}

/// ITU-R 601 luma, the usual colour to grey conversion.
pub(crate) fn luma(frame: &RgbImage) -> Vec<u8> {
    frame
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
        })
        .collect()
}

impl BackgroundSubtractor for Cnt {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        let (w, h) = frame.dimensions();
        let gray = luma(frame);
        if subtractor::check_dims(&mut self.dims, frame)? {
            self.allocate(&gray);
        }

        let p = self.params;
        let current = ArrayView1::from(&gray[..]);
        let mut mask = Array1::<u8>::zeros(gray.len());

        Zip::from(&mut self.previous)
            .and(&mut self.background)
            .and(&mut self.has_background)
            .and(&mut self.stability)
            .and(&mut self.history)
            .and(current)
            .for_each(|prev, bg, has_bg, stab, hist, &curr| {
                if curr.abs_diff(*prev) <= p.threshold {
                    *stab = (*stab + 1).min(p.max_pixel_stability);

                    if *stab >= p.min_pixel_stability {
                        let near_background = *has_bg && curr.abs_diff(*bg) <= p.threshold;
                        if !p.use_history || !*has_bg || near_background || *stab > *hist {
                            *bg = curr;
                            *has_bg = true;
                            *hist = (*hist).max(*stab);
                        }
                    }
                } else {
                    *stab = 0;
                    if p.use_history {
                        // every disturbance wears the old background down
                        *hist = hist.saturating_sub(p.min_pixel_stability);
                    } else {
                        *hist = 0;
                    }
                }

                *prev = curr;
            });

        Zip::from(&mut mask)
            .and(&self.background)
            .and(&self.has_background)
            .and(current)
            .for_each(|out, &bg, &has_bg, &curr| {
                *out = if has_bg && curr.abs_diff(bg) > p.threshold {
                    FOREGROUND
                } else {
                    BACKGROUND
                };
            });

        Ok(subtractor::into_mask(w, h, mask))
    }

    #[inline]
    fn name(&self) -> &'static str {
        "CNT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtractor::testing;
    use image::Rgb;

    fn gray(v: u8) -> RgbImage {
        RgbImage::from_pixel(4, 4, Rgb([v, v, v]))
    }

    #[test]
    fn learns_static_scene() {
        testing::learns_static_scene(Cnt::new(CntParams::default()), 20);
    }

    #[test]
    fn rejects_resized_frames() {
        testing::rejects_resized_frames(Cnt::new(CntParams::default()));
    }

    #[test]
    fn no_background_before_min_stability() {
        let mut model = Cnt::new(CntParams::default());
        for _ in 0..10 {
            model.apply(&gray(80)).unwrap();
        }

        // nothing is known yet, so nothing is foreground
        assert!(model.apply(&gray(250)).unwrap().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn parked_object_joins_background() {
        let mut model = Cnt::new(CntParams {
            use_history: false,
            ..Default::default()
        });
        for _ in 0..20 {
            model.apply(&gray(80)).unwrap();
        }

        assert!(model.apply(&gray(200)).unwrap().pixels().all(|p| p[0] == 255));
        for _ in 0..20 {
            model.apply(&gray(200)).unwrap();
        }
        assert!(model.apply(&gray(200)).unwrap().pixels().all(|p| p[0] == 0));
        assert!(model.apply(&gray(80)).unwrap().pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn luma_weights() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(luma(&frame), vec![76]);
        assert_eq!(luma(&gray(200)), vec![200; 16]);
    }
}
