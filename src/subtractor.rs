use serde_derive::{Deserialize, Serialize};

use crate::cnt::{Cnt, CntParams};
use crate::error::Error;
use crate::gmg::{Gmg, GmgParams};
use crate::knn::{Knn, KnnParams};
use crate::mog::{Mog, MogParams};
use crate::mog2::{Mog2, Mog2Params};

use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use std::fmt;
use std::str::FromStr;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Stateful per-pixel background model.
///
/// Every call learns from the frame and returns a mask of the same size with
/// foreground pixels set to 255 (shadow-aware models may use a lower
/// non-zero value for shadows).
pub trait BackgroundSubtractor {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error>;

    fn name(&self) -> &'static str;
}

impl<B: BackgroundSubtractor + ?Sized> BackgroundSubtractor for Box<B> {
    #[inline]
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        (**self).apply(frame)
    }

    #[inline]
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    #[serde(rename = "KNN", alias = "knn")]
    Knn,
    #[serde(rename = "GMG", alias = "gmg")]
    Gmg,
    #[serde(rename = "CNT", alias = "cnt")]
    Cnt,
    #[serde(rename = "MOG", alias = "mog")]
    Mog,
    #[serde(rename = "MOG2", alias = "mog2")]
    Mog2,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Knn,
        Algorithm::Gmg,
        Algorithm::Cnt,
        Algorithm::Mog,
        Algorithm::Mog2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Knn => "KNN",
            Algorithm::Gmg => "GMG",
            Algorithm::Cnt => "CNT",
            Algorithm::Mog => "MOG",
            Algorithm::Mog2 => "MOG2",
        }
    }

    /// Builds the model with its default parameters.
    pub fn build(&self) -> Box<dyn BackgroundSubtractor> {
        self.build_with(&SubtractorParams::default())
    }

    /// OpenCV's implementation, falling back to the built-in model when it
    /// cannot be created.
    #[cfg(feature = "opencv")]
    pub fn build_with(&self, params: &SubtractorParams) -> Box<dyn BackgroundSubtractor> {
        match crate::cv::CvSubtractor::new(*self, params) {
            Ok(model) => Box::new(model),
            Err(err) => {
                tracing::warn!("OpenCV {} unavailable, using built-in model: {}", self, err);
                self.build_native(params)
            }
        }
    }

    #[cfg(not(feature = "opencv"))]
    pub fn build_with(&self, params: &SubtractorParams) -> Box<dyn BackgroundSubtractor> {
        self.build_native(params)
    }

    /// The pure Rust model, whatever features are on.
    pub fn build_native(&self, params: &SubtractorParams) -> Box<dyn BackgroundSubtractor> {
        match self {
            Algorithm::Knn => Box::new(Knn::new(params.knn)),
            Algorithm::Gmg => Box::new(Gmg::new(params.gmg)),
            Algorithm::Cnt => Box::new(Cnt::new(params.cnt)),
            Algorithm::Mog => Box::new(Mog::new(params.mog)),
            Algorithm::Mog2 => Box::new(Mog2::new(params.mog2)),
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Mog2
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .iter()
            .copied()
            .find(|algo| algo.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownAlgorithm(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct SubtractorParams {
    pub knn: KnnParams,
    pub gmg: GmgParams,
    pub cnt: CntParams,
    pub mog: MogParams,
    pub mog2: Mog2Params,
}

/// Lazily sized model storage shared by the implementations: the first
/// frame fixes the dimensions, later frames must match them.
pub(crate) fn check_dims(model: &mut Option<(u32, u32)>, frame: &RgbImage) -> Result<bool, Error> {
    let got = frame.dimensions();
    match *model {
        None => {
            *model = Some(got);
            Ok(true)
        }
        Some(expected) if expected == got => Ok(false),
        Some(expected) => Err(Error::FrameSize { expected, got }),
    }
}

/// Frame as an `(h * w, 3)` float array, one row per pixel.
pub(crate) fn pixels_f32(frame: &RgbImage) -> Array2<f32> {
    let (w, h) = frame.dimensions();
    let data = frame.as_raw().iter().map(|&v| v as f32).collect();

    // as_raw() is exactly w * h * 3 values
    Array2::from_shape_vec(((w * h) as usize, 3), data)
        .unwrap_or_else(|_| Array2::zeros(((w * h) as usize, 3)))
}

pub(crate) fn into_mask(w: u32, h: u32, values: Array1<u8>) -> GrayImage {
    GrayImage::from_raw(w, h, values.into_raw_vec()).unwrap_or_else(|| GrayImage::new(w, h))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("MOG2".parse::<Algorithm>().unwrap(), Algorithm::Mog2);
        assert_eq!("knn".parse::<Algorithm>().unwrap(), Algorithm::Knn);
        assert_eq!(" Gmg ".parse::<Algorithm>().unwrap(), Algorithm::Gmg);

        for algo in Algorithm::ALL {
            assert_eq!(algo.to_string().parse::<Algorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        match "MOG3".parse::<Algorithm>() {
            Err(Error::UnknownAlgorithm(name)) => assert_eq!(name, "MOG3"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn built_models_report_their_names() {
        for algo in Algorithm::ALL {
            assert_eq!(algo.build().name(), algo.as_str());
            assert_eq!(algo.build_native(&SubtractorParams::default()).name(), algo.as_str());
        }
    }
}
