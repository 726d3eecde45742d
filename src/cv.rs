//! OpenCV implementations of the five background subtractors.

use crate::capture::to_bgr;
use crate::error::Error;
use crate::subtractor::{self, Algorithm, BackgroundSubtractor, SubtractorParams};

use image::{GrayImage, RgbImage};
use opencv::{
    bgsegm,
    core::{Mat, Ptr},
    prelude::*,
    video,
};

enum Model {
    Knn(Ptr<dyn video::BackgroundSubtractorKNN>),
    Gmg(Ptr<dyn bgsegm::BackgroundSubtractorGMG>),
    Cnt(Ptr<dyn bgsegm::BackgroundSubtractorCNT>),
    Mog(Ptr<dyn bgsegm::BackgroundSubtractorMOG>),
    Mog2(Ptr<dyn video::BackgroundSubtractorMOG2>),
}

/// `cv::BackgroundSubtractor` behind the crate's trait. Frames go in as
/// BGR, the mask comes back as is (shadows 127 for KNN and MOG2).
pub struct CvSubtractor {
    algorithm: Algorithm,
    model: Model,
    learning_rate: f64,
    dims: Option<(u32, u32)>,
    mask: Mat,
}

impl CvSubtractor {
    pub fn new(algorithm: Algorithm, params: &SubtractorParams) -> Result<Self, Error> {
        let mut learning_rate = None;

        let model = match algorithm {
            Algorithm::Knn => {
                let p = &params.knn;
                Model::Knn(video::create_background_subtractor_knn(
                    p.history as i32,
                    p.dist2_threshold as f64,
                    p.detect_shadows,
                )?)
            }
            Algorithm::Gmg => {
                let p = &params.gmg;
                Model::Gmg(bgsegm::create_background_subtractor_gmg(
                    p.initialization_frames as i32,
                    p.decision_threshold as f64,
                )?)
            }
            Algorithm::Cnt => {
                let p = &params.cnt;
                Model::Cnt(bgsegm::create_background_subtractor_cnt(
                    p.min_pixel_stability as i32,
                    p.use_history,
                    p.max_pixel_stability as i32,
                    true,
                )?)
            }
            Algorithm::Mog => {
                let p = &params.mog;
                learning_rate = p.learning_rate;
                Model::Mog(bgsegm::create_background_subtractor_mog(
                    p.history as i32,
                    p.n_mixtures as i32,
                    p.background_ratio as f64,
                    p.noise_sigma as f64,
                )?)
            }
            Algorithm::Mog2 => {
                let p = &params.mog2;
                learning_rate = p.learning_rate;
                Model::Mog2(video::create_background_subtractor_mog2(
                    p.history as i32,
                    p.var_threshold as f64,
                    p.detect_shadows,
                )?)
            }
        };

        tracing::debug!("OpenCV {} background subtractor created", algorithm);

        Ok(Self {
            algorithm,
            model,
            // negative lets OpenCV pick the rate from the history length
            learning_rate: learning_rate.map_or(-1.0, f64::from),
            dims: None,
            mask: Mat::default(),
        })
    }
}

impl BackgroundSubtractor for CvSubtractor {
    fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
        subtractor::check_dims(&mut self.dims, frame)?;

        let bgr = to_bgr(frame)?;
        let rate = self.learning_rate;
        let mask = &mut self.mask;

        match &mut self.model {
            Model::Knn(m) => video::BackgroundSubtractor::apply(m.as_mut(), &bgr, mask, rate)?,
            Model::Gmg(m) => video::BackgroundSubtractor::apply(m.as_mut(), &bgr, mask, rate)?,
            Model::Cnt(m) => video::BackgroundSubtractor::apply(m.as_mut(), &bgr, mask, rate)?,
            Model::Mog(m) => video::BackgroundSubtractor::apply(m.as_mut(), &bgr, mask, rate)?,
            Model::Mog2(m) => video::BackgroundSubtractor::apply(m.as_mut(), &bgr, mask, rate)?,
        }

        let (w, h) = frame.dimensions();
        if self.mask.rows() <= 0 || self.mask.cols() <= 0 {
            return Ok(GrayImage::new(w, h));
        }

        let got = (self.mask.cols() as u32, self.mask.rows() as u32);
        let data = self.mask.data_bytes()?.to_vec();

        GrayImage::from_raw(got.0, got.1, data).ok_or(Error::FrameSize {
            expected: (w, h),
            got,
        })
    }

    #[inline]
    fn name(&self) -> &'static str {
        self.algorithm.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtractor::testing;

    fn model(algorithm: Algorithm) -> CvSubtractor {
        CvSubtractor::new(algorithm, &SubtractorParams::default()).unwrap()
    }

    #[test]
    fn every_algorithm_is_wrapped() {
        for algo in Algorithm::ALL {
            let mut m = model(algo);
            assert_eq!(m.name(), algo.as_str());

            let mask = m.apply(&testing::scene(40, 30)).unwrap();
            assert_eq!(mask.dimensions(), (40, 30));
        }
    }

    #[test]
    fn mog2_learns_static_scene() {
        testing::learns_static_scene(model(Algorithm::Mog2), 60);
    }

    #[test]
    fn knn_learns_static_scene() {
        testing::learns_static_scene(model(Algorithm::Knn), 60);
    }

    #[test]
    fn rejects_resized_frames() {
        for algo in Algorithm::ALL {
            testing::rejects_resized_frames(model(algo));
        }
    }
}
