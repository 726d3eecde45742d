use crate::config::Config;
use crate::counter::{Centroid, CounterConfig, LineCounter};
use crate::detection::Detection;
use crate::error::Error;
use crate::frame::{scale_image, Frame, FrameSource};
use crate::mapper::{ContourMapper, MapperConfig};
use crate::refine::{self, MaskRefiner};
use crate::render::{Control, FrameSink, Overlay, Stats};
use crate::subtractor::BackgroundSubtractor;

use image::{GrayImage, RgbImage};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of one frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// refined mask the detections were taken from
    pub mask: GrayImage,
    pub detections: Vec<Detection>,
    /// pending centroids counted in this frame
    pub crossed: Vec<Centroid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub frames: u64,
    pub count: u64,
    pub pending: usize,
}

/// Extract -> refine -> map -> count, one frame at a time.
pub struct Pipeline {
    subtractor: Box<dyn BackgroundSubtractor>,
    refiner: MaskRefiner,
    mapper: ContourMapper,
    counter: LineCounter,
    overlay: Overlay,
    scale: f32,
    frames: u64,
}

impl Pipeline {
    pub fn new(
        subtractor: Box<dyn BackgroundSubtractor>,
        counter: CounterConfig,
        mapper: MapperConfig,
    ) -> Self {
        Self {
            subtractor,
            refiner: MaskRefiner::new(),
            mapper: ContourMapper::new(mapper),
            overlay: Overlay::new(counter.roi_line),
            counter: LineCounter::new(counter),
            scale: 1.0,
            frames: 0,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let subtractor = config.algorithm.build_with(&config.subtractor);
        let overlay = Overlay::from_config(&config.overlay, config.counter.roi_line)?;

        tracing::info!(
            "pipeline: {} subtraction, line at y={} +/- {}, scale {}",
            subtractor.name(),
            config.counter.roi_line,
            config.counter.offset,
            config.scale
        );

        Ok(Self::new(subtractor, config.counter, config.mapper)
            .with_overlay(overlay)
            .with_scale(config.scale))
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        if scale > 0.0 && scale.is_finite() {
            self.scale = scale;
        } else {
            tracing::warn!("ignoring frame scale {}", scale);
        }
        self
    }

    #[inline]
    pub fn counter(&self) -> &LineCounter {
        &self.counter
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.counter.count()
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn algorithm(&self) -> &'static str {
        self.subtractor.name()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            frames: self.frames,
            count: self.counter.count(),
            pending: self.counter.pending_len(),
        }
    }

    /// Frame at the working scale.
    pub fn prepare<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        scale_image(image, self.scale)
    }

    /// Refines a raw foreground mask, maps it to detections and feeds the
    /// counter.
    pub fn process_mask(&mut self, mask: &GrayImage) -> FrameResult {
        let refined = self.refiner.refine(mask);
        let detections = self.mapper.map(&refined);
        let centroids: Vec<_> = detections.iter().map(Detection::centroid).collect();
        let crossed = self.counter.update(&centroids);

        self.frames += 1;
        tracing::debug!(
            "frame {}: {} foreground px, {} detections, {} pending, count {}",
            self.frames,
            refine::foreground_pixels(&refined),
            detections.len(),
            self.counter.pending_len(),
            self.counter.count()
        );

        FrameResult {
            mask: refined,
            detections,
            crossed,
        }
    }

    /// Runs an already prepared image through the whole chain.
    pub fn detect(&mut self, image: &RgbImage) -> Result<FrameResult, Error> {
        let mask = self.subtractor.apply(image)?;
        Ok(self.process_mask(&mask))
    }

    pub fn step(&mut self, frame: &Frame) -> Result<FrameResult, Error> {
        let image = self.prepare(&frame.image);
        self.detect(&image)
    }

    /// Drives the pipeline until the source ends, the sink asks to stop or
    /// `stop` is raised. A read failure ends the run with its error; the
    /// tally so far stays available through [`Pipeline::summary`].
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, stop: &AtomicBool) -> Result<Summary, Error>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        while !stop.load(Ordering::Relaxed) {
            let frame = match source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("frame read failed after {} frames: {}", self.frames, err);
                    return Err(err);
                }
            };

            let image = self.prepare(&frame.image);
            let result = self.detect(&image)?;

            let mut canvas = image.into_owned();
            self.overlay
                .draw(&mut canvas, &result.detections, !result.crossed.is_empty(), self.count());

            let stats = Stats {
                frame: frame.index,
                count: self.count(),
                pending: self.counter.pending_len(),
                detections: result.detections.len(),
            };

            if sink.show(&canvas, &stats)? == Control::Stop {
                tracing::info!("stopped by sink at frame {}", frame.index);
                break;
            }
        }

        let summary = self.summary();
        tracing::info!(
            "{} frames processed, {} vehicles counted, {} pending",
            summary.frames,
            summary.count,
            summary.pending
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtractor::Algorithm;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Algorithm::Mog2.build(),
            CounterConfig::default(),
            MapperConfig::default(),
        )
    }

    fn mask_with_box(y: i32) -> GrayImage {
        let mut mask = GrayImage::new(760, 700);
        draw_filled_rect_mut(&mut mask, Rect::at(500, y).of_size(50, 50), Luma([255]));
        mask
    }

    #[test]
    fn mask_in_band_is_counted() {
        let mut p = pipeline();

        // refined box grows by 2 px each side: 54x54 at (498, 593), centroid y 620
        let result = p.process_mask(&mask_with_box(595));

        assert_eq!(result.detections, vec![Detection::new(498, 593, 54, 54)]);
        assert_eq!(result.crossed.len(), 1);
        assert_eq!(p.count(), 1);
        assert_eq!(p.frames(), 1);
    }

    #[test]
    fn small_blobs_are_ignored() {
        let mut p = pipeline();
        let mut mask = GrayImage::new(200, 200);
        draw_filled_rect_mut(&mut mask, Rect::at(10, 10).of_size(20, 20), Luma([255]));

        assert!(p.process_mask(&mask).detections.is_empty());
        assert_eq!(p.counter().pending_len(), 0);
    }

    #[test]
    fn scale_resizes_before_subtraction() {
        let p = pipeline().with_scale(0.5);
        let image = RgbImage::new(100, 61);

        assert_eq!(p.prepare(&image).dimensions(), (50, 31));
        assert!(matches!(pipeline().prepare(&image), Cow::Borrowed(_)));
    }

    #[test]
    fn bad_scale_is_ignored() {
        let p = pipeline().with_scale(0.0).with_scale(f32::NAN);
        let image = RgbImage::new(10, 10);

        assert_eq!(p.prepare(&image).dimensions(), (10, 10));
    }

    #[test]
    fn step_rejects_resized_frames() {
        let mut p = pipeline();
        let frame = |w, h| Frame {
            index: 0,
            image: RgbImage::new(w, h),
            timestamp: 0.0,
        };

        assert!(p.step(&frame(32, 32)).unwrap().detections.is_empty());
        assert!(matches!(
            p.step(&frame(32, 16)),
            Err(Error::FrameSize { .. })
        ));
    }
}
