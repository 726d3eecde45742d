use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::error::Error;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};

pub const LINE_COLOR: Rgb<u8> = Rgb([0, 127, 255]);
pub const CROSSED_COLOR: Rgb<u8> = Rgb([255, 127, 0]);
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const CENTROID_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LINE_START: f32 = 25.0;
const LINE_END: f32 = 1200.0;
const CENTROID_RADIUS: i32 = 4;
// left end of the text baseline
const TEXT_AT: (i32, i32) = (450, 70);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font for the vehicle count, no text without one
    pub font: Option<PathBuf>,
    pub font_size: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 48.0,
        }
    }
}

/// What the pipeline knows after a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub frame: u64,
    pub count: u64,
    pub pending: usize,
    pub detections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Receives every annotated frame; may ask the run to stop.
pub trait FrameSink {
    fn show(&mut self, frame: &RgbImage, stats: &Stats) -> Result<Control, Error>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    #[inline]
    fn show(&mut self, frame: &RgbImage, stats: &Stats) -> Result<Control, Error> {
        (**self).show(frame, stats)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    #[inline]
    fn show(&mut self, _: &RgbImage, _: &Stats) -> Result<Control, Error> {
        Ok(Control::Continue)
    }
}

/// Writes annotated frames as `frame_000042.png` into a directory.
pub struct ImageDirSink {
    dir: PathBuf,
}

impl ImageDirSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        fs::create_dir_all(dir.as_ref())?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn path_for(&self, frame: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", frame))
    }
}

impl FrameSink for ImageDirSink {
    fn show(&mut self, frame: &RgbImage, stats: &Stats) -> Result<Control, Error> {
        frame.save(self.path_for(stats.frame))?;
        Ok(Control::Continue)
    }
}

/// Draws the counting line, detections and count on a frame.
pub struct Overlay {
    roi_line: i32,
    font: Option<FontVec>,
    font_size: f32,
}

impl Overlay {
    pub fn new(roi_line: i32) -> Self {
        Self {
            roi_line,
            font: None,
            font_size: OverlayConfig::default().font_size,
        }
    }

    pub fn from_config(config: &OverlayConfig, roi_line: i32) -> Result<Self, Error> {
        let mut overlay = Self::new(roi_line);
        overlay.font_size = config.font_size;

        if let Some(path) = &config.font {
            let data = fs::read(path)?;
            overlay.font = Some(FontVec::try_from_vec(data)?);
            tracing::debug!("overlay font loaded from {}", path.display());
        }

        Ok(overlay)
    }

    #[inline]
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, frame: &mut RgbImage, detections: &[Detection], crossed: bool, count: u64) {
        self.draw_line(frame, LINE_COLOR);

        for det in detections {
            draw_box(frame, det);

            let c = det.centroid();
            draw_filled_circle_mut(frame, (c.x, c.y), CENTROID_RADIUS, CENTROID_COLOR);
        }

        if crossed {
            self.draw_line(frame, CROSSED_COLOR);
        }

        if let Some(font) = &self.font {
            let text = format!("Vehicles: {}", count);
            let scale = PxScale::from(self.font_size);
            let top = top_from_baseline(TEXT_AT.1, font.as_scaled(scale).ascent());

            draw_text_mut(frame, TEXT_COLOR, TEXT_AT.0, top, scale, font, &text);
        }
    }

    // 3 px: the line row and one on each side
    fn draw_line(&self, frame: &mut RgbImage, color: Rgb<u8>) {
        for dy in -1..=1 {
            let y = (self.roi_line + dy) as f32;
            draw_line_segment_mut(frame, (LINE_START, y), (LINE_END, y), color);
        }
    }
}

/// `draw_text_mut` places the ascent line at its `y`.
#[inline]
fn top_from_baseline(baseline: i32, ascent: f32) -> i32 {
    baseline - ascent.round() as i32
}

fn draw_box(frame: &mut RgbImage, det: &Detection) {
    draw_hollow_rect_mut(frame, det.rect(), BOX_COLOR);

    if det.w > 2 && det.h > 2 {
        let inner = Rect::at(det.x + 1, det.y + 1).of_size(det.w - 2, det.h - 2);
        draw_hollow_rect_mut(frame, inner, BOX_COLOR);
    }
}

/// Keeps the frame where the mask is set, black elsewhere.
pub fn apply_mask(frame: &RgbImage, mask: &GrayImage) -> Result<RgbImage, Error> {
    if frame.dimensions() != mask.dimensions() {
        return Err(Error::FrameSize {
            expected: frame.dimensions(),
            got: mask.dimensions(),
        });
    }

    let (w, h) = frame.dimensions();
    Ok(RgbImage::from_fn(w, h, |x, y| {
        if mask.get_pixel(x, y)[0] != 0 {
            *frame.get_pixel(x, y)
        } else {
            Rgb([0, 0, 0])
        }
    }))
}
