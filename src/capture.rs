use crate::error::Error;
use crate::frame::{Frame, FrameSource};
use crate::render::{Control, FrameSink, Stats};

use image::RgbImage;
use opencv::{
    core::{self, Mat},
    highgui, imgproc,
    prelude::*,
    videoio,
};
use std::io;

const ESC: i32 = 27;

/// Video file or camera read through OpenCV, frames converted to RGB.
pub struct VideoSource {
    cap: videoio::VideoCapture,
    fps: Option<f32>,
    next_index: u64,
    bgr: Mat,
    rgb: Mat,
}

impl VideoSource {
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
        Self::open(cap, path)
    }

    pub fn from_camera(index: i32) -> Result<Self, Error> {
        let cap = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
        Self::open(cap, &format!("camera {}", index))
    }

    fn open(cap: videoio::VideoCapture, name: &str) -> Result<Self, Error> {
        if !videoio::VideoCapture::is_opened(&cap)? {
            return Err(Error::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cannot open {}", name),
            )));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)? as f32;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)?;
        tracing::info!("opened {}: {}x{} at {} fps", name, width, height, fps);

        Ok(Self {
            cap,
            fps: if fps > 0.0 { Some(fps) } else { None },
            next_index: 0,
            bgr: Mat::default(),
            rgb: Mat::default(),
        })
    }
}

impl FrameSource for VideoSource {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        if !self.cap.read(&mut self.bgr)? || self.bgr.empty() {
            return Ok(None);
        }

        imgproc::cvt_color(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let (w, h) = (self.rgb.cols() as u32, self.rgb.rows() as u32);
        let data = self.rgb.data_bytes()?.to_vec();
        let image = RgbImage::from_raw(w, h, data).ok_or(Error::FrameSize {
            expected: (w, h),
            got: (0, 0),
        })?;

        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(Frame {
            index,
            image,
            timestamp: index as f32 / self.fps.unwrap_or(30.0),
        }))
    }

    #[inline]
    fn fps(&self) -> Option<f32> {
        self.fps
    }
}

/// Copies an RGB image into a BGR `Mat`, the channel order OpenCV expects.
pub(crate) fn to_bgr(frame: &RgbImage) -> Result<Mat, Error> {
    let (w, h) = frame.dimensions();
    let mut rgb = Mat::new_rows_cols_with_default(
        h as i32,
        w as i32,
        core::CV_8UC3,
        core::Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());

    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Preview window; ESC or `q` stops the run.
pub struct WindowSink {
    name: String,
    delay_ms: i32,
}

impl WindowSink {
    pub fn new(name: &str) -> Result<Self, Error> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;

        Ok(Self {
            name: name.to_string(),
            delay_ms: 10,
        })
    }
}

impl FrameSink for WindowSink {
    fn show(&mut self, frame: &RgbImage, _: &Stats) -> Result<Control, Error> {
        let bgr = to_bgr(frame)?;
        highgui::imshow(&self.name, &bgr)?;

        if stop_key(highgui::wait_key(self.delay_ms)?) {
            Ok(Control::Stop)
        } else {
            Ok(Control::Continue)
        }
    }
}

/// ESC or `q`, ignoring modifier bits above the low byte.
fn stop_key(key: i32) -> bool {
    if key < 0 {
        return false;
    }

    let key = key & 0xFF;
    key == ESC || key == 'q' as i32
}

impl Drop for WindowSink {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_keys_ignore_modifiers() {
        assert!(stop_key(ESC));
        assert!(stop_key('q' as i32));
        assert!(stop_key(0x10_0000 | 'q' as i32));
        assert!(stop_key(0x2_0000 | ESC));

        assert!(!stop_key(-1));
        assert!(!stop_key('Q' as i32));
        assert!(!stop_key('w' as i32));
    }
}
