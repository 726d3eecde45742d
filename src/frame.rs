use crate::error::Error;

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
    pub timestamp: f32, // in seconds
}

/// `image` resized by `scale` with a triangle filter; borrowed at 1.0.
pub fn scale_image(image: &RgbImage, scale: f32) -> Cow<'_, RgbImage> {
    if scale == 1.0 {
        return Cow::Borrowed(image);
    }

    let (w, h) = image.dimensions();
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);

    Cow::Owned(imageops::resize(image, nw, nh, FilterType::Triangle))
}

/// Sequential supplier of frames.
///
/// `Ok(None)` marks the end of the stream, `Err` a failed read. The two are
/// never conflated: callers stop normally on the former and report the latter.
pub trait FrameSource {
    fn read(&mut self) -> Result<Option<Frame>, Error>;

    /// Frames per second used to stamp frames, if the source knows it.
    fn fps(&self) -> Option<f32> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    #[inline]
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        (**self).read()
    }

    #[inline]
    fn fps(&self) -> Option<f32> {
        (**self).fps()
    }
}

pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    next_index: u64,
    fps: f32,
}

impl MemorySource {
    pub fn new<I: IntoIterator<Item = RgbImage>>(frames: I, fps: f32) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            next_index: 0,
            fps,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for MemorySource {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        let image = match self.frames.pop_front() {
            Some(image) => image,
            None => return Ok(None),
        };

        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(Frame {
            index,
            image,
            timestamp: index as f32 / self.fps,
        }))
    }

    #[inline]
    fn fps(&self) -> Option<f32> {
        Some(self.fps)
    }
}

/// Directory of still images played back in file-name order.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
    fps: f32,
}

impl ImageSequence {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f32) -> Result<Self, Error> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);

            if is_image && path.is_file() {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(Error::NoFrames);
        }

        paths.sort();
        tracing::debug!(
            "image sequence {} with {} frames",
            dir.as_ref().display(),
            paths.len()
        );

        Ok(Self {
            paths,
            cursor: 0,
            fps,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Random access used by the median background sampler.
    pub fn load(&self, index: usize) -> Result<Option<RgbImage>, Error> {
        match self.paths.get(index) {
            Some(path) => Ok(Some(image::open(path)?.into_rgb8())),
            None => Ok(None),
        }
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        let path = match self.paths.get(self.cursor) {
            Some(path) => path,
            None => return Ok(None),
        };

        let image = image::open(path)?.into_rgb8();
        let index = self.cursor as u64;
        self.cursor += 1;

        Ok(Some(Frame {
            index,
            image,
            timestamp: index as f32 / self.fps,
        }))
    }

    #[inline]
    fn fps(&self) -> Option<f32> {
        Some(self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn scale_image_rounds_and_borrows_at_unit_scale() {
        let image = RgbImage::new(100, 61);

        assert_eq!(scale_image(&image, 0.35).dimensions(), (35, 21));
        assert_eq!(scale_image(&image, 0.001).dimensions(), (1, 1));
        assert!(matches!(scale_image(&image, 1.0), Cow::Borrowed(_)));
    }

    #[test]
    fn memory_source_ends_with_none() {
        let frames = (0..3).map(|_| RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])));
        let mut source = MemorySource::new(frames, 25.0);

        let mut seen = Vec::new();
        while let Some(frame) = source.read().unwrap() {
            seen.push((frame.index, frame.timestamp));
        }

        assert_eq!(seen, vec![(0, 0.0), (1, 0.04), (2, 0.08)]);
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn image_sequence_reads_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RgbImage::from_pixel(2, 2, Rgb([value; 3]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut seq = ImageSequence::open(dir.path(), 10.0).unwrap();
        assert_eq!(seq.len(), 3);

        let mut values = Vec::new();
        while let Some(frame) = seq.read().unwrap() {
            values.push(frame.image.get_pixel(0, 0)[0]);
        }
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn corrupt_image_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut seq = ImageSequence::open(dir.path(), 10.0).unwrap();
        assert!(seq.read().is_err());
    }

    #[test]
    fn empty_directory_has_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path(), 10.0),
            Err(Error::NoFrames)
        ));
    }
}
