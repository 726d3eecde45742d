use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::frame::{scale_image, Frame, FrameSource};
use crate::refine::{self, MaskRefiner};
use crate::subtractor::{Algorithm, BackgroundSubtractor, SubtractorParams};

use csv::WriterBuilder;
use image::{GrayImage, RgbImage};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Scale the comparison runs at unless told otherwise.
pub const COMPARE_SCALE: f32 = 0.35;
pub const TRAIN_FRAMES: usize = 50;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PixelCountRow {
    pub frame: u64,
    pub algorithm: Algorithm,
    pub pixel_count: usize,
}

/// All five models side by side on one stream.
pub struct Bench {
    models: Vec<(Algorithm, Box<dyn BackgroundSubtractor>)>,
    scale: f32,
}

impl Bench {
    pub fn new(params: &SubtractorParams, scale: f32) -> Self {
        Self {
            models: Algorithm::ALL
                .iter()
                .map(|algo| (*algo, algo.build_with(params)))
                .collect(),
            scale: if scale > 0.0 && scale.is_finite() { scale } else { 1.0 },
        }
    }

    /// Applies every model to the same frame; raw masks in `Algorithm::ALL` order.
    pub fn apply(&mut self, image: &RgbImage) -> Result<Vec<(Algorithm, GrayImage)>, Error> {
        let mut masks = Vec::with_capacity(self.models.len());
        for (algo, model) in self.models.iter_mut() {
            masks.push((*algo, model.apply(image)?));
        }
        Ok(masks)
    }
}

/// Per-frame foreground pixel counts of every algorithm, as CSV.
pub struct PixelCountLog<W: Write> {
    writer: csv::Writer<W>,
    bench: Bench,
    rows: u64,
}

impl PixelCountLog<File> {
    pub fn create<P: AsRef<Path>>(path: P, params: &SubtractorParams, scale: f32) -> Result<Self, Error> {
        let file = File::create(path)?;
        Ok(Self::new(file, params, scale))
    }
}

impl<W: Write> PixelCountLog<W> {
    pub fn new(writer: W, params: &SubtractorParams, scale: f32) -> Self {
        Self {
            writer: WriterBuilder::new().has_headers(true).from_writer(writer),
            bench: Bench::new(params, scale),
            rows: 0,
        }
    }

    pub fn record(&mut self, frame: &Frame) -> Result<Vec<PixelCountRow>, Error> {
        let image = scale_image(&frame.image, self.bench.scale);
        let mut rows = Vec::new();

        for (algorithm, mask) in self.bench.apply(&image)? {
            let row = PixelCountRow {
                frame: frame.index,
                algorithm,
                pixel_count: refine::foreground_pixels(&mask),
            };
            self.writer.serialize(&row)?;
            rows.push(row);
        }

        self.rows += rows.len() as u64;
        Ok(rows)
    }

    /// Logs the whole stream, returns the number of frames.
    pub fn run<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Result<u64, Error> {
        let mut frames = 0;
        while let Some(frame) = source.read()? {
            self.record(&frame)?;
            frames += 1;
        }

        self.flush()?;
        tracing::info!("{} frames compared, {} rows written", frames, self.rows);

        Ok(frames)
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, Error> {
        self.writer
            .into_inner()
            .map_err(|err| Error::IoError(io::Error::new(err.error().kind(), err.error().to_string())))
    }
}

/// Trains all five models on the first `train_frames` frames, applies them
/// once more to the last one, then writes that frame as `original_frame.jpg`
/// and each model's refined mask of it as `{ALGO}_mask.jpg`. Returns the
/// written files.
pub fn snapshot<S, P>(
    source: &mut S,
    out_dir: P,
    params: &SubtractorParams,
    train_frames: usize,
) -> Result<Vec<PathBuf>, Error>
where
    S: FrameSource + ?Sized,
    P: AsRef<Path>,
{
    let out_dir = out_dir.as_ref();
    let mut bench = Bench::new(params, 1.0);
    let refiner = MaskRefiner::new();

    let (frame, masks) = train(&mut bench, source, train_frames)?;

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(masks.len() + 1);

    let path = out_dir.join("original_frame.jpg");
    frame.image.save(&path)?;
    written.push(path);

    for (algo, mask) in masks {
        let path = out_dir.join(format!("{}_mask.jpg", algo));
        refiner.refine(&mask).save(&path)?;
        written.push(path);
    }

    tracing::info!("{} snapshots written to {}", written.len(), out_dir.display());
    Ok(written)
}

/// Feeds up to `train_frames` frames, then the last of them again; returns
/// that frame with the masks of the extra pass.
fn train<S: FrameSource + ?Sized>(
    bench: &mut Bench,
    source: &mut S,
    train_frames: usize,
) -> Result<(Frame, Vec<(Algorithm, GrayImage)>), Error> {
    let mut last = None;
    let mut seen = 0;

    for _ in 0..train_frames.max(1) {
        match source.read()? {
            Some(frame) => {
                bench.apply(&frame.image)?;
                seen += 1;
                last = Some(frame);
            }
            None => break,
        }
    }

    let frame = last.ok_or(Error::NoFrames)?;
    if seen < train_frames {
        tracing::warn!("stream ended after {} of {} training frames", seen, train_frames);
    }

    let masks = bench.apply(&frame.image)?;
    Ok((frame, masks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MemorySource;
    use crate::subtractor::testing;

    fn frames(n: usize) -> MemorySource {
        MemorySource::new((0..n).map(|_| testing::scene(40, 30)), 30.0)
    }

    #[test]
    fn log_has_one_row_per_algorithm_and_frame() {
        let mut log = PixelCountLog::new(Vec::new(), &SubtractorParams::default(), 1.0);
        assert_eq!(log.run(&mut frames(3)).unwrap(), 3);

        let bytes = log.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "frame,algorithm,pixel_count");
        assert_eq!(lines.len(), 1 + 3 * 5);
        assert!(lines[1].starts_with("0,KNN,"));
        assert!(lines[5].starts_with("0,MOG2,"));
        assert!(lines[15].starts_with("2,MOG2,"));
    }

    #[test]
    fn log_rows_read_back() {
        let mut log = PixelCountLog::new(Vec::new(), &SubtractorParams::default(), 0.5);
        let mut source = frames(2);
        while let Some(frame) = source.read().unwrap() {
            log.record(&frame).unwrap();
        }

        let bytes = log.into_inner().unwrap();
        let rows: Vec<PixelCountRow> = csv::Reader::from_reader(&bytes[..])
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 10);
        // GMG is still initializing
        assert!(rows
            .iter()
            .filter(|r| r.algorithm == Algorithm::Gmg)
            .all(|r| r.pixel_count == 0));
        // at half scale a frame has 20 * 15 pixels
        assert!(rows.iter().all(|r| r.pixel_count <= 300));
    }

    #[test]
    fn snapshot_writes_original_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let written = snapshot(&mut frames(10), dir.path(), &SubtractorParams::default(), 5).unwrap();

        assert_eq!(written.len(), 6);
        for name in [
            "original_frame.jpg",
            "KNN_mask.jpg",
            "GMG_mask.jpg",
            "CNT_mask.jpg",
            "MOG_mask.jpg",
            "MOG2_mask.jpg",
        ] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }
    }

    #[test]
    fn snapshot_of_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            snapshot(&mut frames(0), dir.path(), &SubtractorParams::default(), 5),
            Err(Error::NoFrames)
        ));
    }

    /// Mask value is the number of frames seen so far.
    struct Tally(u8);

    impl BackgroundSubtractor for Tally {
        fn apply(&mut self, frame: &RgbImage) -> Result<GrayImage, Error> {
            self.0 += 1;
            let (w, h) = frame.dimensions();
            Ok(GrayImage::from_pixel(w, h, image::Luma([self.0])))
        }

        fn name(&self) -> &'static str {
            "TALLY"
        }
    }

    #[test]
    fn training_ends_with_extra_pass_on_last_frame() {
        let mut bench = Bench {
            models: vec![(Algorithm::Mog2, Box::new(Tally(0)) as Box<dyn BackgroundSubtractor>)],
            scale: 1.0,
        };

        let (frame, masks) = train(&mut bench, &mut frames(10), 5).unwrap();

        assert_eq!(frame.index, 4);
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].1.get_pixel(0, 0)[0], 6);
    }

    #[test]
    fn short_stream_still_gets_extra_pass() {
        let mut bench = Bench {
            models: vec![(Algorithm::Knn, Box::new(Tally(0)) as Box<dyn BackgroundSubtractor>)],
            scale: 1.0,
        };

        let (frame, masks) = train(&mut bench, &mut frames(3), 50).unwrap();

        assert_eq!(frame.index, 2);
        assert_eq!(masks[0].1.get_pixel(0, 0)[0], 4);
    }
}
