//! End-to-end counting on synthetic masks and frames.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::sync::atomic::{AtomicBool, Ordering};

use vcount::median::MedianDifference;
use vcount::{
    Algorithm, Control, CounterConfig, Error, Frame, FrameSink, FrameSource, MapperConfig,
    NullSink, PendingPolicy, Pipeline, Stats,
};

const WIDTH: u32 = 600;
const HEIGHT: u32 = 760;
const FRAMES: u32 = 100;

// ============================================================================
// Helpers
// ============================================================================

/// Top of the box in frame `i`. The refined box is 2 px taller on each side,
/// so its centroid sits at `7 * i + 25` and hits the line (620) at i = 85.
fn box_top(i: u32) -> i32 {
    7 * i as i32
}

fn moving_mask(i: u32) -> GrayImage {
    let mut mask = GrayImage::new(WIDTH, HEIGHT);
    draw_filled_rect_mut(&mut mask, Rect::at(500, box_top(i)).of_size(50, 50), Luma([255]));
    mask
}

fn pipeline(policy: PendingPolicy) -> Pipeline {
    let counter = CounterConfig {
        policy,
        ..Default::default()
    };
    Pipeline::new(Algorithm::Mog2.build(), counter, MapperConfig::default())
}

fn nearest() -> PendingPolicy {
    PendingPolicy::Nearest {
        max_distance: 30.0,
        max_missed: 3,
    }
}

fn background() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([40, 60, 50]))
}

/// Frames of a bright box driving down the lane, made on demand.
struct MovingBox {
    next: u32,
    total: u32,
}

impl FrameSource for MovingBox {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        if self.next >= self.total {
            return Ok(None);
        }

        let i = self.next;
        self.next += 1;

        let mut image = background();
        draw_filled_rect_mut(
            &mut image,
            Rect::at(500, box_top(i)).of_size(50, 50),
            Rgb([250, 250, 250]),
        );

        Ok(Some(Frame {
            index: i as u64,
            image,
            timestamp: i as f32 / 30.0,
        }))
    }
}

/// Fails after `ok` frames.
struct Broken {
    ok: u32,
}

impl FrameSource for Broken {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        if self.ok == 0 {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated stream",
            )));
        }
        self.ok -= 1;

        Ok(Some(Frame {
            index: 0,
            image: RgbImage::new(64, 64),
            timestamp: 0.0,
        }))
    }
}

#[derive(Default)]
struct Recorder {
    stats: Vec<Stats>,
    stop_after: Option<usize>,
}

impl FrameSink for Recorder {
    fn show(&mut self, frame: &RgbImage, stats: &Stats) -> Result<Control, Error> {
        assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
        self.stats.push(*stats);

        match self.stop_after {
            Some(n) if self.stats.len() >= n => Ok(Control::Stop),
            _ => Ok(Control::Continue),
        }
    }
}

// ============================================================================
// Masks straight into the refine -> map -> count chain
// ============================================================================

#[test]
fn moving_object_is_counted_once() {
    let mut p = pipeline(PendingPolicy::KeepAll);
    let mut crossed_at = Vec::new();

    for i in 0..FRAMES {
        let result = p.process_mask(&moving_mask(i));
        assert_eq!(result.detections.len(), 1, "frame {}", i);
        if !result.crossed.is_empty() {
            crossed_at.push(i);
        }
    }

    assert_eq!(p.count(), 1);
    assert_eq!(crossed_at, vec![85]);
    // every other sighting of the object stays pending
    assert_eq!(p.counter().pending_len(), FRAMES as usize - 1);
}

#[test]
fn nearest_policy_empties_once_object_leaves() {
    let mut p = pipeline(nearest());

    for i in 0..FRAMES {
        p.process_mask(&moving_mask(i));
        assert!(p.counter().pending_len() <= 1);
    }
    assert_eq!(p.count(), 1);

    let empty = GrayImage::new(WIDTH, HEIGHT);
    for _ in 0..4 {
        p.process_mask(&empty);
    }

    assert_eq!(p.count(), 1);
    assert_eq!(p.counter().pending_len(), 0);
}

#[test]
fn empty_masks_never_count() {
    let mut p = pipeline(PendingPolicy::KeepAll);
    let empty = GrayImage::new(WIDTH, HEIGHT);

    for _ in 0..50 {
        let result = p.process_mask(&empty);
        assert!(result.detections.is_empty());
        assert!(result.crossed.is_empty());
    }

    assert_eq!(p.count(), 0);
    assert_eq!(p.counter().pending_len(), 0);
}

#[test]
fn parked_object_grows_pending() {
    let mut p = pipeline(PendingPolicy::KeepAll);
    let mut mask = GrayImage::new(WIDTH, HEIGHT);
    draw_filled_rect_mut(&mut mask, Rect::at(100, 75).of_size(50, 50), Luma([255]));

    for n in 1..=200 {
        p.process_mask(&mask);
        assert_eq!(p.counter().pending_len(), n);
    }
    assert_eq!(p.count(), 0);
}

#[test]
fn expire_policy_bounds_pending() {
    let mut p = pipeline(PendingPolicy::Expire { max_age: 10 });
    let mut mask = GrayImage::new(WIDTH, HEIGHT);
    draw_filled_rect_mut(&mut mask, Rect::at(100, 75).of_size(50, 50), Luma([255]));

    for _ in 0..200 {
        p.process_mask(&mask);
        assert!(p.counter().pending_len() <= 11);
    }
}

// ============================================================================
// Full runs over frame sources
// ============================================================================

#[test]
fn run_counts_moving_box() {
    let mut p = Pipeline::new(
        Box::new(MedianDifference::new(&background())),
        CounterConfig::default(),
        MapperConfig::default(),
    );
    let mut source = MovingBox {
        next: 0,
        total: FRAMES,
    };
    let mut sink = Recorder::default();

    let summary = p.run(&mut source, &mut sink, &AtomicBool::new(false)).unwrap();

    assert_eq!(summary.frames, FRAMES as u64);
    assert_eq!(summary.count, 1);
    assert_eq!(sink.stats.len(), FRAMES as usize);
    assert_eq!(sink.stats[84].count, 0);
    assert_eq!(sink.stats[85].count, 1);
    assert!(sink.stats.iter().all(|s| s.detections == 1));
}

#[test]
fn sink_can_stop_the_run() {
    let mut p = Pipeline::new(
        Box::new(MedianDifference::new(&background())),
        CounterConfig::default(),
        MapperConfig::default(),
    );
    let mut sink = Recorder {
        stop_after: Some(3),
        ..Default::default()
    };

    let summary = p
        .run(
            &mut MovingBox {
                next: 0,
                total: FRAMES,
            },
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(sink.stats.len(), 3);
}

#[test]
fn raised_stop_flag_reads_nothing() {
    let mut p = pipeline(PendingPolicy::KeepAll);
    let stop = AtomicBool::new(false);
    stop.store(true, Ordering::Relaxed);

    let mut source = MovingBox { next: 0, total: 5 };
    let summary = p.run(&mut source, &mut NullSink, &stop).unwrap();

    assert_eq!(summary.frames, 0);
    assert_eq!(source.next, 0);
}

#[test]
fn read_error_is_not_end_of_stream() {
    let mut p = pipeline(PendingPolicy::KeepAll);

    let err = p
        .run(&mut Broken { ok: 2 }, &mut NullSink, &AtomicBool::new(false))
        .unwrap_err();

    assert!(matches!(err, Error::IoError(_)));
    assert_eq!(p.summary().frames, 2);
    assert_eq!(p.count(), 0);
}
