use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vcount::compare::{self, PixelCountLog, COMPARE_SCALE, TRAIN_FRAMES};
use vcount::median::{self, MedianDifference};
use vcount::{
    Algorithm, Config, Frame, FrameSink, FrameSource, ImageDirSink, ImageSequence, NullSink,
    Pipeline,
};

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

#[derive(Parser, Debug)]
#[command(name = "vcount", about = "Background subtraction vehicle counter")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count vehicles crossing the line
    Count {
        /// image directory, video file or camera index
        input: String,
        #[arg(long)]
        algorithm: Option<Algorithm>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long)]
        scale: Option<f32>,
        #[arg(long)]
        max_frames: Option<u64>,
        /// write annotated frames here
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
        #[arg(long, value_name = "TTF")]
        font: Option<PathBuf>,
        /// preview window, needs the opencv feature
        #[arg(long)]
        window: bool,
    },
    /// Log per-frame foreground pixel counts of every algorithm
    Compare {
        input: String,
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        #[arg(long, default_value_t = COMPARE_SCALE)]
        scale: f32,
    },
    /// Save each algorithm's mask after a training run
    Snapshot {
        input: String,
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = TRAIN_FRAMES)]
        train_frames: usize,
    },
    /// Median background of randomly sampled frames
    Median {
        /// image directory
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long, default_value_t = 72)]
        samples: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// also write the thresholded difference of this frame
        #[arg(long, value_name = "INDEX")]
        diff: Option<usize>,
    },
}

/// Ends a source after `left` more frames.
struct Limited<S> {
    inner: S,
    left: u64,
}

impl<S: FrameSource> FrameSource for Limited<S> {
    fn read(&mut self) -> Result<Option<Frame>, vcount::Error> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        self.inner.read()
    }

    fn fps(&self) -> Option<f32> {
        self.inner.fps()
    }
}

fn open_source(input: &str, fps: f32) -> Result<Box<dyn FrameSource>> {
    let path = Path::new(input);
    if path.is_dir() {
        let seq = ImageSequence::open(path, fps)
            .with_context(|| format!("Failed to open image sequence {}", path.display()))?;
        info!("{} images in {}", seq.len(), path.display());
        return Ok(Box::new(seq));
    }

    open_video(input)
}

#[cfg(feature = "opencv")]
fn open_video(input: &str) -> Result<Box<dyn FrameSource>> {
    use vcount::VideoSource;

    let source = match input.parse::<i32>() {
        Ok(index) => VideoSource::from_camera(index),
        Err(_) => VideoSource::from_file(input),
    };
    let source = source.with_context(|| format!("Failed to open video {}", input))?;

    Ok(Box::new(source))
}

#[cfg(not(feature = "opencv"))]
fn open_video(input: &str) -> Result<Box<dyn FrameSource>> {
    bail!("{} is not an image directory; video input needs the opencv feature", input)
}

#[cfg(feature = "opencv")]
fn open_window() -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(vcount::WindowSink::new("vcount")?))
}

#[cfg(not(feature = "opencv"))]
fn open_window() -> Result<Box<dyn FrameSink>> {
    bail!("--window needs the opencv feature")
}

#[allow(clippy::too_many_arguments)]
fn count(
    input: &str,
    algorithm: Option<Algorithm>,
    config: Option<PathBuf>,
    scale: Option<f32>,
    max_frames: Option<u64>,
    out_dir: Option<PathBuf>,
    font: Option<PathBuf>,
    window: bool,
) -> Result<()> {
    let mut config = match config {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(algorithm) = algorithm {
        config.algorithm = algorithm;
    }
    if let Some(scale) = scale {
        config.scale = scale;
    }
    if font.is_some() {
        config.overlay.font = font;
    }

    let mut pipeline = Pipeline::from_config(&config)?;

    let source = open_source(input, config.fps)?;
    let mut source: Box<dyn FrameSource> = match max_frames {
        Some(left) => Box::new(Limited { inner: source, left }),
        None => source,
    };

    let mut sink: Box<dyn FrameSink> = match (window, out_dir) {
        (true, _) => open_window()?,
        (false, Some(dir)) => Box::new(
            ImageDirSink::new(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?,
        ),
        (false, None) => Box::new(NullSink),
    };

    let stop = AtomicBool::new(false);
    let summary = pipeline.run(&mut source, &mut sink, &stop)?;

    println!("Vehicles: {}", summary.count);
    Ok(())
}

fn median_background(
    input: &Path,
    out: &Path,
    samples: usize,
    seed: u64,
    diff: Option<usize>,
) -> Result<()> {
    let seq = ImageSequence::open(input, 30.0)
        .with_context(|| format!("Failed to open image sequence {}", input.display()))?;

    let mut frames = Vec::with_capacity(samples);
    for index in median::sample_indices(seq.len(), samples, seed) {
        if let Some(frame) = seq.load(index)? {
            frames.push(frame);
        }
    }

    let background = median::median_frame(&frames)?;
    background
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!("median of {} frames written to {}", frames.len(), out.display());

    if let Some(index) = diff {
        let frame = match seq.load(index)? {
            Some(frame) => frame,
            None => bail!("frame {} is out of range ({} frames)", index, seq.len()),
        };

        let mut model = MedianDifference::new(&background);
        let mask = vcount::BackgroundSubtractor::apply(&mut model, &frame)?;

        let path = out.with_file_name(format!("diff_{:06}.png", index));
        mask.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("difference mask written to {}", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vcount=info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Count {
            input,
            algorithm,
            config,
            scale,
            max_frames,
            out_dir,
            font,
            window,
        } => count(&input, algorithm, config, scale, max_frames, out_dir, font, window),

        Command::Compare { input, csv, scale } => {
            let mut source = open_source(&input, 30.0)?;
            let mut log = PixelCountLog::create(&csv, &Default::default(), scale)
                .with_context(|| format!("Failed to create {}", csv.display()))?;

            let frames = log.run(&mut source)?;
            println!("{} frames logged to {}", frames, csv.display());
            Ok(())
        }

        Command::Snapshot {
            input,
            out_dir,
            train_frames,
        } => {
            let mut source = open_source(&input, 30.0)?;
            let written = compare::snapshot(&mut source, &out_dir, &Default::default(), train_frames)?;

            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }

        Command::Median {
            input,
            out,
            samples,
            seed,
            diff,
        } => median_background(&input, &out, samples, seed, diff),
    }
}
