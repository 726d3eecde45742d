pub mod cnt;
pub mod compare;
pub mod config;
pub mod counter;
pub mod detection;
pub mod error;
pub mod fatigue;
pub mod frame;
pub mod gesture;
pub mod gmg;
pub mod knn;
pub mod mapper;
pub mod median;
pub mod mog;
pub mod mog2;
pub mod pipeline;
pub mod refine;
pub mod render;
pub mod subtractor;

#[cfg(feature = "opencv")]
pub mod capture;
#[cfg(feature = "opencv")]
pub mod cv;

pub use config::Config;
pub use counter::{Centroid, CounterConfig, LineCounter, PendingPolicy};
pub use detection::Detection;
pub use error::Error;
pub use frame::{Frame, FrameSource, ImageSequence, MemorySource};
pub use mapper::{ContourMapper, MapperConfig};
pub use pipeline::{FrameResult, Pipeline, Summary};
pub use refine::MaskRefiner;
pub use render::{Control, FrameSink, ImageDirSink, NullSink, Overlay, Stats};
pub use subtractor::{Algorithm, BackgroundSubtractor};

#[cfg(feature = "opencv")]
pub use capture::{VideoSource, WindowSink};
#[cfg(feature = "opencv")]
pub use cv::CvSubtractor;
