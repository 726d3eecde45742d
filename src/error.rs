use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image Error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Csv Error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Config Error: {0}")]
    ConfigError(#[from] serde_yaml::Error),

    #[error("Font Error: {0}")]
    FontError(#[from] ab_glyph::InvalidFont),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("unknown background subtraction algorithm {0:?} (expected one of KNN, GMG, CNT, MOG, MOG2)")]
    UnknownAlgorithm(String),

    #[error("frame is {got:?}, model was built for {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("expected {expected} landmarks, got {got}")]
    Landmarks { expected: usize, got: usize },

    #[error("no frames to process")]
    NoFrames,
}
