use serde_derive::{Deserialize, Serialize};

use crate::counter::CounterConfig;
use crate::error::Error;
use crate::mapper::MapperConfig;
use crate::render::OverlayConfig;
use crate::subtractor::{Algorithm, SubtractorParams};

use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub algorithm: Algorithm,
    /// frames are resized by this factor before subtraction
    pub scale: f32,
    /// used for timestamps when the source does not know its rate
    pub fps: f32,
    pub counter: CounterConfig,
    pub mapper: MapperConfig,
    pub subtractor: SubtractorParams,
    pub overlay: OverlayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Mog2,
            scale: 1.0,
            fps: 30.0,
            counter: CounterConfig::default(),
            mapper: MapperConfig::default(),
            subtractor: SubtractorParams::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::PendingPolicy;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.counter.roi_line, 620);
        assert_eq!(config.counter.offset, 2);
        assert_eq!(config.mapper.min_width, 40);
        assert_eq!(config.counter.policy, PendingPolicy::KeepAll);
    }

    #[test]
    fn partial_document() {
        let config = Config::parse(
            r#"
algorithm: KNN
scale: 0.5
counter:
  roi_line: 300
  policy:
    kind: nearest
    max_distance: 40.0
    max_missed: 3
subtractor:
  mog2:
    detect_shadows: false
"#,
        )
        .unwrap();

        assert_eq!(config.algorithm, Algorithm::Knn);
        assert_eq!(config.scale, 0.5);
        assert_eq!(config.counter.roi_line, 300);
        assert_eq!(config.counter.offset, 2);
        assert_eq!(
            config.counter.policy,
            PendingPolicy::Nearest {
                max_distance: 40.0,
                max_missed: 3
            }
        );
        assert!(!config.subtractor.mog2.detect_shadows);
        assert_eq!(config.subtractor.mog2.history, 500);
    }

    #[test]
    fn lowercase_algorithm_alias() {
        assert_eq!(Config::parse("algorithm: mog").unwrap().algorithm, Algorithm::Mog);
    }

    #[test]
    fn invalid_algorithm_is_a_config_error() {
        assert!(matches!(
            Config::parse("algorithm: MOG3"),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "algorithm: CNT\nfps: 25.0").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.algorithm, Algorithm::Cnt);
        assert_eq!(config.fps, 25.0);

        assert!(matches!(
            Config::load("/definitely/not/here.yaml"),
            Err(Error::IoError(_))
        ));
    }
}
