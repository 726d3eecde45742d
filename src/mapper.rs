use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;
use image::GrayImage;
use imageproc::contours::{find_contours, Contour};

pub const MIN_WIDTH: u32 = 40;
pub const MIN_HEIGHT: u32 = 40;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MapperConfig {
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            min_width: MIN_WIDTH,
            min_height: MIN_HEIGHT,
        }
    }
}

/// Turns a refined mask into size-filtered bounding boxes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContourMapper {
    config: MapperConfig,
}

impl ContourMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Every border of the mask, outer and hole alike, yields one candidate
    /// box; only boxes at least `min_width` x `min_height` are kept.
    pub fn map(&self, mask: &GrayImage) -> Vec<Detection> {
        find_contours::<i32>(mask)
            .iter()
            .filter_map(bounding_box)
            .filter(|det| self.accepts(det))
            .collect()
    }

    #[inline]
    pub fn accepts(&self, det: &Detection) -> bool {
        det.w >= self.config.min_width && det.h >= self.config.min_height
    }
}

fn bounding_box(contour: &Contour<i32>) -> Option<Detection> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);

    for p in &contour.points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    Some(Detection::new(
        min_x,
        min_y,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}
