use serde_derive::{Deserialize, Serialize};

use crate::counter::Centroid;
use imageproc::rect::Rect;
use nalgebra as na;

/// Left-top corner and width-height of an accepted foreground region, in px
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Detection {
    #[inline]
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Center of the box, truncated to whole pixels.
    #[inline]
    pub fn centroid(&self) -> Centroid {
        na::Point2::new(self.x + (self.w / 2) as i32, self.y + (self.h / 2) as i32)
    }

    #[inline(always)]
    pub fn right(&self) -> i32 {
        self.x + self.w as i32 - 1
    }

    #[inline(always)]
    pub fn bottom(&self) -> i32 {
        self.y + self.h as i32 - 1
    }

    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::at(self.x, self.y).of_size(self.w.max(1), self.h.max(1))
    }
}
