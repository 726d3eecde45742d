use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use nalgebra as na;

pub type Landmark = na::Point2<f32>;

/// Face mesh indices, p1..p6 of each eye and p1..p8 of the mouth.
pub const LEFT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
pub const RIGHT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const MOUTH: [usize; 8] = [61, 39, 37, 0, 267, 269, 291, 405];

#[inline]
fn check(points: &[Landmark], expected: usize) -> Result<(), Error> {
    if points.len() != expected {
        return Err(Error::Landmarks {
            expected,
            got: points.len(),
        });
    }
    Ok(())
}

/// `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`, 0 for a degenerate eye.
pub fn eye_aspect_ratio(eye: &[Landmark]) -> Result<f32, Error> {
    check(eye, 6)?;

    let a = na::distance(&eye[1], &eye[5]);
    let b = na::distance(&eye[2], &eye[4]);
    let c = na::distance(&eye[0], &eye[3]);

    Ok(if c > 0.0 { (a + b) / (2.0 * c) } else { 0.0 })
}

/// `(|p2-p8| + |p3-p7| + |p4-p6|) / (2 |p1-p5|)`, 0 for a degenerate mouth.
pub fn mouth_aspect_ratio(mouth: &[Landmark]) -> Result<f32, Error> {
    check(mouth, 8)?;

    let a = na::distance(&mouth[1], &mouth[7]);
    let b = na::distance(&mouth[2], &mouth[6]);
    let c = na::distance(&mouth[3], &mouth[5]);
    let d = na::distance(&mouth[0], &mouth[4]);

    Ok(if d > 0.0 { (a + b + c) / (2.0 * d) } else { 0.0 })
}

fn pick<const N: usize>(mesh: &[Landmark], ids: [usize; N]) -> Result<[Landmark; N], Error> {
    let needed = ids.iter().max().map_or(0, |m| m + 1);
    if mesh.len() < needed {
        return Err(Error::Landmarks {
            expected: needed,
            got: mesh.len(),
        });
    }

    Ok(ids.map(|i| mesh[i]))
}

/// Mean EAR of both eyes and the MAR of a full face mesh.
pub fn face_ratios(mesh: &[Landmark]) -> Result<(f32, f32), Error> {
    let left = eye_aspect_ratio(&pick(mesh, LEFT_EYE)?)?;
    let right = eye_aspect_ratio(&pick(mesh, RIGHT_EYE)?)?;
    let mar = mouth_aspect_ratio(&pick(mesh, MOUTH)?)?;

    Ok(((left + right) / 2.0, mar))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct FatigueConfig {
    /// eyes count as closed below this EAR
    pub ear_threshold: f32,
    /// a yawn is reported above this MAR
    pub mar_threshold: f32,
    pub closed_frames: u32,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            mar_threshold: 0.55,
            closed_frames: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Alert,
    Fatigue,
    Yawning,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub status: Status,
    /// eyes closed for at least `closed_frames` frames
    pub alarm: bool,
    pub ear: f32,
    pub mar: f32,
    pub blinks: u32,
}

/// Blink and closed-eye state over consecutive frames.
#[derive(Debug, Clone, Default)]
pub struct FatigueMonitor {
    config: FatigueConfig,
    blinks: u32,
    closed: u32,
    eye_closed: bool,
}

impl FatigueMonitor {
    pub fn new(config: FatigueConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    #[inline]
    pub fn blinks(&self) -> u32 {
        self.blinks
    }

    #[inline]
    pub fn closed_frames(&self) -> u32 {
        self.closed
    }

    pub fn update(&mut self, ear: f32, mar: f32) -> Reading {
        let mut status = Status::Alert;
        let mut alarm = false;

        if ear < self.config.ear_threshold {
            self.closed += 1;
            if !self.eye_closed {
                self.blinks += 1;
                self.eye_closed = true;
            }
            if self.closed >= self.config.closed_frames {
                alarm = true;
                status = Status::Fatigue;
            }
        } else {
            self.closed = 0;
            self.eye_closed = false;
        }

        if mar > self.config.mar_threshold {
            status = Status::Yawning;
        }

        if alarm && self.closed == self.config.closed_frames {
            tracing::warn!("eyes closed for {} frames", self.closed);
        }

        Reading {
            status,
            alarm,
            ear,
            mar,
            blinks: self.blinks,
        }
    }

    pub fn observe(&mut self, mesh: &[Landmark]) -> Result<Reading, Error> {
        let (ear, mar) = face_ratios(mesh)?;
        Ok(self.update(ear, mar))
    }

    pub fn reset(&mut self) {
        self.blinks = 0;
        self.closed = 0;
        self.eye_closed = false;
    }
}
