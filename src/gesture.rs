use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::fatigue::Landmark;

use image::Rgb;

pub const HAND_LANDMARKS: usize = 21;

const THUMB_TIP: usize = 4;
const THUMB_IP: usize = 3;
const FINGER_TIPS: [usize; 4] = [8, 12, 16, 20];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Raised state of thumb, index, middle, ring and pinky.
pub type Fingers = [bool; 5];

/// The thumb is up when its tip lies outside the joint below it (left of it
/// for a right hand in image coordinates); other fingers when the tip is
/// above the joint two landmarks down.
pub fn fingers_up(hand: &[Landmark], side: Handedness) -> Result<Fingers, Error> {
    if hand.len() != HAND_LANDMARKS {
        return Err(Error::Landmarks {
            expected: HAND_LANDMARKS,
            got: hand.len(),
        });
    }

    let mut fingers = [false; 5];
    fingers[0] = match side {
        Handedness::Right => hand[THUMB_TIP].x < hand[THUMB_IP].x,
        Handedness::Left => hand[THUMB_TIP].x > hand[THUMB_IP].x,
    };

    for (slot, tip) in fingers[1..].iter_mut().zip(FINGER_TIPS) {
        *slot = hand[tip].y < hand[tip - 2].y;
    }

    Ok(fingers)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Index,
    IndexMiddle,
    IndexMiddleRing,
    IndexPinky,
    Pinky,
    Thumb,
    Fist,
    OpenHand,
    Other,
}

impl From<Fingers> for Gesture {
    fn from(f: Fingers) -> Self {
        match f {
            [false, true, false, false, false] => Gesture::Index,
            [false, true, true, false, false] => Gesture::IndexMiddle,
            [false, true, true, true, false] => Gesture::IndexMiddleRing,
            [false, true, false, false, true] => Gesture::IndexPinky,
            [false, false, false, false, true] => Gesture::Pinky,
            [true, false, false, false, false] => Gesture::Thumb,
            [false, false, false, false, false] => Gesture::Fist,
            [true, true, true, true, true] => Gesture::OpenHand,
            _ => Gesture::Other,
        }
    }
}

#[inline]
pub fn raised(fingers: &Fingers) -> usize {
    fingers.iter().filter(|up| **up).count()
}

/// Drawing-board command selected by the number of raised fingers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brush {
    Paint(Rgb<u8>),
    Eraser,
    Clear,
}

pub fn brush(fingers: &Fingers) -> Option<Brush> {
    match raised(fingers) {
        1 => Some(Brush::Paint(Rgb([0, 0, 255]))),
        2 => Some(Brush::Paint(Rgb([0, 255, 0]))),
        3 => Some(Brush::Paint(Rgb([255, 0, 0]))),
        4 => Some(Brush::Eraser),
        5 => Some(Brush::Clear),
        _ => None,
    }
}

/// Stroke radius from the index tip depth; nearer the camera is thicker.
pub fn brush_thickness(depth: f32) -> u32 {
    if depth < -60.0 {
        30
    } else if depth <= -40.0 {
        20
    } else {
        10
    }
}
