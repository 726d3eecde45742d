use serde_derive::{Deserialize, Serialize};

use nalgebra as na;

pub type Centroid = na::Point2<i32>;

pub const ROI_LINE: i32 = 620;
pub const PIXEL_OFFSET: i32 = 2;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CounterConfig {
    /// y coordinate of the counting line
    pub roi_line: i32,
    /// half-width of the open band around the line
    pub offset: i32,
    pub policy: PendingPolicy,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            roi_line: ROI_LINE,
            offset: PIXEL_OFFSET,
            policy: PendingPolicy::KeepAll,
        }
    }
}

/// What happens to centroids that have not crossed yet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPolicy {
    /// Every detection is appended and only leaves the set by crossing.
    /// An object seen for N frames before the line is pending N times, and
    /// static foreground grows the set without bound.
    KeepAll,

    /// Entries older than `max_age` frames are dropped.
    Expire { max_age: u32 },

    /// A detection within `max_distance` px of a pending entry moves that
    /// entry instead of adding a new one. Entries without a match for more
    /// than `max_missed` frames are dropped.
    Nearest { max_distance: f32, max_missed: u32 },
}

impl Default for PendingPolicy {
    fn default() -> Self {
        PendingPolicy::KeepAll
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    pos: Centroid,
    age: u32,
    missed: u32,
}

impl Pending {
    #[inline]
    fn new(pos: Centroid) -> Self {
        Self {
            pos,
            age: 0,
            missed: 0,
        }
    }
}

/// Tally of centroids passing through the band around a horizontal line.
#[derive(Debug, Clone)]
pub struct LineCounter {
    config: CounterConfig,
    pending: Vec<Pending>,
    count: u64,
}

impl LineCounter {
    pub fn new(config: CounterConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn pending(&self) -> impl Iterator<Item = &Centroid> {
        self.pending.iter().map(|p| &p.pos)
    }

    /// Open band `(line - offset, line + offset)`.
    #[inline]
    pub fn in_band(&self, y: i32) -> bool {
        self.config.roi_line - self.config.offset < y && y < self.config.roi_line + self.config.offset
    }

    /// Feeds one frame's centroids and returns the entries counted in it.
    pub fn update(&mut self, centroids: &[Centroid]) -> Vec<Centroid> {
        match self.config.policy {
            PendingPolicy::Nearest { max_distance, .. } => self.associate(centroids, max_distance),
            _ => {
                for p in self.pending.iter_mut() {
                    p.age += 1;
                }
                self.pending.extend(centroids.iter().copied().map(Pending::new));
            }
        }

        let mut crossed = Vec::new();
        let (line, offset) = (self.config.roi_line, self.config.offset);

        self.pending.retain(|p| {
            if line - offset < p.pos.y && p.pos.y < line + offset {
                crossed.push(p.pos);
                false
            } else {
                true
            }
        });

        self.count += crossed.len() as u64;
        for c in &crossed {
            tracing::info!("vehicle crossed at ({}, {}), total {}", c.x, c.y, self.count);
        }

        match self.config.policy {
            PendingPolicy::KeepAll => {}
            PendingPolicy::Expire { max_age } => self.pending.retain(|p| p.age <= max_age),
            PendingPolicy::Nearest { max_missed, .. } => {
                self.pending.retain(|p| p.missed <= max_missed)
            }
        }

        crossed
    }

    fn associate(&mut self, centroids: &[Centroid], max_distance: f32) {
        let mut claimed = vec![false; self.pending.len()];
        let mut fresh = Vec::new();

        for c in centroids {
            let pos = na::Point2::new(c.x as f32, c.y as f32);
            let nearest = self
                .pending
                .iter()
                .enumerate()
                .filter(|(idx, _)| !claimed[*idx])
                .map(|(idx, p)| {
                    let other = na::Point2::new(p.pos.x as f32, p.pos.y as f32);
                    (idx, na::distance(&pos, &other))
                })
                .filter(|(_, dist)| *dist <= max_distance)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((idx, _)) => {
                    claimed[idx] = true;
                    let entry = &mut self.pending[idx];
                    entry.pos = *c;
                    entry.missed = 0;
                }
                None => fresh.push(Pending::new(*c)),
            }
        }

        for (p, claimed) in self.pending.iter_mut().zip(claimed) {
            p.age += 1;
            if !claimed {
                p.missed += 1;
            }
        }

        self.pending.extend(fresh);
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.count = 0;
    }
}

impl Default for LineCounter {
    fn default() -> Self {
        Self::new(CounterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32) -> Centroid {
        na::Point2::new(500, y)
    }

    #[test]
    fn band_edges_are_exclusive() {
        let counter = LineCounter::default();

        for y in [617, 618, 622, 623] {
            assert!(!counter.in_band(y), "{} must not count", y);
        }
        for y in [619, 620, 621] {
            assert!(counter.in_band(y), "{} must count", y);
        }
    }

    #[test]
    fn band_edges_through_update() {
        for (y, expected) in [(617, 0), (618, 0), (619, 1), (620, 1), (621, 1), (622, 0), (623, 0)] {
            let mut counter = LineCounter::default();
            let crossed = counter.update(&[at(y)]);

            assert_eq!(counter.count(), expected, "y = {}", y);
            assert_eq!(crossed.len() as u64, expected);
            assert_eq!(counter.pending_len() as u64, 1 - expected);
        }
    }

    #[test]
    fn empty_frames_never_count() {
        let mut counter = LineCounter::default();
        for _ in 0..50 {
            assert!(counter.update(&[]).is_empty());
        }
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.pending_len(), 0);
    }

    #[test]
    fn keep_all_appends_every_detection() {
        let mut counter = LineCounter::default();
        for _ in 0..1000 {
            counter.update(&[at(100)]);
        }

        assert_eq!(counter.count(), 0);
        assert_eq!(counter.pending_len(), 1000);
    }

    #[test]
    fn every_detection_in_band_counts() {
        let mut counter = LineCounter::default();
        counter.update(&[at(619), at(621), at(300)]);

        assert_eq!(counter.count(), 2);
        assert_eq!(counter.pending().copied().collect::<Vec<_>>(), vec![at(300)]);
    }

    #[test]
    fn expire_drops_stale_entries() {
        let mut counter = LineCounter::new(CounterConfig {
            policy: PendingPolicy::Expire { max_age: 3 },
            ..Default::default()
        });

        for _ in 0..100 {
            counter.update(&[at(100)]);
        }

        assert_eq!(counter.pending_len(), 4);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn nearest_follows_one_object() {
        let mut counter = LineCounter::new(CounterConfig {
            policy: PendingPolicy::Nearest {
                max_distance: 30.0,
                max_missed: 2,
            },
            ..Default::default()
        });

        for i in 0..100 {
            counter.update(&[at(4 + 7 * i)]);
            assert!(counter.pending_len() <= 1);
        }
        assert_eq!(counter.count(), 1);

        for _ in 0..3 {
            counter.update(&[]);
        }
        assert_eq!(counter.pending_len(), 0);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn nearest_does_not_merge_distant_objects() {
        let mut counter = LineCounter::new(CounterConfig {
            policy: PendingPolicy::Nearest {
                max_distance: 30.0,
                max_missed: 0,
            },
            ..Default::default()
        });

        counter.update(&[na::Point2::new(100, 100), na::Point2::new(400, 100)]);
        counter.update(&[na::Point2::new(105, 110), na::Point2::new(395, 112)]);

        assert_eq!(counter.pending_len(), 2);
    }

    #[test]
    fn reset_clears_state() {
        let mut counter = LineCounter::default();
        counter.update(&[at(620), at(10)]);
        counter.reset();

        assert_eq!(counter.count(), 0);
        assert_eq!(counter.pending_len(), 0);
    }
}
