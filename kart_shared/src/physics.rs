//! Collision abstraction.
//!
//! The movement step never inspects geometry itself. It proposes a
//! translation and a [`CollisionSweep`] implementation reports whether
//! the sweep was blocked and where the kart ends up.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Result of sweeping a kart along a proposed offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// A blocking surface was touched.
    pub blocked: bool,
    /// Where the kart ends up: the full offset when unblocked, the contact
    /// point otherwise.
    pub position: Vec3,
}

/// Collision sweep collaborator.
pub trait CollisionSweep: Send + Sync {
    fn sweep(&self, from: Vec3, offset: Vec3) -> SweepHit;
}

/// Nothing to collide with. Used when no geometry is bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGround;

impl CollisionSweep for OpenGround {
    fn sweep(&self, from: Vec3, offset: Vec3) -> SweepHit {
        SweepHit {
            blocked: false,
            position: from + offset,
        }
    }
}

/// Rectangular walled arena on the XY plane. Height is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    pub min: Vec3,
    pub max: Vec3,
}

impl Arena {
    /// Arena centred on the origin. The sign of the extents is ignored.
    pub fn new(half_extent_x: f32, half_extent_y: f32) -> Self {
        let (hx, hy) = (half_extent_x.abs(), half_extent_y.abs());
        Self {
            min: Vec3::new(-hx, -hy, f32::MIN),
            max: Vec3::new(hx, hy, f32::MAX),
        }
    }

    /// Whether `min <= max` on both walled axes.
    pub fn is_ordered(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Same box with each axis's corners swapped into order.
    pub fn normalized(self) -> Self {
        Self {
            min: Vec3::new(
                self.min.x.min(self.max.x),
                self.min.y.min(self.max.y),
                self.min.z.min(self.max.z),
            ),
            max: Vec3::new(
                self.min.x.max(self.max.x),
                self.min.y.max(self.max.y),
                self.min.z.max(self.max.z),
            ),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Nearest point inside the walls.
    pub fn clamp_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }
}

impl CollisionSweep for Arena {
    fn sweep(&self, from: Vec3, offset: Vec3) -> SweepHit {
        let target = from + offset;
        if self.contains(target) {
            return SweepHit {
                blocked: false,
                position: target,
            };
        }

        // Walk back along the offset to the first wall crossed.
        let mut t = 1.0f32;
        for (start, delta, lo, hi) in [
            (from.x, offset.x, self.min.x, self.max.x),
            (from.y, offset.y, self.min.y, self.max.y),
        ] {
            let end = start + delta;
            if end > hi && delta > 0.0 {
                t = t.min((hi - start) / delta);
            } else if end < lo && delta < 0.0 {
                t = t.min((lo - start) / delta);
            }
        }
        let t = t.clamp(0.0, 1.0);

        SweepHit {
            blocked: true,
            position: self.clamp_point(from + offset * t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ground_never_blocks() {
        let hit = OpenGround.sweep(Vec3::new(1.0, 2.0, 0.0), Vec3::new(100.0, 0.0, 0.0));
        assert!(!hit.blocked);
        assert_eq!(hit.position, Vec3::new(101.0, 2.0, 0.0));
    }

    #[test]
    fn arena_passes_inside_moves() {
        let arena = Arena::new(10.0, 10.0);
        let hit = arena.sweep(Vec3::ZERO, Vec3::new(5.0, -5.0, 0.0));
        assert!(!hit.blocked);
        assert_eq!(hit.position, Vec3::new(5.0, -5.0, 0.0));
    }

    #[test]
    fn arena_stops_at_wall() {
        let arena = Arena::new(10.0, 10.0);
        let hit = arena.sweep(Vec3::new(8.0, 0.0, 0.0), Vec3::new(4.0, 2.0, 0.0));
        assert!(hit.blocked);
        assert_eq!(hit.position.x, 10.0);
        assert_eq!(hit.position.y, 1.0);
    }

    #[test]
    fn negative_extents_are_flipped() {
        let arena = Arena::new(-10.0, 5.0);
        assert!(arena.is_ordered());
        assert!(arena.contains(Vec3::new(-9.0, 4.0, 0.0)));
    }

    #[test]
    fn inverted_corners_sweep_without_panicking() {
        let inverted = Arena {
            min: Vec3::new(50.0, 50.0, f32::MIN),
            max: Vec3::new(-50.0, -50.0, f32::MAX),
        };
        assert!(!inverted.is_ordered());
        let hit = inverted.sweep(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert!(hit.position.is_finite());

        let arena = inverted.normalized();
        assert!(arena.is_ordered());
        let hit = arena.sweep(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert!(!hit.blocked);
        assert_eq!(hit.position, Vec3::new(1.0, 0.0, 0.0));
    }
}
