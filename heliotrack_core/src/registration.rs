//! Frame registration - optional alignment to a reference frame.
//!
//! Registration only changes the coordinate frame under which regions and
//! IoU are computed; the hierarchy builder, association engine, and track
//! manager are agnostic to whether inputs were registered. The upstream
//! loader provides a per-frame rigid transform and the pipeline applies it
//! to raw boundary vertices before regions are built, but only when the
//! `registration` flag is set.

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// Rigid 2-D alignment of one frame to the reference frame: rotation about
/// a center point followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameAlignment {
    /// Translation in pixels.
    pub dx: f64,
    pub dy: f64,

    /// Rotation in radians, counter-clockwise about `center`.
    #[serde(default)]
    pub rotation: f64,

    /// Rotation center, typically the disk center in pixel coordinates.
    #[serde(default)]
    pub center: [f64; 2],
}

impl FrameAlignment {
    pub fn identity() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            rotation: 0.0,
            center: [0.0, 0.0],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.rotation == 0.0
    }

    /// Transform one boundary vertex into the reference frame.
    pub fn apply_point(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        let center = Vector2::new(self.center[0], self.center[1]);
        let rotated = Rotation2::new(self.rotation) * (Vector2::new(x, y) - center) + center;
        [rotated.x + self.dx, rotated.y + self.dy]
    }
}

impl Default for FrameAlignment {
    fn default() -> Self {
        Self::identity()
    }
}

// ============================================================================
// TESTS
// ============================================================================
