//! Region primitives - single-level contour geometry.
//!
//! A [`Region`] is one closed contour at one threshold level in one frame,
//! as delivered by the external region extractor. Regions are immutable once
//! built; all downstream reasoning (nesting, association) works on the
//! pairwise scores defined here:
//! - **IoU**: intersection area / union area of two boundaries
//! - **Containment ratio**: intersection area / area of the nested region

use geo::{Area, BooleanOps, BoundingRect, Centroid, Intersects};
use geo::{LineString, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Polygons with boundary area below this are degenerate.
const MIN_BOUNDARY_AREA: f64 = 1e-9;

// ============================================================================
// LEVEL
// ============================================================================

/// Threshold level of a contour. Outer = penumbra, middle = pore,
/// inner = umbra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Outer,
    Middle,
    Inner,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Outer => write!(f, "outer"),
            Level::Middle => write!(f, "middle"),
            Level::Inner => write!(f, "inner"),
        }
    }
}

// ============================================================================
// RAW INPUT
// ============================================================================

/// A region primitive as produced by the external region extractor:
/// an ordered closed boundary plus an optional mask pixel count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRegion {
    /// Ordered boundary vertices; the ring is closed implicitly.
    pub vertices: Vec<[f64; 2]>,

    /// Pixel count of the binary mask, when the extractor provides one.
    /// Used as the region area in place of the polygon area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_area: Option<f64>,
}

// ============================================================================
// REGION
// ============================================================================

/// A single connected contour at one threshold level. Immutable once built.
#[derive(Debug, Clone)]
pub struct Region {
    level: Level,
    polygon: Polygon<f64>,
    /// Reported area: mask pixel count when provided, else boundary area.
    area: f64,
    /// Area enclosed by the boundary polygon; basis for IoU/containment.
    boundary_area: f64,
    bbox: Rect<f64>,
    centroid: Point<f64>,
}

impl Region {
    /// Build a region from an extractor primitive.
    ///
    /// Non-finite coordinates are fatal (downstream geometry becomes
    /// unreliable); degenerate boundaries are a per-frame anomaly the caller
    /// may skip.
    pub fn from_raw(level: Level, index: usize, raw: &RawRegion) -> Result<Self, GeometryError> {
        for &[x, y] in &raw.vertices {
            if !x.is_finite() || !y.is_finite() {
                return Err(GeometryError::NonFinite { level, index, x, y });
            }
        }

        if let Some(pixel_area) = raw.pixel_area {
            if !pixel_area.is_finite() || pixel_area < 0.0 {
                return Err(GeometryError::BadPixelArea {
                    level,
                    index,
                    area: pixel_area,
                });
            }
        }

        let mut distinct = raw.vertices.clone();
        distinct.dedup();
        if distinct.last() == distinct.first() {
            distinct.pop();
        }
        if distinct.len() < 3 {
            return Err(GeometryError::Degenerate {
                level,
                index,
                reason: "fewer than 3 distinct vertices",
            });
        }

        let ring: Vec<(f64, f64)> = raw.vertices.iter().map(|&[x, y]| (x, y)).collect();
        let polygon = Polygon::new(LineString::from(ring), vec![]);

        let boundary_area = polygon.unsigned_area();
        if boundary_area < MIN_BOUNDARY_AREA {
            return Err(GeometryError::Degenerate {
                level,
                index,
                reason: "zero-area boundary",
            });
        }

        // Both are Some for any polygon with positive area.
        let bbox = polygon.bounding_rect().ok_or(GeometryError::Degenerate {
            level,
            index,
            reason: "no bounding rect",
        })?;
        let centroid = polygon.centroid().ok_or(GeometryError::Degenerate {
            level,
            index,
            reason: "no centroid",
        })?;

        Ok(Self {
            level,
            area: raw.pixel_area.unwrap_or(boundary_area),
            polygon,
            boundary_area,
            bbox,
            centroid,
        })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Reported area in pixels² (mask pixel count when available).
    pub fn area(&self) -> f64 {
        self.area
    }

    /// Area enclosed by the boundary polygon.
    pub fn boundary_area(&self) -> f64 {
        self.boundary_area
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    pub fn centroid(&self) -> Point<f64> {
        self.centroid
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Exterior boundary vertices, for archive export.
    pub fn exterior_vertices(&self) -> Vec<[f64; 2]> {
        self.polygon
            .exterior()
            .coords()
            .map(|c| [c.x, c.y])
            .collect()
    }

    // ========================================================================
    // PAIRWISE SCORES
    // ========================================================================

    /// Overlap area between the two boundaries. Bounding boxes are tested
    /// first so disjoint pairs never hit the boolean-ops path.
    pub fn intersection_area(&self, other: &Region) -> f64 {
        if !self.bbox.intersects(&other.bbox) {
            return 0.0;
        }
        self.polygon.intersection(&other.polygon).unsigned_area()
    }

    /// Intersection-over-Union of the two boundaries, in [0, 1].
    pub fn iou(&self, other: &Region) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.boundary_area + other.boundary_area - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Containment ratio of `self` within `parent`: intersection area over
    /// the area of `self` (the nested region).
    pub fn containment_within(&self, parent: &Region) -> f64 {
        self.intersection_area(parent) / self.boundary_area
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Geometry input errors. `NonFinite` and `BadPixelArea` are fatal for the
/// run; `Degenerate` is a per-frame anomaly and the region is skipped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeometryError {
    #[error("non-finite coordinate ({x}, {y}) in {level} region {index}")]
    NonFinite {
        level: Level,
        index: usize,
        x: f64,
        y: f64,
    },

    #[error("invalid pixel area {area} in {level} region {index}")]
    BadPixelArea {
        level: Level,
        index: usize,
        area: f64,
    },

    #[error("degenerate {level} region {index}: {reason}")]
    Degenerate {
        level: Level,
        index: usize,
        reason: &'static str,
    },
}

impl GeometryError {
    /// Whether this error aborts the run (as opposed to skipping the region).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GeometryError::Degenerate { .. })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect_raw(x0: f64, y0: f64, x1: f64, y1: f64) -> RawRegion {
        RawRegion {
            vertices: vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
            pixel_area: None,
        }
    }

    fn rect_region(level: Level, x0: f64, y0: f64, x1: f64, y1: f64) -> Region {
        Region::from_raw(level, 0, &rect_raw(x0, y0, x1, y1)).unwrap()
    }

    #[test]
    fn test_rect_region_basics() {
        let r = rect_region(Level::Outer, 0.0, 0.0, 4.0, 2.0);
        assert_eq!(r.level(), Level::Outer);
        assert_relative_eq!(r.area(), 8.0);
        assert_relative_eq!(r.boundary_area(), 8.0);
        assert_relative_eq!(r.centroid().x(), 2.0);
        assert_relative_eq!(r.centroid().y(), 1.0);
    }

    #[test]
    fn test_pixel_area_overrides_boundary_area() {
        let mut raw = rect_raw(0.0, 0.0, 4.0, 2.0);
        raw.pixel_area = Some(7.0);
        let r = Region::from_raw(Level::Outer, 0, &raw).unwrap();
        assert_relative_eq!(r.area(), 7.0);
        assert_relative_eq!(r.boundary_area(), 8.0);
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = rect_region(Level::Outer, 0.0, 0.0, 2.0, 2.0);
        let b = rect_region(Level::Outer, 10.0, 10.0, 12.0, 12.0);
        assert_relative_eq!(a.iou(&b), 0.0);
        assert_relative_eq!(a.iou(&a), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_iou_half_overlap() {
        // [0,3]x[0,1] vs [1,4]x[0,1]: inter 2, union 4.
        let a = rect_region(Level::Outer, 0.0, 0.0, 3.0, 1.0);
        let b = rect_region(Level::Outer, 1.0, 0.0, 4.0, 1.0);
        assert_relative_eq!(a.iou(&b), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_containment_ratio() {
        let outer = rect_region(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let inside = rect_region(Level::Middle, 2.0, 2.0, 4.0, 4.0);
        let straddling = rect_region(Level::Middle, -0.5, 0.0, 1.5, 2.0);

        assert_relative_eq!(inside.containment_within(&outer), 1.0, epsilon = 1e-9);
        // Intersection [0,1.5]x[0,2] = 3 over area 4.
        assert_relative_eq!(straddling.containment_within(&outer), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_is_fatal() {
        let raw = RawRegion {
            vertices: vec![[0.0, 0.0], [1.0, f64::NAN], [1.0, 1.0]],
            pixel_area: None,
        };
        let err = Region::from_raw(Level::Inner, 3, &raw).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_degenerate_is_not_fatal() {
        let raw = RawRegion {
            vertices: vec![[0.0, 0.0], [1.0, 1.0]],
            pixel_area: None,
        };
        let err = Region::from_raw(Level::Outer, 0, &raw).unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { .. }));
        assert!(!err.is_fatal());

        // Collinear ring: distinct vertices but zero enclosed area.
        let raw = RawRegion {
            vertices: vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]],
            pixel_area: None,
        };
        let err = Region::from_raw(Level::Outer, 1, &raw).unwrap_err();
        assert!(!err.is_fatal());
    }
}
