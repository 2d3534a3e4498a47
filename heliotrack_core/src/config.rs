//! Run configuration for the tracking pipeline.
//!
//! Every recognized parameter is an explicit field on [`TrackingParams`];
//! there is no dynamic option map. Validation happens once, before the frame
//! loop starts, and a bad parameter set is fatal for the whole run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// MODE
// ============================================================================

/// What kind of feature a run measures. Controls how the track id field is
/// named in the persisted archive (`sunspot_id` vs `pore_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Sunspots,
    Pores,
}

impl Mode {
    /// Field name under which the track id is persisted.
    pub fn id_field(&self) -> &'static str {
        match self {
            Mode::Sunspots => "sunspot_id",
            Mode::Pores => "pore_id",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sunspots => write!(f, "sunspots"),
            Mode::Pores => write!(f, "pores"),
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sunspots" => Ok(Mode::Sunspots),
            "pores" => Ok(Mode::Pores),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Validated parameter set for one tracking run.
///
/// The three intensity thresholds define which contour level maps to which
/// named level: `penumbra_threshold` → outer, `pore_threshold` → middle,
/// `umbra_threshold` → inner. The umbra is the darkest structure, so the
/// ordering `umbra < pore < penumbra` must hold strictly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingParams {
    /// Intensity threshold defining the outer (penumbra) contour level.
    pub penumbra_threshold: f64,

    /// Intensity threshold defining the middle (pore) contour level.
    pub pore_threshold: f64,

    /// Intensity threshold defining the inner (umbra) contour level.
    pub umbra_threshold: f64,

    /// Minimum outer area in pixels² for a composite to be visible to the
    /// association engine.
    pub min_area: f64,

    /// Maximum number of consecutive frames a track may go unmatched and
    /// still stay alive.
    pub max_gap: u32,

    /// Minimum number of matched frames for a track to survive the final
    /// lifetime filter.
    pub min_frames: u32,

    /// Minimum IoU for two composites to be association candidates.
    pub iou_threshold: f64,

    /// Minimum containment ratio for one region to count as nested inside
    /// another.
    pub min_containment: f64,

    /// Whether per-frame alignment transforms are applied before nesting.
    pub registration: bool,

    /// Measurement type; only affects archive field naming.
    pub mode: Mode,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            penumbra_threshold: 0.9,
            pore_threshold: 0.65,
            umbra_threshold: 0.5,
            min_area: 5.0,
            max_gap: 3,
            min_frames: 0,
            iou_threshold: 0.3,
            min_containment: 0.8,
            registration: false,
            mode: Mode::Sunspots,
        }
    }
}

impl TrackingParams {
    /// Validate the parameter set. Called once before any frame is processed;
    /// an error here aborts the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("penumbra_threshold", self.penumbra_threshold),
            ("pore_threshold", self.pore_threshold),
            ("umbra_threshold", self.umbra_threshold),
            ("min_area", self.min_area),
            ("iou_threshold", self.iou_threshold),
            ("min_containment", self.min_containment),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }

        if !(self.umbra_threshold < self.pore_threshold
            && self.pore_threshold < self.penumbra_threshold)
        {
            return Err(ConfigError::ThresholdOrdering {
                umbra: self.umbra_threshold,
                pore: self.pore_threshold,
                penumbra: self.penumbra_threshold,
            });
        }

        for (name, value) in [
            ("iou_threshold", self.iou_threshold),
            ("min_containment", self.min_containment),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RatioOutOfRange { name, value });
            }
        }

        if self.min_area < 0.0 {
            return Err(ConfigError::NegativeMinArea {
                value: self.min_area,
            });
        }

        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Configuration errors. All fatal, reported before the frame loop starts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "threshold ordering must satisfy umbra < pore < penumbra, \
         got umbra={umbra}, pore={pore}, penumbra={penumbra}"
    )]
    ThresholdOrdering {
        umbra: f64,
        pore: f64,
        penumbra: f64,
    },

    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("{name} must lie in [0, 1], got {value}")]
    RatioOutOfRange { name: &'static str, value: f64 },

    #[error("min_area must be non-negative, got {value}")]
    NegativeMinArea { value: f64 },

    #[error("unknown mode '{0}', expected 'sunspots' or 'pores'")]
    UnknownMode(String),
}

// ============================================================================
// TESTS
// ============================================================================
