//! The tracking pipeline - strictly sequential frame loop.
//!
//! Wires the stages together for one image stack:
//! 1. validate parameters (fail fast, before any frame)
//! 2. per frame: build regions (optionally aligned), nest into composites,
//!    advance the track manager
//! 3. finalize tracks and assemble the archive
//!
//! Frame t+1 cannot be associated until frame t's outcomes are final, so
//! the loop runs on a single logical thread of control; a run either
//! completes the full stack or fails outright.

use crate::archive::TrackArchive;
use crate::config::TrackingParams;
use crate::hierarchy::{build_composites, CompositeRegion};
use crate::region::{GeometryError, Level, RawRegion, Region};
use crate::registration::FrameAlignment;
use crate::tracking::TrackManager;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// INPUT
// ============================================================================

/// One frame of extracted region primitives, as delivered by the external
/// region extractor: a mapping from level name to raw regions, plus
/// optional per-frame metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,

    #[serde(default)]
    pub outer: Vec<RawRegion>,
    #[serde(default)]
    pub middle: Vec<RawRegion>,
    #[serde(default)]
    pub inner: Vec<RawRegion>,

    /// Alignment to the reference frame, applied only when the
    /// `registration` parameter is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<FrameAlignment>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the full tracking pipeline over a frame sequence.
pub fn track_and_merge(
    frames: &[FrameInput],
    params: &TrackingParams,
) -> Result<TrackArchive, PipelineError> {
    track_and_merge_with_observation(frames, params, Uuid::new_v4(), None)
}

/// As [`track_and_merge`], with a caller-supplied observation id and
/// contour quantity label. With a fixed observation id the output is a
/// pure function of frames and parameters.
pub fn track_and_merge_with_observation(
    frames: &[FrameInput],
    params: &TrackingParams,
    observation_id: Uuid,
    contour_quantity: Option<String>,
) -> Result<TrackArchive, PipelineError> {
    params.validate()?;

    info!(
        frames = frames.len(),
        %observation_id,
        registration = params.registration,
        "tracking run started"
    );

    let mut manager = TrackManager::new(params.clone());
    for (frame_index, frame) in frames.iter().enumerate() {
        let composites = build_frame(frame_index, frame, params)?;
        manager.step(frame_index, composites);
    }

    let tracks = manager.finalize();
    info!(tracks = tracks.len(), "tracking run finished");

    Ok(TrackArchive::assemble(
        observation_id,
        params,
        frames.len(),
        contour_quantity,
        tracks,
    ))
}

/// Build one frame's composites from its raw level sets.
fn build_frame(
    frame_index: usize,
    frame: &FrameInput,
    params: &TrackingParams,
) -> Result<Vec<CompositeRegion>, PipelineError> {
    let alignment = if params.registration {
        frame.alignment
    } else {
        None
    };

    let outers = build_level(frame_index, Level::Outer, &frame.outer, alignment)?;
    let middles = build_level(frame_index, Level::Middle, &frame.middle, alignment)?;
    let inners = build_level(frame_index, Level::Inner, &frame.inner, alignment)?;

    Ok(build_composites(
        frame_index,
        outers,
        middles,
        inners,
        params.min_containment,
    ))
}

fn build_level(
    frame_index: usize,
    level: Level,
    raws: &[RawRegion],
    alignment: Option<FrameAlignment>,
) -> Result<Vec<Region>, PipelineError> {
    let mut regions = Vec::with_capacity(raws.len());
    for (index, raw) in raws.iter().enumerate() {
        let aligned;
        let raw = match alignment {
            Some(align) if !align.is_identity() => {
                aligned = RawRegion {
                    vertices: raw.vertices.iter().map(|&v| align.apply_point(v)).collect(),
                    pixel_area: raw.pixel_area,
                };
                &aligned
            }
            _ => raw,
        };
        match Region::from_raw(level, index, raw) {
            Ok(region) => regions.push(region),
            Err(err @ GeometryError::Degenerate { .. }) => {
                warn!(frame_index, %err, "skipping degenerate region");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(regions)
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

// ============================================================================
// TESTS
// ============================================================================
