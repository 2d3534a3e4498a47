//! Track archive - the persisted output of one tracking run.
//!
//! A single JSON document keyed by track id, frame id, and observation id,
//! carrying the composite geometry and event flags the downstream
//! statistics and phase-splitting stages expect. Run metadata (every input
//! parameter) rides along so a run is reproducible from its archive alone.
//!
//! The track id field is written as `sunspot_id` or `pore_id` depending on
//! the run mode; loading accepts either spelling. Numeric fields round-trip
//! bit-for-bit through save/load.

use crate::config::TrackingParams;
use crate::tracking::{GapSpan, Track, TrackEvent};
use crate::region::Level;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use uuid::Uuid;

// ============================================================================
// ARCHIVE TYPES
// ============================================================================

/// Run-level metadata: the observation identity plus every input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub observation_id: Uuid,
    pub frame_count: usize,
    pub params: TrackingParams,
    /// Quantity the contours were extracted from (e.g. "Ic"), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contour_quantity: Option<String>,
}

/// One track's measurement at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub observation_id: Uuid,
    #[serde(alias = "sunspot_id", alias = "pore_id")]
    pub track_id: u64,
    pub frame_id: usize,
    /// Level of the composite boundary: `outer` for a full sunspot
    /// instance, `middle`/`inner` for bare orphan exports.
    pub level: Level,
    pub outer_boundary: Vec<[f64; 2]>,
    pub total_area: f64,
    pub centroid: [f64; 2],
    pub middle_count: usize,
    pub inner_count: usize,
    /// Event flags at this frame.
    pub split: bool,
    pub merge: bool,
}

/// One track: lifecycle summary plus its ordered per-frame records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(alias = "sunspot_id", alias = "pore_id")]
    pub track_id: u64,
    pub first_frame: usize,
    pub last_frame: usize,
    pub matched_frames: usize,
    #[serde(default)]
    pub closed_frame: Option<usize>,
    pub gaps_tolerated: Vec<GapSpan>,
    pub events: Vec<TrackEvent>,
    pub frames: Vec<FrameRecord>,
}

/// The persisted archive of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackArchive {
    pub metadata: RunMetadata,
    pub tracks: BTreeMap<u64, TrackRecord>,
}

impl TrackArchive {
    /// Assemble the archive from a finalized track set.
    pub fn assemble(
        observation_id: Uuid,
        params: &TrackingParams,
        frame_count: usize,
        contour_quantity: Option<String>,
        tracks: Vec<Track>,
    ) -> Self {
        let records = tracks
            .into_iter()
            .map(|track| {
                let frames = track
                    .frames()
                    .iter()
                    .map(|(&frame_id, composite)| FrameRecord {
                        observation_id,
                        track_id: track.id,
                        frame_id,
                        level: composite.level(),
                        outer_boundary: composite.outer.exterior_vertices(),
                        total_area: composite.total_area(),
                        centroid: [composite.centroid().x(), composite.centroid().y()],
                        middle_count: composite.middle_count(),
                        inner_count: composite.inner_count(),
                        split: track.events.iter().any(|e| {
                            e.kind == crate::tracking::EventKind::Split
                                && e.frame_index == frame_id
                        }),
                        merge: track.events.iter().any(|e| {
                            e.kind == crate::tracking::EventKind::Merge
                                && e.frame_index == frame_id
                        }),
                    })
                    .collect();
                (
                    track.id,
                    TrackRecord {
                        track_id: track.id,
                        first_frame: track.first_frame,
                        last_frame: track.last_frame,
                        matched_frames: track.matched_frames(),
                        closed_frame: track.closed_frame,
                        gaps_tolerated: track.gaps_tolerated,
                        events: track.events,
                        frames,
                    },
                )
            })
            .collect();

        Self {
            metadata: RunMetadata {
                observation_id,
                frame_count,
                params: params.clone(),
                contour_quantity,
            },
            tracks: records,
        }
    }

    /// JSON value with the track id field renamed per the run mode.
    pub fn to_json_value(&self) -> Result<Value, ArchiveError> {
        let mut value = serde_json::to_value(self)?;
        rename_keys(&mut value, "track_id", self.metadata.params.mode.id_field());
        Ok(value)
    }

    /// Persist as a single JSON archive file.
    pub fn save(&self, path: &Path) -> Result<(), ArchiveError> {
        let value = self.to_json_value()?;
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &value)?;
        Ok(())
    }

    /// Load a previously saved archive. Accepts `sunspot_id`, `pore_id`,
    /// or plain `track_id` spellings.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Recursively rename every `from` object key to `to`.
fn rename_keys(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.remove(from) {
                map.insert(to.to_string(), v);
            }
            for v in map.values_mut() {
                rename_keys(v, from, to);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                rename_keys(v, from, to);
            }
        }
        _ => {}
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive encoding: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::hierarchy::CompositeRegion;
    use crate::region::{RawRegion, Region};
    use crate::tracking::TrackManager;

    fn sample_archive(mode: Mode) -> TrackArchive {
        let params = TrackingParams {
            min_area: 0.0,
            mode,
            ..Default::default()
        };
        let mut manager = TrackManager::new(params.clone());
        for frame in 0..3 {
            let raw = RawRegion {
                vertices: vec![
                    [0.1 + frame as f64, 0.2],
                    [3.1 + frame as f64, 0.2],
                    [3.1 + frame as f64, 1.2],
                    [0.1 + frame as f64, 1.2],
                ],
                pixel_area: Some(3.0),
            };
            let region = Region::from_raw(Level::Outer, 0, &raw).unwrap();
            manager.step(frame, vec![CompositeRegion::bare(frame, region)]);
        }
        let tracks = manager.finalize();
        TrackArchive::assemble(
            Uuid::nil(),
            &params,
            3,
            Some("Ic".to_string()),
            tracks,
        )
    }

    #[test]
    fn test_assemble_record_contract() {
        let archive = sample_archive(Mode::Sunspots);
        assert_eq!(archive.tracks.len(), 1);

        let record = &archive.tracks[&1];
        assert_eq!(record.matched_frames, 3);
        let frame = &record.frames[0];
        assert_eq!(frame.observation_id, Uuid::nil());
        assert_eq!(frame.track_id, 1);
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.level, Level::Outer);
        assert!(!frame.split && !frame.merge);
    }

    #[test]
    fn test_mode_controls_id_field_name() {
        let json = sample_archive(Mode::Sunspots).to_json_value().unwrap();
        let track = &json["tracks"]["1"];
        assert!(track.get("sunspot_id").is_some());
        assert!(track.get("track_id").is_none());
        assert!(track["frames"][0].get("sunspot_id").is_some());

        let json = sample_archive(Mode::Pores).to_json_value().unwrap();
        assert!(json["tracks"]["1"].get("pore_id").is_some());
    }

    #[test]
    fn test_round_trip_is_bit_for_bit() {
        let archive = sample_archive(Mode::Pores);
        let dir = std::env::temp_dir();
        let path = dir.join("heliotrack_archive_roundtrip.json");

        archive.save(&path).unwrap();
        let loaded = TrackArchive::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // PartialEq compares every numeric field exactly.
        assert_eq!(archive, loaded);
    }
}
