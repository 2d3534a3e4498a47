//! Track manager - temporal identities and their lifecycle.
//!
//! Owns the full track collection for one run. The association engine only
//! produces correspondence proposals; every mutation (matching a frame,
//! spawning, closing, recording events) funnels through [`TrackManager`].
//!
//! Lifecycle per track:
//! - `Active`: matched this frame (gap counter 0)
//! - `Gapped`: unmatched for 1..=max_gap consecutive frames, still alive
//! - `Closed`: terminal - gap counter exceeded max_gap, or lost a merge.
//!   Closed tracks never reopen and ids are never reused.

use crate::association::{associate, Correspondences, TrackSnapshot};
use crate::config::TrackingParams;
use crate::hierarchy::CompositeRegion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

// ============================================================================
// TRACK
// ============================================================================

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Active,
    Gapped,
    Closed,
}

/// Recorded topology change: one track's region dividing into several, or
/// several tracks' regions collapsing into one. Descriptive metadata
/// attached to every participating track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Split,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub kind: EventKind,
    pub frame_index: usize,
    /// All track ids involved; for a merge the survivor comes first, for a
    /// split the continuing track comes first.
    pub participants: Vec<u64>,
}

/// A tolerated absence: the track went unmatched for `length` frames and
/// was then matched again at `resumed_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSpan {
    pub resumed_frame: usize,
    pub length: u32,
}

/// The temporal identity of one physical feature.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    /// Matched frames in order; keys are strictly increasing by
    /// construction of the sequential frame loop.
    frames: BTreeMap<usize, CompositeRegion>,
    pub first_frame: usize,
    pub last_frame: usize,
    /// Consecutive unmatched frames since the last match.
    pub gap_counter: u32,
    pub status: TrackStatus,
    pub events: Vec<TrackEvent>,
    pub gaps_tolerated: Vec<GapSpan>,
    /// Frame at which the track closed; `None` when it was still alive at
    /// the end of the stack.
    pub closed_frame: Option<usize>,
}

impl Track {
    fn spawn(id: u64, frame_index: usize, composite: CompositeRegion) -> Self {
        let mut frames = BTreeMap::new();
        frames.insert(frame_index, composite);
        Self {
            id,
            frames,
            first_frame: frame_index,
            last_frame: frame_index,
            gap_counter: 0,
            status: TrackStatus::Active,
            events: Vec::new(),
            gaps_tolerated: Vec::new(),
            closed_frame: None,
        }
    }

    /// Matched frames in order, with their composite state.
    pub fn frames(&self) -> &BTreeMap<usize, CompositeRegion> {
        &self.frames
    }

    /// Number of matched frames (gaps not counted); the quantity the
    /// `min_frames` lifetime filter tests.
    pub fn matched_frames(&self) -> usize {
        self.frames.len()
    }

    /// Total number of gap frames the track survived.
    pub fn tolerated_gap_frames(&self) -> u32 {
        self.gaps_tolerated.iter().map(|g| g.length).sum()
    }

    pub fn is_live(&self) -> bool {
        self.status != TrackStatus::Closed
    }

    fn last_composite(&self) -> Option<&CompositeRegion> {
        self.frames.get(&self.last_frame)
    }

    fn record_match(&mut self, frame_index: usize, composite: CompositeRegion) {
        debug_assert!(frame_index > self.last_frame || self.frames.is_empty());
        if self.gap_counter > 0 {
            self.gaps_tolerated.push(GapSpan {
                resumed_frame: frame_index,
                length: self.gap_counter,
            });
            self.gap_counter = 0;
        }
        self.frames.insert(frame_index, composite);
        self.last_frame = frame_index;
        self.status = TrackStatus::Active;
    }

    fn close(&mut self, frame_index: usize) {
        self.status = TrackStatus::Closed;
        self.closed_frame = Some(frame_index);
    }
}

// ============================================================================
// TRACK MANAGER
// ============================================================================

/// Exclusive owner of the track collection for one run.
///
/// Processing is strictly sequential over the frame index: `step` for frame
/// t+1 depends on the match outcomes of frame t, so there is exactly one
/// logical thread of control and no locking.
pub struct TrackManager {
    /// All tracks ever spawned, keyed by id. BTreeMap keeps iteration in id
    /// order, which the association determinism contract relies on.
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    params: TrackingParams,
}

impl TrackManager {
    pub fn new(params: TrackingParams) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            params,
        }
    }

    pub fn get_track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn live_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_live()).count()
    }

    fn spawn_track(&mut self, frame_index: usize, composite: CompositeRegion) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(id, Track::spawn(id, frame_index, composite));
        id
    }

    /// Advance the track set by one frame.
    ///
    /// Composites with outer area below `min_area` are excluded from
    /// candidacy as if they had never been detected: they cannot start a
    /// track nor continue one, and an existing track simply goes unmatched
    /// for this frame.
    pub fn step(&mut self, frame_index: usize, composites: Vec<CompositeRegion>) {
        let visible: Vec<CompositeRegion> = composites
            .into_iter()
            .filter(|c| c.outer_area() >= self.params.min_area)
            .collect();

        let snapshots: Vec<TrackSnapshot> = self
            .tracks
            .values()
            .filter(|t| t.is_live())
            .filter_map(|t| {
                t.last_composite().map(|c| TrackSnapshot {
                    track_id: t.id,
                    composite: c.clone(),
                })
            })
            .collect();

        let corr = associate(&snapshots, &visible, self.params.iou_threshold);
        self.apply(frame_index, visible, corr);
    }

    /// Apply a correspondence set. Each new region is consumed exactly once.
    fn apply(&mut self, frame_index: usize, regions: Vec<CompositeRegion>, corr: Correspondences) {
        let mut slots: Vec<Option<CompositeRegion>> = regions.into_iter().map(Some).collect();

        // Continuations (merge survivors included).
        for m in &corr.matches {
            if let (Some(track), Some(composite)) =
                (self.tracks.get_mut(&m.track_id), slots[m.region_index].take())
            {
                track.record_match(frame_index, composite);
            }
        }

        // Merge-losers close; every participant records the event.
        for merge in &corr.merges {
            let mut participants = vec![merge.survivor];
            participants.extend(&merge.absorbed);
            let event = TrackEvent {
                kind: EventKind::Merge,
                frame_index,
                participants,
            };
            for &id in &merge.absorbed {
                if let Some(track) = self.tracks.get_mut(&id) {
                    track.events.push(event.clone());
                    track.close(frame_index);
                }
            }
            if let Some(survivor) = self.tracks.get_mut(&merge.survivor) {
                survivor.events.push(event);
            }
            debug!(frame_index, survivor = merge.survivor, absorbed = ?merge.absorbed, "merge");
        }

        // Splits: the original continues with its kept child; each extra
        // child becomes a new track. All participants share the event.
        for split in &corr.splits {
            let mut spawned_ids = Vec::with_capacity(split.extra_regions.len());
            for &region_index in &split.extra_regions {
                if let Some(composite) = slots[region_index].take() {
                    spawned_ids.push(self.spawn_track(frame_index, composite));
                }
            }
            let mut participants = vec![split.track_id];
            participants.extend(&spawned_ids);
            let event = TrackEvent {
                kind: EventKind::Split,
                frame_index,
                participants,
            };
            for id in std::iter::once(split.track_id).chain(spawned_ids.iter().copied()) {
                if let Some(track) = self.tracks.get_mut(&id) {
                    track.events.push(event.clone());
                }
            }
            debug!(frame_index, track = split.track_id, children = ?spawned_ids, "split");
        }

        // Brand-new detections.
        for &region_index in &corr.spawned {
            if let Some(composite) = slots[region_index].take() {
                let id = self.spawn_track(frame_index, composite);
                trace!(frame_index, track = id, "spawned track");
            }
        }

        // Unmatched live tracks age; past max_gap they close for good.
        for &id in &corr.gapped {
            if let Some(track) = self.tracks.get_mut(&id) {
                track.gap_counter += 1;
                if track.gap_counter > self.params.max_gap {
                    track.close(frame_index);
                    debug!(frame_index, track = id, "track closed (gap exceeded)");
                } else {
                    track.status = TrackStatus::Gapped;
                }
            }
        }
    }

    /// End-of-run finalization: close everything still live, then apply the
    /// lifetime filter. Tracks with fewer than `min_frames` matched frames
    /// are discarded entirely - they never existed. The filter runs only
    /// here because a short track may still be legitimately living while
    /// frames remain.
    pub fn finalize(&mut self) -> Vec<Track> {
        for track in self.tracks.values_mut() {
            if track.is_live() {
                track.status = TrackStatus::Closed;
            }
        }
        let min_frames = self.params.min_frames as usize;
        let tracks: Vec<Track> = std::mem::take(&mut self.tracks)
            .into_values()
            .filter(|t| t.matched_frames() >= min_frames)
            .collect();
        debug!(kept = tracks.len(), "finalized track set");
        tracks
    }
}

// ============================================================================
// TESTS
// ============================================================================
