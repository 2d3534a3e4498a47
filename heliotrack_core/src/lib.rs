//! Heliotrack Core - solar active-region tracking and merging engine.
//!
//! Tracks sunspot/pore features across a time-ordered stack of calibrated
//! images, given per-frame multi-level contour sets from an external region
//! extractor:
//! 1. **Hierarchy Builder**: nests outer/middle/inner (penumbra/pore/umbra)
//!    contours into composite "sunspot instances" per frame
//! 2. **Association Engine**: greedy IoU matching between consecutive
//!    frames, resolving splits and merges deterministically
//! 3. **Track Manager**: gap-tolerant track lifecycle with stable integer
//!    identities and merge/split event records
//!
//! The output is a single JSON archive keyed by track id, frame id, and
//! observation id, consumed by downstream statistics and phase-splitting
//! stages.

pub mod archive;
pub mod association;
pub mod config;
pub mod hierarchy;
pub mod pipeline;
pub mod region;
pub mod registration;
pub mod tracking;

// Re-export key types for convenience
pub use archive::{ArchiveError, FrameRecord, RunMetadata, TrackArchive, TrackRecord};
pub use association::{associate, Correspondences, TrackSnapshot};
pub use config::{ConfigError, Mode, TrackingParams};
pub use hierarchy::{build_composites, CompositeRegion, MiddleAttachment};
pub use pipeline::{
    track_and_merge, track_and_merge_with_observation, FrameInput, PipelineError,
};
pub use region::{GeometryError, Level, RawRegion, Region};
pub use registration::FrameAlignment;
pub use tracking::{EventKind, GapSpan, Track, TrackEvent, TrackManager, TrackStatus};
