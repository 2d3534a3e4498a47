//! Association engine - frame-to-frame correspondence proposals.
//!
//! Matches live tracks' last-seen composites against the new frame's
//! composites by IoU of their outer boundaries, then resolves the leftovers
//! into split and merge proposals. The output is read-only: the track
//! manager owns all track mutation and merely consumes what is proposed
//! here.
//!
//! Matching is greedy highest-IoU-first, not optimal bipartite assignment.
//! That is a deliberate contract: greedy gives local, explainable,
//! deterministic split/merge decisions that downstream statistics depend
//! on. Ties break by lower track id, then lower new-region index.

use crate::hierarchy::CompositeRegion;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// The last-seen state of one live track, as the engine sees it.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub track_id: u64,
    /// Composite recorded at the track's last matched frame.
    pub composite: CompositeRegion,
}

/// One track continuing into one new region. For a merged region this
/// already names the surviving track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub track_id: u64,
    pub region_index: usize,
}

/// One track's region breaking into multiple new regions: the track keeps
/// the greedy (highest-IoU) child; each extra child spawns a new track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitProposal {
    pub track_id: u64,
    pub kept_region: usize,
    pub extra_regions: Vec<usize>,
}

/// Multiple tracks collapsing onto one new region: the largest pre-merge
/// area survives and continues; the rest close with a merge event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeProposal {
    pub region_index: usize,
    pub survivor: u64,
    pub absorbed: Vec<u64>,
}

/// Correspondence set for one frame transition. Matches already reflect
/// merge resolution (the surviving track owns the region).
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub matches: Vec<Match>,
    pub splits: Vec<SplitProposal>,
    pub merges: Vec<MergeProposal>,
    /// New regions with no candidate track: spawn new tracks.
    pub spawned: Vec<usize>,
    /// Live tracks with no region this frame: increment their gap counter.
    pub gapped: Vec<u64>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Associate live tracks with the new frame's composites.
///
/// `snapshots` must be ordered by ascending track id; that ordering, plus
/// the stated tie-breaks, makes the output a pure function of the input.
pub fn associate(
    snapshots: &[TrackSnapshot],
    regions: &[CompositeRegion],
    iou_threshold: f64,
) -> Correspondences {
    let mut corr = Correspondences::default();

    // Pairwise IoU of outer boundaries.
    let iou: Vec<Vec<f64>> = snapshots
        .iter()
        .map(|snap| {
            regions
                .iter()
                .map(|region| snap.composite.outer.iou(&region.outer))
                .collect()
        })
        .collect();

    // Candidate pairs, best first. Ties: lower track id, lower region index.
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (t, row) in iou.iter().enumerate() {
        for (r, &score) in row.iter().enumerate() {
            if score >= iou_threshold {
                candidates.push((t, r));
            }
        }
    }
    candidates.sort_by(|&(ta, ra), &(tb, rb)| {
        iou[tb][rb]
            .partial_cmp(&iou[ta][ra])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| snapshots[ta].track_id.cmp(&snapshots[tb].track_id))
            .then_with(|| ra.cmp(&rb))
    });

    // Greedy one-to-one assignment.
    let mut track_of_region: Vec<Option<usize>> = vec![None; regions.len()];
    let mut region_of_track: Vec<Option<usize>> = vec![None; snapshots.len()];
    for &(t, r) in &candidates {
        if region_of_track[t].is_none() && track_of_region[r].is_none() {
            region_of_track[t] = Some(r);
            track_of_region[r] = Some(t);
        }
    }

    // Merge resolution: an unmatched track with IoU ≥ threshold against an
    // already-claimed region joins that region's merge group. The group
    // member with the largest pre-merge area keeps the identity.
    let mut merge_groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (t, slot) in region_of_track.iter().enumerate() {
        if slot.is_some() {
            continue;
        }
        let mut best: Option<(usize, f64)> = None;
        for (r, &owner) in track_of_region.iter().enumerate() {
            if owner.is_none() || iou[t][r] < iou_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_score)) => iou[t][r] > best_score,
            };
            if better {
                best = Some((r, iou[t][r]));
            }
        }
        match best {
            Some((r, _)) => merge_groups.entry(r).or_default().push(t),
            None => corr.gapped.push(snapshots[t].track_id),
        }
    }

    // Final owner per region, after merges.
    let mut owner_of_region: Vec<Option<u64>> = track_of_region
        .iter()
        .map(|slot| slot.map(|t| snapshots[t].track_id))
        .collect();

    for (r, mut group) in merge_groups {
        // track_of_region[r] is Some by construction of the group.
        if let Some(matched) = track_of_region[r] {
            group.push(matched);
        }
        let survivor = group
            .iter()
            .copied()
            .max_by(|&a, &b| {
                snapshots[a]
                    .composite
                    .outer_area()
                    .partial_cmp(&snapshots[b].composite.outer_area())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // On equal area the lower id survives.
                    .then_with(|| snapshots[b].track_id.cmp(&snapshots[a].track_id))
            })
            .map(|t| snapshots[t].track_id);
        let Some(survivor) = survivor else { continue };

        let mut absorbed: Vec<u64> = group
            .iter()
            .map(|&t| snapshots[t].track_id)
            .filter(|&id| id != survivor)
            .collect();
        absorbed.sort_unstable();

        owner_of_region[r] = Some(survivor);
        corr.merges.push(MergeProposal {
            region_index: r,
            survivor,
            absorbed,
        });
    }

    corr.matches = owner_of_region
        .iter()
        .enumerate()
        .filter_map(|(r, owner)| {
            owner.map(|track_id| Match {
                track_id,
                region_index: r,
            })
        })
        .collect();

    // Split resolution: an unclaimed region with IoU ≥ threshold against an
    // already-matched track becomes an extra child of that track. Greedy
    // guarantees the kept child has the larger IoU.
    let mut split_children: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for r in 0..regions.len() {
        if owner_of_region[r].is_some() {
            continue;
        }
        let mut best: Option<(usize, f64)> = None;
        for (t, slot) in region_of_track.iter().enumerate() {
            if slot.is_none() || iou[t][r] < iou_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_score)) => iou[t][r] > best_score,
            };
            if better {
                best = Some((t, iou[t][r]));
            }
        }
        match best {
            Some((t, _)) => {
                // Attach to whoever finally owns that track's kept region
                // (the survivor, if a merge intervened).
                let kept = region_of_track[t].unwrap_or(r);
                if let Some(owner) = owner_of_region[kept] {
                    split_children.entry(owner).or_default().push(r);
                } else {
                    corr.spawned.push(r);
                }
            }
            None => corr.spawned.push(r),
        }
    }

    for (track_id, extra_regions) in split_children {
        let kept_region = corr
            .matches
            .iter()
            .find(|m| m.track_id == track_id)
            .map(|m| m.region_index);
        if let Some(kept_region) = kept_region {
            corr.splits.push(SplitProposal {
                track_id,
                kept_region,
                extra_regions,
            });
        }
    }

    debug!(
        tracks = snapshots.len(),
        regions = regions.len(),
        matched = corr.matches.len(),
        splits = corr.splits.len(),
        merges = corr.merges.len(),
        spawned = corr.spawned.len(),
        gapped = corr.gapped.len(),
        "association resolved"
    );

    corr
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Level, RawRegion, Region};

    fn composite(frame: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> CompositeRegion {
        let raw = RawRegion {
            vertices: vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
            pixel_area: None,
        };
        CompositeRegion::bare(frame, Region::from_raw(Level::Outer, 0, &raw).unwrap())
    }

    fn snapshot(track_id: u64, x0: f64, y0: f64, x1: f64, y1: f64) -> TrackSnapshot {
        TrackSnapshot {
            track_id,
            composite: composite(0, x0, y0, x1, y1),
        }
    }

    #[test]
    fn test_simple_continuation() {
        // IoU 0.5 ≥ 0.3: one match, nothing else.
        let snaps = vec![snapshot(1, 0.0, 0.0, 3.0, 1.0)];
        let regions = vec![composite(1, 1.0, 0.0, 4.0, 1.0)];

        let corr = associate(&snaps, &regions, 0.3);
        assert_eq!(
            corr.matches,
            vec![Match {
                track_id: 1,
                region_index: 0
            }]
        );
        assert!(corr.splits.is_empty());
        assert!(corr.merges.is_empty());
        assert!(corr.spawned.is_empty());
        assert!(corr.gapped.is_empty());
    }

    #[test]
    fn test_below_threshold_spawns_and_gaps() {
        let snaps = vec![snapshot(1, 0.0, 0.0, 1.0, 1.0)];
        let regions = vec![composite(1, 50.0, 50.0, 51.0, 51.0)];

        let corr = associate(&snaps, &regions, 0.3);
        assert!(corr.matches.is_empty());
        assert_eq!(corr.spawned, vec![0]);
        assert_eq!(corr.gapped, vec![1]);
    }

    #[test]
    fn test_split_keeps_greedy_child() {
        // One track over [0,4]x[0,2]; two children, each IoU 0.5. The tie
        // breaks to the lower region index, the other child is a split.
        let snaps = vec![snapshot(7, 0.0, 0.0, 4.0, 2.0)];
        let regions = vec![
            composite(1, 0.0, 0.0, 2.0, 2.0),
            composite(1, 2.0, 0.0, 4.0, 2.0),
        ];

        let corr = associate(&snaps, &regions, 0.3);
        assert_eq!(
            corr.matches,
            vec![Match {
                track_id: 7,
                region_index: 0
            }]
        );
        assert_eq!(
            corr.splits,
            vec![SplitProposal {
                track_id: 7,
                kept_region: 0,
                extra_regions: vec![1],
            }]
        );
        assert!(corr.spawned.is_empty());
    }

    #[test]
    fn test_merge_larger_area_survives() {
        // Track 1 (area 4) and track 2 (area 6) both overlap the single new
        // region above threshold; track 2 wins the greedy match and also has
        // the larger pre-merge area, so it survives and 1 is absorbed.
        let snaps = vec![snapshot(1, 0.0, 0.0, 2.0, 2.0), snapshot(2, 3.0, 0.0, 6.0, 2.0)];
        let regions = vec![composite(1, 0.0, 0.0, 6.0, 2.0)];

        let corr = associate(&snaps, &regions, 0.3);
        assert_eq!(
            corr.matches,
            vec![Match {
                track_id: 2,
                region_index: 0
            }]
        );
        assert_eq!(
            corr.merges,
            vec![MergeProposal {
                region_index: 0,
                survivor: 2,
                absorbed: vec![1],
            }]
        );
        assert!(corr.gapped.is_empty());
    }

    #[test]
    fn test_merge_survivor_can_override_greedy_winner() {
        // The greedy winner has the better IoU but the smaller area; the
        // bigger merge partner takes over the identity.
        let snaps = vec![
            snapshot(1, 0.0, 0.0, 6.0, 2.0), // area 12, IoU vs region 1/3
            snapshot(2, 3.0, 0.0, 6.0, 1.0), // area 3, IoU vs region 0.75
        ];
        let regions = vec![composite(1, 2.0, 0.0, 6.0, 1.0)];

        let corr = associate(&snaps, &regions, 0.3);
        assert_eq!(corr.matches.len(), 1);
        assert_eq!(corr.matches[0].track_id, 1);
        assert_eq!(
            corr.merges,
            vec![MergeProposal {
                region_index: 0,
                survivor: 1,
                absorbed: vec![2],
            }]
        );
    }

    #[test]
    fn test_tie_break_prefers_lower_track_id() {
        // Two identical tracks compete for one region: track 1 wins the
        // greedy pick, track 2 becomes a merge candidate; equal areas, so
        // the lower id survives.
        let snaps = vec![snapshot(1, 0.0, 0.0, 2.0, 2.0), snapshot(2, 0.0, 0.0, 2.0, 2.0)];
        let regions = vec![composite(1, 0.0, 0.0, 2.0, 2.0)];

        let corr = associate(&snaps, &regions, 0.3);
        assert_eq!(corr.matches[0].track_id, 1);
        assert_eq!(corr.merges[0].survivor, 1);
        assert_eq!(corr.merges[0].absorbed, vec![2]);
    }

    #[test]
    fn test_determinism() {
        let snaps = vec![
            snapshot(1, 0.0, 0.0, 4.0, 2.0),
            snapshot(2, 10.0, 0.0, 14.0, 2.0),
            snapshot(3, 20.0, 0.0, 24.0, 2.0),
        ];
        let regions = vec![
            composite(1, 1.0, 0.0, 5.0, 2.0),
            composite(1, 11.0, 0.0, 15.0, 2.0),
            composite(1, 40.0, 0.0, 44.0, 2.0),
        ];

        let a = associate(&snaps, &regions, 0.3);
        let b = associate(&snaps, &regions, 0.3);
        assert_eq!(a.matches, b.matches);
        assert_eq!(a.splits, b.splits);
        assert_eq!(a.merges, b.merges);
        assert_eq!(a.spawned, b.spawned);
        assert_eq!(a.gapped, b.gapped);
    }
}
