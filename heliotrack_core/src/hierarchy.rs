//! Hierarchy builder - per-frame nesting of regions into composites.
//!
//! Within one frame, middle (pore) regions are attached under the outer
//! (penumbra) region that contains them, and inner (umbra) regions under
//! their middle, producing [`CompositeRegion`] "sunspot instances".
//!
//! Assignment is by containment ratio with deterministic tie-breaks:
//! higher ratio wins, then larger overlap area, then lower parent index.
//! A region that fails containment against every candidate parent is an
//! orphan and is exported as its own bare composite - never dropped, since
//! dropping it would corrupt track continuity downstream.

use crate::region::{Level, Region};
use geo::Point;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// COMPOSITE REGION
// ============================================================================

/// A middle-level region attached under an outer, optionally carrying its
/// single best-contained inner region.
#[derive(Debug, Clone)]
pub struct MiddleAttachment {
    pub region: Region,
    pub inner: Option<Region>,
}

/// The per-frame nesting of regions across levels that belong together:
/// one physical feature candidate.
///
/// A full composite has an outer-level boundary with zero or more middle
/// attachments. A *bare* composite (orphan middle/inner, or an outer with
/// no children) has the orphan region as its boundary and no attachments.
#[derive(Debug, Clone)]
pub struct CompositeRegion {
    pub frame_index: usize,
    /// Boundary region; its level tells full composites (`Outer`) apart
    /// from bare orphan exports (`Middle`/`Inner`).
    pub outer: Region,
    pub middles: Vec<MiddleAttachment>,
}

impl CompositeRegion {
    /// A composite consisting of a single region with no children.
    pub fn bare(frame_index: usize, region: Region) -> Self {
        Self {
            frame_index,
            outer: region,
            middles: Vec::new(),
        }
    }

    /// Level of the boundary region.
    pub fn level(&self) -> Level {
        self.outer.level()
    }

    /// Reported area of the boundary region; nested regions lie inside it.
    pub fn outer_area(&self) -> f64 {
        self.outer.area()
    }

    /// Derived total area of the composite. The outer boundary encloses all
    /// nested regions, so this is the outer area.
    pub fn total_area(&self) -> f64 {
        self.outer.area()
    }

    /// Derived centroid of the composite (centroid of the boundary).
    pub fn centroid(&self) -> Point<f64> {
        self.outer.centroid()
    }

    pub fn middle_count(&self) -> usize {
        self.middles.len()
    }

    pub fn inner_count(&self) -> usize {
        self.middles.iter().filter(|m| m.inner.is_some()).count()
    }
}

// ============================================================================
// BEST-PARENT ASSIGNMENT
// ============================================================================

/// Pick the best parent for `child` among `parents`: highest containment
/// ratio ≥ `min_containment`, ties broken by larger overlap area, then by
/// lower parent index (strict comparisons keep the earliest candidate).
fn best_parent(
    child: &Region,
    parents: &[&Region],
    min_containment: f64,
) -> Option<(usize, f64, f64)> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (index, parent) in parents.iter().enumerate() {
        let overlap = child.intersection_area(parent);
        let ratio = overlap / child.boundary_area();
        if ratio < min_containment {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, best_ratio, best_overlap)) => {
                ratio > best_ratio || (ratio == best_ratio && overlap > best_overlap)
            }
        };
        if better {
            best = Some((index, ratio, overlap));
        }
    }
    best
}

// ============================================================================
// BUILDER
// ============================================================================

/// Nest the three level-wise region sets of one frame into composites.
///
/// Returns an empty list for a frame devoid of features; never fails.
/// Every input region ends up in exactly one composite at its level.
pub fn build_composites(
    frame_index: usize,
    outers: Vec<Region>,
    middles: Vec<Region>,
    inners: Vec<Region>,
    min_containment: f64,
) -> Vec<CompositeRegion> {
    // Middle → outer assignment.
    let outer_refs: Vec<&Region> = outers.iter().collect();
    let mut children_of_outer: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut orphan_middles: Vec<usize> = Vec::new();
    let mut attached_middles: Vec<usize> = Vec::new();

    for (middle_index, middle) in middles.iter().enumerate() {
        match best_parent(middle, &outer_refs, min_containment) {
            Some((outer_index, _, _)) => {
                children_of_outer
                    .entry(outer_index)
                    .or_default()
                    .push(middle_index);
                attached_middles.push(middle_index);
            }
            None => orphan_middles.push(middle_index),
        }
    }

    // Inner → middle assignment, only against middles that found a parent.
    // Each middle keeps its single best inner; displaced inners and inners
    // with no containing middle are exported bare.
    let attached_refs: Vec<&Region> = attached_middles.iter().map(|&i| &middles[i]).collect();
    let mut inner_of_middle: BTreeMap<usize, (usize, f64, f64)> = BTreeMap::new();
    let mut orphan_inners: Vec<usize> = Vec::new();

    for (inner_index, inner) in inners.iter().enumerate() {
        match best_parent(inner, &attached_refs, min_containment) {
            Some((slot, ratio, overlap)) => {
                let middle_index = attached_middles[slot];
                match inner_of_middle.get(&middle_index).copied() {
                    Some((held, held_ratio, held_overlap))
                        if ratio > held_ratio || (ratio == held_ratio && overlap > held_overlap) =>
                    {
                        orphan_inners.push(held);
                        inner_of_middle.insert(middle_index, (inner_index, ratio, overlap));
                    }
                    Some(_) => orphan_inners.push(inner_index),
                    None => {
                        inner_of_middle.insert(middle_index, (inner_index, ratio, overlap));
                    }
                }
            }
            None => orphan_inners.push(inner_index),
        }
    }

    // Assemble: full composites in outer-index order, then bare orphans in
    // level order. The ordering is part of the determinism contract.
    let mut composites = Vec::with_capacity(outers.len());
    for (outer_index, outer) in outers.into_iter().enumerate() {
        let attachments = children_of_outer
            .remove(&outer_index)
            .unwrap_or_default()
            .into_iter()
            .map(|middle_index| MiddleAttachment {
                region: middles[middle_index].clone(),
                inner: inner_of_middle
                    .get(&middle_index)
                    .map(|&(inner_index, _, _)| inners[inner_index].clone()),
            })
            .collect();
        composites.push(CompositeRegion {
            frame_index,
            outer,
            middles: attachments,
        });
    }

    if !orphan_middles.is_empty() || !orphan_inners.is_empty() {
        debug!(
            frame_index,
            orphan_middles = orphan_middles.len(),
            orphan_inners = orphan_inners.len(),
            "exporting uncontained regions as bare composites"
        );
    }
    for middle_index in orphan_middles {
        composites.push(CompositeRegion::bare(
            frame_index,
            middles[middle_index].clone(),
        ));
    }
    orphan_inners.sort_unstable();
    for inner_index in orphan_inners {
        composites.push(CompositeRegion::bare(
            frame_index,
            inners[inner_index].clone(),
        ));
    }

    composites
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RawRegion;
    use approx::assert_relative_eq;

    fn rect(level: Level, x0: f64, y0: f64, x1: f64, y1: f64) -> Region {
        let raw = RawRegion {
            vertices: vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
            pixel_area: None,
        };
        Region::from_raw(level, 0, &raw).unwrap()
    }

    #[test]
    fn test_empty_frame_yields_empty_list() {
        let composites = build_composites(0, vec![], vec![], vec![], 0.8);
        assert!(composites.is_empty());
    }

    #[test]
    fn test_full_nesting() {
        let outer = rect(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let middle = rect(Level::Middle, 2.0, 2.0, 6.0, 6.0);
        let inner = rect(Level::Inner, 3.0, 3.0, 4.0, 4.0);

        let composites = build_composites(5, vec![outer], vec![middle], vec![inner], 0.8);
        assert_eq!(composites.len(), 1);

        let c = &composites[0];
        assert_eq!(c.frame_index, 5);
        assert_eq!(c.level(), Level::Outer);
        assert_eq!(c.middle_count(), 1);
        assert_eq!(c.inner_count(), 1);
        assert_relative_eq!(c.total_area(), 100.0);
    }

    #[test]
    fn test_bare_outer_is_pore_like() {
        let outer = rect(Level::Outer, 0.0, 0.0, 4.0, 4.0);
        let composites = build_composites(0, vec![outer], vec![], vec![], 0.8);
        assert_eq!(composites.len(), 1);
        assert_eq!(composites[0].middle_count(), 0);
    }

    #[test]
    fn test_orphan_middle_exported_bare() {
        // Containment 0.75 against the outer, below min_containment 0.8
        // (scenario E): exported as its own composite, not nested.
        let outer = rect(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let middle = rect(Level::Middle, -0.5, 0.0, 1.5, 2.0);

        let composites = build_composites(0, vec![outer], vec![middle], vec![], 0.8);
        assert_eq!(composites.len(), 2);
        assert_eq!(composites[0].middle_count(), 0);
        assert_eq!(composites[1].level(), Level::Middle);
        assert_eq!(composites[1].middle_count(), 0);
    }

    #[test]
    fn test_competing_outers_higher_ratio_wins() {
        let outer_a = rect(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let outer_b = rect(Level::Outer, 2.0, 0.0, 12.0, 10.0);
        // Fully inside A, half inside B.
        let middle = rect(Level::Middle, 1.0, 4.0, 3.0, 6.0);

        // min_containment 0.5 keeps B a candidate; A must still win.
        let composites = build_composites(0, vec![outer_a, outer_b], vec![middle], vec![], 0.5);
        assert_eq!(composites.len(), 2);
        assert_eq!(composites[0].middle_count(), 1);
        assert_eq!(composites[1].middle_count(), 0);
    }

    #[test]
    fn test_competing_outers_tie_goes_to_lower_index() {
        let outer_a = rect(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let outer_b = rect(Level::Outer, 2.0, 0.0, 12.0, 10.0);
        // Fully inside both: ratio 1.0, equal overlap.
        let middle = rect(Level::Middle, 4.0, 4.0, 6.0, 6.0);

        let composites = build_composites(0, vec![outer_a, outer_b], vec![middle], vec![], 0.8);
        assert_eq!(composites[0].middle_count(), 1);
        assert_eq!(composites[1].middle_count(), 0);
    }

    #[test]
    fn test_middle_keeps_single_best_inner() {
        let outer = rect(Level::Outer, 0.0, 0.0, 10.0, 10.0);
        let middle = rect(Level::Middle, 1.0, 1.0, 9.0, 9.0);
        // Both fully contained: equal ratio, the larger one wins on overlap.
        let small_inner = rect(Level::Inner, 2.0, 2.0, 3.0, 3.0);
        let big_inner = rect(Level::Inner, 5.0, 5.0, 8.0, 8.0);

        let composites =
            build_composites(0, vec![outer], vec![middle], vec![small_inner, big_inner], 0.8);
        assert_eq!(composites.len(), 2);

        let nested = composites[0].middles[0].inner.as_ref().unwrap();
        assert_relative_eq!(nested.area(), 9.0);
        // The displaced inner is exported bare, never dropped.
        assert_eq!(composites[1].level(), Level::Inner);
        assert_relative_eq!(composites[1].outer_area(), 1.0);
    }

    #[test]
    fn test_no_double_containment() {
        // Two outers, three middles, two inners: every region appears in
        // exactly one composite at its level.
        let outers = vec![
            rect(Level::Outer, 0.0, 0.0, 10.0, 10.0),
            rect(Level::Outer, 20.0, 0.0, 30.0, 10.0),
        ];
        let middles = vec![
            rect(Level::Middle, 1.0, 1.0, 4.0, 4.0),
            rect(Level::Middle, 21.0, 1.0, 24.0, 4.0),
            rect(Level::Middle, 50.0, 50.0, 52.0, 52.0), // orphan
        ];
        let inners = vec![
            rect(Level::Inner, 2.0, 2.0, 3.0, 3.0),
            rect(Level::Inner, 60.0, 60.0, 61.0, 61.0), // orphan
        ];

        let composites = build_composites(0, outers, middles, inners, 0.8);
        // 2 full composites + bare middle + bare inner.
        assert_eq!(composites.len(), 4);
        let attached: usize = composites.iter().map(|c| c.middle_count()).sum();
        assert_eq!(attached, 2);
        let inners_attached: usize = composites.iter().map(|c| c.inner_count()).sum();
        assert_eq!(inners_attached, 1);
    }
}
