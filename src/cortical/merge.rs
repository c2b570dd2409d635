//! Territory fusion: merged entities, merge records, and cohesion tracking.
//!
//! Two entities fuse when their co-occurrence crosses the merge threshold with
//! enough observations on each side. The merged entity inherits the summed
//! territory and Beta counts, and carries a [`MergeRecord`] with both pre-merge
//! allocations so the fusion stays reversible. After a merge, usage attribution
//! routes to the merged id; a bounded window of component hits tracks whether
//! the sources are still used together, and a cohesion drop splits them back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::cortical::TerritoryAllocation;
use crate::entity::{EntityHandle, EntityId};

/// Which components of a merged entity a usage touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHit {
    /// Both sources were named in the same turn.
    Joint,
    /// Only the first source.
    First,
    /// Only the second source.
    Second,
}

/// Pre-merge state captured for reversibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub first: TerritoryAllocation,
    pub second: TerritoryAllocation,
    pub merged_at_turn: u64,
    /// Combined size at merge time (first.size + second.size).
    pub size_at_merge: f64,
}

/// A fused pair living in the cortical map under a single territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedEntity {
    pub id: EntityId,
    pub handle: EntityHandle,
    pub sources: (EntityHandle, EntityHandle),
    pub record: MergeRecord,
    /// Recent component hits; cohesion is the joint share of this window.
    window: VecDeque<ComponentHit>,
    window_cap: usize,
}

impl MergedEntity {
    pub fn new(
        id: EntityId,
        handle: EntityHandle,
        sources: (EntityHandle, EntityHandle),
        record: MergeRecord,
        window_cap: usize,
    ) -> Self {
        // The pair merged because of joint use; seed the window accordingly
        // so a fresh merge does not immediately qualify for a split.
        let mut window = VecDeque::with_capacity(window_cap);
        for _ in 0..window_cap {
            window.push_back(ComponentHit::Joint);
        }
        Self {
            id,
            handle,
            sources,
            record,
            window,
            window_cap,
        }
    }

    /// Record which components a usage touched.
    pub fn record_hit(&mut self, hit: ComponentHit) {
        if self.window.len() == self.window_cap {
            self.window.pop_front();
        }
        self.window.push_back(hit);
    }

    /// Share of recent usages that touched both sources together.
    pub fn cohesion(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let joint = self
            .window
            .iter()
            .filter(|hit| matches!(hit, ComponentHit::Joint))
            .count();
        joint as f64 / self.window.len() as f64
    }

    /// Restored source allocations, dividing the current merged size
    /// proportionally to the pre-merge sizes. Beta counts revert to their
    /// merge-time values.
    pub fn split_allocations(&self, current_size: f64, turn: u64) -> (TerritoryAllocation, TerritoryAllocation) {
        let pre_total = self.record.first.size + self.record.second.size;
        let first_share = if pre_total > 0.0 {
            self.record.first.size / pre_total
        } else {
            0.5
        };
        let mut first = self.record.first.clone();
        let mut second = self.record.second.clone();
        first.size = current_size * first_share;
        second.size = current_size - first.size;
        first.last_used_turn = turn;
        second.last_used_turn = turn;
        (first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    fn alloc(name: &str, size: f64, alpha: f64, beta: f64) -> TerritoryAllocation {
        TerritoryAllocation {
            entity: EntityId::new(name).unwrap(),
            kind: EntityKind::Tool,
            size,
            usage_count: 0.0,
            usage_freq: 0.0,
            last_used_turn: 0,
            alpha,
            beta,
            created_at_turn: 0,
            metadata: Default::default(),
        }
    }

    fn merged() -> MergedEntity {
        let record = MergeRecord {
            first: alloc("x", 0.3, 4.0, 2.0),
            second: alloc("y", 0.1, 2.0, 2.0),
            merged_at_turn: 5,
            size_at_merge: 0.4,
        };
        MergedEntity::new(
            EntityId::merged_from(
                &EntityId::new("x").unwrap(),
                &EntityId::new("y").unwrap(),
            ),
            EntityHandle(9),
            (EntityHandle(0), EntityHandle(1)),
            record,
            10,
        )
    }

    #[test]
    fn fresh_merge_is_fully_cohesive() {
        assert_eq!(merged().cohesion(), 1.0);
    }

    #[test]
    fn solo_hits_erode_cohesion() {
        let mut m = merged();
        for _ in 0..8 {
            m.record_hit(ComponentHit::First);
        }
        assert!((m.cohesion() - 0.2).abs() < 1e-12);
        for _ in 0..2 {
            m.record_hit(ComponentHit::First);
        }
        assert_eq!(m.cohesion(), 0.0);
    }

    #[test]
    fn split_divides_current_size_by_premerge_proportion() {
        let m = merged();
        let (first, second) = m.split_allocations(0.2, 30);
        assert!((first.size - 0.15).abs() < 1e-12);
        assert!((second.size - 0.05).abs() < 1e-12);
        assert!((first.size + second.size - 0.2).abs() < 1e-12);
        // Beta counts restore to merge-time values.
        assert_eq!(first.alpha, 4.0);
        assert_eq!(second.beta, 2.0);
    }
}
