//! Similarity-based territory redistribution after an entity is removed.
//!
//! The removed entity's territory flows to survivors in proportion to
//! `sim(removed, y)^k`, where sim blends cosine and Jaccard over co-occurrence
//! vectors. Survivors below the similarity floor receive nothing; when no
//! survivor qualifies, the caller returns the mass to the free reserve.

use crate::cortical::usage::UsageTracker;
use crate::entity::EntityHandle;

/// Normalized redistribution shares for the survivors of a removal.
///
/// Returns an empty vector when no survivor clears the similarity floor.
pub(crate) fn redistribution_shares(
    usage: &UsageTracker,
    removed: EntityHandle,
    survivors: &[EntityHandle],
    exponent: f64,
    floor: f64,
) -> Vec<(EntityHandle, f64)> {
    let mut weights: Vec<(EntityHandle, f64)> = survivors
        .iter()
        .filter_map(|&y| {
            let sim = usage.similarity(removed, y);
            if sim >= floor {
                Some((y, sim.powf(exponent)))
            } else {
                None
            }
        })
        .collect();

    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    for (_, w) in &mut weights {
        *w /= total;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u32) -> EntityHandle {
        EntityHandle(n)
    }

    #[test]
    fn similar_survivors_receive_proportionally_more() {
        let mut usage = UsageTracker::new();
        // removed (0) shares partner 3 with survivor 1; survivor 2 is disjoint.
        for _ in 0..10 {
            usage.record_turn(&[h(0), h(3)]);
            usage.record_turn(&[h(1), h(3)]);
            usage.record_turn(&[h(2), h(4)]);
        }

        let shares = redistribution_shares(&usage, h(0), &[h(1), h(2)], 2.0, 0.05);
        assert_eq!(shares.len(), 1, "disjoint survivor must be floored out");
        assert_eq!(shares[0].0, h(1));
        assert!((shares[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_qualifying_survivor_yields_empty() {
        let usage = UsageTracker::new();
        let shares = redistribution_shares(&usage, h(0), &[h(1), h(2)], 2.0, 0.05);
        assert!(shares.is_empty());
    }

    #[test]
    fn shares_sum_to_one() {
        let mut usage = UsageTracker::new();
        for _ in 0..6 {
            usage.record_turn(&[h(0), h(1), h(2)]);
        }
        let shares = redistribution_shares(&usage, h(0), &[h(1), h(2)], 2.0, 0.05);
        let total: f64 = shares.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
