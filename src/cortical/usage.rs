//! Usage and co-occurrence accounting for the cortical map.
//!
//! Counts are kept as decayed floats over dense entity handles; co-occurrence
//! edges live in a sparse map keyed by ordered handle pairs. Similarity between
//! entities blends cosine and Jaccard over their co-occurrence vectors.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::entity::EntityHandle;

/// Counts below this are dropped during decay to keep the maps sparse.
const PRUNE_EPSILON: f64 = 1e-6;

fn ordered(a: EntityHandle, b: EntityHandle) -> (EntityHandle, EntityHandle) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Decayed usage counts and pairwise co-occurrence edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    counts: HashMap<EntityHandle, f64>,
    pairs: HashMap<(EntityHandle, EntityHandle), f64>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one turn in which all of `entities` were used together.
    pub fn record_turn(&mut self, entities: &[EntityHandle]) {
        for &e in entities {
            *self.counts.entry(e).or_default() += 1.0;
        }
        for (i, &a) in entities.iter().enumerate() {
            for &b in &entities[i + 1..] {
                if a != b {
                    *self.pairs.entry(ordered(a, b)).or_default() += 1.0;
                }
            }
        }
    }

    pub fn count(&self, e: EntityHandle) -> f64 {
        self.counts.get(&e).copied().unwrap_or_default()
    }

    pub fn pair_count(&self, a: EntityHandle, b: EntityHandle) -> f64 {
        self.pairs.get(&ordered(a, b)).copied().unwrap_or_default()
    }

    /// Total usage mass across all entities.
    pub fn total(&self) -> f64 {
        self.counts.values().sum()
    }

    /// Symmetric normalized co-occurrence: joint count over the smaller of
    /// the two individual counts, clamped to [0, 1].
    pub fn co_occurrence(&self, a: EntityHandle, b: EntityHandle) -> f64 {
        let ca = self.count(a);
        let cb = self.count(b);
        let floor = ca.min(cb);
        if floor <= 0.0 {
            return 0.0;
        }
        (self.pair_count(a, b) / floor).clamp(0.0, 1.0)
    }

    /// Co-occurrence vector of `e`: partner handle → joint count, with the
    /// entity's own count on the diagonal so that mutually-paired entities
    /// compare as similar.
    pub fn co_vector(&self, e: EntityHandle) -> BTreeMap<EntityHandle, f64> {
        let mut vector = BTreeMap::new();
        let own = self.count(e);
        if own > 0.0 {
            vector.insert(e, own);
        }
        for (&(a, b), &count) in &self.pairs {
            if a == e {
                vector.insert(b, count);
            } else if b == e {
                vector.insert(a, count);
            }
        }
        vector
    }

    /// Blend of weighted cosine and Jaccard over co-occurrence vectors,
    /// used only for territory redistribution.
    pub fn similarity(&self, x: EntityHandle, y: EntityHandle) -> f64 {
        let ux = self.co_vector(x);
        let uy = self.co_vector(y);
        0.7 * cosine(&ux, &uy) + 0.3 * jaccard(&ux, &uy)
    }

    /// Decay usage counts and co-occurrence edges by separate factors.
    pub fn decay(&mut self, count_factor: f64, edge_factor: f64) {
        for value in self.counts.values_mut() {
            *value *= count_factor;
        }
        self.counts.retain(|_, v| *v > PRUNE_EPSILON);
        for value in self.pairs.values_mut() {
            *value *= edge_factor;
        }
        self.pairs.retain(|_, v| *v > PRUNE_EPSILON);
    }

    /// Reattribute all usage from one handle to another (merge routing).
    pub fn transfer(&mut self, from: EntityHandle, to: EntityHandle) {
        if let Some(count) = self.counts.remove(&from) {
            *self.counts.entry(to).or_default() += count;
        }
        let moved: Vec<((EntityHandle, EntityHandle), f64)> = self
            .pairs
            .iter()
            .filter(|((a, b), _)| *a == from || *b == from)
            .map(|(k, v)| (*k, *v))
            .collect();
        for ((a, b), count) in moved {
            self.pairs.remove(&(a, b));
            let other = if a == from { b } else { a };
            if other != to {
                *self.pairs.entry(ordered(to, other)).or_default() += count;
            }
        }
    }

    /// Grant a handle a share of another's usage mass (split restoration).
    pub fn seed_count(&mut self, e: EntityHandle, amount: f64) {
        if amount > 0.0 {
            *self.counts.entry(e).or_default() += amount;
        }
    }

    /// Forget everything about a handle.
    pub fn forget(&mut self, e: EntityHandle) {
        self.counts.remove(&e);
        self.pairs.retain(|(a, b), _| *a != e && *b != e);
    }
}

fn cosine(u: &BTreeMap<EntityHandle, f64>, v: &BTreeMap<EntityHandle, f64>) -> f64 {
    let mut dot = 0.0;
    for (key, a) in u {
        if let Some(b) = v.get(key) {
            dot += a * b;
        }
    }
    let nu: f64 = u.values().map(|a| a * a).sum::<f64>().sqrt();
    let nv: f64 = v.values().map(|b| b * b).sum::<f64>().sqrt();
    if nu == 0.0 || nv == 0.0 {
        return 0.0;
    }
    (dot / (nu * nv)).clamp(0.0, 1.0)
}

fn jaccard(u: &BTreeMap<EntityHandle, f64>, v: &BTreeMap<EntityHandle, f64>) -> f64 {
    if u.is_empty() && v.is_empty() {
        return 0.0;
    }
    let intersection = u.keys().filter(|k| v.contains_key(*k)).count() as f64;
    let union = (u.len() + v.len()) as f64 - intersection;
    if union == 0.0 { 0.0 } else { intersection / union }
}
