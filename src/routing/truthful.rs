//! Truthful capability scoring: declared vs observed performance.
//!
//! Tools declare capability vectors at registration; observed performance is
//! tracked per dimension with an EMA. Credibility is the complement of the
//! normalized distance between declaration and observation, and it discounts
//! raw scores — overclaiming costs more than it gains.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Declared and observed capability vectors for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub declared: BTreeMap<String, f64>,
    pub observed: BTreeMap<String, f64>,
}

/// Tracks capability declarations and observations across entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthfulScorer {
    alpha: f64,
    profiles: HashMap<EntityId, CapabilityProfile>,
}

impl TruthfulScorer {
    /// `alpha` is the EMA factor for observed performance.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            profiles: HashMap::new(),
        }
    }

    /// Record (or replace) an entity's declared capabilities. Values are
    /// clamped to [0, 1].
    pub fn declare(&mut self, entity: &EntityId, capabilities: BTreeMap<String, f64>) {
        let profile = self.profiles.entry(entity.clone()).or_default();
        profile.declared = capabilities
            .into_iter()
            .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
            .collect();
    }

    /// Record observed performance on one capability dimension.
    pub fn observe(&mut self, entity: &EntityId, dimension: &str, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let profile = self.profiles.entry(entity.clone()).or_default();
        match profile.observed.get_mut(dimension) {
            Some(current) => *current = self.alpha * value + (1.0 - self.alpha) * *current,
            None => {
                profile.observed.insert(dimension.to_string(), value);
            }
        }
    }

    /// Credibility in [0, 1]: `1 − ‖declared − observed‖ / √dims`.
    ///
    /// Dimensions never observed are taken at the neutral 0.5, so bare
    /// declarations start partially credible rather than fully trusted.
    pub fn credibility(&self, entity: &EntityId) -> f64 {
        let Some(profile) = self.profiles.get(entity) else {
            return 1.0;
        };
        if profile.declared.is_empty() {
            return 1.0;
        }
        let mut sum_sq = 0.0;
        for (dimension, declared) in &profile.declared {
            let observed = profile.observed.get(dimension).copied().unwrap_or(0.5);
            sum_sq += (declared - observed).powi(2);
        }
        let distance = sum_sq.sqrt();
        let normalizer = (profile.declared.len() as f64).sqrt();
        (1.0 - distance / normalizer).clamp(0.0, 1.0)
    }

    /// Discount a raw score by the entity's credibility.
    pub fn adjusted_score(&self, entity: &EntityId, raw: f64) -> f64 {
        raw * self.credibility(entity)
    }

    pub fn profile(&self, entity: &EntityId) -> Option<&CapabilityProfile> {
        self.profiles.get(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> EntityId {
        EntityId::new(name).unwrap()
    }

    fn caps(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn honest_declaration_keeps_full_credibility() {
        let mut scorer = TruthfulScorer::new(0.15);
        let e = id("tool.search");
        scorer.declare(&e, caps(&[("recall", 0.8), ("speed", 0.6)]));
        for _ in 0..50 {
            scorer.observe(&e, "recall", 0.8);
            scorer.observe(&e, "speed", 0.6);
        }
        assert!(scorer.credibility(&e) > 0.99);
        assert!((scorer.adjusted_score(&e, 0.9) - 0.9).abs() < 0.01);
    }

    #[test]
    fn overclaiming_is_discounted() {
        let mut scorer = TruthfulScorer::new(0.15);
        let e = id("tool.braggart");
        scorer.declare(&e, caps(&[("recall", 1.0)]));
        for _ in 0..50 {
            scorer.observe(&e, "recall", 0.2);
        }
        let credibility = scorer.credibility(&e);
        assert!(credibility < 0.3, "credibility was {credibility}");
        assert!(scorer.adjusted_score(&e, 1.0) < 0.3);
    }

    #[test]
    fn unobserved_dimensions_are_neutral() {
        let mut scorer = TruthfulScorer::new(0.15);
        let e = id("tool.new");
        scorer.declare(&e, caps(&[("recall", 0.5)]));
        assert!((scorer.credibility(&e) - 1.0).abs() < 1e-12);

        scorer.declare(&e, caps(&[("recall", 1.0)]));
        assert!((scorer.credibility(&e) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unknown_entity_has_unit_credibility() {
        let scorer = TruthfulScorer::new(0.15);
        assert_eq!(scorer.credibility(&id("ghost")), 1.0);
    }

    #[test]
    fn observation_ema_converges() {
        let mut scorer = TruthfulScorer::new(0.15);
        let e = id("tool.x");
        scorer.observe(&e, "speed", 1.0);
        for _ in 0..100 {
            scorer.observe(&e, "speed", 0.0);
        }
        let observed = scorer.profile(&e).unwrap().observed["speed"];
        assert!(observed < 0.01);
    }
}
