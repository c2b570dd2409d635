//! Entity reputation: trust EMA, consistency, quarantine, forgiveness.
//!
//! Trust moves toward observed success with a bonus for consistent behavior.
//! A run of consecutive failures quarantines the entity with exponential
//! backoff; quarantined entities report zero effective trust and are excluded
//! from candidate lists until the quarantine lapses or `forgive` clears it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::CortexConfig;
use crate::entity::EntityId;
use crate::error::{CortexResult, MapError};

/// Trust an entity restarts at after forgiveness.
pub const FORGIVENESS_TRUST: f64 = 0.3;

/// Outcomes remembered per entity for consistency scoring.
const HISTORY_CAP: usize = 32;

/// Reputation parameters, copied from the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationParams {
    pub trust_alpha: f64,
    pub consistency_beta: f64,
    pub quarantine_failures: u32,
    pub quarantine_base_secs: f64,
}

impl From<&CortexConfig> for ReputationParams {
    fn from(config: &CortexConfig) -> Self {
        Self {
            trust_alpha: config.trust_alpha,
            consistency_beta: config.consistency_beta,
            quarantine_failures: config.quarantine_failures,
            quarantine_base_secs: config.quarantine_base_secs,
        }
    }
}

/// Reputation state for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationEntry {
    pub trust: f64,
    pub consistency: f64,
    pub consecutive_failures: u32,
    pub quarantined_until: Option<f64>,
    history: VecDeque<bool>,
}

impl ReputationEntry {
    fn new() -> Self {
        Self {
            trust: 0.5,
            consistency: 1.0,
            consecutive_failures: 0,
            quarantined_until: None,
            history: VecDeque::new(),
        }
    }

    fn push_history(&mut self, success: bool) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    /// Consistency: complement of the outcome flip rate over the history.
    fn recompute_consistency(&mut self) {
        if self.history.len() < 2 {
            self.consistency = 1.0;
            return;
        }
        let flips = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count();
        self.consistency = 1.0 - flips as f64 / (self.history.len() - 1) as f64;
    }

    pub fn is_quarantined(&self, now: f64) -> bool {
        self.quarantined_until.is_some_and(|until| now < until)
    }
}

/// Per-session reputation tracker over all entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationTracker {
    params: ReputationParams,
    entries: HashMap<EntityId, ReputationEntry>,
}

impl ReputationTracker {
    pub fn new(params: ReputationParams) -> Self {
        Self {
            params,
            entries: HashMap::new(),
        }
    }

    /// Record one interaction outcome. First interaction creates the entry.
    pub fn record_outcome(&mut self, entity: &EntityId, success: bool, now: f64) {
        let k = self.params.quarantine_failures;
        let base = self.params.quarantine_base_secs;
        let alpha = self.params.trust_alpha;
        let beta = self.params.consistency_beta;

        let entry = self
            .entries
            .entry(entity.clone())
            .or_insert_with(ReputationEntry::new);

        entry.push_history(success);
        entry.recompute_consistency();

        let target = if success { 1.0 } else { 0.0 };
        let consistency_bonus = entry.consistency * if success { 1.0 } else { 0.0 };
        entry.trust =
            (entry.trust + alpha * (target - entry.trust) + beta * consistency_bonus).clamp(0.0, 1.0);

        if success {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= k {
                let exponent = (entry.consecutive_failures - k) as f64;
                let duration = base * 2.0_f64.powf(exponent);
                entry.quarantined_until = Some(now + duration);
                tracing::warn!(
                    entity = entity.as_str(),
                    failures = entry.consecutive_failures,
                    duration_secs = duration,
                    "entity quarantined"
                );
            }
        }
    }

    /// Effective trust: zero while quarantined, 0.5 prior when unknown.
    pub fn effective_trust(&self, entity: &EntityId, now: f64) -> f64 {
        match self.entries.get(entity) {
            Some(entry) if entry.is_quarantined(now) => 0.0,
            Some(entry) => entry.trust,
            None => 0.5,
        }
    }

    pub fn is_quarantined(&self, entity: &EntityId, now: f64) -> bool {
        self.entries
            .get(entity)
            .is_some_and(|e| e.is_quarantined(now))
    }

    /// Filter a candidate list down to non-quarantined entities.
    pub fn available(&self, candidates: &[EntityId], now: f64) -> Vec<EntityId> {
        candidates
            .iter()
            .filter(|c| !self.is_quarantined(c, now))
            .cloned()
            .collect()
    }

    /// Clear quarantine and restart trust at the forgiveness level.
    pub fn forgive(&mut self, entity: &EntityId) -> CortexResult<()> {
        let entry = self
            .entries
            .get_mut(entity)
            .ok_or_else(|| MapError::UnknownEntity {
                id: entity.as_str().to_string(),
            })?;
        entry.quarantined_until = None;
        entry.consecutive_failures = 0;
        entry.trust = FORGIVENESS_TRUST;
        tracing::info!(entity = entity.as_str(), "entity forgiven");
        Ok(())
    }

    pub fn entry(&self, entity: &EntityId) -> Option<&ReputationEntry> {
        self.entries.get(entity)
    }

    /// Snapshot of effective trust for every known entity.
    pub fn export(&self, now: f64) -> BTreeMap<String, f64> {
        self.entries
            .keys()
            .map(|id| (id.as_str().to_string(), self.effective_trust(id, now)))
            .collect()
    }
}
