//! Weight engine: behavioral weights and tool/model preference posteriors.
//!
//! Three maps drive downstream decisions:
//!
//! - **Behavioral** weights in [−1, 1], updated by bounded EMA toward a target
//! - **Tool preferences** as Beta posteriors (α, β), mean α/(α+β)
//! - **Model preferences**, same representation
//!
//! Feedback arrives through four tiers (direct, user-insight, enterprise,
//! global), each carrying a tier-specific effective-sample weight. A disabled
//! tier contributes zero and the update is a no-op. A separate override layer
//! shadows learned behavioral values without destroying them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{CortexResult, WeightError};

/// Feedback provenance tier, in decreasing order of effective-sample weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTier {
    /// Tier 1: direct in-session outcome.
    Direct,
    /// Tier 2: distilled user insight.
    UserInsight,
    /// Tier 3: enterprise policy feedback.
    Enterprise,
    /// Tier 4: global aggregate feedback.
    Global,
}

impl FeedbackTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::UserInsight => "user-insight",
            Self::Enterprise => "enterprise",
            Self::Global => "global",
        }
    }
}

/// Which preference map an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    Tool,
    Model,
}

/// A preference weight backed by a Beta posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceWeight {
    pub alpha: f64,
    pub beta: f64,
    /// Cached posterior mean α/(α+β).
    pub value: f64,
    pub uses: u64,
    /// Logical seconds of the last use.
    pub last_used: f64,
}

impl PreferenceWeight {
    /// The uninformative (1, 1) prior.
    pub fn prior() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            value: 0.5,
            uses: 0,
            last_used: 0.0,
        }
    }

    fn refresh_mean(&mut self) {
        self.value = self.alpha / (self.alpha + self.beta);
    }

    /// Conjugate update: success adds to α, failure to β.
    fn observe(&mut self, success: bool, k: f64, now: f64) {
        if success {
            self.alpha += k;
        } else {
            self.beta += k;
        }
        self.uses += 1;
        self.last_used = now;
        self.refresh_mean();
    }

    /// Contract both counts toward the prior by φ.
    fn decay(&mut self, phi: f64) {
        self.alpha = 1.0 + (self.alpha - 1.0) * phi;
        self.beta = 1.0 + (self.beta - 1.0) * phi;
        self.refresh_mean();
    }
}

/// A scalar behavioral weight in [−1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralWeight {
    pub value: f64,
    pub learning_rate: f64,
    /// Logical seconds of the last update.
    pub last_update: f64,
}

/// Runtime override shadowing a learned behavioral value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightOverride {
    pub value: f64,
    /// Logical expiry; `None` lasts until removed.
    pub expires_at: Option<f64>,
}

/// Complete, immutable copy of all effective weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub behavioral: BTreeMap<String, f64>,
    pub tools: BTreeMap<String, f64>,
    pub models: BTreeMap<String, f64>,
}

/// What a feedback application changed, for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFeedback {
    pub target: String,
    pub tier: FeedbackTier,
    pub before: f64,
    pub after: f64,
}

/// The three weight maps plus the override layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightEngine {
    behavioral: HashMap<String, BehavioralWeight>,
    tools: HashMap<EntityId, PreferenceWeight>,
    models: HashMap<EntityId, PreferenceWeight>,
    overrides: HashMap<String, WeightOverride>,
}

impl WeightEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavioral weight if absent. The initial value is clamped.
    pub fn ensure_behavioral(&mut self, name: &str, initial: f64, learning_rate: f64) {
        self.behavioral
            .entry(name.to_string())
            .or_insert_with(|| BehavioralWeight {
                value: initial.clamp(-1.0, 1.0),
                learning_rate,
                last_update: 0.0,
            });
    }

    /// Apply tiered feedback to a tool or model preference.
    ///
    /// `k` is the tier's effective-sample weight already scaled by the layer
    /// learning rate; zero (disabled tier) makes this a no-op returning `None`.
    /// Unknown entities auto-register with the (1, 1) prior.
    pub fn apply_preference_feedback(
        &mut self,
        kind: PreferenceKind,
        entity: &EntityId,
        success: bool,
        tier: FeedbackTier,
        k: f64,
        now: f64,
    ) -> Option<AppliedFeedback> {
        if k <= 0.0 {
            return None;
        }
        let map = match kind {
            PreferenceKind::Tool => &mut self.tools,
            PreferenceKind::Model => &mut self.models,
        };
        let weight = map
            .entry(entity.clone())
            .or_insert_with(PreferenceWeight::prior);
        let before = weight.value;
        weight.observe(success, k, now);
        Some(AppliedFeedback {
            target: entity.as_str().to_string(),
            tier,
            before,
            after: weight.value,
        })
    }

    /// Apply tiered feedback to a behavioral weight: bounded EMA toward the
    /// target, with the EMA step scaled by the tier weight.
    pub fn apply_behavioral_feedback(
        &mut self,
        name: &str,
        target: f64,
        tier: FeedbackTier,
        tier_weight: f64,
        default_lr: f64,
        now: f64,
    ) -> Option<AppliedFeedback> {
        if tier_weight <= 0.0 {
            return None;
        }
        let weight = self
            .behavioral
            .entry(name.to_string())
            .or_insert_with(|| BehavioralWeight {
                value: 0.0,
                learning_rate: default_lr,
                last_update: now,
            });
        let before = weight.value;
        let step = (weight.learning_rate * tier_weight).min(1.0);
        weight.value = (weight.value + step * (target.clamp(-1.0, 1.0) - weight.value))
            .clamp(-1.0, 1.0);
        weight.last_update = now;
        Some(AppliedFeedback {
            target: name.to_string(),
            tier,
            before,
            after: weight.value,
        })
    }

    /// Decay preference posteriors toward the prior. Behavioral weights are
    /// unaffected by time.
    pub fn decay(&mut self, dt_secs: f64, halflife_secs: f64) {
        if dt_secs <= 0.0 {
            return;
        }
        let phi = 0.5_f64.powf(dt_secs / halflife_secs);
        for weight in self.tools.values_mut() {
            weight.decay(phi);
        }
        for weight in self.models.values_mut() {
            weight.decay(phi);
        }
    }

    /// Install a behavioral override. The value must already be in range.
    pub fn set_override(
        &mut self,
        name: &str,
        value: f64,
        ttl_secs: Option<f64>,
        now: f64,
    ) -> CortexResult<()> {
        if !(-1.0..=1.0).contains(&value) {
            return Err(WeightError::ValueOutOfRange {
                name: name.to_string(),
                value,
            }
            .into());
        }
        self.overrides.insert(
            name.to_string(),
            WeightOverride {
                value,
                expires_at: ttl_secs.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    /// Remove an override, returning whether one existed.
    pub fn clear_override(&mut self, name: &str) -> bool {
        self.overrides.remove(name).is_some()
    }

    /// Effective behavioral value: live override if present, else learned.
    pub fn effective_behavioral(&self, name: &str, now: f64) -> Option<f64> {
        if let Some(ov) = self.overrides.get(name) {
            let live = ov.expires_at.is_none_or(|at| now < at);
            if live {
                return Some(ov.value);
            }
        }
        self.behavioral.get(name).map(|w| w.value)
    }

    /// Drop overrides whose TTL has elapsed.
    pub fn expire_overrides(&mut self, now: f64) {
        self.overrides
            .retain(|_, ov| ov.expires_at.is_none_or(|at| now < at));
    }

    /// Posterior mean for a preference entity, if known.
    pub fn preference_mean(&self, kind: PreferenceKind, entity: &EntityId) -> Option<f64> {
        let map = match kind {
            PreferenceKind::Tool => &self.tools,
            PreferenceKind::Model => &self.models,
        };
        map.get(entity).map(|w| w.value)
    }

    /// Full preference record, if known.
    pub fn preference(&self, kind: PreferenceKind, entity: &EntityId) -> Option<&PreferenceWeight> {
        match kind {
            PreferenceKind::Tool => self.tools.get(entity),
            PreferenceKind::Model => self.models.get(entity),
        }
    }

    /// Deep copy of all effective weights, with live overrides applied.
    /// Overrides on names with no learned value still appear.
    pub fn snapshot(&self, now: f64) -> WeightSnapshot {
        let mut behavioral: BTreeMap<String, f64> = self
            .behavioral
            .keys()
            .map(|name| {
                let value = self
                    .effective_behavioral(name, now)
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect();
        for (name, ov) in &self.overrides {
            if ov.expires_at.is_none_or(|at| now < at) {
                behavioral.insert(name.clone(), ov.value);
            }
        }
        let tools = self
            .tools
            .iter()
            .map(|(id, w)| (id.as_str().to_string(), w.value))
            .collect();
        let models = self
            .models
            .iter()
            .map(|(id, w)| (id.as_str().to_string(), w.value))
            .collect();
        WeightSnapshot {
            behavioral,
            tools,
            models,
        }
    }

    /// Export the persistence document (`weights/<tenant>/<user>.json`).
    pub fn to_document(&self) -> WeightDocument {
        WeightDocument {
            behavioral: self
                .behavioral
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            tool_prefs: self
                .tools
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
            model_prefs: self
                .models
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
        }
    }

    /// Rebuild an engine from a persisted document. Malformed entity ids
    /// (empty strings) are skipped rather than failing the whole load.
    pub fn from_document(doc: WeightDocument) -> Self {
        let mut engine = Self::new();
        engine.behavioral = doc.behavioral.into_iter().collect();
        for (raw, weight) in doc.tool_prefs {
            if let Ok(id) = EntityId::new(raw) {
                engine.tools.insert(id, weight);
            }
        }
        for (raw, weight) in doc.model_prefs {
            if let Ok(id) = EntityId::new(raw) {
                engine.models.insert(id, weight);
            }
        }
        engine
    }
}

/// Persisted weight state for one (tenant, user) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightDocument {
    pub behavioral: BTreeMap<String, BehavioralWeight>,
    pub tool_prefs: BTreeMap<String, PreferenceWeight>,
    pub model_prefs: BTreeMap<String, PreferenceWeight>,
}
