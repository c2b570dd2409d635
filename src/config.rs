//! Per-session configuration for the cognitive control core.
//!
//! A [`CortexConfig`] is built (or loaded from TOML) once, validated, and then
//! immutable for the lifetime of the session. Every documented runtime option
//! lives here; there is no dynamic options map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CortexResult};

/// Which feedback tiers are enabled.
///
/// Tier 1 is direct in-session feedback, tier 2 distilled user insight,
/// tier 3 enterprise policy feedback, tier 4 global aggregate feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTiers {
    pub direct: bool,
    pub user_insight: bool,
    pub enterprise: bool,
    pub global: bool,
}

impl Default for FeedbackTiers {
    fn default() -> Self {
        Self {
            direct: true,
            user_insight: true,
            enterprise: true,
            global: false,
        }
    }
}

/// Audit log behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Master switch; disabled audit still keeps sequence numbers but appends nothing.
    pub enabled: bool,
    /// Files older than this many days are pruned by the sink.
    pub retention_days: u32,
    /// Rotation threshold for a single dated log file.
    pub max_file_bytes: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 90,
            max_file_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Per-model-prefix forced parameter values, applied at the
/// provider-constraint tier of parameter resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

/// Immutable configuration for one session of the control core.
///
/// Scalar options come first, nested tables last, so the struct serializes
/// cleanly to TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    /// Effective-sample weight per tier, in tier order (direct, user-insight,
    /// enterprise, global). Scales the Beta conjugate updates.
    pub tier_sample_weights: [f64; 4],

    /// Behavioral weight learning rate (bounded EMA step).
    pub behavioral_lr: f64,
    /// Scales preference updates for tools.
    pub tool_lr: f64,
    /// Scales preference updates for models.
    pub model_lr: f64,

    /// Preference-weight half-life in seconds; Betas contract toward the
    /// (1, 1) prior with `0.5^(dt/half_life)`.
    pub preference_halflife_secs: f64,
    /// Multiplicative decay applied to usage counts each reorganization cycle.
    pub decay_factor: f64,
    /// Half-life, in turns, of co-occurrence edge counts.
    pub edge_halflife_turns: f64,
    /// Turns of idleness after which an entity's recency reaches zero.
    pub disuse_threshold_turns: u32,

    /// Co-occurrence at or above this merges a pair.
    pub merge_threshold: f64,
    /// Internal co-occurrence below this splits a merged entity.
    pub split_threshold: f64,
    /// Minimum per-entity observations before a merge is considered.
    pub merge_min_observations: u32,
    /// Exponent applied to similarity during redistribution.
    pub similarity_exponent: f64,
    /// Entities below this similarity receive nothing during redistribution.
    pub similarity_floor: f64,

    /// Reorganization runs when accumulated pressure reaches this.
    pub pressure_threshold: f64,
    /// Reorganization also runs every this many turns regardless of pressure.
    pub periodic_interval_turns: u64,

    /// Identical state hashes within the window before a loop is flagged.
    pub loop_threshold: u32,
    /// Ring-buffer size for loop detection hashes.
    pub loop_window: usize,
    /// Drift at or above this recommends adjusting.
    pub drift_warning: f64,
    /// Drift at or above this recommends replanning.
    pub drift_critical: f64,
    /// Turns without progress before a stall recommends replanning.
    pub progress_stall_turns: u32,
    /// Alignment below this recommends aborting.
    pub abort_alignment: f64,
    /// Alignment below this recommends adjusting.
    pub adjust_alignment: f64,
    /// Progress deltas below this count as a stalled turn.
    pub progress_epsilon: f64,
    /// EMA factor for the alignment series feeding drift.
    pub alignment_ema_alpha: f64,

    /// Scale for converting prediction residuals to surprise.
    pub surprise_scale: f64,
    /// EMA factor for the running surprise signal.
    pub surprise_ema_alpha: f64,
    /// Residuals retained per prediction channel.
    pub residual_window: usize,
    /// Uniform-width confidence bins for calibration.
    pub calibration_bins: usize,

    /// Trust EMA step toward observed success.
    pub trust_alpha: f64,
    /// Weight of the consistency bonus in the trust update.
    pub consistency_beta: f64,
    /// Consecutive failures that trigger quarantine.
    pub quarantine_failures: u32,
    /// Base quarantine duration in seconds; doubles per failure past the threshold.
    pub quarantine_base_secs: f64,

    /// Permutations for Monte Carlo Shapley (exact mode is used at ≤ 8 players).
    pub shapley_permutations: u32,
    /// Best-response iterations per Nash routing pass.
    pub nash_steps: u32,
    /// Probability-mass step per Nash iteration.
    pub nash_eta: f64,
    /// EMA factor for Nash model/task utilities.
    pub nash_utility_alpha: f64,
    /// EMA factor for observed capability tracking in truthful scoring.
    pub truthful_alpha: f64,

    /// Feedback tier enables (tier1..tier4).
    pub tiers: FeedbackTiers,
    /// Audit behavior.
    pub audit: AuditConfig,
    /// Task-type temperature ceilings overriding the built-in table.
    pub task_ceilings: BTreeMap<String, f64>,
    /// Model-prefix → forced parameters, checked longest-prefix-first.
    pub provider_constraints: BTreeMap<String, ProviderConstraint>,
}

impl Default for CortexConfig {
    fn default() -> Self {
        let mut provider_constraints = BTreeMap::new();
        // Gemini 3 generation models pin sampling temperature.
        provider_constraints.insert(
            "gemini-3".to_string(),
            ProviderConstraint {
                temperature: Some(1.0),
                ..Default::default()
            },
        );

        Self {
            tier_sample_weights: [1.0, 0.6, 0.3, 0.1],
            behavioral_lr: 0.2,
            tool_lr: 1.0,
            model_lr: 1.0,
            preference_halflife_secs: 7.0 * 86_400.0,
            decay_factor: 0.95,
            edge_halflife_turns: 50.0,
            disuse_threshold_turns: 20,
            merge_threshold: 0.7,
            split_threshold: 0.3,
            merge_min_observations: 5,
            similarity_exponent: 2.0,
            similarity_floor: 0.05,
            pressure_threshold: 1.0,
            periodic_interval_turns: 25,
            loop_threshold: 3,
            loop_window: 10,
            drift_warning: 0.3,
            drift_critical: 0.6,
            progress_stall_turns: 5,
            abort_alignment: 0.3,
            adjust_alignment: 0.5,
            progress_epsilon: 1e-3,
            alignment_ema_alpha: 0.33,
            surprise_scale: 1.0,
            surprise_ema_alpha: 0.3,
            residual_window: 32,
            calibration_bins: 10,
            trust_alpha: 0.3,
            consistency_beta: 0.05,
            quarantine_failures: 3,
            quarantine_base_secs: 60.0,
            shapley_permutations: 128,
            nash_steps: 8,
            nash_eta: 0.2,
            nash_utility_alpha: 0.2,
            truthful_alpha: 0.15,
            tiers: FeedbackTiers::default(),
            audit: AuditConfig::default(),
            task_ceilings: BTreeMap::new(),
            provider_constraints,
        }
    }
}

impl CortexConfig {
    /// Parse a configuration from TOML, validating the result.
    pub fn from_toml(text: &str) -> CortexResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every scalar against its documented range.
    pub fn validate(&self) -> CortexResult<()> {
        fn unit_open(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: f64::EPSILON,
                    max: 1.0,
                })
            }
        }
        fn unit_closed(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: 0.0,
                    max: 1.0,
                })
            }
        }
        fn positive(field: &'static str, value: i64) -> Result<(), ConfigError> {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::NonPositive { field, value })
            }
        }

        unit_open("behavioral_lr", self.behavioral_lr)?;
        unit_open("tool_lr", self.tool_lr)?;
        unit_open("model_lr", self.model_lr)?;
        unit_open("decay_factor", self.decay_factor)?;
        unit_open("alignment_ema_alpha", self.alignment_ema_alpha)?;
        unit_open("surprise_ema_alpha", self.surprise_ema_alpha)?;
        unit_open("trust_alpha", self.trust_alpha)?;
        unit_open("nash_eta", self.nash_eta)?;
        unit_open("nash_utility_alpha", self.nash_utility_alpha)?;
        unit_open("truthful_alpha", self.truthful_alpha)?;
        for (i, w) in self.tier_sample_weights.iter().enumerate() {
            if *w <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    field: ["tier1", "tier2", "tier3", "tier4"][i],
                    value: *w,
                    min: f64::EPSILON,
                    max: f64::INFINITY,
                }
                .into());
            }
        }

        unit_closed("merge_threshold", self.merge_threshold)?;
        unit_closed("split_threshold", self.split_threshold)?;
        unit_closed("similarity_floor", self.similarity_floor)?;
        unit_closed("drift_warning", self.drift_warning)?;
        unit_closed("drift_critical", self.drift_critical)?;
        unit_closed("abort_alignment", self.abort_alignment)?;
        unit_closed("adjust_alignment", self.adjust_alignment)?;
        unit_closed("consistency_beta", self.consistency_beta)?;

        positive("preference_halflife_secs", self.preference_halflife_secs as i64)?;
        positive("edge_halflife_turns", self.edge_halflife_turns as i64)?;
        positive("disuse_threshold_turns", self.disuse_threshold_turns as i64)?;
        positive("merge_min_observations", self.merge_min_observations as i64)?;
        positive("periodic_interval_turns", self.periodic_interval_turns as i64)?;
        positive("loop_threshold", self.loop_threshold as i64)?;
        positive("loop_window", self.loop_window as i64)?;
        positive("progress_stall_turns", self.progress_stall_turns as i64)?;
        positive("residual_window", self.residual_window as i64)?;
        positive("calibration_bins", self.calibration_bins as i64)?;
        positive("quarantine_failures", self.quarantine_failures as i64)?;
        positive("shapley_permutations", self.shapley_permutations as i64)?;
        positive("nash_steps", self.nash_steps as i64)?;
        positive("audit.max_file_bytes", self.audit.max_file_bytes as i64)?;

        if self.surprise_scale <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "surprise_scale",
                value: self.surprise_scale,
                min: f64::EPSILON,
                max: f64::INFINITY,
            }
            .into());
        }
        if self.quarantine_base_secs <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "quarantine_base_secs",
                value: self.quarantine_base_secs,
                min: f64::EPSILON,
                max: f64::INFINITY,
            }
            .into());
        }
        if self.pressure_threshold <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "pressure_threshold",
                value: self.pressure_threshold,
                min: f64::EPSILON,
                max: f64::INFINITY,
            }
            .into());
        }

        Ok(())
    }

    /// The effective sample weight for a tier, zero when the tier is disabled.
    pub fn tier_weight(&self, tier: crate::weights::FeedbackTier) -> f64 {
        use crate::weights::FeedbackTier::*;
        let (enabled, weight) = match tier {
            Direct => (self.tiers.direct, self.tier_sample_weights[0]),
            UserInsight => (self.tiers.user_insight, self.tier_sample_weights[1]),
            Enterprise => (self.tiers.enterprise, self.tier_sample_weights[2]),
            Global => (self.tiers.global, self.tier_sample_weights[3]),
        };
        if enabled { weight } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        CortexConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_lr_rejected() {
        let config = CortexConfig {
            behavioral_lr: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let config = CortexConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back = CortexConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = CortexConfig::from_toml(
            r#"
            merge_threshold = 0.8
            [tiers]
            direct = true
            user_insight = false
            enterprise = false
            global = false
            "#,
        )
        .unwrap();
        assert_eq!(config.merge_threshold, 0.8);
        assert!(!config.tiers.user_insight);
        assert_eq!(config.loop_threshold, 3);
    }

    #[test]
    fn disabled_tier_has_zero_weight() {
        let config = CortexConfig::default();
        assert_eq!(config.tier_weight(crate::weights::FeedbackTier::Global), 0.0);
        assert!(config.tier_weight(crate::weights::FeedbackTier::Direct) > 0.0);
    }

    #[test]
    fn gemini_constraint_present_by_default() {
        let config = CortexConfig::default();
        let constraint = config.provider_constraints.get("gemini-3").unwrap();
        assert_eq!(constraint.temperature, Some(1.0));
    }
}
