//! Attention priority: how much of the token budget a turn deserves.
//!
//! Priority is derived from a fixed rule table over safety, goal drift, and
//! task routine-ness; a SILENCE modulation on the `attention` target drops a
//! turn to suppressed. Each priority maps to a base token budget that the
//! parameter resolver scales by the entity resource ratio.

use serde::{Deserialize, Serialize};

/// Task types treated as routine background work.
const BACKGROUND_TASKS: &[&str] = &["summarization", "classification", "extraction", "embedding"];

/// Attention level for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionPriority {
    Suppressed,
    Subconscious,
    Background,
    Foreground,
    Critical,
}

impl AttentionPriority {
    /// Base token budget before resource-ratio scaling.
    pub fn token_budget(&self) -> u32 {
        match self {
            Self::Critical => 16_384,
            Self::Foreground => 8_192,
            Self::Background => 4_096,
            Self::Subconscious => 1_024,
            Self::Suppressed => 256,
        }
    }

    /// Additive temperature adjustment for this priority.
    pub fn temperature_adjustment(&self) -> f64 {
        match self {
            Self::Critical => -0.1,
            Self::Subconscious => -0.15,
            _ => 0.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Subconscious => "subconscious",
            Self::Suppressed => "suppressed",
        }
    }
}

impl std::fmt::Display for AttentionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Derive the attention priority for a turn.
///
/// Rule table, first match wins: suppression (external), safety or critical
/// drift → critical; routine background tasks split between subconscious
/// (nothing surprising) and background; everything else runs foreground.
pub fn assess(
    task_type: &str,
    safety: f64,
    drift: f64,
    surprise: f64,
    suppressed: bool,
) -> AttentionPriority {
    if suppressed {
        return AttentionPriority::Suppressed;
    }
    if safety > 0.8 || drift >= 0.6 {
        return AttentionPriority::Critical;
    }
    if BACKGROUND_TASKS.contains(&task_type) {
        return if surprise < 0.05 {
            AttentionPriority::Subconscious
        } else {
            AttentionPriority::Background
        };
    }
    AttentionPriority::Foreground
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_forces_critical() {
        assert_eq!(assess("chat", 0.9, 0.0, 0.0, false), AttentionPriority::Critical);
    }

    #[test]
    fn critical_drift_forces_critical() {
        assert_eq!(assess("chat", 0.0, 0.7, 0.0, false), AttentionPriority::Critical);
    }

    #[test]
    fn routine_task_with_no_surprise_is_subconscious() {
        assert_eq!(
            assess("summarization", 0.0, 0.0, 0.01, false),
            AttentionPriority::Subconscious
        );
        assert_eq!(
            assess("summarization", 0.0, 0.0, 0.4, false),
            AttentionPriority::Background
        );
    }

    #[test]
    fn default_is_foreground() {
        assert_eq!(assess("chat", 0.0, 0.0, 0.5, false), AttentionPriority::Foreground);
    }

    #[test]
    fn suppression_wins_over_everything() {
        assert_eq!(assess("chat", 1.0, 1.0, 1.0, true), AttentionPriority::Suppressed);
    }

    #[test]
    fn budgets_are_ordered_by_priority() {
        let priorities = [
            AttentionPriority::Suppressed,
            AttentionPriority::Subconscious,
            AttentionPriority::Background,
            AttentionPriority::Foreground,
            AttentionPriority::Critical,
        ];
        for pair in priorities.windows(2) {
            assert!(pair[0].token_budget() < pair[1].token_budget());
        }
    }
}
