//! Targeted modulation: temporary overrides on weights and parameters.
//!
//! A modulation names a target (a behavioral weight or a sampling parameter),
//! a kind (ACTIVATE / SILENCE / AMPLIFY / DAMPEN / CLAMP), a temporal scope,
//! and a priority. Resolution order when several modulations hit one target:
//!
//! 1. CLAMP wins outright and returns its value, ignoring everything else
//! 2. enterprise policy (source = enterprise, priority ≥ 100)
//! 3. highest priority among the rest
//! 4. most recently added as the tie-break
//!
//! The modulator never mutates territories or learned weights; it biases the
//! effective values read downstream.

use serde::{Deserialize, Serialize};

use crate::error::{CortexResult, ModulationError};

/// Priority at or above which an enterprise-sourced modulation outranks
/// everything except CLAMP.
pub const ENTERPRISE_PRIORITY: i32 = 100;

/// What a modulation does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationKind {
    /// Replace the baseline with an absolute strength.
    Activate { strength: f64 },
    /// Force the target to zero.
    Silence,
    /// Scale the baseline up.
    Amplify { factor: f64 },
    /// Scale the baseline down.
    Dampen { factor: f64 },
    /// Pin the target to a fixed value, overriding all other modulations.
    Clamp { value: f64 },
}

impl ModulationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Activate { .. } => "activate",
            Self::Silence => "silence",
            Self::Amplify { .. } => "amplify",
            Self::Dampen { .. } => "dampen",
            Self::Clamp { .. } => "clamp",
        }
    }
}

/// Temporal validity of a modulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationScope {
    /// Expires at the next tick.
    Turn,
    /// Cleared when the active goal ends or is replanned.
    Goal,
    /// Cleared when the session closes.
    Session,
    /// Lives until explicitly removed.
    Permanent,
    /// Live while its predicate holds against the signal snapshot.
    Conditional(ModulationCondition),
}

/// Typed predicate for conditional modulations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationCondition {
    SurpriseAbove(f64),
    DriftAbove(f64),
    ConfidenceBelow(f64),
}

impl ModulationCondition {
    pub fn holds(&self, signals: &SignalSnapshot) -> bool {
        match self {
            Self::SurpriseAbove(t) => signals.surprise > *t,
            Self::DriftAbove(t) => signals.drift > *t,
            Self::ConfidenceBelow(t) => signals.confidence < *t,
        }
    }
}

/// The signal values conditional modulations are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub surprise: f64,
    pub drift: f64,
    pub confidence: f64,
}

/// Who installed a modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationSource {
    User,
    Enterprise,
    System,
}

/// One active modulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modulation {
    pub id: u64,
    pub target: String,
    pub kind: ModulationKind,
    pub scope: ModulationScope,
    pub priority: i32,
    pub source: ModulationSource,
    pub created_at_turn: u64,
    /// Logical expiry in seconds; independent of scope.
    pub expires_at: Option<f64>,
}

impl Modulation {
    fn is_enterprise_policy(&self) -> bool {
        self.source == ModulationSource::Enterprise && self.priority >= ENTERPRISE_PRIORITY
    }
}

/// The set of active modulations for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modulator {
    active: Vec<Modulation>,
    next_id: u64,
}

impl Modulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a modulation; returns its id for later removal.
    pub fn add(
        &mut self,
        target: impl Into<String>,
        kind: ModulationKind,
        scope: ModulationScope,
        priority: i32,
        source: ModulationSource,
        turn: u64,
        expires_at: Option<f64>,
    ) -> CortexResult<u64> {
        if let ModulationKind::Amplify { factor } | ModulationKind::Dampen { factor } = kind {
            if factor <= 0.0 {
                return Err(ModulationError::InvalidFactor { factor }.into());
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.active.push(Modulation {
            id,
            target: target.into(),
            kind,
            scope,
            priority,
            source,
            created_at_turn: turn,
            expires_at,
        });
        Ok(id)
    }

    /// Remove a modulation by id.
    pub fn remove(&mut self, id: u64) -> CortexResult<Modulation> {
        let index = self
            .active
            .iter()
            .position(|m| m.id == id)
            .ok_or(ModulationError::NotFound { id })?;
        Ok(self.active.swap_remove(index))
    }

    /// Advance one turn: expire TURN-scoped modulations, drop conditional
    /// modulations whose predicate no longer holds, and honor hard expiries.
    pub fn tick(&mut self, now: f64, signals: &SignalSnapshot) {
        self.active.retain(|m| {
            if m.expires_at.is_some_and(|at| now >= at) {
                return false;
            }
            match m.scope {
                ModulationScope::Turn => false,
                ModulationScope::Conditional(cond) => cond.holds(signals),
                _ => true,
            }
        });
    }

    /// Clear all modulations of a scope (goal end, session close).
    pub fn clear_scope(&mut self, scope: ModulationScope) {
        self.active.retain(|m| m.scope != scope);
    }

    /// Active modulations on a target, unresolved.
    pub fn active_for(&self, target: &str) -> Vec<&Modulation> {
        self.active.iter().filter(|m| m.target == target).collect()
    }

    /// All active modulations.
    pub fn active(&self) -> &[Modulation] {
        &self.active
    }

    /// The winning CLAMP value for a target, if any.
    pub fn clamp_for(&self, target: &str) -> Option<f64> {
        self.active
            .iter()
            .filter(|m| m.target == target)
            .filter_map(|m| match m.kind {
                ModulationKind::Clamp { value } => Some((m.priority, m.id, value)),
                _ => None,
            })
            .max_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
            .map(|(_, _, value)| value)
    }

    /// Apply non-CLAMP modulations to a baseline under the resolution order,
    /// clamping the result to the target's legal range.
    pub fn apply_soft(&self, target: &str, baseline: f64, legal: (f64, f64)) -> f64 {
        let winner = self
            .active
            .iter()
            .filter(|m| m.target == target && !matches!(m.kind, ModulationKind::Clamp { .. }))
            .max_by(|a, b| {
                // Enterprise policy first, then priority, then recency (id).
                (a.is_enterprise_policy(), a.priority, a.id)
                    .cmp(&(b.is_enterprise_policy(), b.priority, b.id))
            });
        let Some(winner) = winner else {
            return baseline;
        };
        let value = match winner.kind {
            ModulationKind::Activate { strength } => strength,
            ModulationKind::Silence => 0.0,
            ModulationKind::Amplify { factor } | ModulationKind::Dampen { factor } => {
                baseline * factor
            }
            ModulationKind::Clamp { .. } => unreachable!("clamps filtered above"),
        };
        value.clamp(legal.0, legal.1)
    }

    /// Full resolution: CLAMP dominates, otherwise soft application.
    /// A target with no modulations returns the baseline unchanged.
    pub fn apply(&self, target: &str, baseline: f64, legal: (f64, f64)) -> f64 {
        match self.clamp_for(target) {
            Some(value) => value.clamp(legal.0, legal.1),
            None => self.apply_soft(target, baseline, legal),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: (f64, f64) = (0.0, 1.0);

    fn add(
        m: &mut Modulator,
        kind: ModulationKind,
        scope: ModulationScope,
        priority: i32,
        source: ModulationSource,
    ) -> u64 {
        m.add("temperature", kind, scope, priority, source, 0, None)
            .unwrap()
    }

    #[test]
    fn clamp_dominates_everything() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Activate { strength: 0.9 },
            ModulationScope::Session,
            ENTERPRISE_PRIORITY,
            ModulationSource::Enterprise,
        );
        add(
            &mut m,
            ModulationKind::Clamp { value: 0.2 },
            ModulationScope::Session,
            5,
            ModulationSource::User,
        );

        assert_eq!(m.apply("temperature", 0.7, (0.0, 2.0)), 0.2);
    }

    #[test]
    fn enterprise_policy_outranks_higher_user_priority() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Activate { strength: 0.9 },
            ModulationScope::Session,
            500,
            ModulationSource::User,
        );
        add(
            &mut m,
            ModulationKind::Activate { strength: 0.1 },
            ModulationScope::Session,
            ENTERPRISE_PRIORITY,
            ModulationSource::Enterprise,
        );

        assert_eq!(m.apply("temperature", 0.5, UNIT), 0.1);
    }

    #[test]
    fn recency_breaks_priority_ties() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Activate { strength: 0.3 },
            ModulationScope::Session,
            10,
            ModulationSource::User,
        );
        add(
            &mut m,
            ModulationKind::Activate { strength: 0.6 },
            ModulationScope::Session,
            10,
            ModulationSource::User,
        );

        assert_eq!(m.apply("temperature", 0.5, UNIT), 0.6);
    }

    #[test]
    fn amplify_and_dampen_scale_the_baseline() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Amplify { factor: 3.0 },
            ModulationScope::Session,
            1,
            ModulationSource::User,
        );
        // 0.5 * 3.0 clamped to the unit range.
        assert_eq!(m.apply("temperature", 0.5, UNIT), 1.0);

        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Dampen { factor: 0.5 },
            ModulationScope::Session,
            1,
            ModulationSource::User,
        );
        assert_eq!(m.apply("temperature", 0.8, UNIT), 0.4);
    }

    #[test]
    fn silence_zeroes_and_unknown_target_is_identity() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Silence,
            ModulationScope::Session,
            1,
            ModulationSource::System,
        );
        assert_eq!(m.apply("temperature", 0.8, UNIT), 0.0);
        assert_eq!(m.apply("top_p", 0.8, UNIT), 0.8);
    }

    #[test]
    fn turn_scope_expires_on_tick_session_persists() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Silence,
            ModulationScope::Turn,
            1,
            ModulationSource::User,
        );
        add(
            &mut m,
            ModulationKind::Silence,
            ModulationScope::Session,
            1,
            ModulationSource::User,
        );

        m.tick(1.0, &SignalSnapshot::default());
        assert_eq!(m.len(), 1);
        m.tick(2.0, &SignalSnapshot::default());
        assert_eq!(m.len(), 1);
        assert!(matches!(m.active()[0].scope, ModulationScope::Session));
    }

    #[test]
    fn conditional_expires_when_predicate_flips() {
        let mut m = Modulator::new();
        add(
            &mut m,
            ModulationKind::Dampen { factor: 0.5 },
            ModulationScope::Conditional(ModulationCondition::SurpriseAbove(0.6)),
            1,
            ModulationSource::System,
        );

        let high = SignalSnapshot {
            surprise: 0.9,
            ..Default::default()
        };
        m.tick(1.0, &high);
        assert_eq!(m.len(), 1);

        let low = SignalSnapshot {
            surprise: 0.1,
            ..Default::default()
        };
        m.tick(2.0, &low);
        assert!(m.is_empty());
    }

    #[test]
    fn hard_expiry_honored_regardless_of_scope() {
        let mut m = Modulator::new();
        m.add(
            "temperature",
            ModulationKind::Silence,
            ModulationScope::Permanent,
            1,
            ModulationSource::User,
            0,
            Some(10.0),
        )
        .unwrap();

        m.tick(5.0, &SignalSnapshot::default());
        assert_eq!(m.len(), 1);
        m.tick(10.0, &SignalSnapshot::default());
        assert!(m.is_empty());
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut m = Modulator::new();
        let err = m.remove(42).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn non_positive_factor_rejected() {
        let mut m = Modulator::new();
        let err = m
            .add(
                "temperature",
                ModulationKind::Amplify { factor: 0.0 },
                ModulationScope::Turn,
                1,
                ModulationSource::User,
                0,
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
