//! Goal tracking: progress, drift, loop, and stall detection.
//!
//! Each verified step hashes its description and output into a ring buffer;
//! repeated identical hashes flag a loop. Alignment against the goal keywords
//! feeds an EMA whose complement is the drift signal. The recommended action
//! falls out of a fixed rule table: loops, critical drift, or stalls demand a
//! replan; very poor alignment aborts; moderate drift adjusts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CortexConfig;
use crate::error::{CortexResult, GoalError};

/// Words ignored when extracting goal keywords.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "then", "to", "with",
];

/// What the tracker recommends after a verified step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Continue,
    Adjust,
    Replan,
    Abort,
}

impl RecommendedAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Adjust => "adjust",
            Self::Replan => "replan",
            Self::Abort => "abort",
        }
    }
}

/// Outcome of verifying one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepVerification {
    pub aligned: bool,
    pub alignment: f64,
    pub drift_delta: f64,
    pub progress_delta: f64,
    pub reasoning: String,
    pub recommended_action: RecommendedAction,
}

/// Snapshot of goal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalState {
    pub original_goal: String,
    pub current_step: usize,
    pub total_planned: usize,
    pub progress: f64,
    pub drift: f64,
    pub loop_detected: bool,
    pub loop_count: u32,
    pub stall_turns: u32,
    pub timestamp: f64,
}

/// Optional collaborator for semantic step verification.
///
/// When the keyword heuristic scores below 0.7 and a verifier is supplied,
/// the final alignment blends 0.7 × verifier + 0.3 × heuristic.
pub trait GoalVerifier {
    fn alignment(&self, goal: &str, step: &str, output: &str) -> f64;
}

/// Goal-tracker thresholds, copied from the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalParams {
    pub loop_threshold: u32,
    pub loop_window: usize,
    pub drift_warning: f64,
    pub drift_critical: f64,
    pub progress_stall_turns: u32,
    pub abort_alignment: f64,
    pub adjust_alignment: f64,
    pub progress_epsilon: f64,
    pub alignment_ema_alpha: f64,
}

impl From<&CortexConfig> for GoalParams {
    fn from(config: &CortexConfig) -> Self {
        Self {
            loop_threshold: config.loop_threshold,
            loop_window: config.loop_window,
            drift_warning: config.drift_warning,
            drift_critical: config.drift_critical,
            progress_stall_turns: config.progress_stall_turns,
            abort_alignment: config.abort_alignment,
            adjust_alignment: config.adjust_alignment,
            progress_epsilon: config.progress_epsilon,
            alignment_ema_alpha: config.alignment_ema_alpha,
        }
    }
}

/// Per-session goal tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalTracker {
    params: GoalParams,
    goal: Option<String>,
    plan: Vec<String>,
    current_step: usize,
    progress: f64,
    alignment_ema: Option<f64>,
    loop_detected: bool,
    loop_count: u32,
    stall_turns: u32,
    state_hashes: VecDeque<[u8; 32]>,
    timestamp: f64,
}

impl GoalTracker {
    pub fn new(params: GoalParams) -> Self {
        Self {
            params,
            goal: None,
            plan: Vec::new(),
            current_step: 0,
            progress: 0.0,
            alignment_ema: None,
            loop_detected: false,
            loop_count: 0,
            stall_turns: 0,
            state_hashes: VecDeque::new(),
            timestamp: 0.0,
        }
    }

    /// Set (or replace) the active goal. Replacing resets all tracking.
    pub fn set_goal(&mut self, goal: impl Into<String>, now: f64) {
        let goal = goal.into();
        if self.goal.as_deref() == Some(goal.as_str()) {
            return;
        }
        self.goal = Some(goal);
        self.plan.clear();
        self.current_step = 0;
        self.progress = 0.0;
        self.alignment_ema = None;
        self.loop_detected = false;
        self.loop_count = 0;
        self.stall_turns = 0;
        self.state_hashes.clear();
        self.timestamp = now;
    }

    /// Install a plan, resetting the step counter (a replan).
    pub fn set_plan(&mut self, steps: Vec<String>) -> CortexResult<()> {
        if steps.is_empty() {
            return Err(GoalError::EmptyPlan.into());
        }
        self.plan = steps;
        self.current_step = 0;
        self.progress = 0.0;
        self.stall_turns = 0;
        self.loop_detected = false;
        Ok(())
    }

    pub fn has_goal(&self) -> bool {
        self.goal.is_some()
    }

    /// Verify one executed step against the goal.
    pub fn verify_step(
        &mut self,
        description: &str,
        output: &str,
        verifier: Option<&dyn GoalVerifier>,
        now: f64,
    ) -> CortexResult<StepVerification> {
        let goal = self.goal.clone().ok_or(GoalError::NoGoal)?;

        // Loop detection over (description, trimmed output) state hashes.
        let hash = state_hash(description, output);
        self.state_hashes.push_back(hash);
        if self.state_hashes.len() > self.params.loop_window {
            self.state_hashes.pop_front();
        }
        let repeats = self.state_hashes.iter().filter(|h| **h == hash).count();
        if repeats >= self.params.loop_threshold as usize {
            if !self.loop_detected {
                self.loop_count += 1;
            }
            self.loop_detected = true;
        }

        // Keyword alignment, optionally blended with the semantic verifier.
        let heuristic = keyword_alignment(&goal, description, output);
        let alignment = match verifier {
            Some(v) if heuristic < 0.7 => {
                0.7 * v.alignment(&goal, description, output).clamp(0.0, 1.0) + 0.3 * heuristic
            }
            _ => heuristic,
        };

        // Drift is the complement of the alignment EMA. The EMA warm-starts
        // at 1.0 so drift ramps over several steps instead of saturating on
        // the first observation.
        let drift_before = self.drift();
        let alpha = self.params.alignment_ema_alpha;
        let prev = self.alignment_ema.unwrap_or(1.0);
        self.alignment_ema = Some(alpha * alignment + (1.0 - alpha) * prev);
        let drift_delta = self.drift() - drift_before;

        // Progress: an aligned step completes the current plan position.
        // Bounded monotonic — revisiting completed work moves nothing.
        let aligned = alignment >= self.params.adjust_alignment;
        let progress_before = self.progress;
        if aligned && !self.plan.is_empty() && self.current_step < self.plan.len() {
            self.current_step += 1;
            self.progress = self.current_step as f64 / self.plan.len() as f64;
        }
        let progress_delta = self.progress - progress_before;

        if progress_delta < self.params.progress_epsilon {
            self.stall_turns += 1;
        } else {
            self.stall_turns = 0;
        }
        self.timestamp = now;

        let recommended_action = self.recommend(alignment);
        let reasoning = format!(
            "alignment {:.2} (heuristic {:.2}), drift {:.2}, stall {}, loop {}",
            alignment,
            heuristic,
            self.drift(),
            self.stall_turns,
            self.loop_detected,
        );

        Ok(StepVerification {
            aligned,
            alignment,
            drift_delta,
            progress_delta,
            reasoning,
            recommended_action,
        })
    }

    /// First matching row of the action table wins.
    fn recommend(&self, alignment: f64) -> RecommendedAction {
        let drift = self.drift();
        if self.loop_detected
            || drift >= self.params.drift_critical
            || self.stall_turns >= self.params.progress_stall_turns
        {
            RecommendedAction::Replan
        } else if alignment < self.params.abort_alignment {
            RecommendedAction::Abort
        } else if drift >= self.params.drift_warning || alignment < self.params.adjust_alignment {
            RecommendedAction::Adjust
        } else {
            RecommendedAction::Continue
        }
    }

    /// Clear the loop-detection buffer only; progress and drift survive.
    pub fn reset_loop_detection(&mut self) {
        self.state_hashes.clear();
        self.loop_detected = false;
    }

    /// Current drift: complement of the alignment EMA, zero before any step.
    pub fn drift(&self) -> f64 {
        match self.alignment_ema {
            Some(ema) => (1.0 - ema).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn loop_detected(&self) -> bool {
        self.loop_detected
    }

    /// Snapshot of the current goal state.
    pub fn state(&self) -> CortexResult<GoalState> {
        let goal = self.goal.as_ref().ok_or(GoalError::NoGoal)?;
        Ok(GoalState {
            original_goal: goal.clone(),
            current_step: self.current_step,
            total_planned: self.plan.len(),
            progress: self.progress,
            drift: self.drift(),
            loop_detected: self.loop_detected,
            loop_count: self.loop_count,
            stall_turns: self.stall_turns,
            timestamp: self.timestamp,
        })
    }
}

fn state_hash(description: &str, output: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hasher.update([0x1f]);
    hasher.update(output.trim().as_bytes());
    hasher.finalize().into()
}

fn keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Share of goal keywords present in the step description + output.
fn keyword_alignment(goal: &str, description: &str, output: &str) -> f64 {
    let goal_words = keywords(goal);
    if goal_words.is_empty() {
        return 1.0;
    }
    let step_words = keywords(&format!("{description} {output}"));
    let hits = goal_words
        .iter()
        .filter(|w| step_words.contains(w))
        .count();
    hits as f64 / goal_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> GoalTracker {
        let mut t = GoalTracker::new(GoalParams::from(&CortexConfig::default()));
        t.set_goal("summarize the quarterly revenue report", 0.0);
        t
    }

    struct FixedVerifier(f64);
    impl GoalVerifier for FixedVerifier {
        fn alignment(&self, _goal: &str, _step: &str, _output: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn identical_steps_trip_loop_detection_and_replan() {
        let mut t = GoalTracker::new(GoalParams::from(&CortexConfig::default()));
        // A goal with no extractable keywords keeps alignment at 1.0, so the
        // replan must come from loop detection alone.
        t.set_goal("A", 0.0);
        t.set_plan(vec!["A".into(), "B".into(), "C".into()]).unwrap();

        let mut last = None;
        for _ in 0..3 {
            last = Some(t.verify_step("A", "A", None, 1.0).unwrap());
        }
        let v = last.unwrap();
        assert!(t.loop_detected());
        assert_eq!(v.recommended_action, RecommendedAction::Replan);

        // Clearing the buffer means an immediate repeat does not re-trigger.
        t.reset_loop_detection();
        let v = t.verify_step("A", "A", None, 2.0).unwrap();
        assert!(!t.loop_detected());
        assert_ne!(v.recommended_action, RecommendedAction::Replan);
    }

    #[test]
    fn aligned_steps_advance_progress_monotonically() {
        let mut t = tracker();
        t.set_plan(vec!["step one".into(), "step two".into()]).unwrap();

        let v1 = t
            .verify_step(
                "summarize revenue",
                "the quarterly revenue report summary",
                None,
                1.0,
            )
            .unwrap();
        assert!(v1.aligned);
        assert_eq!(t.progress(), 0.5);
        assert!(v1.progress_delta > 0.0);

        let v2 = t
            .verify_step(
                "summarize revenue again",
                "quarterly report revenue summarized",
                None,
                2.0,
            )
            .unwrap();
        assert_eq!(t.progress(), 1.0);
        assert!(v2.progress_delta > 0.0);

        // Plan exhausted: progress is capped.
        t.verify_step("extra", "quarterly revenue report summarize", None, 3.0)
            .unwrap();
        assert_eq!(t.progress(), 1.0);
    }

    #[test]
    fn misaligned_steps_accumulate_drift_then_stall_replans() {
        let mut t = tracker();
        t.set_plan(vec!["a".into(); 10]).unwrap();

        let mut last = None;
        for i in 0..5 {
            // Distinct outputs keep loop detection out of the picture.
            last = Some(
                t.verify_step("browse cat pictures", &format!("cats {i}"), None, i as f64)
                    .unwrap(),
            );
        }
        let v = last.unwrap();
        assert!(t.drift() > 0.8);
        assert_eq!(v.recommended_action, RecommendedAction::Replan);
        assert_eq!(t.state().unwrap().stall_turns, 5);
    }

    #[test]
    fn single_misaligned_step_aborts() {
        let mut t = tracker();
        let v = t
            .verify_step("browse cat pictures", "cats", None, 1.0)
            .unwrap();
        // Alignment 0 < 0.3 while the warm EMA keeps drift below critical.
        assert_eq!(v.alignment, 0.0);
        assert_eq!(v.recommended_action, RecommendedAction::Abort);
    }

    #[test]
    fn sustained_moderate_alignment_adjusts() {
        let mut t = tracker();
        // 2 of 4 goal keywords → alignment 0.5 per step; the drift EMA crosses
        // the warning threshold on the third step.
        let mut last = None;
        for i in 0..3 {
            last = Some(
                t.verify_step(
                    "collect data",
                    &format!("the quarterly revenue table {i}"),
                    None,
                    i as f64,
                )
                .unwrap(),
            );
        }
        let v = last.unwrap();
        assert!((v.alignment - 0.5).abs() < 1e-9);
        assert_eq!(v.recommended_action, RecommendedAction::Adjust);
    }

    #[test]
    fn llm_verifier_blends_when_heuristic_is_weak() {
        let mut t = tracker();
        let v = t
            .verify_step("opaque step", "no keyword overlap", Some(&FixedVerifier(1.0)), 1.0)
            .unwrap();
        // 0.7 × 1.0 + 0.3 × 0.0
        assert!((v.alignment - 0.7).abs() < 1e-9);
    }

    #[test]
    fn verifier_ignored_when_heuristic_is_strong() {
        let mut t = tracker();
        let v = t
            .verify_step(
                "summarize quarterly revenue report",
                "summarize the quarterly revenue report",
                Some(&FixedVerifier(0.0)),
                1.0,
            )
            .unwrap();
        assert_eq!(v.alignment, 1.0);
    }

    #[test]
    fn replan_resets_step_counter() {
        let mut t = tracker();
        t.set_plan(vec!["x".into(), "y".into()]).unwrap();
        t.verify_step(
            "summarize revenue",
            "quarterly revenue report summary",
            None,
            1.0,
        )
        .unwrap();
        assert_eq!(t.state().unwrap().current_step, 1);

        t.set_plan(vec!["p".into(), "q".into(), "r".into()]).unwrap();
        let state = t.state().unwrap();
        assert_eq!(state.current_step, 0);
        assert_eq!(state.total_planned, 3);
        assert_eq!(state.progress, 0.0);
    }

    #[test]
    fn verify_without_goal_is_not_found() {
        let mut t = GoalTracker::new(GoalParams::from(&CortexConfig::default()));
        let err = t.verify_step("a", "b", None, 0.0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
