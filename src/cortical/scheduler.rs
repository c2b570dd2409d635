//! Reorganization scheduling: pressure accumulation and periodic triggers.
//!
//! Structural events add pressure; when pressure crosses the configured
//! threshold — or the periodic interval elapses — the map runs a full
//! reorganization cycle and the scheduler resets.

use serde::{Deserialize, Serialize};

/// Events that accumulate reorganization pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureEvent {
    TurnElapsed,
    UsageRecorded,
    EntityRegistered,
    EntityRemoved,
    FeedbackApplied,
}

impl PressureEvent {
    /// Pressure contributed by one occurrence of this event.
    pub fn weight(&self) -> f64 {
        match self {
            Self::TurnElapsed => 0.05,
            Self::UsageRecorded => 0.02,
            Self::EntityRegistered => 0.30,
            Self::EntityRemoved => 0.50,
            Self::FeedbackApplied => 0.10,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TurnElapsed => "turn_elapsed",
            Self::UsageRecorded => "usage_recorded",
            Self::EntityRegistered => "entity_registered",
            Self::EntityRemoved => "entity_removed",
            Self::FeedbackApplied => "feedback_applied",
        }
    }
}

/// Pressure accumulator with a periodic fallback trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorganizationScheduler {
    pressure: f64,
    last_cycle_turn: u64,
}

impl ReorganizationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, event: PressureEvent) {
        self.pressure += event.weight();
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Whether a cycle should run now.
    pub fn should_run(&self, turn: u64, threshold: f64, periodic_interval: u64) -> bool {
        self.pressure >= threshold
            || turn.saturating_sub(self.last_cycle_turn) >= periodic_interval
    }

    /// Reset after a completed cycle.
    pub fn mark_ran(&mut self, turn: u64) {
        self.pressure = 0.0;
        self.last_cycle_turn = turn;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_accumulates_and_triggers() {
        let mut scheduler = ReorganizationScheduler::new();
        assert!(!scheduler.should_run(1, 1.0, 100));

        scheduler.accumulate(PressureEvent::EntityRemoved); // 0.50
        scheduler.accumulate(PressureEvent::EntityRegistered); // 0.80
        assert!(!scheduler.should_run(1, 1.0, 100));

        scheduler.accumulate(PressureEvent::EntityRegistered); // 1.10
        assert!(scheduler.should_run(1, 1.0, 100));

        scheduler.mark_ran(1);
        assert_eq!(scheduler.pressure(), 0.0);
        assert!(!scheduler.should_run(2, 1.0, 100));
    }

    #[test]
    fn periodic_interval_fires_without_pressure() {
        let mut scheduler = ReorganizationScheduler::new();
        scheduler.mark_ran(10);
        assert!(!scheduler.should_run(20, 1.0, 25));
        assert!(scheduler.should_run(35, 1.0, 25));
    }
}
