//! Prediction residuals, running surprise, and confidence calibration.
//!
//! Collaborators report `(predicted, observed)` pairs per scalar channel;
//! each pair yields a surprise in [0, 1] and feeds a per-channel EMA. The
//! calibration tracker bins `(confidence, hit)` pairs into uniform-width
//! buckets, computes the expected calibration error, and labels overall
//! calibration health — which downstream selects the thinking budget.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::CortexConfig;

/// One prediction/observation pair and its surprise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResidual {
    pub channel: String,
    pub predicted: f64,
    pub observed: f64,
    pub surprise: f64,
    pub at_turn: u64,
}

/// Parameters for the surprise tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseParams {
    pub scale: f64,
    pub ema_alpha: f64,
    pub window: usize,
}

impl From<&CortexConfig> for SurpriseParams {
    fn from(config: &CortexConfig) -> Self {
        Self {
            scale: config.surprise_scale,
            ema_alpha: config.surprise_ema_alpha,
            window: config.residual_window,
        }
    }
}

/// Rolling residual windows and surprise EMAs per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurpriseTracker {
    params: SurpriseParams,
    windows: HashMap<String, VecDeque<PredictionResidual>>,
    emas: HashMap<String, f64>,
}

impl SurpriseTracker {
    pub fn new(params: SurpriseParams) -> Self {
        Self {
            params,
            windows: HashMap::new(),
            emas: HashMap::new(),
        }
    }

    /// Record a pair and return the step surprise.
    pub fn record(&mut self, channel: &str, predicted: f64, observed: f64, turn: u64) -> f64 {
        let surprise = ((predicted - observed).abs() / self.params.scale).clamp(0.0, 1.0);

        let window = self.windows.entry(channel.to_string()).or_default();
        window.push_back(PredictionResidual {
            channel: channel.to_string(),
            predicted,
            observed,
            surprise,
            at_turn: turn,
        });
        if window.len() > self.params.window {
            window.pop_front();
        }

        let alpha = self.params.ema_alpha;
        let ema = self.emas.entry(channel.to_string()).or_insert(surprise);
        *ema = alpha * surprise + (1.0 - alpha) * *ema;
        surprise
    }

    /// Running surprise for one channel; zero before any observation.
    pub fn current(&self, channel: &str) -> f64 {
        self.emas.get(channel).copied().unwrap_or(0.0)
    }

    /// Running surprise across all channels (mean of channel EMAs).
    pub fn overall(&self) -> f64 {
        if self.emas.is_empty() {
            return 0.0;
        }
        self.emas.values().sum::<f64>() / self.emas.len() as f64
    }

    /// Residual window for a channel, oldest first.
    pub fn residuals(&self, channel: &str) -> Vec<&PredictionResidual> {
        self.windows
            .get(channel)
            .map(|w| w.iter().collect())
            .unwrap_or_default()
    }
}

/// One uniform-width confidence bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub count: u64,
    pub hits: u64,
    pub confidence_sum: f64,
}

impl CalibrationBin {
    pub fn accuracy(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.hits as f64 / self.count as f64
        }
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.confidence_sum / self.count as f64
        }
    }
}

/// Calibration health labels, thresholded on the health score `1 − ECE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationHealth {
    Optimal,
    Healthy,
    Degrading,
    Critical,
}

impl CalibrationHealth {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::Healthy => "healthy",
            Self::Degrading => "degrading",
            Self::Critical => "critical",
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::Optimal
        } else if score >= 0.5 {
            Self::Healthy
        } else if score >= 0.3 {
            Self::Degrading
        } else {
            Self::Critical
        }
    }
}

/// Exportable calibration summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub samples: u64,
    pub ece: f64,
    pub health_score: f64,
    pub health: CalibrationHealth,
    pub confidence: f64,
    pub bins: Vec<CalibrationBin>,
}

/// Accumulates (confidence, hit) pairs into uniform-width bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTracker {
    bins: Vec<CalibrationBin>,
    samples: u64,
    hits: u64,
}

impl CalibrationTracker {
    pub fn new(bin_count: usize) -> Self {
        Self {
            bins: vec![CalibrationBin::default(); bin_count.max(1)],
            samples: 0,
            hits: 0,
        }
    }

    /// Record one confidence/outcome pair.
    pub fn record(&mut self, confidence: f64, hit: bool) {
        let confidence = confidence.clamp(0.0, 1.0);
        let index = ((confidence * self.bins.len() as f64) as usize).min(self.bins.len() - 1);
        let bin = &mut self.bins[index];
        bin.count += 1;
        bin.confidence_sum += confidence;
        if hit {
            bin.hits += 1;
            self.hits += 1;
        }
        self.samples += 1;
    }

    /// Expected calibration error: Σ (n_b/N) · |acc_b − conf_b|.
    pub fn ece(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.bins
            .iter()
            .filter(|b| b.count > 0)
            .map(|b| {
                let weight = b.count as f64 / self.samples as f64;
                weight * (b.accuracy() - b.mean_confidence()).abs()
            })
            .sum()
    }

    /// Health score `1 − ECE`; an empty tracker is optimistically 1.0.
    pub fn health_score(&self) -> f64 {
        (1.0 - self.ece()).clamp(0.0, 1.0)
    }

    pub fn health(&self) -> CalibrationHealth {
        CalibrationHealth::from_score(self.health_score())
    }

    /// Confidence signal: Laplace-smoothed overall hit rate.
    pub fn confidence(&self) -> f64 {
        (self.hits as f64 + 1.0) / (self.samples as f64 + 2.0)
    }

    /// Reset on session close.
    pub fn reset(&mut self) {
        let bins = self.bins.len();
        *self = Self::new(bins);
    }

    pub fn report(&self) -> CalibrationReport {
        CalibrationReport {
            samples: self.samples,
            ece: self.ece(),
            health_score: self.health_score(),
            health: self.health(),
            confidence: self.confidence(),
            bins: self.bins.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SurpriseTracker {
        SurpriseTracker::new(SurpriseParams::from(&CortexConfig::default()))
    }

    #[test]
    fn surprise_is_clamped_absolute_residual() {
        let mut t = tracker();
        assert_eq!(t.record("utility", 0.9, 0.5, 1), 0.4);
        assert_eq!(t.record("utility", 0.0, 5.0, 2), 1.0);
        assert_eq!(t.record("utility", 0.5, 0.5, 3), 0.0);
    }

    #[test]
    fn ema_tracks_recent_surprise() {
        let mut t = tracker();
        t.record("utility", 1.0, 0.0, 1); // surprise 1.0 seeds the EMA
        assert_eq!(t.current("utility"), 1.0);

        for turn in 2..20 {
            t.record("utility", 0.5, 0.5, turn);
        }
        assert!(t.current("utility") < 0.01);
    }

    #[test]
    fn residual_window_is_bounded() {
        let mut t = tracker();
        for turn in 0..100 {
            t.record("utility", 0.0, 0.0, turn);
        }
        assert!(t.residuals("utility").len() <= 32);
    }

    #[test]
    fn channels_are_independent() {
        let mut t = tracker();
        t.record("utility", 1.0, 0.0, 1);
        t.record("latency", 0.5, 0.5, 1);
        assert_eq!(t.current("utility"), 1.0);
        assert_eq!(t.current("latency"), 0.0);
        assert_eq!(t.overall(), 0.5);
    }

    #[test]
    fn perfect_calibration_has_zero_ece() {
        let mut c = CalibrationTracker::new(10);
        // 80% confidence, 80% accuracy.
        for i in 0..10 {
            c.record(0.8, i < 8);
        }
        assert!(c.ece() < 1e-9);
        assert_eq!(c.health(), CalibrationHealth::Optimal);
    }

    #[test]
    fn overconfidence_raises_ece() {
        let mut c = CalibrationTracker::new(10);
        // 95% confidence, 20% accuracy.
        for i in 0..10 {
            c.record(0.95, i < 2);
        }
        assert!((c.ece() - 0.75).abs() < 1e-9);
        assert_eq!(c.health(), CalibrationHealth::Critical);
    }

    #[test]
    fn empty_tracker_is_optimal_with_neutral_confidence() {
        let c = CalibrationTracker::new(10);
        assert_eq!(c.health_score(), 1.0);
        assert_eq!(c.health(), CalibrationHealth::Optimal);
        assert_eq!(c.confidence(), 0.5);
    }

    #[test]
    fn confidence_is_smoothed_hit_rate() {
        let mut c = CalibrationTracker::new(10);
        for _ in 0..8 {
            c.record(0.7, true);
        }
        for _ in 0..2 {
            c.record(0.7, false);
        }
        assert!((c.confidence() - 9.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_samples() {
        let mut c = CalibrationTracker::new(10);
        c.record(0.9, false);
        c.reset();
        assert_eq!(c.report().samples, 0);
        assert_eq!(c.health_score(), 1.0);
    }
}
