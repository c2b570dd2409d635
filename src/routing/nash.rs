//! Model/task routing by iterated best response.
//!
//! Each (model, task) pair carries an EMA utility `quality·speed − cost`.
//! A routing pass runs a fixed number of best-response iterations: every
//! model shifts probability mass toward the task where its utility most
//! exceeds the field average. This is iterated improvement, not a solver —
//! consumers must not assume the result is an equilibrium.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::CortexConfig;

/// Nash routing parameters, copied from the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NashParams {
    pub steps: u32,
    pub eta: f64,
    pub utility_alpha: f64,
}

impl From<&CortexConfig> for NashParams {
    fn from(config: &CortexConfig) -> Self {
        Self {
            steps: config.nash_steps,
            eta: config.nash_eta,
            utility_alpha: config.nash_utility_alpha,
        }
    }
}

/// Fixed-step best-response router over models × task types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NashRouter {
    params: NashParams,
    /// (model, task) → EMA utility.
    utilities: BTreeMap<(String, String), f64>,
    /// model → task → probability mass.
    strategies: BTreeMap<String, BTreeMap<String, f64>>,
}

impl NashRouter {
    pub fn new(params: NashParams) -> Self {
        Self {
            params,
            utilities: BTreeMap::new(),
            strategies: BTreeMap::new(),
        }
    }

    /// Record an observed outcome for a model on a task type.
    pub fn observe(&mut self, model: &str, task: &str, quality: f64, speed: f64, cost: f64) {
        let utility = quality * speed - cost;
        let alpha = self.params.utility_alpha;
        let key = (model.to_string(), task.to_string());
        match self.utilities.get_mut(&key) {
            Some(u) => *u = alpha * utility + (1.0 - alpha) * *u,
            None => {
                self.utilities.insert(key, utility);
            }
        }

        // Seed a uniform strategy row the first time a model appears on a task.
        let row = self.strategies.entry(model.to_string()).or_default();
        row.entry(task.to_string()).or_insert(0.0);
        let unseen: Vec<String> = row
            .iter()
            .filter(|(_, p)| **p == 0.0)
            .map(|(t, _)| t.clone())
            .collect();
        if !unseen.is_empty() {
            let total: f64 = row.values().sum();
            let fill = (1.0 - total).max(0.0) / unseen.len() as f64;
            for task in unseen {
                row.insert(task, fill.max(f64::MIN_POSITIVE));
            }
            normalize(row);
        }
    }

    fn utility(&self, model: &str, task: &str) -> f64 {
        self.utilities
            .get(&(model.to_string(), task.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Run `steps` best-response iterations; returns the number executed.
    ///
    /// No fixed point is sought or guaranteed.
    pub fn run_steps(&mut self) -> u32 {
        let tasks: Vec<String> = self
            .utilities
            .keys()
            .map(|(_, t)| t.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let models: Vec<String> = self.strategies.keys().cloned().collect();
        if tasks.is_empty() || models.is_empty() {
            return 0;
        }

        for _ in 0..self.params.steps {
            // Field average per task, over all models.
            let mut field: BTreeMap<&str, f64> = BTreeMap::new();
            for task in &tasks {
                let sum: f64 = models.iter().map(|m| self.utility(m, task)).sum();
                field.insert(task.as_str(), sum / models.len() as f64);
            }

            for model in &models {
                // Best response: the task with the largest edge over the field.
                let best = tasks
                    .iter()
                    .max_by(|a, b| {
                        let ea = self.utility(model, a) - field[a.as_str()];
                        let eb = self.utility(model, b) - field[b.as_str()];
                        ea.partial_cmp(&eb).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .cloned();
                let Some(best) = best else { continue };

                let eta = self.params.eta;
                let row = self.strategies.entry(model.clone()).or_default();
                for task in &tasks {
                    row.entry(task.clone()).or_insert(0.0);
                }
                for (task, p) in row.iter_mut() {
                    if *task == best {
                        *p += eta;
                    } else {
                        *p *= 1.0 - eta;
                    }
                }
                normalize(row);
            }
        }
        self.params.steps
    }

    /// Models ranked for a task by strategy mass × utility.
    pub fn ranking(&self, task: &str) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .strategies
            .iter()
            .map(|(model, row)| {
                let mass = row.get(task).copied().unwrap_or(0.0);
                (model.clone(), mass * self.utility(model, task))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// A model's current task distribution.
    pub fn strategy(&self, model: &str) -> Option<&BTreeMap<String, f64>> {
        self.strategies.get(model)
    }
}

fn normalize(row: &mut BTreeMap<String, f64>) {
    let total: f64 = row.values().sum();
    if total > 0.0 {
        for p in row.values_mut() {
            *p /= total;
        }
    } else if !row.is_empty() {
        let uniform = 1.0 / row.len() as f64;
        for p in row.values_mut() {
            *p = uniform;
        }
    }
}
