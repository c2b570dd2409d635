//! Parameter resolution: fuse brain-state signals into provider-legal
//! sampling parameters.
//!
//! `resolve` is a pure function; identical inputs produce byte-identical
//! bundles. Per-parameter priority, highest first:
//!
//! 1. modulator CLAMP
//! 2. functional-column override
//! 3. provider constraint (e.g. Gemini-3 pins temperature to 1.0)
//! 4. brain-state computation, capped by the task ceiling
//!
//! Non-CLAMP modulations shape the brain-state value before provider and
//! column tiers apply. Unsupported parameters for the target provider are
//! dropped silently at the end; malformed inputs are clamped, never rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attention::AttentionPriority;
use crate::config::{CortexConfig, ProviderConstraint};
use crate::modulation::Modulator;
use crate::prediction::CalibrationHealth;
use crate::routing::ProcessType;

/// Temperature legal range.
const TEMP_RANGE: (f64, f64) = (0.0, 2.0);
const UNIT_RANGE: (f64, f64) = (0.0, 1.0);

/// Built-in task-type temperature ceilings.
const TASK_CEILINGS: &[(&str, f64)] = &[
    ("analysis", 0.8),
    ("chat", 1.0),
    ("classification", 0.3),
    ("code_generation", 0.7),
    ("creative_writing", 1.2),
    ("extraction", 0.3),
    ("planning", 0.9),
    ("summarization", 0.5),
];

const DEFAULT_CEILING: f64 = 1.0;

/// Specialization role of a functional column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Syntactic,
    Semantic,
    Abstract,
    Procedural,
}

/// A static parameter-override column selected by task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalColumn {
    pub id: String,
    pub role: ColumnRole,
    /// Parameter name → pinned value. Keys must be known parameter names.
    pub weight_overrides: BTreeMap<String, f64>,
}

impl FunctionalColumn {
    pub fn new(id: impl Into<String>, role: ColumnRole) -> Self {
        Self {
            id: id.into(),
            role,
            weight_overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, parameter: &str, value: f64) -> Self {
        self.weight_overrides.insert(parameter.to_string(), value);
        self
    }

    fn get(&self, parameter: &str) -> Option<f64> {
        self.weight_overrides.get(parameter).copied()
    }
}

/// The default column set registered by the session builder.
pub fn builtin_columns() -> Vec<FunctionalColumn> {
    vec![
        FunctionalColumn::new("syntactic", ColumnRole::Syntactic).with_override("top_k", 40.0),
        FunctionalColumn::new("semantic", ColumnRole::Semantic),
        FunctionalColumn::new("abstract", ColumnRole::Abstract).with_override("top_p", 0.98),
        FunctionalColumn::new("procedural", ColumnRole::Procedural),
    ]
}

/// Which column role serves a task type.
pub fn role_for_task(task_type: &str) -> ColumnRole {
    match task_type {
        "code_generation" | "extraction" | "classification" => ColumnRole::Syntactic,
        "creative_writing" | "brainstorm" => ColumnRole::Abstract,
        "planning" | "analysis" => ColumnRole::Procedural,
        _ => ColumnRole::Semantic,
    }
}

/// What the target provider accepts; unsupported keys are dropped silently.
#[derive(Debug, Clone, Copy)]
struct ProviderCaps {
    temperature: bool,
    top_p: bool,
    top_k: bool,
    max_tokens: bool,
    frequency_penalty: bool,
    presence_penalty: bool,
    thinking_budget: bool,
    seed: bool,
    stop: bool,
}

fn provider_caps(provider: &str) -> ProviderCaps {
    match provider {
        "openai" | "mistral" => ProviderCaps {
            temperature: true,
            top_p: true,
            top_k: false,
            max_tokens: true,
            frequency_penalty: true,
            presence_penalty: true,
            thinking_budget: false,
            seed: true,
            stop: true,
        },
        "anthropic" => ProviderCaps {
            temperature: true,
            top_p: true,
            top_k: true,
            max_tokens: true,
            frequency_penalty: false,
            presence_penalty: false,
            thinking_budget: true,
            seed: false,
            stop: true,
        },
        "google" | "gemini" => ProviderCaps {
            temperature: true,
            top_p: true,
            top_k: true,
            max_tokens: true,
            frequency_penalty: true,
            presence_penalty: true,
            thinking_budget: true,
            seed: true,
            stop: true,
        },
        _ => ProviderCaps {
            temperature: true,
            top_p: true,
            top_k: true,
            max_tokens: true,
            frequency_penalty: true,
            presence_penalty: true,
            thinking_budget: true,
            seed: true,
            stop: true,
        },
    }
}

/// Resolver tables derived from the session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverTables {
    task_ceilings: BTreeMap<String, f64>,
    provider_constraints: BTreeMap<String, ProviderConstraint>,
}

impl From<&CortexConfig> for ResolverTables {
    fn from(config: &CortexConfig) -> Self {
        let mut task_ceilings: BTreeMap<String, f64> = TASK_CEILINGS
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        for (task, ceiling) in &config.task_ceilings {
            task_ceilings.insert(task.clone(), *ceiling);
        }
        Self {
            task_ceilings,
            provider_constraints: config.provider_constraints.clone(),
        }
    }
}

impl ResolverTables {
    fn ceiling(&self, task_type: &str) -> f64 {
        self.task_ceilings
            .get(task_type)
            .copied()
            .unwrap_or(DEFAULT_CEILING)
    }

    /// Longest matching model prefix wins.
    fn constraint(&self, model: &str) -> Option<&ProviderConstraint> {
        self.provider_constraints
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, constraint)| constraint)
    }
}

/// Everything the resolver reads for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveInput {
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub process: ProcessType,
    pub surprise: f64,
    pub calibration: CalibrationHealth,
    pub confidence: f64,
    pub attention: AttentionPriority,
    pub creativity: f64,
    pub verbosity: f64,
    /// Territory-derived token-budget ratio, capped ×2 during resolution.
    pub resource_ratio: f64,
    pub column: Option<FunctionalColumn>,
    pub stop: Vec<String>,
}

impl Default for ResolveInput {
    fn default() -> Self {
        Self {
            task_type: "chat".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            process: ProcessType::System1,
            surprise: 0.0,
            calibration: CalibrationHealth::Optimal,
            confidence: 0.5,
            attention: AttentionPriority::Foreground,
            creativity: 0.0,
            verbosity: 0.5,
            resource_ratio: 1.0,
            column: None,
            stop: Vec::new(),
        }
    }
}

/// Provider-legal sampling parameters for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop: Vec<String>,
}

impl ParameterBundle {
    /// Canonical JSON bytes; identical inputs to `resolve` yield identical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("bundle serialization is infallible")
    }
}

/// Resolve sampling parameters from the current brain state.
pub fn resolve(input: &ResolveInput, modulator: &Modulator, tables: &ResolverTables) -> ParameterBundle {
    let surprise = input.surprise.clamp(0.0, 1.0);
    let confidence = input.confidence.clamp(0.0, 1.0);
    let creativity = input.creativity.clamp(0.0, 1.0);
    let verbosity = input.verbosity.clamp(0.0, 1.0);
    let constraint = tables.constraint(&input.model);
    let column = input.column.as_ref();

    // Temperature: brain state → ceiling → soft modulation → provider →
    // column → CLAMP.
    let base = match input.process {
        ProcessType::System1 => 0.2,
        ProcessType::System2 => 0.6,
    };
    let brain = base
        + surprise * 0.3
        + (1.0 - confidence) * 0.2
        + input.attention.temperature_adjustment()
        + creativity * 0.15;
    let mut temperature = brain
        .min(tables.ceiling(&input.task_type))
        .clamp(TEMP_RANGE.0, TEMP_RANGE.1);
    temperature = modulator.apply_soft("temperature", temperature, TEMP_RANGE);
    if let Some(forced) = constraint.and_then(|c| c.temperature) {
        temperature = forced;
    }
    if let Some(value) = column.and_then(|c| c.get("temperature")) {
        temperature = value;
    }
    if let Some(value) = modulator.clamp_for("temperature") {
        temperature = value;
    }
    let temperature = temperature.clamp(TEMP_RANGE.0, TEMP_RANGE.1);

    // Nucleus sampling.
    let mut top_p = match input.process {
        ProcessType::System1 => 0.85,
        ProcessType::System2 => 0.95,
    };
    top_p = modulator.apply_soft("top_p", top_p, UNIT_RANGE);
    if let Some(forced) = constraint.and_then(|c| c.top_p) {
        top_p = forced;
    }
    if let Some(value) = column.and_then(|c| c.get("top_p")) {
        top_p = value;
    }
    if let Some(value) = modulator.clamp_for("top_p") {
        top_p = value;
    }
    let top_p = top_p.clamp(UNIT_RANGE.0, UNIT_RANGE.1);

    // top_k only materializes from a column, constraint, or clamp.
    let top_k = modulator
        .clamp_for("top_k")
        .or_else(|| column.and_then(|c| c.get("top_k")))
        .map(|v| v.max(1.0) as u32)
        .or_else(|| constraint.and_then(|c| c.top_k));

    // Token budget: attention base × verbosity shaping × resource ratio.
    // Verbosity 0.5 is the identity point.
    let ratio = input.resource_ratio.clamp(0.0, 2.0);
    let budget = input.attention.token_budget() as f64 * (0.5 + verbosity) * ratio;
    let max_tokens = match modulator.clamp_for("max_tokens") {
        Some(value) => value.max(1.0) as u32,
        None => (budget.round() as u32).max(1),
    };

    let frequency_penalty = (0.3 + creativity * 0.6).max(0.0);
    let presence_penalty = surprise * 0.8;

    let thinking_budget = match input.calibration {
        CalibrationHealth::Optimal => 2_048,
        CalibrationHealth::Healthy => 4_096,
        CalibrationHealth::Degrading | CalibrationHealth::Critical => 8_192,
    };

    let seed = if input.process == ProcessType::System1 && surprise < 0.1 {
        Some(42)
    } else {
        None
    };

    // Provider capability filter: unsupported keys dropped silently.
    let caps = provider_caps(&input.provider);
    ParameterBundle {
        temperature: caps.temperature.then_some(temperature),
        top_p: caps.top_p.then_some(top_p),
        top_k: if caps.top_k { top_k } else { None },
        max_tokens: caps.max_tokens.then_some(max_tokens),
        frequency_penalty: caps.frequency_penalty.then_some(frequency_penalty),
        presence_penalty: caps.presence_penalty.then_some(presence_penalty),
        thinking_budget: caps.thinking_budget.then_some(thinking_budget),
        seed: if caps.seed { seed } else { None },
        stop: if caps.stop { input.stop.clone() } else { Vec::new() },
    }
}
