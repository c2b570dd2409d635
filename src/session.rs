//! Session facade: one instance of every stateful component, driven through
//! synchronous turn boundaries.
//!
//! `begin_turn` checkpoints the full session state, advances the logical
//! clock (weight decay, modulator tick, reorganizer pressure), and computes
//! the turn signals. `resolve` routes System 1/2 and fuses the signals into a
//! parameter bundle. `end_turn` applies the observed outcome — weights,
//! reputation, usage, calibration, residuals, audit — and commits. A turn
//! abandoned before `end_turn` restores the checkpoint, leaving state exactly
//! as before `begin_turn`.
//!
//! Sessions are single-threaded and tenant-exclusive; snapshots are the only
//! export. Construction goes through [`CortexSessionBuilder`], which registers
//! policy objects and columns before init and is immutable afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attention::{self, AttentionPriority};
use crate::audit::{AuditEntry, AuditEventType, AuditLog, AuditSeverity, IntegrityReport};
use crate::config::CortexConfig;
use crate::cortical::{CorticalMap, MapParams, ReorganizationSummary, TerritoryMap};
use crate::entity::{EntityId, EntityKind, SessionId, TenantId, UserId};
use crate::error::{CortexResult, SessionError};
use crate::goal::{GoalParams, GoalState, GoalTracker, GoalVerifier, StepVerification};
use crate::modulation::{
    Modulation, ModulationKind, ModulationScope, ModulationSource, Modulator, SignalSnapshot,
};
use crate::prediction::{
    CalibrationHealth, CalibrationReport, CalibrationTracker, SurpriseParams, SurpriseTracker,
};
use crate::resolver::{self, FunctionalColumn, ParameterBundle, ResolveInput, ResolverTables};
use crate::routing::nash::{NashParams, NashRouter};
use crate::routing::reputation::{ReputationParams, ReputationTracker};
use crate::routing::shapley::{self, CoalitionValues};
use crate::routing::truthful::TruthfulScorer;
use crate::routing::{DualProcessRouter, EscalationPolicy, RouteContext};
use crate::weights::{
    FeedbackTier, PreferenceKind, WeightDocument, WeightEngine, WeightSnapshot,
};

/// Everything a collaborator supplies to open a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub task_type: String,
    pub goal: Option<String>,
    pub messages_digest: String,
    pub tool_candidates: Vec<EntityId>,
    pub model_candidates: Vec<EntityId>,
    /// Outcome of the previous turn, when it arrives with the next open
    /// instead of through `end_turn`.
    pub prior_outcome: Option<Observation>,
    /// Logical seconds since the previous turn.
    pub elapsed_secs: f64,
    pub novelty: f64,
    pub safety: f64,
    pub population_agreement: f64,
    pub explicit_system2: bool,
}

impl TurnContext {
    pub fn new(
        tenant_id: TenantId,
        session_id: SessionId,
        user_id: UserId,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            session_id,
            user_id,
            task_type: task_type.into(),
            goal: None,
            messages_digest: String::new(),
            tool_candidates: Vec::new(),
            model_candidates: Vec::new(),
            prior_outcome: None,
            elapsed_secs: 1.0,
            novelty: 0.0,
            safety: 0.0,
            population_agreement: 1.0,
            explicit_system2: false,
        }
    }
}

/// Observed outcome of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Prediction channel this outcome scores (e.g. "utility").
    pub channel: String,
    pub predicted: f64,
    pub observed: f64,
    pub success: bool,
    pub quality: f64,
    pub latency_ms: u64,
    pub cost: Option<f64>,
    pub tools_used: Vec<EntityId>,
    pub model_used: Option<EntityId>,
}

impl Observation {
    pub fn new(channel: impl Into<String>, predicted: f64, observed: f64, success: bool) -> Self {
        Self {
            channel: channel.into(),
            predicted,
            observed,
            success,
            quality: if success { 1.0 } else { 0.0 },
            latency_ms: 0,
            cost: None,
            tools_used: Vec::new(),
            model_used: None,
        }
    }
}

/// Signals computed when a turn opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSignals {
    pub turn: u64,
    pub surprise: f64,
    pub confidence: f64,
    pub calibration: CalibrationHealth,
    pub attention: AttentionPriority,
    pub goal_drift: f64,
    pub resource_ratio: f64,
    pub active_modulations: usize,
    pub column: Option<String>,
}

/// One decision appended to the session trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub session_id: String,
    pub step_index: u64,
    pub category: String,
    pub decision: String,
    pub confidence: f64,
    pub reasoning: String,
    pub alternatives: Vec<String>,
    pub weight_influences: Vec<(String, f64)>,
    pub goal_alignment: Option<f64>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct LogicalClock {
    turn: u64,
    now: f64,
}

/// The cloneable per-session state; checkpointed at each turn open.
#[derive(Debug, Clone)]
struct SessionState {
    clock: LogicalClock,
    weights: WeightEngine,
    cortical: CorticalMap,
    modulator: Modulator,
    goal: GoalTracker,
    surprise: SurpriseTracker,
    calibration: CalibrationTracker,
    reputation: ReputationTracker,
    nash: NashRouter,
    truthful: TruthfulScorer,
    audit: AuditLog,
    trace: Vec<DecisionStep>,
    last_turn_errored: bool,
}

struct TurnInFlight {
    ctx: TurnContext,
    signals: TurnSignals,
    resolved: bool,
}

/// Builder registering config, columns, policies, and restored weights.
pub struct CortexSessionBuilder {
    tenant: TenantId,
    session: SessionId,
    user: UserId,
    config: CortexConfig,
    columns: Option<Vec<FunctionalColumn>>,
    policies: Vec<Box<dyn EscalationPolicy>>,
    weights: Option<WeightDocument>,
}

impl CortexSessionBuilder {
    pub fn config(mut self, config: CortexConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the built-in column set.
    pub fn columns(mut self, columns: Vec<FunctionalColumn>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Register an escalation policy; immutable after build.
    pub fn policy(mut self, policy: Box<dyn EscalationPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Restore persisted weights for this user.
    pub fn weights(mut self, document: WeightDocument) -> Self {
        self.weights = Some(document);
        self
    }

    pub fn build(self) -> CortexResult<CortexSession> {
        self.config.validate()?;
        let tables = ResolverTables::from(&self.config);
        let columns = self.columns.unwrap_or_else(resolver::builtin_columns);

        tracing::info!(
            tenant = self.tenant.as_str(),
            session = self.session.as_str(),
            columns = columns.len(),
            policies = self.policies.len(),
            "cortex session initialized"
        );

        let state = SessionState {
            clock: LogicalClock::default(),
            weights: self
                .weights
                .map(WeightEngine::from_document)
                .unwrap_or_default(),
            cortical: CorticalMap::new(MapParams::from(&self.config)),
            modulator: Modulator::new(),
            goal: GoalTracker::new(GoalParams::from(&self.config)),
            surprise: SurpriseTracker::new(SurpriseParams::from(&self.config)),
            calibration: CalibrationTracker::new(self.config.calibration_bins),
            reputation: ReputationTracker::new(ReputationParams::from(&self.config)),
            nash: NashRouter::new(NashParams::from(&self.config)),
            truthful: TruthfulScorer::new(self.config.truthful_alpha),
            audit: AuditLog::new(self.config.audit.enabled),
            trace: Vec::new(),
            last_turn_errored: false,
        };

        Ok(CortexSession {
            tenant: self.tenant,
            session: self.session,
            user: self.user,
            router: DualProcessRouter::with_policies(self.policies),
            tables,
            columns,
            config: self.config,
            state,
            checkpoint: None,
            turn: None,
        })
    }
}

/// One session of the cognitive control core.
pub struct CortexSession {
    tenant: TenantId,
    session: SessionId,
    user: UserId,
    config: CortexConfig,
    tables: ResolverTables,
    columns: Vec<FunctionalColumn>,
    router: DualProcessRouter,
    state: SessionState,
    checkpoint: Option<SessionState>,
    turn: Option<TurnInFlight>,
}

impl CortexSession {
    pub fn builder(tenant: TenantId, session: SessionId, user: UserId) -> CortexSessionBuilder {
        CortexSessionBuilder {
            tenant,
            session,
            user,
            config: CortexConfig::default(),
            columns: None,
            policies: Vec::new(),
            weights: None,
        }
    }

    // -----------------------------------------------------------------------
    // Turn lifecycle
    // -----------------------------------------------------------------------

    /// Open a turn: checkpoint, advance the clock, compute signals.
    ///
    /// An unfinished previous turn is abandoned first, restoring its
    /// checkpoint.
    pub fn begin_turn(&mut self, ctx: TurnContext) -> CortexResult<TurnSignals> {
        if ctx.tenant_id != self.tenant {
            return Err(SessionError::TenantMismatch {
                expected: self.tenant.as_str().to_string(),
                got: ctx.tenant_id.as_str().to_string(),
            }
            .into());
        }
        if self.turn.is_some() {
            self.abandon_turn();
        }
        self.checkpoint = Some(self.state.clone());

        // Clock advance: decay, override expiry, modulator tick, map turn.
        let dt = ctx.elapsed_secs.max(0.0);
        self.state.clock.turn += 1;
        self.state.clock.now += dt;
        let now = self.state.clock.now;

        self.state
            .weights
            .decay(dt, self.config.preference_halflife_secs);
        self.state.weights.expire_overrides(now);
        let tick_signals = SignalSnapshot {
            surprise: self.state.surprise.overall(),
            drift: self.state.goal.drift(),
            confidence: self.state.calibration.confidence(),
        };
        self.state.modulator.tick(now, &tick_signals);
        self.state.cortical.advance_turn();

        if let Some(goal) = &ctx.goal {
            self.state.goal.set_goal(goal.clone(), now);
        }
        if let Some(outcome) = ctx.prior_outcome.clone() {
            if let Err(e) = self.apply_observation(&outcome, None) {
                // No partial mutation may survive a failed open.
                self.abandon_turn();
                return Err(e);
            }
        }

        // Signals for this turn.
        let surprise = self.state.surprise.overall();
        let confidence = self.state.calibration.confidence();
        let drift = self.state.goal.drift();
        let suppressed = self.state.modulator.apply("attention", 1.0, (0.0, 1.0)) == 0.0;
        let attention = attention::assess(&ctx.task_type, ctx.safety, drift, surprise, suppressed);
        let column = self.column_for(&ctx.task_type);
        let resource_ratio = self.mean_resource_ratio(&ctx.tool_candidates);

        let signals = TurnSignals {
            turn: self.state.clock.turn,
            surprise,
            confidence,
            calibration: self.state.calibration.health(),
            attention,
            goal_drift: drift,
            resource_ratio,
            active_modulations: self.state.modulator.len(),
            column: column.map(|c| c.id.clone()),
        };

        self.audit(
            AuditEventType::TurnOpened,
            AuditSeverity::Info,
            "begin_turn",
            [
                ("task_type", serde_json::json!(ctx.task_type)),
                ("digest", serde_json::json!(ctx.messages_digest)),
                ("turn", serde_json::json!(signals.turn)),
            ],
            "success",
        );

        self.turn = Some(TurnInFlight {
            ctx,
            signals: signals.clone(),
            resolved: false,
        });
        Ok(signals)
    }

    /// Route the turn and resolve the parameter bundle. Resolves once per turn.
    pub fn resolve(&mut self) -> CortexResult<ParameterBundle> {
        let turn = self
            .turn
            .as_ref()
            .ok_or(SessionError::NoTurnInFlight)?;
        if turn.resolved {
            return Err(SessionError::AlreadyResolved.into());
        }
        let ctx = turn.ctx.clone();
        let signals = turn.signals.clone();
        let now = self.state.clock.now;

        let route_ctx = RouteContext {
            surprise: signals.surprise,
            population_agreement: ctx.population_agreement,
            novelty: ctx.novelty,
            safety: ctx.safety,
            explicit_system2: ctx.explicit_system2,
            previous_error: self.state.last_turn_errored,
            goal_drift: signals.goal_drift,
        };
        let decision = self.router.route(&route_ctx);

        let (model, alternatives, quarantine_emptied) = self.pick_model(&ctx.model_candidates, now);
        if quarantine_emptied {
            self.audit(
                AuditEventType::PolicyDecision,
                AuditSeverity::Warning,
                "candidate_list_empty_after_quarantine",
                [("candidates", serde_json::json!(ctx.model_candidates.len()))],
                "fallback",
            );
        }
        let provider = infer_provider(&model);

        let creativity = self
            .state
            .weights
            .effective_behavioral("creativity", now)
            .map(signed_to_unit)
            .unwrap_or(0.0);
        let verbosity = self
            .state
            .weights
            .effective_behavioral("verbosity", now)
            .map(signed_to_unit)
            .unwrap_or(0.5);

        let input = ResolveInput {
            task_type: ctx.task_type.clone(),
            provider,
            model: model.clone(),
            process: decision.process,
            surprise: signals.surprise,
            calibration: signals.calibration,
            confidence: signals.confidence,
            attention: signals.attention,
            creativity,
            verbosity,
            resource_ratio: signals.resource_ratio,
            column: self.column_for(&ctx.task_type).cloned(),
            stop: Vec::new(),
        };
        let bundle = resolver::resolve(&input, &self.state.modulator, &self.tables);

        let reasons: Vec<String> = decision
            .reasons
            .iter()
            .map(|r| r.label().to_string())
            .collect();
        let step = DecisionStep {
            session_id: self.session.as_str().to_string(),
            step_index: self.state.trace.len() as u64,
            category: "parameter_resolution".into(),
            decision: format!("{} via {}", model, decision.process.label()),
            confidence: signals.confidence,
            reasoning: if reasons.is_empty() {
                "no escalation triggers".into()
            } else {
                reasons.join(", ")
            },
            alternatives,
            weight_influences: vec![
                ("surprise".into(), signals.surprise),
                ("confidence".into(), signals.confidence),
                ("goal_drift".into(), signals.goal_drift),
                ("creativity".into(), creativity),
            ],
            goal_alignment: self
                .state
                .goal
                .has_goal()
                .then(|| 1.0 - signals.goal_drift),
            timestamp: now,
        };
        self.state.trace.push(step);

        self.audit(
            AuditEventType::ParameterResolution,
            AuditSeverity::Info,
            "resolve",
            [
                ("model", serde_json::json!(model)),
                ("process", serde_json::json!(decision.process.label())),
                ("reasons", serde_json::json!(reasons)),
                (
                    "bundle",
                    serde_json::from_slice(&bundle.canonical_bytes())
                        .unwrap_or(serde_json::Value::Null),
                ),
            ],
            "success",
        );

        let turn = self.turn.as_mut().expect("turn checked above");
        turn.resolved = true;
        Ok(bundle)
    }

    /// Commit the turn: outcome-side updates happen here, all or nothing.
    pub fn end_turn(&mut self, observation: Option<&Observation>) -> CortexResult<()> {
        let turn = self.turn.take().ok_or(SessionError::NoTurnInFlight)?;
        if let Some(obs) = observation {
            if let Err(e) = self.apply_observation(obs, Some(&turn)) {
                // Failed commits must not leave partial state behind.
                self.turn = Some(turn);
                self.abandon_turn();
                return Err(e);
            }
        }
        self.audit(
            AuditEventType::OutcomeCommitted,
            AuditSeverity::Info,
            "end_turn",
            [(
                "observed",
                serde_json::json!(observation.is_some()),
            )],
            "success",
        );
        self.checkpoint = None;
        Ok(())
    }

    /// Abandon the in-flight turn, restoring the pre-turn checkpoint.
    pub fn abandon_turn(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.state = checkpoint;
        }
        self.turn = None;
    }

    fn apply_observation(
        &mut self,
        obs: &Observation,
        turn: Option<&TurnInFlight>,
    ) -> CortexResult<()> {
        let now = self.state.clock.now;
        let turn_index = self.state.clock.turn;
        let task_type = turn
            .map(|t| t.ctx.task_type.clone())
            .unwrap_or_else(|| "chat".to_string());
        let confidence_at_resolve = turn
            .map(|t| t.signals.confidence)
            .unwrap_or_else(|| self.state.calibration.confidence());

        let tool_k = self.config.tier_weight(FeedbackTier::Direct) * self.config.tool_lr;
        let model_k = self.config.tier_weight(FeedbackTier::Direct) * self.config.model_lr;

        let mut changed: Vec<String> = Vec::new();
        for tool in &obs.tools_used {
            if let Some(applied) = self.state.weights.apply_preference_feedback(
                PreferenceKind::Tool,
                tool,
                obs.success,
                FeedbackTier::Direct,
                tool_k,
                now,
            ) {
                changed.push(applied.target);
            }
            self.state.reputation.record_outcome(tool, obs.success, now);
            self.state.cortical.record_quality(tool, obs.success);
            self.state.truthful.observe(tool, "quality", obs.quality);
        }
        if let Some(model) = &obs.model_used {
            if let Some(applied) = self.state.weights.apply_preference_feedback(
                PreferenceKind::Model,
                model,
                obs.success,
                FeedbackTier::Direct,
                model_k,
                now,
            ) {
                changed.push(applied.target);
            }
            self.state.reputation.record_outcome(model, obs.success, now);
            let speed = 1000.0 / (1000.0 + obs.latency_ms as f64);
            self.state.nash.observe(
                model.as_str(),
                &task_type,
                obs.quality,
                speed,
                obs.cost.unwrap_or(0.0),
            );
        }

        if !obs.tools_used.is_empty() {
            self.state.cortical.record_usage(&obs.tools_used);
        }

        self.state
            .surprise
            .record(&obs.channel, obs.predicted, obs.observed, turn_index);
        self.state.calibration.record(confidence_at_resolve, obs.success);
        self.state.last_turn_errored = !obs.success;

        if !changed.is_empty() {
            self.audit(
                AuditEventType::WeightChange,
                AuditSeverity::Info,
                "direct_feedback",
                [
                    ("entities", serde_json::json!(changed)),
                    ("success", serde_json::json!(obs.success)),
                ],
                "success",
            );
        }

        if let Some(summary) = self.state.cortical.maybe_reorganize()? {
            self.audit_reorganization(&summary);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Weights & feedback
    // -----------------------------------------------------------------------

    /// Apply preference feedback from a non-direct tier (user insight,
    /// enterprise, global). Disabled tiers are a no-op.
    pub fn apply_feedback(
        &mut self,
        kind: PreferenceKind,
        entity: &EntityId,
        success: bool,
        tier: FeedbackTier,
    ) -> CortexResult<()> {
        let now = self.state.clock.now;
        let lr = match kind {
            PreferenceKind::Tool => self.config.tool_lr,
            PreferenceKind::Model => self.config.model_lr,
        };
        let k = self.config.tier_weight(tier) * lr;
        if let Some(applied) =
            self.state
                .weights
                .apply_preference_feedback(kind, entity, success, tier, k, now)
        {
            self.audit(
                AuditEventType::WeightChange,
                AuditSeverity::Info,
                format!("{}_feedback", tier.label()),
                [
                    ("entity", serde_json::json!(applied.target)),
                    ("before", serde_json::json!(applied.before)),
                    ("after", serde_json::json!(applied.after)),
                ],
                "success",
            );
        }
        Ok(())
    }

    /// Nudge a behavioral weight toward a target through a feedback tier.
    pub fn apply_behavioral_feedback(
        &mut self,
        name: &str,
        target: f64,
        tier: FeedbackTier,
    ) -> CortexResult<()> {
        let now = self.state.clock.now;
        let tier_weight = self.config.tier_weight(tier);
        if let Some(applied) = self.state.weights.apply_behavioral_feedback(
            name,
            target,
            tier,
            tier_weight,
            self.config.behavioral_lr,
            now,
        ) {
            self.audit(
                AuditEventType::WeightChange,
                AuditSeverity::Info,
                format!("{}_behavioral", tier.label()),
                [
                    ("name", serde_json::json!(applied.target)),
                    ("before", serde_json::json!(applied.before)),
                    ("after", serde_json::json!(applied.after)),
                ],
                "success",
            );
        }
        Ok(())
    }

    /// Install a behavioral override (`effective = override ?? learned`).
    pub fn override_weight(
        &mut self,
        name: &str,
        value: f64,
        ttl_secs: Option<f64>,
    ) -> CortexResult<()> {
        let now = self.state.clock.now;
        self.state.weights.set_override(name, value, ttl_secs, now)?;
        self.audit(
            AuditEventType::WeightChange,
            AuditSeverity::Info,
            "override",
            [
                ("name", serde_json::json!(name)),
                ("value", serde_json::json!(value)),
            ],
            "success",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Modulations
    // -----------------------------------------------------------------------

    /// Install a modulation on a weight or parameter target.
    pub fn add_modulation(
        &mut self,
        target: impl Into<String>,
        kind: ModulationKind,
        scope: ModulationScope,
        priority: i32,
        source: ModulationSource,
    ) -> CortexResult<u64> {
        let target = target.into();
        let id = self.state.modulator.add(
            target.clone(),
            kind,
            scope,
            priority,
            source,
            self.state.clock.turn,
            None,
        )?;
        self.audit(
            AuditEventType::ModulationAdded,
            AuditSeverity::Info,
            "add_modulation",
            [
                ("id", serde_json::json!(id)),
                ("target", serde_json::json!(target)),
                ("kind", serde_json::json!(kind.label())),
                ("priority", serde_json::json!(priority)),
            ],
            "success",
        );
        Ok(id)
    }

    /// Remove a modulation by id.
    pub fn remove_modulation(&mut self, id: u64) -> CortexResult<()> {
        let removed = self.state.modulator.remove(id)?;
        self.audit(
            AuditEventType::ModulationRemoved,
            AuditSeverity::Info,
            "remove_modulation",
            [
                ("id", serde_json::json!(id)),
                ("target", serde_json::json!(removed.target)),
            ],
            "success",
        );
        Ok(())
    }

    /// Clear goal-scoped modulations (goal finished or replanned).
    pub fn clear_goal_modulations(&mut self) {
        self.state.modulator.clear_scope(ModulationScope::Goal);
    }

    // -----------------------------------------------------------------------
    // Entities & goal
    // -----------------------------------------------------------------------

    /// Register a tool or model territory.
    pub fn register_entity(
        &mut self,
        id: &EntityId,
        kind: EntityKind,
        initial_territory: Option<f64>,
    ) -> CortexResult<()> {
        self.state.cortical.register(id, kind, initial_territory)?;
        self.audit(
            AuditEventType::Reorganization,
            AuditSeverity::Info,
            "register_entity",
            [
                ("entity", serde_json::json!(id.as_str())),
                ("kind", serde_json::json!(kind.label())),
            ],
            "success",
        );
        Ok(())
    }

    /// Remove an entity, redistributing its territory.
    pub fn remove_entity(&mut self, id: &EntityId) -> CortexResult<()> {
        self.state.cortical.remove(id)?;
        self.audit(
            AuditEventType::Reorganization,
            AuditSeverity::Info,
            "remove_entity",
            [("entity", serde_json::json!(id.as_str()))],
            "success",
        );
        Ok(())
    }

    /// Declare a tool's capability vector for truthful scoring.
    pub fn declare_capabilities(
        &mut self,
        entity: &EntityId,
        capabilities: BTreeMap<String, f64>,
    ) {
        self.state.truthful.declare(entity, capabilities);
    }

    /// Set the session goal.
    pub fn set_goal(&mut self, goal: impl Into<String>) {
        let now = self.state.clock.now;
        self.state.goal.set_goal(goal, now);
    }

    /// Install a plan (resets the step counter).
    pub fn set_plan(&mut self, steps: Vec<String>) -> CortexResult<()> {
        self.state.goal.set_plan(steps)
    }

    /// Verify an executed step against the goal.
    pub fn verify_step(
        &mut self,
        description: &str,
        output: &str,
        verifier: Option<&dyn GoalVerifier>,
    ) -> CortexResult<StepVerification> {
        let now = self.state.clock.now;
        self.state.goal.verify_step(description, output, verifier, now)
    }

    /// Clear loop-detection hashes, preserving progress and drift.
    pub fn reset_loop_detection(&mut self) {
        self.state.goal.reset_loop_detection();
    }

    // -----------------------------------------------------------------------
    // Reputation & credit assignment
    // -----------------------------------------------------------------------

    /// Candidates that are not quarantined right now.
    pub fn available_tools(&self, candidates: &[EntityId]) -> Vec<EntityId> {
        self.state
            .reputation
            .available(candidates, self.state.clock.now)
    }

    pub fn is_quarantined(&self, entity: &EntityId) -> bool {
        self.state
            .reputation
            .is_quarantined(entity, self.state.clock.now)
    }

    /// Clear quarantine and restart trust at the forgiveness level.
    pub fn forgive(&mut self, entity: &EntityId) -> CortexResult<()> {
        self.state.reputation.forgive(entity)?;
        self.audit(
            AuditEventType::PolicyDecision,
            AuditSeverity::Info,
            "forgive",
            [("entity", serde_json::json!(entity.as_str()))],
            "success",
        );
        Ok(())
    }

    /// Shapley credits for an observed coalition game. Deterministic: the
    /// Monte Carlo seed is the current logical turn.
    pub fn shapley_credits(&self, values: &CoalitionValues) -> Vec<f64> {
        shapley::credits(
            values,
            self.config.shapley_permutations,
            self.state.clock.turn,
        )
    }

    /// Run a Nash routing pass and return the ranking for a task type.
    pub fn nash_ranking(&mut self, task_type: &str) -> Vec<(String, f64)> {
        self.state.nash.run_steps();
        self.state.nash.ranking(task_type)
    }

    /// Credibility-adjusted score for an entity.
    pub fn adjusted_score(&self, entity: &EntityId, raw: f64) -> f64 {
        self.state.truthful.adjusted_score(entity, raw)
    }

    // -----------------------------------------------------------------------
    // External events
    // -----------------------------------------------------------------------

    /// Forward a DSAR event from the external privacy manager into the chain.
    pub fn record_dsar_event(
        &mut self,
        action: &str,
        details: BTreeMap<String, serde_json::Value>,
    ) {
        let ts = self.state.clock.now;
        self.state.audit.append(
            &self.tenant,
            &self.session,
            &self.user,
            ts,
            AuditEventType::DsarEvent,
            AuditSeverity::Warning,
            action,
            details,
            "forwarded",
        );
    }

    /// Log a refusal decision from the external quota layer.
    pub fn record_quota_refusal(&mut self, detail: &str) {
        self.audit(
            AuditEventType::QuotaRefusal,
            AuditSeverity::Warning,
            "quota_refusal",
            [("detail", serde_json::json!(detail))],
            "refused",
        );
    }

    // -----------------------------------------------------------------------
    // Snapshots & exports
    // -----------------------------------------------------------------------

    pub fn weight_snapshot(&self) -> WeightSnapshot {
        self.state.weights.snapshot(self.state.clock.now)
    }

    pub fn weight_document(&self) -> WeightDocument {
        self.state.weights.to_document()
    }

    pub fn territory_map(&self) -> TerritoryMap {
        self.state.cortical.export_map()
    }

    pub fn active_modulations(&self) -> &[Modulation] {
        self.state.modulator.active()
    }

    pub fn calibration_report(&self) -> CalibrationReport {
        self.state.calibration.report()
    }

    pub fn reputation_map(&self) -> BTreeMap<String, f64> {
        self.state.reputation.export(self.state.clock.now)
    }

    pub fn goal_state(&self) -> CortexResult<GoalState> {
        self.state.goal.state()
    }

    pub fn decision_trace(&self) -> &[DecisionStep] {
        &self.state.trace
    }

    pub fn audit_entries(&self) -> &[AuditEntry] {
        self.state.audit.entries()
    }

    pub fn audit_tail(&self, n: usize) -> &[AuditEntry] {
        self.state.audit.tail(n)
    }

    pub fn verify_audit_integrity(&self) -> IntegrityReport {
        self.state.audit.verify_integrity_detailed()
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    /// Logical turn counter.
    pub fn turn(&self) -> u64 {
        self.state.clock.turn
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn column_for(&self, task_type: &str) -> Option<&FunctionalColumn> {
        let role = resolver::role_for_task(task_type);
        self.columns.iter().find(|c| c.role == role)
    }

    fn mean_resource_ratio(&self, candidates: &[EntityId]) -> f64 {
        if candidates.is_empty() {
            return 1.0;
        }
        let total: f64 = candidates
            .iter()
            .map(|c| self.state.cortical.resource_ratio(c))
            .sum();
        total / candidates.len() as f64
    }

    /// Choose the model with the best preference × trust score.
    /// Returns (model, alternatives, fell_back_past_quarantine).
    fn pick_model(&self, candidates: &[EntityId], now: f64) -> (String, Vec<String>, bool) {
        if candidates.is_empty() {
            return ("default".to_string(), Vec::new(), false);
        }
        let available = self.state.reputation.available(candidates, now);
        let (pool, fell_back) = if available.is_empty() {
            (candidates.to_vec(), true)
        } else {
            (available, false)
        };

        let mut scored: Vec<(f64, &EntityId)> = pool
            .iter()
            .map(|id| {
                let preference = self
                    .state
                    .weights
                    .preference_mean(PreferenceKind::Model, id)
                    .unwrap_or(0.5);
                let trust = self.state.reputation.effective_trust(id, now);
                let raw = preference * trust.max(0.05);
                (self.state.truthful.adjusted_score(id, raw), id)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        let chosen = scored[0].1.as_str().to_string();
        let alternatives = scored[1..]
            .iter()
            .map(|(_, id)| id.as_str().to_string())
            .collect();
        (chosen, alternatives, fell_back)
    }

    fn audit<const N: usize>(
        &mut self,
        event_type: AuditEventType,
        severity: AuditSeverity,
        action: impl Into<String>,
        details: [(&str, serde_json::Value); N],
        outcome: &str,
    ) {
        let ts = self.state.clock.now;
        let details: BTreeMap<String, serde_json::Value> = details
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.state.audit.append(
            &self.tenant,
            &self.session,
            &self.user,
            ts,
            event_type,
            severity,
            action,
            details,
            outcome,
        );
    }

    fn audit_reorganization(&mut self, summary: &ReorganizationSummary) {
        self.audit(
            AuditEventType::Reorganization,
            AuditSeverity::Info,
            "reorganize",
            [
                ("turn", serde_json::json!(summary.turn)),
                ("pressure", serde_json::json!(summary.pressure_before)),
                ("merged", serde_json::json!(summary.merged)),
                ("split", serde_json::json!(summary.split)),
            ],
            "success",
        );
    }
}

fn signed_to_unit(w: f64) -> f64 {
    ((w + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Infer the provider family from a model name.
fn infer_provider(model: &str) -> String {
    let lower = model.to_lowercase();
    if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        "openai"
    } else if lower.starts_with("claude") {
        "anthropic"
    } else if lower.starts_with("gemini") {
        "google"
    } else if lower.starts_with("mistral") || lower.starts_with("mixtral") {
        "mistral"
    } else {
        "unknown"
    }
    .to_string()
}
