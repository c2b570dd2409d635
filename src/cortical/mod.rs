//! Cortical map reorganizer: territory allocation over tools, models, and
//! behaviors.
//!
//! Each entity holds a territory — a share of the normalized attention budget.
//! Usage, feedback quality, and recency reshape territories each
//! reorganization cycle; co-activated pairs fuse into merged entities (and
//! split back when cohesion drops); removed entities bequeath their territory
//! to their most similar survivors.
//!
//! The map maintains a free reserve: territory mass not yet granted to any
//! entity. Allocated sizes plus the reserve always sum to 1, and cycles
//! conserve allocated mass — registration draws from the reserve, removal
//! without similar survivors returns to it.

pub mod merge;
pub mod redistribute;
pub mod scheduler;
pub mod usage;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::CortexConfig;
use crate::entity::{EntityHandle, EntityId, EntityInterner, EntityKind};
use crate::error::{CortexResult, MapError};

use merge::{ComponentHit, MergeRecord, MergedEntity};
use scheduler::{PressureEvent, ReorganizationScheduler};
use usage::UsageTracker;

/// Tolerance on the territory-sum invariant.
pub const TERRITORY_EPSILON: f64 = 1e-6;

/// Fraction of territory a disused entity keeps per cycle.
const DISUSE_RETAIN: f64 = 0.8;

/// A territory held by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryAllocation {
    pub entity: EntityId,
    pub kind: EntityKind,
    /// Share of the normalized budget, in [0, 1].
    pub size: f64,
    /// Decayed usage count.
    pub usage_count: f64,
    /// Usage share relative to all entities, recomputed each cycle.
    pub usage_freq: f64,
    pub last_used_turn: u64,
    /// Beta posterior over outcome quality; both counts stay ≥ 1.
    pub alpha: f64,
    pub beta: f64,
    pub created_at_turn: u64,
    pub metadata: BTreeMap<String, String>,
}

impl TerritoryAllocation {
    fn new(entity: EntityId, kind: EntityKind, size: f64, turn: u64) -> Self {
        Self {
            entity,
            kind,
            size,
            usage_count: 0.0,
            usage_freq: 0.0,
            last_used_turn: turn,
            alpha: 1.0,
            beta: 1.0,
            created_at_turn: turn,
            metadata: BTreeMap::new(),
        }
    }

    /// Posterior mean of outcome quality.
    pub fn quality(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

/// Reorganizer parameters, copied from the session config at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapParams {
    pub decay_factor: f64,
    pub edge_halflife_turns: f64,
    pub disuse_threshold_turns: u32,
    pub merge_threshold: f64,
    pub split_threshold: f64,
    pub merge_min_observations: u32,
    pub similarity_exponent: f64,
    pub similarity_floor: f64,
    pub pressure_threshold: f64,
    pub periodic_interval_turns: u64,
}

impl From<&CortexConfig> for MapParams {
    fn from(config: &CortexConfig) -> Self {
        Self {
            decay_factor: config.decay_factor,
            edge_halflife_turns: config.edge_halflife_turns,
            disuse_threshold_turns: config.disuse_threshold_turns,
            merge_threshold: config.merge_threshold,
            split_threshold: config.split_threshold,
            merge_min_observations: config.merge_min_observations,
            similarity_exponent: config.similarity_exponent,
            similarity_floor: config.similarity_floor,
            pressure_threshold: config.pressure_threshold,
            periodic_interval_turns: config.periodic_interval_turns,
        }
    }
}

/// What a reorganization cycle did, for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReorganizationSummary {
    pub turn: u64,
    pub pressure_before: f64,
    pub merged: Vec<String>,
    pub split: Vec<String>,
    pub allocated_after: f64,
}

/// Exported territory map (`territories/<tenant>/<session>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryMap {
    pub turn: u64,
    pub reserve: f64,
    pub territories: BTreeMap<String, TerritoryAllocation>,
    pub merges: BTreeMap<String, MergeExport>,
}

/// Merge metadata in the exported map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeExport {
    pub sources: (String, String),
    pub merged_at_turn: u64,
    pub size_at_merge: f64,
    pub cohesion: f64,
}

/// The cortical map: territories, merges, usage, and the cycle scheduler.
#[derive(Debug, Clone)]
pub struct CorticalMap {
    params: MapParams,
    interner: EntityInterner,
    territories: HashMap<EntityHandle, TerritoryAllocation>,
    merges: HashMap<EntityHandle, MergedEntity>,
    /// Source handle → merged handle, for usage attribution routing.
    source_index: HashMap<EntityHandle, EntityHandle>,
    usage: UsageTracker,
    scheduler: ReorganizationScheduler,
    turn: u64,
    last_cycle_turn: u64,
}

impl CorticalMap {
    pub fn new(params: MapParams) -> Self {
        Self {
            params,
            interner: EntityInterner::new(),
            territories: HashMap::new(),
            merges: HashMap::new(),
            source_index: HashMap::new(),
            usage: UsageTracker::new(),
            scheduler: ReorganizationScheduler::new(),
            turn: 0,
            last_cycle_turn: 0,
        }
    }

    /// Register an entity with an optional explicit initial territory.
    ///
    /// Without an explicit size, the entity receives a uniform share
    /// `1/(n+1)`. Mass comes from the free reserve first; when the reserve is
    /// short, existing territories shrink proportionally to make room.
    pub fn register(
        &mut self,
        id: &EntityId,
        kind: EntityKind,
        initial_size: Option<f64>,
    ) -> CortexResult<()> {
        if let Some(handle) = self.interner.get(id) {
            if self.territories.contains_key(&handle) {
                return Err(MapError::AlreadyRegistered {
                    id: id.as_str().to_string(),
                }
                .into());
            }
            if let Some(&merged) = self.source_index.get(&handle) {
                return Err(MapError::AlreadyMerged {
                    id: id.as_str().to_string(),
                    merged: self.interner.resolve(merged).as_str().to_string(),
                }
                .into());
            }
        }

        let uniform = 1.0 / (self.territories.len() as f64 + 1.0);
        let desired = initial_size.unwrap_or(uniform).clamp(0.0, 1.0);
        let granted = self.carve(desired);

        let handle = self.interner.intern(id);
        self.territories
            .insert(handle, TerritoryAllocation::new(id.clone(), kind, granted, self.turn));
        self.scheduler.accumulate(PressureEvent::EntityRegistered);
        Ok(())
    }

    /// Take `desired` mass from the reserve, shrinking existing territories
    /// proportionally when the reserve is short.
    fn carve(&mut self, desired: f64) -> f64 {
        let reserve = self.reserve();
        if reserve >= desired {
            return desired;
        }
        let shortfall = desired - reserve;
        let allocated = self.allocated();
        if allocated > 0.0 {
            let scale = (allocated - shortfall).max(0.0) / allocated;
            for alloc in self.territories.values_mut() {
                alloc.size *= scale;
            }
            desired
        } else {
            reserve
        }
    }

    /// Remove an entity, redistributing its territory to similar survivors.
    ///
    /// When no survivor clears the similarity floor, the mass returns to the
    /// free reserve. Removing a merged entity discards its merge record.
    pub fn remove(&mut self, id: &EntityId) -> CortexResult<()> {
        let handle = self
            .interner
            .get(id)
            .ok_or_else(|| MapError::UnknownEntity {
                id: id.as_str().to_string(),
            })?;
        if let Some(&merged) = self.source_index.get(&handle) {
            return Err(MapError::AlreadyMerged {
                id: id.as_str().to_string(),
                merged: self.interner.resolve(merged).as_str().to_string(),
            }
            .into());
        }
        let removed = self
            .territories
            .remove(&handle)
            .ok_or_else(|| MapError::UnknownEntity {
                id: id.as_str().to_string(),
            })?;

        if removed.kind == EntityKind::Merged {
            if let Some(merged) = self.merges.remove(&handle) {
                self.source_index.remove(&merged.sources.0);
                self.source_index.remove(&merged.sources.1);
            }
        }

        let survivors: Vec<EntityHandle> = self.territories.keys().copied().collect();
        let shares = redistribute::redistribution_shares(
            &self.usage,
            handle,
            &survivors,
            self.params.similarity_exponent,
            self.params.similarity_floor,
        );
        for (survivor, share) in shares {
            if let Some(alloc) = self.territories.get_mut(&survivor) {
                alloc.size += removed.size * share;
            }
        }
        self.usage.forget(handle);
        self.scheduler.accumulate(PressureEvent::EntityRemoved);
        self.rescale_overflow();
        Ok(())
    }

    /// Record one turn's entity usage. Unknown entities auto-register with a
    /// uniform share; sources of merged entities route to the merged id.
    pub fn record_usage(&mut self, ids: &[EntityId]) {
        let mut raw: Vec<EntityHandle> = Vec::with_capacity(ids.len());
        for id in ids {
            let handle = match self.interner.get(id) {
                Some(h) => h,
                None => {
                    // Auto-registration keeps the usage path total.
                    let kind = EntityKind::Tool;
                    let _ = self.register(id, kind, None);
                    self.interner.get(id).expect("just registered")
                }
            };
            if !self.territories.contains_key(&handle)
                && !self.source_index.contains_key(&handle)
            {
                let _ = self.register(id, EntityKind::Tool, None);
            }
            raw.push(handle);
        }

        let mut effective: Vec<EntityHandle> = Vec::with_capacity(raw.len());
        for &handle in &raw {
            let target = self.source_index.get(&handle).copied().unwrap_or(handle);
            if !effective.contains(&target) {
                effective.push(target);
            }
        }

        self.usage.record_turn(&effective);
        for &handle in &effective {
            if let Some(alloc) = self.territories.get_mut(&handle) {
                alloc.usage_count = self.usage.count(handle);
                alloc.last_used_turn = self.turn;
            }
            self.scheduler.accumulate(PressureEvent::UsageRecorded);
        }

        // Component-hit tracking for merged entities: which sources were
        // actually named this turn decides cohesion.
        for &handle in &effective {
            if let Some(merged) = self.merges.get_mut(&handle) {
                let first = raw.contains(&merged.sources.0);
                let second = raw.contains(&merged.sources.1);
                let hit = match (first, second) {
                    (true, true) => ComponentHit::Joint,
                    (true, false) => ComponentHit::First,
                    (false, true) => ComponentHit::Second,
                    // The merged id itself was named; treat as whole use.
                    (false, false) => ComponentHit::Joint,
                };
                merged.record_hit(hit);
            }
        }
    }

    /// Record outcome quality for an entity's territory Beta.
    /// Unknown entities auto-register; merged sources route to the merged id.
    pub fn record_quality(&mut self, id: &EntityId, success: bool) {
        let handle = match self.interner.get(id) {
            Some(h) => h,
            None => {
                let _ = self.register(id, EntityKind::Tool, None);
                self.interner.get(id).expect("just registered")
            }
        };
        let target = self.source_index.get(&handle).copied().unwrap_or(handle);
        if let Some(alloc) = self.territories.get_mut(&target) {
            if success {
                alloc.alpha += 1.0;
            } else {
                alloc.beta += 1.0;
            }
        }
        self.scheduler.accumulate(PressureEvent::FeedbackApplied);
    }

    /// Advance the logical turn counter.
    pub fn advance_turn(&mut self) {
        self.turn += 1;
        self.scheduler.accumulate(PressureEvent::TurnElapsed);
    }

    /// Run a reorganization cycle if pressure or the periodic interval says so.
    pub fn maybe_reorganize(&mut self) -> CortexResult<Option<ReorganizationSummary>> {
        if self.scheduler.should_run(
            self.turn,
            self.params.pressure_threshold,
            self.params.periodic_interval_turns,
        ) {
            Ok(Some(self.reorganize()?))
        } else {
            Ok(None)
        }
    }

    /// Run a full reorganization cycle now.
    ///
    /// Stage order: decay → recompute frequencies → adjust territories →
    /// merges → disuse shrink → splits → normalize. Partial failure restores
    /// the pre-cycle snapshot.
    pub fn reorganize(&mut self) -> CortexResult<ReorganizationSummary> {
        let snapshot = (
            self.territories.clone(),
            self.merges.clone(),
            self.source_index.clone(),
            self.usage.clone(),
        );
        let pressure_before = self.scheduler.pressure();

        match self.run_cycle() {
            Ok(mut summary) => {
                summary.turn = self.turn;
                summary.pressure_before = pressure_before;
                summary.allocated_after = self.allocated();
                self.scheduler.mark_ran(self.turn);
                self.last_cycle_turn = self.turn;
                tracing::debug!(
                    turn = self.turn,
                    pressure = pressure_before,
                    entities = self.territories.len(),
                    merged = summary.merged.len(),
                    split = summary.split.len(),
                    "reorganization cycle complete"
                );
                Ok(summary)
            }
            Err(stage) => {
                (self.territories, self.merges, self.source_index, self.usage) = snapshot;
                Err(MapError::CycleFailed { stage }.into())
            }
        }
    }

    fn run_cycle(&mut self) -> Result<ReorganizationSummary, &'static str> {
        let mut summary = ReorganizationSummary::default();

        // Decay usage counts, co-occurrence edges, and territory Betas.
        let cycle_turns = self.turn.saturating_sub(self.last_cycle_turn).max(1) as f64;
        let edge_factor = 0.5_f64.powf(cycle_turns / self.params.edge_halflife_turns);
        self.usage.decay(self.params.decay_factor, edge_factor);
        for alloc in self.territories.values_mut() {
            alloc.alpha = 1.0 + (alloc.alpha - 1.0) * self.params.decay_factor;
            alloc.beta = 1.0 + (alloc.beta - 1.0) * self.params.decay_factor;
        }

        // Recompute usage frequencies.
        let total = self.usage.total();
        for (handle, alloc) in &mut self.territories {
            alloc.usage_count = self.usage.count(*handle);
            alloc.usage_freq = if total > 0.0 {
                alloc.usage_count / total
            } else {
                0.0
            };
        }

        // Adjust territories: redistribute the allocated mass by raw scores.
        // The reserve is untouched; cycles conserve allocated mass.
        if total > 0.0 {
            let allocated = self.allocated();
            let disuse = self.params.disuse_threshold_turns as f64;
            let turn = self.turn;
            let raw_scores: HashMap<EntityHandle, f64> = self
                .territories
                .iter()
                .map(|(handle, alloc)| {
                    let idle = turn.saturating_sub(alloc.last_used_turn) as f64;
                    let recency = (1.0 - idle / disuse).max(0.0);
                    let raw =
                        0.40 * alloc.usage_freq + 0.35 * alloc.quality() + 0.25 * recency;
                    (*handle, raw)
                })
                .collect();
            let raw_total: f64 = raw_scores.values().sum();
            if raw_total > 0.0 {
                for (handle, alloc) in &mut self.territories {
                    alloc.size = raw_scores[handle] / raw_total * allocated;
                }
            }
        }

        // Merges.
        for (a, b) in self.merge_candidates() {
            if let Ok(id) = self.merge_handles(a, b) {
                summary.merged.push(id.as_str().to_string());
            }
        }

        // Disuse shrink: idle territories bleed into the reserve.
        for alloc in self.territories.values_mut() {
            let last_touch = alloc.last_used_turn.max(alloc.created_at_turn);
            if self.turn.saturating_sub(last_touch) > self.params.disuse_threshold_turns as u64 {
                alloc.size *= DISUSE_RETAIN;
            }
        }

        // Splits.
        let to_split: Vec<EntityHandle> = self
            .merges
            .values()
            .filter(|m| {
                self.territories.contains_key(&m.handle)
                    && m.cohesion() < self.params.split_threshold
            })
            .map(|m| m.handle)
            .collect();
        for handle in to_split {
            let id = self.interner.resolve(handle).clone();
            if self.split_handle(handle).is_ok() {
                summary.split.push(id.as_str().to_string());
            }
        }

        // Normalize: allocated mass must never exceed the unit budget.
        self.rescale_overflow();
        Ok(summary)
    }

    /// Candidate pairs for fusion, in deterministic handle order.
    fn merge_candidates(&self) -> Vec<(EntityHandle, EntityHandle)> {
        let mut handles: Vec<EntityHandle> = self.territories.keys().copied().collect();
        handles.sort();
        let min_obs = self.params.merge_min_observations as f64;

        let mut consumed: Vec<EntityHandle> = Vec::new();
        let mut pairs = Vec::new();
        for (i, &a) in handles.iter().enumerate() {
            for &b in &handles[i + 1..] {
                if consumed.contains(&a) || consumed.contains(&b) {
                    continue;
                }
                if self.usage.count(a) >= min_obs
                    && self.usage.count(b) >= min_obs
                    && self.usage.co_occurrence(a, b) >= self.params.merge_threshold
                {
                    pairs.push((a, b));
                    consumed.push(a);
                    consumed.push(b);
                }
            }
        }
        pairs
    }

    /// Fuse two registered entities into a merged territory.
    pub fn merge_pair(&mut self, a: &EntityId, b: &EntityId) -> CortexResult<EntityId> {
        let ha = self.live_handle(a)?;
        let hb = self.live_handle(b)?;
        Ok(self.merge_handles(ha, hb)?)
    }

    fn live_handle(&self, id: &EntityId) -> Result<EntityHandle, MapError> {
        let handle = self.interner.get(id).ok_or_else(|| MapError::UnknownEntity {
            id: id.as_str().to_string(),
        })?;
        if let Some(&merged) = self.source_index.get(&handle) {
            return Err(MapError::AlreadyMerged {
                id: id.as_str().to_string(),
                merged: self.interner.resolve(merged).as_str().to_string(),
            });
        }
        if !self.territories.contains_key(&handle) {
            return Err(MapError::UnknownEntity {
                id: id.as_str().to_string(),
            });
        }
        Ok(handle)
    }

    fn merge_handles(
        &mut self,
        a: EntityHandle,
        b: EntityHandle,
    ) -> Result<EntityId, MapError> {
        if a == b {
            return Err(MapError::UnknownEntity {
                id: self.interner.resolve(a).as_str().to_string(),
            });
        }
        let alloc_a = self.territories.remove(&a).ok_or_else(|| MapError::UnknownEntity {
            id: self.interner.resolve(a).as_str().to_string(),
        })?;
        let alloc_b = match self.territories.remove(&b) {
            Some(alloc) => alloc,
            None => {
                self.territories.insert(a, alloc_a);
                return Err(MapError::UnknownEntity {
                    id: self.interner.resolve(b).as_str().to_string(),
                });
            }
        };

        let merged_id = EntityId::merged_from(&alloc_a.entity, &alloc_b.entity);
        let handle = self.interner.intern(&merged_id);

        let mut merged_alloc = TerritoryAllocation::new(
            merged_id.clone(),
            EntityKind::Merged,
            alloc_a.size + alloc_b.size,
            self.turn,
        );
        merged_alloc.alpha = alloc_a.alpha + alloc_b.alpha;
        merged_alloc.beta = alloc_b.beta + alloc_a.beta;
        merged_alloc.last_used_turn = alloc_a.last_used_turn.max(alloc_b.last_used_turn);
        merged_alloc
            .metadata
            .insert("sources".into(), format!("{},{}", alloc_a.entity, alloc_b.entity));

        let record = MergeRecord {
            first: alloc_a,
            second: alloc_b,
            merged_at_turn: self.turn,
            size_at_merge: merged_alloc.size,
        };
        let window_cap = (self.params.merge_min_observations as usize * 2).max(4);
        let merged = MergedEntity::new(merged_id.clone(), handle, (a, b), record, window_cap);

        self.usage.transfer(a, handle);
        self.usage.transfer(b, handle);
        merged_alloc.usage_count = self.usage.count(handle);

        self.territories.insert(handle, merged_alloc);
        self.source_index.insert(a, handle);
        self.source_index.insert(b, handle);
        self.merges.insert(handle, merged);
        Ok(merged_id)
    }

    /// Split a merged entity back into its sources.
    pub fn split(&mut self, id: &EntityId) -> CortexResult<()> {
        let handle = self.interner.get(id).ok_or_else(|| MapError::UnknownEntity {
            id: id.as_str().to_string(),
        })?;
        if !self.merges.contains_key(&handle) || !self.territories.contains_key(&handle) {
            return Err(MapError::NotMerged {
                id: id.as_str().to_string(),
            }
            .into());
        }
        Ok(self.split_handle(handle)?)
    }

    fn split_handle(&mut self, handle: EntityHandle) -> Result<(), MapError> {
        let merged = self.merges.remove(&handle).ok_or_else(|| MapError::NotMerged {
            id: self.interner.resolve(handle).as_str().to_string(),
        })?;
        let current = self.territories.remove(&handle).ok_or_else(|| MapError::NotMerged {
            id: merged.id.as_str().to_string(),
        })?;

        let (first, second) = merged.split_allocations(current.size, self.turn);
        let (ha, hb) = merged.sources;
        self.source_index.remove(&ha);
        self.source_index.remove(&hb);

        // Usage mass flows back in pre-merge proportion; co-occurrence
        // between the restored pair starts over.
        let pre_total = merged.record.first.size + merged.record.second.size;
        let first_share = if pre_total > 0.0 {
            merged.record.first.size / pre_total
        } else {
            0.5
        };
        let mass = self.usage.count(handle);
        self.usage.forget(handle);
        self.usage.seed_count(ha, mass * first_share);
        self.usage.seed_count(hb, mass * (1.0 - first_share));

        self.territories.insert(ha, first);
        self.territories.insert(hb, second);
        Ok(())
    }

    /// Rescale when float drift pushes the allocated mass past the budget.
    fn rescale_overflow(&mut self) {
        let allocated = self.allocated();
        if allocated > 1.0 + TERRITORY_EPSILON {
            for alloc in self.territories.values_mut() {
                alloc.size /= allocated;
            }
        }
    }

    /// Total territory mass currently granted to entities.
    pub fn allocated(&self) -> f64 {
        self.territories.values().map(|a| a.size).sum()
    }

    /// Free territory mass not granted to any entity.
    pub fn reserve(&self) -> f64 {
        (1.0 - self.allocated()).max(0.0)
    }

    /// Direct territory lookup (does not route through merges).
    pub fn territory(&self, id: &EntityId) -> Option<&TerritoryAllocation> {
        let handle = self.interner.get(id)?;
        self.territories.get(&handle)
    }

    /// Territory lookup routing merged sources to their merged entity.
    pub fn effective_territory(&self, id: &EntityId) -> Option<&TerritoryAllocation> {
        let handle = self.interner.get(id)?;
        let target = self.source_index.get(&handle).copied().unwrap_or(handle);
        self.territories.get(&target)
    }

    /// Token-budget ratio for an entity: uniform territory ⇒ 1.0, capped ×2.
    pub fn resource_ratio(&self, id: &EntityId) -> f64 {
        let live = self.territories.len();
        if live == 0 {
            return 1.0;
        }
        match self.effective_territory(id) {
            Some(alloc) => (alloc.size * live as f64).clamp(0.0, 2.0),
            None => 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.territories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.territories.is_empty()
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn pressure(&self) -> f64 {
        self.scheduler.pressure()
    }

    /// Whether the map's structural invariants hold: unit budget and no
    /// merged entity co-present with its sources.
    pub fn invariants_hold(&self) -> bool {
        let budget_ok = self.allocated() <= 1.0 + TERRITORY_EPSILON;
        let sources_absent = self.merges.values().all(|m| {
            let merged_live = self.territories.contains_key(&m.handle);
            let source_live = self.territories.contains_key(&m.sources.0)
                || self.territories.contains_key(&m.sources.1);
            !(merged_live && source_live)
        });
        budget_ok && sources_absent
    }

    /// Export the full map for persistence.
    pub fn export_map(&self) -> TerritoryMap {
        let territories = self
            .territories
            .values()
            .map(|alloc| (alloc.entity.as_str().to_string(), alloc.clone()))
            .collect();
        let merges = self
            .merges
            .values()
            .filter(|m| self.territories.contains_key(&m.handle))
            .map(|m| {
                (
                    m.id.as_str().to_string(),
                    MergeExport {
                        sources: (
                            self.interner.resolve(m.sources.0).as_str().to_string(),
                            self.interner.resolve(m.sources.1).as_str().to_string(),
                        ),
                        merged_at_turn: m.record.merged_at_turn,
                        size_at_merge: m.record.size_at_merge,
                        cohesion: m.cohesion(),
                    },
                )
            })
            .collect();
        TerritoryMap {
            turn: self.turn,
            reserve: self.reserve(),
            territories,
            merges,
        }
    }
}
