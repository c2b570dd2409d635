//! Tamper-evident audit log: a SHA-256 hash chain over canonical entries.
//!
//! Every core state-changing call appends exactly one entry. Each entry's
//! `chain_hash` is `SHA256(prev_hash ‖ ":" ‖ canonical(entry))`, with a
//! genesis of 64 zeros, so editing any field of any entry breaks verification
//! from that index on. The in-memory chain lives with the session; the
//! [`file`] sink persists committed entries per tenant.

pub mod file;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entity::{SessionId, TenantId, UserId};
use crate::error::{AuditError, CortexResult};

/// The chain's genesis hash: 64 zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What kind of state change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TurnOpened,
    ParameterResolution,
    WeightChange,
    ModulationAdded,
    ModulationRemoved,
    Reorganization,
    PolicyDecision,
    OutcomeCommitted,
    /// Forwarded from the external DSAR manager.
    DsarEvent,
    QuotaRefusal,
}

impl AuditEventType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TurnOpened => "turn_opened",
            Self::ParameterResolution => "parameter_resolution",
            Self::WeightChange => "weight_change",
            Self::ModulationAdded => "modulation_added",
            Self::ModulationRemoved => "modulation_removed",
            Self::Reorganization => "reorganization",
            Self::PolicyDecision => "policy_decision",
            Self::OutcomeCommitted => "outcome_committed",
            Self::DsarEvent => "dsar_event",
            Self::QuotaRefusal => "quota_refusal",
        }
    }
}

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// One immutable, chain-hashed audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub user_id: String,
    /// Logical seconds.
    pub ts: f64,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub action: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub outcome: String,
    pub sequence_num: u64,
    pub chain_hash: String,
}

impl AuditEntry {
    /// Canonical pipe-delimited form covered by the chain hash.
    pub fn canonical(&self) -> String {
        let details =
            serde_json::to_string(&self.details).expect("details serialization is infallible");
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.entry_id,
            self.tenant_id,
            self.session_id,
            self.user_id,
            self.ts,
            self.event_type.label(),
            self.severity.label(),
            self.action,
            details,
            self.outcome,
            self.sequence_num,
        )
    }
}

/// Chain-hash step: `SHA256(prev ‖ ":" ‖ canonical)`, hex-encoded.
pub fn chain_hash(prev: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of a detailed integrity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    /// Index of the first broken entry, when invalid.
    pub break_index: Option<usize>,
    pub entries_checked: usize,
}

/// Append-only, hash-chained audit log for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    enabled: bool,
    entries: Vec<AuditEntry>,
    head: String,
    next_seq: u64,
}

impl AuditLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
            head: GENESIS_HASH.to_string(),
            next_seq: 0,
        }
    }

    /// Append one entry. Disabled logs keep sequence numbers monotonic but
    /// record nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        tenant: &TenantId,
        session: &SessionId,
        user: &UserId,
        ts: f64,
        event_type: AuditEventType,
        severity: AuditSeverity,
        action: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
        outcome: impl Into<String>,
    ) -> Option<&AuditEntry> {
        let sequence_num = self.next_seq;
        self.next_seq += 1;
        if !self.enabled {
            return None;
        }

        let mut entry = AuditEntry {
            entry_id: format!("{session}#{sequence_num:06}"),
            tenant_id: tenant.as_str().to_string(),
            session_id: session.as_str().to_string(),
            user_id: user.as_str().to_string(),
            ts,
            event_type,
            severity,
            action: action.into(),
            details,
            outcome: outcome.into(),
            sequence_num,
            chain_hash: String::new(),
        };
        entry.chain_hash = chain_hash(&self.head, &entry.canonical());
        self.head = entry.chain_hash.clone();
        self.entries.push(entry);
        self.entries.last()
    }

    /// Recompute the whole chain.
    pub fn verify_integrity(&self) -> bool {
        self.verify_integrity_detailed().valid
    }

    /// Recompute the whole chain and report the first break.
    pub fn verify_integrity_detailed(&self) -> IntegrityReport {
        verify_chain(&self.entries, GENESIS_HASH)
    }

    /// Error out when the chain is broken; fatal for the tenant.
    pub fn ensure_integrity(&self) -> CortexResult<()> {
        let report = self.verify_integrity_detailed();
        match report.break_index {
            None => Ok(()),
            Some(index) => {
                tracing::error!(index, "audit chain broken");
                Err(AuditError::ChainBroken { index }.into())
            }
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> &[AuditEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries appended after `seq`, for incremental sink flushing.
    pub fn entries_after(&self, seq: Option<u64>) -> &[AuditEntry] {
        match seq {
            None => &self.entries,
            Some(seq) => {
                let start = self
                    .entries
                    .iter()
                    .position(|e| e.sequence_num > seq)
                    .unwrap_or(self.entries.len());
                &self.entries[start..]
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<AuditEntry> {
        &mut self.entries
    }
}

/// Verify any entry slice against a starting hash.
pub fn verify_chain(entries: &[AuditEntry], genesis: &str) -> IntegrityReport {
    let mut prev = genesis.to_string();
    for (index, entry) in entries.iter().enumerate() {
        let expected = chain_hash(&prev, &entry.canonical());
        if expected != entry.chain_hash {
            return IntegrityReport {
                valid: false,
                break_index: Some(index),
                entries_checked: index + 1,
            };
        }
        prev = entry.chain_hash.clone();
    }
    IntegrityReport {
        valid: true,
        break_index: None,
        entries_checked: entries.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (TenantId, SessionId, UserId) {
        (
            TenantId::new("acme").unwrap(),
            SessionId::new("s-1").unwrap(),
            UserId::new("u-1").unwrap(),
        )
    }

    fn log_with(n: usize) -> AuditLog {
        let (tenant, session, user) = ids();
        let mut log = AuditLog::new(true);
        for i in 0..n {
            log.append(
                &tenant,
                &session,
                &user,
                i as f64,
                AuditEventType::WeightChange,
                AuditSeverity::Info,
                format!("update-{i}"),
                BTreeMap::new(),
                "success",
            );
        }
        log
    }

    #[test]
    fn chain_starts_at_genesis_and_verifies() {
        let log = log_with(10);
        assert_eq!(log.len(), 10);
        assert!(log.verify_integrity());
        let report = log.verify_integrity_detailed();
        assert_eq!(report.break_index, None);
        assert_eq!(report.entries_checked, 10);
    }

    #[test]
    fn sequence_numbers_are_strictly_monotonic() {
        let log = log_with(5);
        for (i, entry) in log.entries().iter().enumerate() {
            assert_eq!(entry.sequence_num, i as u64);
        }
    }

    #[test]
    fn tampered_outcome_breaks_at_that_index() {
        let mut log = log_with(10);
        // Edit entry 5's outcome but keep its recorded chain_hash.
        log.entries_mut()[5].outcome = "failure".into();

        assert!(!log.verify_integrity());
        let report = log.verify_integrity_detailed();
        assert_eq!(report.break_index, Some(5));
        assert!(log.ensure_integrity().is_err());
    }

    #[test]
    fn tampered_hash_breaks_at_next_entry_too() {
        let mut log = log_with(10);
        // Re-hash entry 5 consistently with its edited payload; the break
        // then surfaces at entry 6, whose recorded prev no longer matches.
        log.entries_mut()[5].outcome = "failure".into();
        let prev = log.entries()[4].chain_hash.clone();
        let canonical = log.entries()[5].canonical();
        log.entries_mut()[5].chain_hash = chain_hash(&prev, &canonical);

        let report = log.verify_integrity_detailed();
        assert_eq!(report.break_index, Some(6));
    }

    #[test]
    fn disabled_log_keeps_sequence_but_stores_nothing() {
        let (tenant, session, user) = ids();
        let mut log = AuditLog::new(false);
        assert!(log
            .append(
                &tenant,
                &session,
                &user,
                0.0,
                AuditEventType::TurnOpened,
                AuditSeverity::Info,
                "begin",
                BTreeMap::new(),
                "success",
            )
            .is_none());
        assert!(log.is_empty());
        // A re-enabled continuation would keep numbering from here.
        assert_eq!(log.next_seq, 1);
    }

    #[test]
    fn details_are_canonicalized_with_sorted_keys() {
        let (tenant, session, user) = ids();
        let mut log = AuditLog::new(true);
        let mut details = BTreeMap::new();
        details.insert("zeta".to_string(), serde_json::json!(1));
        details.insert("alpha".to_string(), serde_json::json!({"y": 2, "x": 1}));
        log.append(
            &tenant,
            &session,
            &user,
            0.0,
            AuditEventType::PolicyDecision,
            AuditSeverity::Info,
            "route",
            details,
            "success",
        );
        let canonical = log.entries()[0].canonical();
        let alpha = canonical.find("alpha").unwrap();
        let zeta = canonical.find("zeta").unwrap();
        assert!(alpha < zeta);
        assert!(canonical.contains("\"x\":1,\"y\":2"));
    }

    #[test]
    fn tail_returns_most_recent() {
        let log = log_with(10);
        let tail = log.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].sequence_num, 7);
    }

    #[test]
    fn entries_after_supports_incremental_flush() {
        let log = log_with(5);
        assert_eq!(log.entries_after(None).len(), 5);
        assert_eq!(log.entries_after(Some(2)).len(), 2);
        assert!(log.entries_after(Some(10)).is_empty());
    }
}
