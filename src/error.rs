//! Rich diagnostic error types for the cortex-core control core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. The top-level [`CortexError`] wraps them
//! transparently and exposes the coarse [`ErrorKind`] taxonomy collaborators
//! branch on: invalid argument, not found, conflicting state, integrity broken,
//! quota exceeded.

use miette::Diagnostic;
use thiserror::Error;

/// Coarse failure classification shared across all subsystems.
///
/// Collaborators are expected to branch on the kind, not the concrete variant;
/// the variants carry the human-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed id or out-of-range scalar passed at an API boundary.
    InvalidArgument,
    /// Referenced entity, session, or tenant is absent.
    NotFound,
    /// The operation contradicts current state (double merge, split of a
    /// non-merged entity, re-initialization).
    ConflictingState,
    /// Audit chain verification failed. Fatal for the affected tenant.
    IntegrityBroken,
    /// Hard-limit refusal from the external quota layer, logged by the core.
    QuotaExceeded,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InvalidArgument => "invalid-argument",
            Self::NotFound => "not-found",
            Self::ConflictingState => "conflicting-state",
            Self::IntegrityBroken => "integrity-broken",
            Self::QuotaExceeded => "quota-exceeded",
        };
        write!(f, "{label}")
    }
}

/// Top-level error type for cortex-core.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum CortexError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Weight(#[from] WeightError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Modulation(#[from] ModulationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),
}

impl CortexError {
    /// The coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::Identity(_) => ErrorKind::InvalidArgument,
            Self::Weight(e) => e.kind(),
            Self::Map(e) => e.kind(),
            Self::Modulation(e) => e.kind(),
            Self::Goal(e) => e.kind(),
            Self::Audit(e) => e.kind(),
            Self::Key(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Session(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    #[diagnostic(
        code(cortex::config::out_of_range),
        help(
            "Learning rates and decay factors must lie in (0, 1]; thresholds and \
             blend weights in [0, 1]. Adjust the named field and re-validate."
        )
    )]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be positive, got {value}")]
    #[diagnostic(
        code(cortex::config::non_positive),
        help("Window sizes, intervals, and byte limits must be greater than zero.")
    )]
    NonPositive { field: &'static str, value: i64 },

    #[error("failed to parse configuration: {message}")]
    #[diagnostic(
        code(cortex::config::parse),
        help("Check the TOML syntax and that every option matches a documented field.")
    )]
    Parse { message: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    #[error("empty {what} id")]
    #[diagnostic(
        code(cortex::identity::empty_id),
        help(
            "Tenant, session, user, and entity ids are opaque non-empty strings. \
             An empty string is rejected at the API boundary."
        )
    )]
    Empty { what: &'static str },
}

// ---------------------------------------------------------------------------
// Weight engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum WeightError {
    #[error("behavioral weight \"{name}\" value {value} outside [-1, 1]")]
    #[diagnostic(
        code(cortex::weights::out_of_range),
        help(
            "Override values must already be in the legal range; internal updates \
             clamp, but API-boundary overrides are validated."
        )
    )]
    ValueOutOfRange { name: String, value: f64 },

    #[error("unknown behavioral weight \"{name}\"")]
    #[diagnostic(
        code(cortex::weights::unknown),
        help("Register the weight first or check the name for typos.")
    )]
    UnknownBehavior { name: String },
}

impl WeightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValueOutOfRange { .. } => ErrorKind::InvalidArgument,
            Self::UnknownBehavior { .. } => ErrorKind::NotFound,
        }
    }
}

// ---------------------------------------------------------------------------
// Cortical map errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MapError {
    #[error("entity \"{id}\" is not registered in the cortical map")]
    #[diagnostic(
        code(cortex::map::unknown_entity),
        help(
            "Register the entity first, or record a usage — unknown entities \
             auto-register with the uninformative (1, 1) prior on the usage path."
        )
    )]
    UnknownEntity { id: String },

    #[error("entity \"{id}\" is already registered")]
    #[diagnostic(
        code(cortex::map::already_registered),
        help("Each entity id may hold exactly one territory. Remove it first to re-register.")
    )]
    AlreadyRegistered { id: String },

    #[error("entity \"{id}\" is already part of merged entity \"{merged}\"")]
    #[diagnostic(
        code(cortex::map::already_merged),
        help("Split the existing merged entity before merging its sources again.")
    )]
    AlreadyMerged { id: String, merged: String },

    #[error("entity \"{id}\" is not a merged entity")]
    #[diagnostic(
        code(cortex::map::not_merged),
        help("Only entities produced by a merge carry a MergeRecord and can be split.")
    )]
    NotMerged { id: String },

    #[error("reorganization cycle failed during {stage}; state rolled back")]
    #[diagnostic(
        code(cortex::map::cycle_failed),
        help(
            "The pre-cycle snapshot was restored; territories are unchanged. \
             The stage name identifies the failing step for debugging."
        )
    )]
    CycleFailed { stage: &'static str },
}

impl MapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEntity { .. } => ErrorKind::NotFound,
            Self::AlreadyRegistered { .. }
            | Self::AlreadyMerged { .. }
            | Self::NotMerged { .. }
            | Self::CycleFailed { .. } => ErrorKind::ConflictingState,
        }
    }
}

// ---------------------------------------------------------------------------
// Modulation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModulationError {
    #[error("modulation {id} not found")]
    #[diagnostic(
        code(cortex::modulation::not_found),
        help("The modulation may already have expired. List active modulations to check.")
    )]
    NotFound { id: u64 },

    #[error("modulation factor {factor} must be positive")]
    #[diagnostic(
        code(cortex::modulation::invalid_factor),
        help("AMPLIFY and DAMPEN scale a baseline; a non-positive factor is meaningless.")
    )]
    InvalidFactor { factor: f64 },
}

impl ModulationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidFactor { .. } => ErrorKind::InvalidArgument,
        }
    }
}

// ---------------------------------------------------------------------------
// Goal tracker errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GoalError {
    #[error("no goal is set for this session")]
    #[diagnostic(
        code(cortex::goal::no_goal),
        help("Call `set_goal` before verifying steps or reading goal state.")
    )]
    NoGoal,

    #[error("empty plan")]
    #[diagnostic(
        code(cortex::goal::empty_plan),
        help("A plan must contain at least one step.")
    )]
    EmptyPlan,
}

impl GoalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoGoal => ErrorKind::NotFound,
            Self::EmptyPlan => ErrorKind::InvalidArgument,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    #[error("audit chain broken at entry {index}")]
    #[diagnostic(
        code(cortex::audit::chain_broken),
        help(
            "An entry's recomputed hash does not match its recorded chain_hash. \
             The log has been tampered with or corrupted. This is fatal for the \
             affected tenant; preserve the log for forensics."
        )
    )]
    ChainBroken { index: usize },

    #[error("audit I/O error on {path}: {source}")]
    #[diagnostic(
        code(cortex::audit::io),
        help("Check that the audit directory exists, is writable, and the disk is not full.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed audit line {line}: {message}")]
    #[diagnostic(
        code(cortex::audit::malformed),
        help(
            "Audit files are newline-delimited canonical JSON with a genesis header. \
             A line that does not parse indicates external modification."
        )
    )]
    Malformed { line: usize, message: String },
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChainBroken { .. } | Self::Malformed { .. } => ErrorKind::IntegrityBroken,
            Self::Io { .. } => ErrorKind::ConflictingState,
        }
    }
}

// ---------------------------------------------------------------------------
// Key material errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KeyError {
    #[error("master key already initialized")]
    #[diagnostic(
        code(cortex::keys::already_initialized),
        help("The process-wide master key is set exactly once at startup.")
    )]
    AlreadyInitialized,

    #[error("master key not initialized")]
    #[diagnostic(
        code(cortex::keys::not_initialized),
        help("Call `keys::init_master_key` during process startup before deriving tenant keys.")
    )]
    NotInitialized,
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConflictingState
    }
}

// ---------------------------------------------------------------------------
// State store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(cortex::store::io),
        help("Check that the state directory exists and has read/write permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(cortex::store::serde),
        help(
            "The stored document does not match the current schema. \
             It may have been written by an incompatible version."
        )
    )]
    Serde { message: String },

    #[error("no persisted state at {path}")]
    #[diagnostic(
        code(cortex::store::not_found),
        help("Nothing has been saved for this tenant/user yet; start from defaults.")
    )]
    NotFound { path: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::ConflictingState,
            Self::Serde { .. } => ErrorKind::InvalidArgument,
        }
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("turn context tenant \"{got}\" does not match session tenant \"{expected}\"")]
    #[diagnostic(
        code(cortex::session::tenant_mismatch),
        help("Sessions are tenant-exclusive; open a separate session per tenant.")
    )]
    TenantMismatch { expected: String, got: String },

    #[error("no turn in flight")]
    #[diagnostic(
        code(cortex::session::no_turn),
        help("Call `begin_turn` before `resolve` or `end_turn`.")
    )]
    NoTurnInFlight,

    #[error("turn already resolved")]
    #[diagnostic(
        code(cortex::session::already_resolved),
        help("Each turn resolves parameters exactly once; open a new turn instead.")
    )]
    AlreadyResolved,

    #[error("quota refused: {detail}")]
    #[diagnostic(
        code(cortex::session::quota),
        help(
            "The external quota layer refused this turn. The refusal has been \
             logged; retry policy is the caller's concern."
        )
    )]
    QuotaRefused { detail: String },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TenantMismatch { .. } => ErrorKind::InvalidArgument,
            Self::NoTurnInFlight | Self::AlreadyResolved => ErrorKind::ConflictingState,
            Self::QuotaRefused { .. } => ErrorKind::QuotaExceeded,
        }
    }
}

/// Convenience alias for functions returning cortex-core results.
pub type CortexResult<T> = std::result::Result<T, CortexError>;
