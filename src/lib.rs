//! # cortex-core
//!
//! Brain-inspired cognitive control core for the corteX agent runtime. Sits
//! between a conversation session and one or more LLM providers, turning
//! runtime signals — surprise, confidence, goal drift, tool reputation,
//! attention, modulations — into concrete sampling parameters and evolving
//! preference weights.
//!
//! ## Architecture
//!
//! - **Weight engine** (`weights`): behavioral EMA weights + Beta-posterior
//!   tool/model preferences with four-tier feedback
//! - **Cortical map** (`cortical`): territory allocation, co-activation
//!   fusion/splitting, similarity redistribution, pressure-driven cycles
//! - **Targeted modulator** (`modulation`): scoped ACTIVATE/SILENCE/AMPLIFY/
//!   DAMPEN/CLAMP overrides with priority resolution
//! - **Goal tracker** (`goal`): progress, drift, loop, and stall detection
//! - **Prediction** (`prediction`): surprise residuals and ECE calibration
//! - **Routing** (`routing`): System 1/2 escalation, reputation/quarantine,
//!   Shapley credit, Nash best-response, truthful scoring
//! - **Parameter resolver** (`resolver`): pure fusion of all signals into a
//!   provider-legal bundle
//! - **Audit** (`audit`): SHA-256 hash-chained entries with a file sink
//!
//! The core performs no I/O on the turn path and is deterministic given its
//! inputs; sessions are single-threaded and tenant-exclusive.
//!
//! ## Library usage
//!
//! ```
//! use cortex_core::entity::{EntityId, SessionId, TenantId, UserId};
//! use cortex_core::session::{CortexSession, Observation, TurnContext};
//!
//! let mut session = CortexSession::builder(
//!     TenantId::new("acme").unwrap(),
//!     SessionId::new("s-1").unwrap(),
//!     UserId::new("u-1").unwrap(),
//! )
//! .build()
//! .unwrap();
//!
//! let mut ctx = TurnContext::new(
//!     TenantId::new("acme").unwrap(),
//!     SessionId::new("s-1").unwrap(),
//!     UserId::new("u-1").unwrap(),
//!     "chat",
//! );
//! ctx.model_candidates = vec![EntityId::new("gpt-4o").unwrap()];
//!
//! session.begin_turn(ctx).unwrap();
//! let bundle = session.resolve().unwrap();
//! assert!(bundle.temperature.is_some());
//!
//! let mut outcome = Observation::new("utility", 0.8, 0.75, true);
//! outcome.model_used = Some(EntityId::new("gpt-4o").unwrap());
//! session.end_turn(Some(&outcome)).unwrap();
//! ```

pub mod attention;
pub mod audit;
pub mod config;
pub mod cortical;
pub mod entity;
pub mod error;
pub mod goal;
pub mod keys;
pub mod modulation;
pub mod prediction;
pub mod resolver;
pub mod routing;
pub mod session;
pub mod store;
pub mod weights;

pub use config::CortexConfig;
pub use error::{CortexError, CortexResult, ErrorKind};
pub use resolver::ParameterBundle;
pub use session::{CortexSession, CortexSessionBuilder, Observation, TurnContext, TurnSignals};
