//! Opaque identity types and entity classification.
//!
//! Tenant, session, user, and entity ids are opaque non-empty strings,
//! validated once at the API boundary. Inside the cortical map, entity ids
//! are interned to dense [`EntityHandle`]s so co-occurrence can be kept as a
//! sparse map over small integers instead of string pairs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident, $what:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw id. Empty strings are rejected.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
                let raw = raw.into();
                if raw.is_empty() {
                    return Err(IdentityError::Empty { what: $what });
                }
                Ok(Self(raw))
            }

            /// The raw string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Identifies a tenant. All persisted state is namespaced by tenant.
    TenantId,
    "tenant"
);
opaque_id!(
    /// Identifies one conversation session within a tenant.
    SessionId,
    "session"
);
opaque_id!(
    /// Identifies the end user a session acts for.
    UserId,
    "user"
);
opaque_id!(
    /// Identifies a tool, model, or behavior tracked by the core.
    EntityId,
    "entity"
);

impl EntityId {
    /// Synthesize the id of a merged entity from its two sources.
    pub(crate) fn merged_from(a: &EntityId, b: &EntityId) -> EntityId {
        // Source order is normalized so merge(a, b) == merge(b, a).
        let (lo, hi) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
        EntityId(format!("merged:{lo}+{hi}"))
    }
}

/// What kind of thing an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tool,
    Model,
    Behavior,
    /// Produced by territory fusion; carries a MergeRecord for reversibility.
    Merged,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Model => "model",
            Self::Behavior => "behavior",
            Self::Merged => "merged",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Dense handle for an interned entity id.
///
/// Handles are stable for the lifetime of the interner; removing an entity
/// retires its handle without renumbering the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub(crate) u32);

impl EntityHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bidirectional entity id ↔ handle interner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityInterner {
    ids: Vec<EntityId>,
    #[serde(skip)]
    index: HashMap<EntityId, EntityHandle>,
}

impl EntityInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an id, returning its existing handle if already present.
    pub fn intern(&mut self, id: &EntityId) -> EntityHandle {
        if let Some(h) = self.index.get(id) {
            return *h;
        }
        let handle = EntityHandle(self.ids.len() as u32);
        self.ids.push(id.clone());
        self.index.insert(id.clone(), handle);
        handle
    }

    /// Look up the handle for an id without interning.
    pub fn get(&self, id: &EntityId) -> Option<EntityHandle> {
        self.index.get(id).copied()
    }

    /// Resolve a handle back to its id.
    pub fn resolve(&self, handle: EntityHandle) -> &EntityId {
        &self.ids[handle.index()]
    }

    /// Number of interned ids (retired handles included).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rebuild the reverse index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), EntityHandle(i as u32)))
            .collect();
    }
}
