//! Collaborator-side state persistence.
//!
//! Two documents per the persisted layout:
//!
//! - `weights/<tenant>/<user>.json` — the weight engine's export
//! - `territories/<tenant>/<session>.json` — the cortical map export
//!
//! Writes go through a temp file and an atomic rename, so readers never see a
//! torn document. Loading something never saved is a `NotFound` the caller is
//! expected to treat as "start from defaults".

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cortical::TerritoryMap;
use crate::entity::{SessionId, TenantId, UserId};
use crate::error::{CortexResult, StoreError};
use crate::weights::WeightDocument;

/// Root-anchored state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `weights/<tenant>/<user>.json`
    pub fn weights_path(&self, tenant: &TenantId, user: &UserId) -> PathBuf {
        self.root
            .join("weights")
            .join(tenant.as_str())
            .join(format!("{user}.json"))
    }

    /// `territories/<tenant>/<session>.json`
    pub fn territories_path(&self, tenant: &TenantId, session: &SessionId) -> PathBuf {
        self.root
            .join("territories")
            .join(tenant.as_str())
            .join(format!("{session}.json"))
    }

    pub fn save_weights(
        &self,
        tenant: &TenantId,
        user: &UserId,
        doc: &WeightDocument,
    ) -> CortexResult<()> {
        write_atomic(&self.weights_path(tenant, user), doc)
    }

    pub fn load_weights(&self, tenant: &TenantId, user: &UserId) -> CortexResult<WeightDocument> {
        read_json(&self.weights_path(tenant, user))
    }

    pub fn save_territories(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        map: &TerritoryMap,
    ) -> CortexResult<()> {
        write_atomic(&self.territories_path(tenant, session), map)
    }

    pub fn load_territories(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> CortexResult<TerritoryMap> {
        read_json(&self.territories_path(tenant, session))
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> CortexResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        path: path.display().to_string(),
        source: std::io::Error::other("path has no parent directory"),
    })?;
    fs::create_dir_all(parent).map_err(io_err)?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serde {
        message: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CortexResult<T> {
    if !path.exists() {
        return Err(StoreError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| {
            StoreError::Serde {
                message: e.to_string(),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CortexConfig;
    use crate::cortical::{CorticalMap, MapParams};
    use crate::entity::{EntityId, EntityKind};
    use crate::weights::{FeedbackTier, PreferenceKind, WeightEngine};

    fn ids() -> (TenantId, SessionId, UserId) {
        (
            TenantId::new("acme").unwrap(),
            SessionId::new("s-1").unwrap(),
            UserId::new("u-1").unwrap(),
        )
    }

    #[test]
    fn weights_roundtrip_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let (tenant, _, user) = ids();

        let mut engine = WeightEngine::new();
        engine.apply_preference_feedback(
            PreferenceKind::Tool,
            &EntityId::new("tool.search").unwrap(),
            true,
            FeedbackTier::Direct,
            1.0,
            5.0,
        );
        let doc = engine.to_document();

        store.save_weights(&tenant, &user, &doc).unwrap();
        let loaded = store.load_weights(&tenant, &user).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn territories_roundtrip_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let (tenant, session, _) = ids();

        let mut map = CorticalMap::new(MapParams::from(&CortexConfig::default()));
        map.register(&EntityId::new("tool.x").unwrap(), EntityKind::Tool, Some(0.4))
            .unwrap();
        let export = map.export_map();

        store.save_territories(&tenant, &session, &export).unwrap();
        let loaded = store.load_territories(&tenant, &session).unwrap();
        assert_eq!(loaded, export);
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let (tenant, _, user) = ids();
        let err = store.load_weights(&tenant, &user).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn layout_matches_the_documented_paths() {
        let store = StateStore::new("/data");
        let (tenant, session, user) = ids();
        assert_eq!(
            store.weights_path(&tenant, &user),
            PathBuf::from("/data/weights/acme/u-1.json")
        );
        assert_eq!(
            store.territories_path(&tenant, &session),
            PathBuf::from("/data/territories/acme/s-1.json")
        );
    }
}
