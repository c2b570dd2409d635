//! Tenant key derivation from a process-wide master key.
//!
//! The master key is the one mutable process-wide datum, set exactly once at
//! startup and read-only afterwards. Per-tenant keys come from HKDF-SHA256
//! with a fixed salt and the tenant id as info, and are cached. Collaborators
//! use tenant keys to protect exports and key-scoped storage; the core never
//! touches key material on the turn path.

use std::sync::OnceLock;

use dashmap::DashMap;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::entity::TenantId;
use crate::error::{CortexResult, KeyError};

const HKDF_SALT: &[u8] = b"cortex-core/tenant-key/v1";

/// A keyring deriving per-tenant keys from one master secret.
#[derive(Debug)]
pub struct Keyring {
    master: [u8; 32],
    cache: DashMap<String, [u8; 32]>,
}

impl Keyring {
    pub fn new(master: [u8; 32]) -> Self {
        Self {
            master,
            cache: DashMap::new(),
        }
    }

    /// Derive (or fetch) the key for a tenant.
    pub fn tenant_key(&self, tenant: &TenantId) -> [u8; 32] {
        if let Some(key) = self.cache.get(tenant.as_str()) {
            return *key;
        }
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.master);
        let mut okm = [0u8; 32];
        hkdf.expand(tenant.as_str().as_bytes(), &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        self.cache.insert(tenant.as_str().to_string(), okm);
        okm
    }

    /// Hex form of a tenant key, for keyed file naming by collaborators.
    pub fn tenant_key_hex(&self, tenant: &TenantId) -> String {
        hex::encode(self.tenant_key(tenant))
    }
}

static GLOBAL: OnceLock<Keyring> = OnceLock::new();

/// Install the process-wide master key. Fails on a second call.
pub fn init_master_key(master: [u8; 32]) -> CortexResult<()> {
    GLOBAL
        .set(Keyring::new(master))
        .map_err(|_| KeyError::AlreadyInitialized)?;
    Ok(())
}

/// Derive a tenant key from the process-wide keyring.
pub fn tenant_key(tenant: &TenantId) -> CortexResult<[u8; 32]> {
    let keyring = GLOBAL.get().ok_or(KeyError::NotInitialized)?;
    Ok(keyring.tenant_key(tenant))
}
