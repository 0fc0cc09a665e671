//! Principal provisioning and knowledge-factor verification.
//!
//! Secrets are never kept in plaintext: each principal stores a random salt
//! and the SHA-256 digest of `salt || secret`. Candidates are digested the same
//! way and compared in constant time.

use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;

use super::error::AuthError;

pub const DIGEST_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

/// Authorization role assigned at provisioning time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Analyst,
    Guest,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Analyst => "Analyst",
            Self::Guest => "Guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned identity. Immutable once built.
#[derive(Clone)]
pub struct Principal {
    id: String,
    salt: [u8; SALT_LEN],
    credential_hash: [u8; DIGEST_LEN],
    role: Role,
}

impl Principal {
    /// Provision a principal with a fresh random salt.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the OS random source is unavailable.
    pub fn provision(
        id: impl Into<String>,
        secret: &SecretString,
        role: Role,
    ) -> Result<Self, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| AuthError::Internal(format!("failed to generate salt: {e}")))?;
        Ok(Self::from_parts(
            id,
            salt,
            digest_secret(&salt, secret.expose_secret()),
            role,
        ))
    }

    /// Rebuild a principal from stored salt and digest.
    #[must_use]
    pub fn from_parts(
        id: impl Into<String>,
        salt: [u8; SALT_LEN],
        credential_hash: [u8; DIGEST_LEN],
        role: Role,
    ) -> Self {
        Self {
            id: id.into(),
            salt,
            credential_hash,
            role,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn credential_hash(&self) -> &[u8; DIGEST_LEN] {
        &self.credential_hash
    }

    fn matches(&self, candidate: &str) -> bool {
        let digest = digest_secret(&self.salt, candidate);
        digest[..].ct_eq(&self.credential_hash[..]).into()
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("credential_hash", &"***")
            .finish_non_exhaustive()
    }
}

/// Digest a secret with its salt. Deterministic and one-way.
#[must_use]
pub fn digest_secret(salt: &[u8], secret: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Read-only access to provisioned principals.
pub trait CredentialStore: Send + Sync {
    /// Resolve a principal by id.
    ///
    /// # Errors
    /// Returns `AuthError::UnknownPrincipal` when the id is not provisioned.
    fn lookup(&self, principal_id: &str) -> Result<Principal, AuthError>;

    /// Check a candidate secret against the stored digest.
    fn verify_knowledge_factor(&self, principal_id: &str, candidate: &SecretString) -> bool {
        self.lookup(principal_id)
            .is_ok_and(|principal| principal.matches(candidate.expose_secret()))
    }
}

/// Credential store held in memory, built once at startup and injected.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCredentialStore {
    principals: HashMap<String, Principal>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principals.insert(principal.id.clone(), principal);
        self
    }

    /// The stock principals: `admin`, `analyst` and `guest`.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if salts cannot be generated.
    pub fn with_defaults() -> Result<Self, AuthError> {
        let defaults = [
            ("admin", "4269", Role::Admin),
            ("analyst", "3141", Role::Analyst),
            ("guest", "1234", Role::Guest),
        ];

        defaults
            .into_iter()
            .try_fold(Self::new(), |store, (id, pin, role)| {
                let principal = Principal::provision(id, &SecretString::from(pin), role)?;
                Ok(store.with_principal(principal))
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, principal_id: &str) -> Result<Principal, AuthError> {
        self.principals
            .get(principal_id)
            .cloned()
            .ok_or(AuthError::UnknownPrincipal)
    }
}
