//! Session issuance and the live-session registry.
//!
//! Tokens are 32 bytes from the OS random source, URL-safe base64 encoded.
//! The registry is keyed by the SHA-256 of the token so raw tokens are never
//! used as map keys, and is split into shards so concurrent issuance for
//! different principals rarely contends on the same lock.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::credentials::Role;
use super::error::AuthError;

pub const TOKEN_BYTES: usize = 32;
const SHARDS: usize = 16;

/// Proof of a completed authentication, bound to one principal and role.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    principal_id: String,
    role: Role,
    issued_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"***")
            .field("principal_id", &self.principal_id)
            .field("role", &self.role)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Create a new session token.
///
/// # Errors
/// Returns `AuthError::Internal` if the OS random source fails.
pub fn generate_session_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("failed to generate session token: {e}")))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session token for registry lookups.
#[must_use]
pub fn hash_session_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

type Shard = Mutex<HashMap<[u8; 32], Session>>;

pub struct SessionIssuer {
    shards: Vec<Shard>,
}

impl SessionIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Mint and register a session. A token already live is never reissued.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if no secure token can be generated.
    pub fn issue(&self, principal_id: &str, role: Role) -> Result<Session, AuthError> {
        loop {
            let session = self.mint(principal_id, role)?;
            if self.register(&session) {
                return Ok(session);
            }
        }
    }

    /// Mint a session without making it live. The token does not collide
    /// with any session live at the time of the call.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if no secure token can be generated.
    pub fn mint(&self, principal_id: &str, role: Role) -> Result<Session, AuthError> {
        loop {
            let token = generate_session_token()?;
            let key = hash_session_token(&token);
            if lock(self.shard(&key)).contains_key(&key) {
                warn!("session token collision, regenerating");
                continue;
            }
            return Ok(Session {
                token,
                principal_id: principal_id.to_string(),
                role,
                issued_at: Utc::now(),
            });
        }
    }

    /// Make a minted session live. Returns `false` if its token is taken.
    pub fn register(&self, session: &Session) -> bool {
        let key = hash_session_token(session.token());
        let mut shard = lock(self.shard(&key));
        if shard.contains_key(&key) {
            return false;
        }
        shard.insert(key, session.clone());
        info!(principal = session.principal_id(), role = %session.role(), "session issued");
        true
    }

    /// Resolve a live session by token.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<Session> {
        let key = hash_session_token(token);
        lock(self.shard(&key)).get(&key).cloned()
    }

    /// Logout: drop a live session. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        let key = hash_session_token(token);
        let removed = lock(self.shard(&key)).remove(&key);
        if let Some(session) = &removed {
            info!(principal = session.principal_id(), "session revoked");
        }
        removed.is_some()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }

    fn shard(&self, key: &[u8; 32]) -> &Shard {
        &self.shards[usize::from(key[0]) % self.shards.len()]
    }
}

impl Default for SessionIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("active", &self.active_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
