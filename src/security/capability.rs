//! Capability credentials for the write path.
//!
//! Two ways in: a pre-shared capability key (service-to-service, compared
//! in constant time) or a configured editor bearer token plus a fresh
//! single-use nonce (anti-replay). Anonymous writes are always rejected.
//! Reads never require credentials; serving public content is not a
//! privileged operation.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a nonce stays remembered (and therefore unusable again).
const NONCE_TTL_SECS: u64 = 300;

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Short non-reversible tag for a token, safe for logs and rate-limit keys.
fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..4])
}

/// Who a write request is acting as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the pre-shared capability key.
    Capability,
    /// An editor identified by a configured bearer token.
    Editor { fingerprint: String },
}

impl Principal {
    /// Stable key for per-principal rate limiting.
    pub fn rate_key(&self) -> String {
        match self {
            Principal::Capability => "capability".to_string(),
            Principal::Editor { fingerprint } => format!("editor:{fingerprint}"),
        }
    }
}

/// Why authorization failed. Terminal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,
    #[error("invalid credentials")]
    Invalid,
    #[error("missing or already-used nonce")]
    Replayed,
}

/// Single-use nonce store with TTL expiry.
///
/// `accept` returns true exactly once per nonce inside the TTL window;
/// a replayed nonce is rejected.
#[derive(Debug)]
pub struct NonceStore {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(NONCE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record the nonce if it is new. Returns false on replay.
    pub fn accept(&self, nonce: &str) -> bool {
        if nonce.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now);
        true
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Credential checker for the batch write endpoint.
#[derive(Debug, Default)]
pub struct CapabilityGuard {
    capability_key: Option<String>,
    editor_tokens: Vec<String>,
}

impl CapabilityGuard {
    pub fn new(capability_key: Option<String>, editor_tokens: Vec<String>) -> Self {
        Self {
            capability_key,
            editor_tokens,
        }
    }

    /// Whether any credential is configured at all. A guard with nothing
    /// configured rejects every write; an unlocked write path is a
    /// misconfiguration, not a mode.
    pub fn is_configured(&self) -> bool {
        self.capability_key.is_some() || !self.editor_tokens.is_empty()
    }

    pub fn editor_token_count(&self) -> usize {
        self.editor_tokens.len()
    }

    pub fn capability_configured(&self) -> bool {
        self.capability_key.is_some()
    }

    /// Resolve a write request's credentials to a principal.
    ///
    /// Capability key takes precedence; an editor token additionally
    /// needs a fresh nonce for anti-replay.
    pub fn authorize(
        &self,
        capability: Option<&str>,
        bearer: Option<&str>,
        nonce: Option<&str>,
        nonces: &NonceStore,
    ) -> Result<Principal, AuthError> {
        if let Some(presented) = capability {
            return match &self.capability_key {
                Some(expected)
                    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) =>
                {
                    Ok(Principal::Capability)
                }
                _ => Err(AuthError::Invalid),
            };
        }

        if let Some(token) = bearer {
            let matched = self
                .editor_tokens
                .iter()
                .any(|t| constant_time_eq(token.as_bytes(), t.as_bytes()));
            if !matched {
                return Err(AuthError::Invalid);
            }
            return match nonce {
                Some(n) if nonces.accept(n) => Ok(Principal::Editor {
                    fingerprint: fingerprint(token),
                }),
                _ => Err(AuthError::Replayed),
            };
        }

        Err(AuthError::Missing)
    }
}

// ── Tests ───────────────────────────────────────────────────────
