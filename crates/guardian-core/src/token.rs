//! Token data model shared by the registry, the proxy, and the request
//! server.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// 64 hex characters (256 bits) of cryptographically random token material.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `{token, cloister, project, worktree}` — the registry's view of one
/// registered cloister container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// 64 hex char token.
    pub token: String,
    /// Cloister (container) identifier; the registry's uniqueness key.
    pub cloister: String,
    /// Logical project grouping, used to scope per-project policy.
    #[serde(default)]
    pub project: String,
    /// Worktree path, informational only at this layer.
    #[serde(default)]
    pub worktree: String,
}

impl TokenInfo {
    /// Build a fresh registration, generating a new token.
    #[must_use]
    pub fn new(cloister: impl Into<String>, project: impl Into<String>, worktree: impl Into<String>) -> Self {
        Self {
            token: generate_token(),
            cloister: cloister.into(),
            project: project.into(),
            worktree: worktree.into(),
        }
    }
}
