//! Approval scope — persistence class of a human decision.
//!
//! Represented as a tagged sum so the persister dispatches on the
//! variant rather than treating scope as a raw string after parsing.

use serde::{Deserialize, Serialize};

/// How long an approval decision should be remembered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Decide this one request only; never touches disk or session state.
    #[default]
    Once,
    /// Remember for the lifetime of the token's session (in-memory only).
    Session,
    /// Persist to `approvals/projects/<name>.yaml`, then reload that
    /// project's cached policy.
    Project,
    /// Persist to `approvals/global.yaml`, then reload the whole cache.
    Global,
}

impl ApprovalScope {
    /// Whether this scope writes to disk.
    #[must_use]
    pub fn persists(self) -> bool {
        matches!(self, Self::Project | Self::Global)
    }
}
