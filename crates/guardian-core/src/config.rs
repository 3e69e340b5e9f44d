//! Static, human-authored configuration shape.
//!
//! `config.yaml` (global) and `projects/<name>/config.yaml` (per-project)
//! share this shape. The Guardian never writes to these files — only to
//! the decisions files under the approvals directory
//! ([`crate::decisions::DecisionsFile`]).

use serde::{Deserialize, Serialize};

use crate::decisions::ProxySection;
use crate::error::GuardianResult;

/// Glob-style command patterns, layered the same way as the domain
/// policy: global auto/manual/deny plus project auto/manual/deny.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSection {
    /// Commands matching any of these patterns execute without a prompt.
    #[serde(default)]
    pub auto_approve: Vec<String>,
    /// Commands matching any of these patterns are queued for approval.
    #[serde(default)]
    pub manual_approve: Vec<String>,
    /// Commands matching any of these patterns are rejected outright.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// One static `config.yaml` (global or per-project).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Static proxy allow/deny entries.
    #[serde(default)]
    pub proxy: ProxySection,
    /// Static host-command pattern sets.
    #[serde(default)]
    pub commands: CommandSection,
}

impl StaticConfig {
    /// Read a static config file, tolerating a missing file as empty
    /// defaults (per spec: reads tolerate missing files).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GuardianError::FatalConfig`] if the file
    /// exists but is not valid YAML.
    pub fn read_tolerant(path: &std::path::Path) -> GuardianResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
