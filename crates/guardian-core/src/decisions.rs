//! The decisions file format and its atomic, tolerant-of-absence I/O.
//!
//! Decisions files live under the approvals directory, never under the
//! static config directory — see [`crate::paths::GuardianPaths`]. Writes
//! are append-only from the caller's perspective (the whole resolved set
//! is re-serialized and atomically swapped in), deduplicated by
//! `(kind, value)` equality.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::AllowEntry;
use crate::error::GuardianResult;

/// `proxy.allow` / `proxy.deny` sections of one decisions YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySection {
    /// Approved domains/patterns.
    #[serde(default)]
    pub allow: Vec<AllowEntry>,
    /// Denied domains/patterns.
    #[serde(default)]
    pub deny: Vec<AllowEntry>,
}

/// Top-level shape of `approvals/global.yaml` and
/// `approvals/projects/<name>.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionsFile {
    /// Proxy domain decisions.
    #[serde(default)]
    pub proxy: ProxySection,
}

impl DecisionsFile {
    /// Read a decisions file, tolerating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GuardianError::FatalConfig`] if the file
    /// exists but cannot be parsed as YAML.
    pub fn read_tolerant(path: &Path) -> GuardianResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one entry under `allow` or `deny`, deduplicating by
    /// `(kind, value)` where kind distinguishes domain vs. pattern and
    /// value is the already-lowercased entry content.
    pub fn append(&mut self, entry: AllowEntry, allow: bool) {
        let bucket = if allow {
            &mut self.proxy.allow
        } else {
            &mut self.proxy.deny
        };
        if !bucket.contains(&entry) {
            bucket.push(entry);
        }
    }

    /// Atomically persist this file: write to a temp file in the same
    /// directory, then rename over the destination. Creates the parent
    /// directory (mode 0700) if missing and sets file mode 0600 on Unix.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GuardianError::TransientIo`] on any
    /// filesystem failure.
    pub fn write_atomic(&self, path: &Path) -> GuardianResult<()> {
        let parent = path.parent().ok_or_else(|| {
            crate::error::GuardianError::FatalConfig("decisions path has no parent".into())
        })?;
        crate::fsutil::ensure_private_dir(parent)?;
        let yaml = serde_yaml::to_string(self)?;
        crate::fsutil::write_atomic(path, yaml.as_bytes())
    }
}
