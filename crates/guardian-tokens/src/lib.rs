//! Token Registry & Store (component A).
//!
//! In-memory `token → TokenInfo` plus a `cloister → token` uniqueness
//! index, persisted one file per cloister under the tokens directory
//! (mode 0600, directory mode 0700). [`TokenRegistry::load_all`] rebuilds
//! the in-memory state from disk on process start, tolerating individual
//! bad files without failing the whole startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use guardian_core::error::GuardianResult;
use guardian_core::fsutil;
use guardian_core::TokenInfo;
use serde::{Deserialize, Serialize};

/// On-disk JSON shape written for every token file (the only form
/// written going forward; the legacy plain-text form is still accepted
/// on read).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    token: String,
    cloister: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    worktree: String,
}

impl From<&TokenInfo> for TokenFile {
    fn from(info: &TokenInfo) -> Self {
        Self {
            token: info.token.clone(),
            cloister: info.cloister.clone(),
            project: info.project.clone(),
            worktree: info.worktree.clone(),
        }
    }
}

impl From<TokenFile> for TokenInfo {
    fn from(f: TokenFile) -> Self {
        Self {
            token: f.token,
            cloister: f.cloister,
            project: f.project,
            worktree: f.worktree,
        }
    }
}

struct Inner {
    by_token: HashMap<String, TokenInfo>,
    by_cloister: HashMap<String, String>,
}

/// The in-memory token registry, backed by one file per cloister on disk.
pub struct TokenRegistry {
    inner: RwLock<Inner>,
    tokens_dir: PathBuf,
}

impl TokenRegistry {
    /// Create a registry rooted at `tokens_dir`. Does not read the
    /// directory — call [`TokenRegistry::load_all`] to recover state
    /// from a prior run.
    #[must_use]
    pub fn new(tokens_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_token: HashMap::new(),
                by_cloister: HashMap::new(),
            }),
            tokens_dir: tokens_dir.into(),
        }
    }

    /// Register a cloister, replacing any prior token for the same
    /// cloister. The old token (if any) is revoked from memory and its
    /// file overwritten. Disk is written before the in-memory state is
    /// committed: a write failure leaves the prior registration intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the token file cannot be written. In-memory
    /// state is only updated after the disk write succeeds.
    pub fn register(
        &self,
        cloister: impl Into<String>,
        project: impl Into<String>,
        worktree: impl Into<String>,
    ) -> GuardianResult<String> {
        let cloister = cloister.into();
        let info = TokenInfo::new(cloister.clone(), project, worktree);
        self.persist(&info)?;

        let mut inner = self.inner.write().expect("token registry lock poisoned");
        if let Some(old_token) = inner.by_cloister.get(&cloister).cloned() {
            inner.by_token.remove(&old_token);
        }
        inner.by_cloister.insert(cloister, info.token.clone());
        let token = info.token.clone();
        inner.by_token.insert(info.token.clone(), info);
        Ok(token)
    }

    /// Revoke a token: remove from memory and delete its file. Returns
    /// the removed registration, if any existed, so the caller can
    /// cascade the cleanup (e.g. clearing session policy state keyed by
    /// this token).
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk file exists but cannot be removed.
    pub fn revoke(&self, token: &str) -> GuardianResult<Option<TokenInfo>> {
        let removed = {
            let mut inner = self.inner.write().expect("token registry lock poisoned");
            let Some(info) = inner.by_token.remove(token) else {
                return Ok(None);
            };
            inner.by_cloister.remove(&info.cloister);
            info
        };
        let path = self.tokens_dir.join(&removed.cloister);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Some(removed))
    }

    /// O(1) lookup by token.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<TokenInfo> {
        self.inner
            .read()
            .expect("token registry lock poisoned")
            .by_token
            .get(token)
            .cloned()
    }

    /// Snapshot copy of every registered token.
    #[must_use]
    pub fn list(&self) -> HashMap<String, TokenInfo> {
        self.inner.read().expect("token registry lock poisoned").by_token.clone()
    }

    /// Scan the tokens directory and rebuild in-memory state, accepting
    /// either the JSON form or the legacy plain-text form (file contents
    /// == token, cloister = file name, project/worktree empty).
    ///
    /// Directories and empty files are skipped. A single unreadable or
    /// unparseable file is logged and skipped — it never prevents the
    /// rest of the directory from loading.
    pub fn load_all(&self) {
        let entries = match std::fs::read_dir(&self.tokens_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, dir = %self.tokens_dir.display(), "failed to read tokens directory");
                return;
            }
        };

        let mut inner = self.inner.write().expect("token registry lock poisoned");
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match load_one(&path, file_name) {
                Ok(Some(info)) => {
                    inner.by_cloister.insert(info.cloister.clone(), info.token.clone());
                    inner.by_token.insert(info.token.clone(), info);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, file = %path.display(), "skipping unreadable token file");
                }
            }
        }
    }

    fn persist(&self, info: &TokenInfo) -> GuardianResult<()> {
        fsutil::ensure_private_dir(&self.tokens_dir)?;
        let path = self.tokens_dir.join(&info.cloister);
        let json = serde_json::to_vec_pretty(&TokenFile::from(info))
            .map_err(|e| guardian_core::GuardianError::FatalConfig(e.to_string()))?;
        fsutil::write_atomic(&path, &json)
    }
}

/// Load one token file, tolerating the legacy plain-text form.
///
/// Returns `Ok(None)` for empty files (skip, not an error).
fn load_one(path: &Path, file_name: &str) -> std::io::Result<Option<TokenInfo>> {
    let contents = std::fs::read_to_string(path)?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(file) = serde_json::from_str::<TokenFile>(trimmed) {
        return Ok(Some(file.into()));
    }
    // Legacy form: bare token string, cloister name taken from the file name.
    Ok(Some(TokenInfo {
        token: trimmed.to_string(),
        cloister: file_name.to_string(),
        project: String::new(),
        worktree: String::new(),
    }))
}
