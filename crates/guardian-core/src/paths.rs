//! On-disk layout resolution (XDG-honoured).
//!
//! ```text
//! <config>/cloister/
//!   config.yaml
//!   projects/<name>/config.yaml
//!   approvals/global.yaml              (machine-written, overridable via
//!                                        $CLOISTER_APPROVAL_DIR)
//!   approvals/projects/<name>.yaml
//!   tokens/<cloister>
//! <state>/cloister/
//!   hostexec-daemon.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;

/// Resolved filesystem layout for one Guardian process.
#[derive(Debug, Clone)]
pub struct GuardianPaths {
    config_root: PathBuf,
    approval_root: PathBuf,
    state_root: PathBuf,
}

impl GuardianPaths {
    /// Resolve paths from the environment.
    ///
    /// `$XDG_CONFIG_HOME`/`$XDG_STATE_HOME` (honoured automatically by
    /// `directories` on Linux) select the config/state roots; on top of
    /// that, `$CLOISTER_APPROVAL_DIR` independently relocates only the
    /// approvals tree, so a Guardian instance can mount a read-write
    /// approvals volume separate from the read-only static config mount.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined at all
    /// (no `$HOME`, no platform fallback).
    pub fn resolve() -> io::Result<Self> {
        let base = BaseDirs::new()
            .ok_or_else(|| io::Error::other("could not determine a home directory"))?;
        let config_root = base.config_dir().join("cloister");
        let state_root = base
            .state_dir()
            .map_or_else(|| base.config_dir().join("cloister-state"), |d| d.join("cloister"));
        let approval_root = std::env::var("CLOISTER_APPROVAL_DIR")
            .map_or_else(|_| config_root.join("approvals"), PathBuf::from);
        Ok(Self {
            config_root,
            approval_root,
            state_root,
        })
    }

    /// Build a layout rooted at an arbitrary directory (tests/fixtures).
    #[must_use]
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            config_root: root.clone(),
            approval_root: root.join("approvals"),
            state_root: root.join("state"),
        }
    }

    /// Static, human-authored global config. Read-only for the Guardian.
    #[must_use]
    pub fn global_config(&self) -> PathBuf {
        self.config_root.join("config.yaml")
    }

    /// Static, human-authored per-project config. Read-only for the Guardian.
    #[must_use]
    pub fn project_config(&self, project: &str) -> PathBuf {
        self.config_root.join("projects").join(project).join("config.yaml")
    }

    /// Machine-written global approvals file.
    #[must_use]
    pub fn global_approvals(&self) -> PathBuf {
        self.approval_root.join("global.yaml")
    }

    /// Machine-written per-project approvals file.
    #[must_use]
    pub fn project_approvals(&self, project: &str) -> PathBuf {
        self.approval_root.join("projects").join(format!("{project}.yaml"))
    }

    /// Directory holding one file per registered token.
    #[must_use]
    pub fn tokens_dir(&self) -> PathBuf {
        self.config_root.join("tokens")
    }

    /// Executor discovery file (`hostexec-daemon.json`).
    #[must_use]
    pub fn executor_state_file(&self) -> PathBuf {
        self.state_root.join("hostexec-daemon.json")
    }
}
