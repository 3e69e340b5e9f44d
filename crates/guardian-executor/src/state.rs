//! The executor discovery file (`hostexec-daemon.json`).

use std::path::Path;

use guardian_core::error::GuardianResult;
use guardian_core::fsutil;

use crate::protocol::DaemonState;

/// Write the discovery file (mode 0600 via [`fsutil::write_atomic`]) so
/// the Guardian container can find this executor's port.
///
/// # Errors
///
/// Returns an error if the state directory or file cannot be written.
pub fn write(path: &Path, state: &DaemonState) -> GuardianResult<()> {
    let parent = path.parent().ok_or_else(|| {
        guardian_core::GuardianError::FatalConfig("executor state path has no parent".into())
    })?;
    fsutil::ensure_private_dir(parent)?;
    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| guardian_core::GuardianError::FatalConfig(e.to_string()))?;
    fsutil::write_atomic(path, &json)
}

/// Remove the discovery file on graceful shutdown. Tolerates it already
/// being absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove(path: &Path) -> GuardianResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
