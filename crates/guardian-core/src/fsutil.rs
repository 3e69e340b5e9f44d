//! Shared filesystem helpers: atomic writes and private directories/files.
//!
//! Every on-disk mutation the Guardian makes (token files, decisions
//! files) goes through [`write_atomic`] so a crash mid-write never leaves
//! a half-written file where a reader might see it.

use std::io::Write;
use std::path::Path;

use crate::error::GuardianResult;

/// Create `dir` (and parents) if missing, with mode 0700 on Unix.
///
/// # Errors
///
/// Returns [`crate::error::GuardianError::TransientIo`] on failure.
pub fn ensure_private_dir(dir: &Path) -> GuardianResult<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `contents` to `path` atomically: write to a temp file in the
/// same directory, fsync, then rename over the destination. Sets mode
/// 0600 on Unix before the rename so the file is never briefly
/// world-readable.
///
/// # Errors
///
/// Returns [`crate::error::GuardianError::TransientIo`] on any
/// filesystem failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> GuardianResult<()> {
    let dir = path.parent().ok_or_else(|| {
        crate::error::GuardianError::FatalConfig("write target has no parent directory".into())
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path)
        .map_err(|e| crate::error::GuardianError::TransientIo(e.to_string()))?;
    Ok(())
}
