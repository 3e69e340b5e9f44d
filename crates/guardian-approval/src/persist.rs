//! Scope-based persistence dispatch for resolved domain approvals.
//!
//! A human decision on a [`crate::domain_queue::DomainRequest`] carries an
//! [`ApprovalScope`]; this module is the single place that turns that
//! scope into the right disk write (or none) and the right
//! [`PolicyCache`] invalidation, in that order — the write always
//! happens-before the cache refresh that would otherwise observe stale
//! state.

use guardian_core::decisions::DecisionsFile;
use guardian_core::error::{GuardianError, GuardianResult};
use guardian_core::{AllowEntry, ApprovalScope, GuardianPaths};
use guardian_policy::PolicyCache;

/// Persist (or not, per `scope`) one domain decision and update the
/// policy cache accordingly.
///
/// `pattern` is `Some(suffix)` (e.g. `"e.com"`, without the `*.` prefix)
/// when the human approved or denied the whole wildcard suffix rather
/// than just `host`.
///
/// # Errors
///
/// Returns an error if the entry is invalid, or if a project/global
/// write fails.
pub fn apply_domain_decision(
    paths: &GuardianPaths,
    cache: &PolicyCache,
    token: &str,
    project: &str,
    host: &str,
    allow: bool,
    scope: ApprovalScope,
    pattern: Option<&str>,
) -> GuardianResult<()> {
    let entry = match pattern {
        Some(suffix) => AllowEntry::pattern(format!("*.{suffix}"))?,
        None => AllowEntry::domain(host),
    };

    match scope {
        ApprovalScope::Once => {}
        ApprovalScope::Session => {
            if allow {
                cache.add_session_allow(token, entry);
            } else {
                cache.add_session_deny(token, entry);
            }
        }
        ApprovalScope::Project => {
            if project.is_empty() {
                return Err(GuardianError::InvalidRequest(
                    "project-scoped approval requires a known project".into(),
                ));
            }
            let path = paths.project_approvals(project);
            let mut file = DecisionsFile::read_tolerant(&path)?;
            file.append(entry, allow);
            file.write_atomic(&path)?;
            cache.clear_project(project);
        }
        ApprovalScope::Global => {
            let path = paths.global_approvals();
            let mut file = DecisionsFile::read_tolerant(&path)?;
            file.append(entry, allow);
            file.write_atomic(&path)?;
            cache.reload();
        }
    }
    Ok(())
}

/// Build the `*.<suffix>` wildcard for `host`'s parent domain, for the
/// Approval UI's "approve this whole domain" action.
///
/// # Errors
///
/// Returns [`GuardianError::InvalidRequest`] if `host` has fewer than
/// two labels (nothing to generalize to).
pub fn wildcard_suffix(host: &str) -> GuardianResult<String> {
    let normalized = guardian_core::normalize_host(host)?;
    let Some((_, suffix)) = normalized.split_once('.') else {
        return Err(GuardianError::InvalidRequest(format!(
            "host has no parent domain to generalize: {host}"
        )));
    };
    if suffix.is_empty() {
        return Err(GuardianError::InvalidRequest(format!(
            "host has no parent domain to generalize: {host}"
        )));
    }
    Ok(suffix.to_string())
}
