//! Host-command pattern classification.
//!
//! Layered exactly like the domain policy: a project's effective pattern
//! set is global auto/manual/deny merged with project auto/manual/deny.
//! Classification order is deny, then auto-approve, then manual-approve;
//! no match is treated as an implicit deny (default-deny).

use globset::{Glob, GlobSet, GlobSetBuilder};
use guardian_core::config::CommandSection;
use guardian_core::error::GuardianResult;

/// Classification of a host-command request against a project's pattern
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    /// Execute immediately, no human in the loop.
    Auto,
    /// Queue for human approval.
    Manual,
    /// Reject outright — either an explicit deny pattern matched, or no
    /// pattern matched at all (default-deny).
    Deny,
}

/// Compiled glob sets for one layer (auto/manual/deny), built once per
/// reload and swapped atomically like an [`guardian_core::Allowlist`].
pub struct CommandMatcher {
    auto: GlobSet,
    manual: GlobSet,
    deny: GlobSet,
}

impl CommandMatcher {
    /// Compile a matcher from a merged (global + project) command
    /// section.
    ///
    /// # Errors
    ///
    /// Returns [`guardian_core::GuardianError::FatalConfig`] if any
    /// pattern is not a valid glob.
    pub fn compile(section: &CommandSection) -> GuardianResult<Self> {
        Ok(Self {
            auto: build_set(&section.auto_approve)?,
            manual: build_set(&section.manual_approve)?,
            deny: build_set(&section.deny)?,
        })
    }

    /// Classify a full command line (`command` plus space-joined `args`)
    /// against this matcher: deny wins over auto, which wins over
    /// manual; no match at all is an implicit deny.
    #[must_use]
    pub fn classify(&self, command_line: &str) -> PatternClass {
        if self.deny.is_match(command_line) {
            return PatternClass::Deny;
        }
        if self.auto.is_match(command_line) {
            return PatternClass::Auto;
        }
        if self.manual.is_match(command_line) {
            return PatternClass::Manual;
        }
        PatternClass::Deny
    }
}

fn build_set(patterns: &[String]) -> GuardianResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| guardian_core::GuardianError::FatalConfig(e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| guardian_core::GuardianError::FatalConfig(e.to_string()))
}

/// Merge two command sections (project entries appended after global,
/// duplicates by exact string equality dropped).
#[must_use]
pub fn merge_command_sections(global: &CommandSection, project: &CommandSection) -> CommandSection {
    CommandSection {
        auto_approve: merge_patterns(&global.auto_approve, &project.auto_approve),
        manual_approve: merge_patterns(&global.manual_approve, &project.manual_approve),
        deny: merge_patterns(&global.deny, &project.deny),
    }
}

fn merge_patterns(a: &[String], b: &[String]) -> Vec<String> {
    let mut merged = a.to_vec();
    for p in b {
        if !merged.contains(p) {
            merged.push(p.clone());
        }
    }
    merged
}
