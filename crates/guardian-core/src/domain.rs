//! Domain/pattern data model shared by the policy cache and the approval
//! persistence layer.
//!
//! `AllowEntry` is the on-disk/wire shape (exactly one of `domain` or
//! `pattern` set); `Allowlist` is the resolved, immutable in-memory value
//! built from a batch of entries and consulted on every policy decision.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{GuardianError, GuardianResult};

/// A single allow/deny entry as it appears in static config or a
/// decisions file: either an exact FQDN or a `*.<suffix>` wildcard.
///
/// Exactly one of `domain`/`pattern` must be set; [`AllowEntry::validate`]
/// enforces this plus the wildcard's shape constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowEntry {
    /// Exact domain match (case-insensitive, no port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// `*.<suffix>` wildcard; `<suffix>` must contain at least one dot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl AllowEntry {
    /// Build an exact-domain entry.
    #[must_use]
    pub fn domain(host: impl Into<String>) -> Self {
        Self {
            domain: Some(host.into().to_lowercase()),
            pattern: None,
        }
    }

    /// Build a wildcard entry; validated on construction.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::InvalidRequest`] if `pattern` is not of the
    /// form `*.<suffix>` with at least one dot in `<suffix>`.
    pub fn pattern(pattern: impl Into<String>) -> GuardianResult<Self> {
        let entry = Self {
            domain: None,
            pattern: Some(pattern.into().to_lowercase()),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Validate the invariant: exactly one field set, and if it's a
    /// pattern, that it has the `*.<suffix-with-a-dot>` shape.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::InvalidRequest`] on any violation.
    pub fn validate(&self) -> GuardianResult<()> {
        match (&self.domain, &self.pattern) {
            (Some(d), None) => {
                if d.is_empty() || d.contains('/') {
                    return Err(GuardianError::InvalidRequest(format!(
                        "invalid domain entry: {d}"
                    )));
                }
                Ok(())
            }
            (None, Some(p)) => validate_pattern_suffix(p).map(|_| ()),
            _ => Err(GuardianError::InvalidRequest(
                "AllowEntry must set exactly one of domain or pattern".into(),
            )),
        }
    }
}

/// Validate a `*.<suffix>` string and return the bare suffix (lowercased,
/// without the `*.` prefix).
fn validate_pattern_suffix(pattern: &str) -> GuardianResult<String> {
    let lower = pattern.to_lowercase();
    let Some(suffix) = lower.strip_prefix("*.") else {
        return Err(GuardianError::InvalidRequest(format!(
            "pattern must start with '*.': {pattern}"
        )));
    };
    if suffix.is_empty() || !suffix.contains('.') {
        return Err(GuardianError::InvalidRequest(format!(
            "pattern suffix must contain at least one dot: {pattern}"
        )));
    }
    if suffix.contains('*') {
        return Err(GuardianError::InvalidRequest(format!(
            "mid-string globs are not permitted: {pattern}"
        )));
    }
    Ok(suffix.to_string())
}

/// Strip an optional `:port` suffix and lowercase a host string.
///
/// # Errors
///
/// Returns [`GuardianError::InvalidRequest`] if the result is empty or
/// contains a slash or control character (anything that isn't a bare
/// hostname).
pub fn normalize_host(host: &str) -> GuardianResult<String> {
    let without_port = host.rsplit_once(':').map_or(host, |(h, _)| h);
    let normalized = without_port.to_lowercase();
    if normalized.is_empty()
        || normalized.contains('/')
        || normalized.chars().any(|c| c.is_control())
    {
        return Err(GuardianError::InvalidRequest(format!(
            "invalid host: {host}"
        )));
    }
    Ok(normalized)
}

/// Resolved, immutable set of exact domains plus wildcard suffixes.
///
/// Built once from a batch of [`AllowEntry`] values via
/// [`Allowlist::from_entries`] and swapped atomically on reload — never
/// mutated after construction. Used for both allowlists and denylists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    domains: HashSet<String>,
    /// Wildcard suffixes, without the `*.` prefix (e.g. `"e.com"`).
    patterns: Vec<String>,
}

impl Allowlist {
    /// Build a resolved allowlist from a batch of entries, validating and
    /// lowercasing each. Duplicate entries (by equality) are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::InvalidRequest`] if any entry fails
    /// [`AllowEntry::validate`].
    pub fn from_entries(entries: &[AllowEntry]) -> GuardianResult<Self> {
        let mut domains = HashSet::new();
        let mut patterns = Vec::new();
        for entry in entries {
            entry.validate()?;
            if let Some(d) = &entry.domain {
                domains.insert(d.to_lowercase());
            } else if let Some(p) = &entry.pattern {
                let suffix = validate_pattern_suffix(p)?;
                if !patterns.contains(&suffix) {
                    patterns.push(suffix);
                }
            }
        }
        Ok(Self { domains, patterns })
    }

    /// Whether this allowlist is empty (no domains, no patterns).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.patterns.is_empty()
    }

    /// `IsAllowed(host)`: strip port, lowercase, then exact match or
    /// single-label wildcard match.
    ///
    /// Invalid hosts (empty, containing a slash or control char) never
    /// match — callers that need to distinguish "invalid" from "no
    /// match" should call [`normalize_host`] themselves first.
    #[must_use]
    pub fn is_allowed(&self, host: &str) -> bool {
        let Ok(normalized) = normalize_host(host) else {
            return false;
        };
        if self.domains.contains(&normalized) {
            return true;
        }
        self.patterns
            .iter()
            .any(|suffix| matches_single_label(&normalized, suffix))
    }

    /// Merge another allowlist's entries in, appending and
    /// deduplicating. Used to compose layered static+approvals sources.
    pub fn merge(&mut self, other: &Self) {
        for d in &other.domains {
            self.domains.insert(d.clone());
        }
        for p in &other.patterns {
            if !self.patterns.contains(p) {
                self.patterns.push(p.clone());
            }
        }
    }

    /// Exact domains in this allowlist (for persistence/snapshot views).
    #[must_use]
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    /// Wildcard suffixes (without the `*.` prefix) in this allowlist.
    #[must_use]
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }
}

/// `*.<suffix>` matches exactly one label to the left of `<suffix>`:
/// `a.e.com` matches suffix `e.com`, but `e.com` itself and
/// `a.b.e.com` do not.
fn matches_single_label(host: &str, suffix: &str) -> bool {
    let Some(rest) = host.strip_suffix(suffix) else {
        return false;
    };
    let Some(label) = rest.strip_suffix('.') else {
        return false;
    };
    !label.is_empty() && !label.contains('.')
}

/// A denylist has exactly the same shape and matching rules as an
/// allowlist; kept as a distinct alias so call sites read clearly.
pub type Denylist = Allowlist;
