//! The layered Policy Cache (component B).
//!
//! Three layers compose per decision: global static+approvals, optional
//! per-project static+approvals (lazily loaded on first use), and
//! per-token session state (ephemeral, cleared on revoke). Deny always
//! wins over allow. [`PolicyCache::reload`] rebuilds the global layer and
//! drops every per-project cache entry so the next lookup re-composes it
//! from disk — callers hold onto the returned [`guardian_core::Allowlist`]
//! snapshots and never mutate them in place; a reload replaces the
//! cached pointer rather than editing it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use guardian_core::config::{CommandSection, StaticConfig};
use guardian_core::decisions::DecisionsFile;
use guardian_core::{normalize_host, AllowEntry, Allowlist, GuardianPaths};
use guardian_tokens::TokenRegistry;

use crate::command::{merge_command_sections, CommandMatcher, PatternClass};

/// Outcome of [`PolicyCache::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Tunnel the connection.
    Allow,
    /// Reject with 403.
    Deny,
    /// No layer matched — enqueue a domain approval.
    Unknown,
}

/// The layered, lazily-populated policy cache.
pub struct PolicyCache {
    paths: GuardianPaths,
    registry: Arc<TokenRegistry>,

    global: RwLock<Allowlist>,
    global_deny: RwLock<Allowlist>,

    // Absent key = not yet loaded; present key (even if empty) = loaded.
    project_allow: RwLock<HashMap<String, Allowlist>>,
    project_deny: RwLock<HashMap<String, Allowlist>>,
    project_commands: RwLock<HashMap<String, Arc<CommandMatcher>>>,

    session_allow: RwLock<HashMap<String, Allowlist>>,
    session_deny: RwLock<HashMap<String, Allowlist>>,
}

impl PolicyCache {
    /// Build a cache over `paths`, eagerly loading the global layer.
    #[must_use]
    pub fn new(paths: GuardianPaths, registry: Arc<TokenRegistry>) -> Self {
        let cache = Self {
            paths,
            registry,
            global: RwLock::new(Allowlist::default()),
            global_deny: RwLock::new(Allowlist::default()),
            project_allow: RwLock::new(HashMap::new()),
            project_deny: RwLock::new(HashMap::new()),
            project_commands: RwLock::new(HashMap::new()),
            session_allow: RwLock::new(HashMap::new()),
            session_deny: RwLock::new(HashMap::new()),
        };
        cache.reload();
        cache
    }

    /// `Decide(token, host)`.
    ///
    /// 1. Normalize/validate the host; invalid hosts deny immediately.
    /// 2. Session deny, then global/project deny.
    /// 3. Session allow, then project/global allow.
    /// 4. Otherwise unknown.
    #[must_use]
    pub fn decide(&self, token: &str, host: &str) -> Decision {
        if normalize_host(host).is_err() {
            return Decision::Deny;
        }
        let project = self
            .registry
            .lookup(token)
            .map(|info| info.project)
            .unwrap_or_default();

        if self.session_deny_allows(token, host) {
            return Decision::Deny;
        }
        if self.global_deny.read().expect("lock poisoned").is_allowed(host) {
            return Decision::Deny;
        }
        if !project.is_empty() && self.get_project_deny(&project).is_allowed(host) {
            return Decision::Deny;
        }
        if self.session_allow_allows(token, host) {
            return Decision::Allow;
        }
        if !project.is_empty() && self.get_project_allow(&project).is_allowed(host) {
            return Decision::Allow;
        }
        if self.global.read().expect("lock poisoned").is_allowed(host) {
            return Decision::Allow;
        }
        Decision::Unknown
    }

    fn session_deny_allows(&self, token: &str, host: &str) -> bool {
        self.session_deny
            .read()
            .expect("lock poisoned")
            .get(token)
            .is_some_and(|al| al.is_allowed(host))
    }

    fn session_allow_allows(&self, token: &str, host: &str) -> bool {
        self.session_allow
            .read()
            .expect("lock poisoned")
            .get(token)
            .is_some_and(|al| al.is_allowed(host))
    }

    /// Cached per-project allowlist, lazily composed from global static
    /// config, project static config, global approvals, and project
    /// approvals (in that order).
    #[must_use]
    pub fn get_project_allow(&self, project: &str) -> Allowlist {
        if let Some(al) = self.project_allow.read().expect("lock poisoned").get(project) {
            return al.clone();
        }
        let al = self.load_project_allow(project);
        self.project_allow
            .write()
            .expect("lock poisoned")
            .insert(project.to_string(), al.clone());
        al
    }

    /// Cached per-project denylist; same lazy-load/compose rules as
    /// [`PolicyCache::get_project_allow`].
    #[must_use]
    pub fn get_project_deny(&self, project: &str) -> Allowlist {
        if let Some(al) = self.project_deny.read().expect("lock poisoned").get(project) {
            return al.clone();
        }
        let al = self.load_project_deny(project);
        self.project_deny
            .write()
            .expect("lock poisoned")
            .insert(project.to_string(), al.clone());
        al
    }

    /// Classify a host-command line against a project's layered pattern
    /// set (global auto/manual/deny + project auto/manual/deny).
    #[must_use]
    pub fn classify_command(&self, project: &str, command_line: &str) -> PatternClass {
        if let Some(matcher) = self.project_commands.read().expect("lock poisoned").get(project) {
            return matcher.classify(command_line);
        }
        let matcher = Arc::new(self.load_command_matcher(project));
        let class = matcher.classify(command_line);
        self.project_commands
            .write()
            .expect("lock poisoned")
            .insert(project.to_string(), matcher);
        class
    }

    /// Drop a project's cached allow/deny/command state so the next
    /// lookup recomposes it from disk. Called after a project-scoped
    /// approval is persisted.
    pub fn clear_project(&self, project: &str) {
        self.project_allow.write().expect("lock poisoned").remove(project);
        self.project_deny.write().expect("lock poisoned").remove(project);
        self.project_commands.write().expect("lock poisoned").remove(project);
    }

    /// Re-read the global static config and global approvals, rebuild
    /// the global allow/deny layers, drop every per-project cache entry,
    /// and proactively reload the projects of any currently-registered
    /// tokens (so the next decision for an active cloister does not pay
    /// a cold-load latency spike).
    pub fn reload(&self) {
        let global_static = StaticConfig::read_tolerant(&self.paths.global_config())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "global config unreadable, treating as empty");
                StaticConfig::default()
            });
        let global_decisions = DecisionsFile::read_tolerant(&self.paths.global_approvals())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "global approvals unreadable, treating as empty");
                DecisionsFile::default()
            });

        let mut allow = Allowlist::from_entries(&global_static.proxy.allow).unwrap_or_default();
        allow.merge(&Allowlist::from_entries(&global_decisions.proxy.allow).unwrap_or_default());
        let mut deny = Allowlist::from_entries(&global_static.proxy.deny).unwrap_or_default();
        deny.merge(&Allowlist::from_entries(&global_decisions.proxy.deny).unwrap_or_default());

        *self.global.write().expect("lock poisoned") = allow;
        *self.global_deny.write().expect("lock poisoned") = deny;

        self.project_allow.write().expect("lock poisoned").clear();
        self.project_deny.write().expect("lock poisoned").clear();
        self.project_commands.write().expect("lock poisoned").clear();

        let active_projects: std::collections::HashSet<String> = self
            .registry
            .list()
            .values()
            .map(|info| info.project.clone())
            .filter(|p| !p.is_empty())
            .collect();
        for project in active_projects {
            self.get_project_allow(&project);
            self.get_project_deny(&project);
        }
    }

    /// Add one entry to a token's session allowlist (scope=session
    /// approval). Never touches disk.
    pub fn add_session_allow(&self, token: &str, entry: AllowEntry) {
        Self::add_session_entry(&self.session_allow, token, entry);
    }

    /// Add one entry to a token's session denylist (scope=session
    /// denial). Never touches disk.
    pub fn add_session_deny(&self, token: &str, entry: AllowEntry) {
        Self::add_session_entry(&self.session_deny, token, entry);
    }

    fn add_session_entry(map: &RwLock<HashMap<String, Allowlist>>, token: &str, entry: AllowEntry) {
        let addition = Allowlist::from_entries(std::slice::from_ref(&entry)).unwrap_or_default();
        let mut map = map.write().expect("lock poisoned");
        map.entry(token.to_string()).or_default().merge(&addition);
    }

    /// Drop a token's session allow/deny state. Called on token revoke.
    pub fn clear_session(&self, token: &str) {
        self.session_allow.write().expect("lock poisoned").remove(token);
        self.session_deny.write().expect("lock poisoned").remove(token);
    }

    fn load_project_allow(&self, project: &str) -> Allowlist {
        let global_static = self.read_global_static();
        let project_static = self.read_project_static(project);
        let global_decisions = self.read_global_decisions();
        let project_decisions = self.read_project_decisions(project);

        let mut al = Allowlist::from_entries(&global_static.proxy.allow).unwrap_or_default();
        al.merge(&Allowlist::from_entries(&project_static.proxy.allow).unwrap_or_default());
        al.merge(&Allowlist::from_entries(&global_decisions.proxy.allow).unwrap_or_default());
        al.merge(&Allowlist::from_entries(&project_decisions.proxy.allow).unwrap_or_default());
        al
    }

    fn load_project_deny(&self, project: &str) -> Allowlist {
        let global_static = self.read_global_static();
        let project_static = self.read_project_static(project);
        let global_decisions = self.read_global_decisions();
        let project_decisions = self.read_project_decisions(project);

        let mut al = Allowlist::from_entries(&global_static.proxy.deny).unwrap_or_default();
        al.merge(&Allowlist::from_entries(&project_static.proxy.deny).unwrap_or_default());
        al.merge(&Allowlist::from_entries(&global_decisions.proxy.deny).unwrap_or_default());
        al.merge(&Allowlist::from_entries(&project_decisions.proxy.deny).unwrap_or_default());
        al
    }

    fn load_command_matcher(&self, project: &str) -> CommandMatcher {
        let global_commands = self.read_global_static().commands;
        let project_commands = self.read_project_static(project).commands;
        let merged: CommandSection = merge_command_sections(&global_commands, &project_commands);
        CommandMatcher::compile(&merged).unwrap_or_else(|e| {
            tracing::warn!(error = %e, project, "invalid command patterns, denying all");
            CommandMatcher::compile(&CommandSection::default()).expect("empty section compiles")
        })
    }

    fn read_global_static(&self) -> StaticConfig {
        StaticConfig::read_tolerant(&self.paths.global_config()).unwrap_or_default()
    }

    fn read_project_static(&self, project: &str) -> StaticConfig {
        StaticConfig::read_tolerant(&self.paths.project_config(project)).unwrap_or_default()
    }

    fn read_global_decisions(&self) -> DecisionsFile {
        DecisionsFile::read_tolerant(&self.paths.global_approvals()).unwrap_or_default()
    }

    fn read_project_decisions(&self, project: &str) -> DecisionsFile {
        DecisionsFile::read_tolerant(&self.paths.project_approvals(project)).unwrap_or_default()
    }
}
