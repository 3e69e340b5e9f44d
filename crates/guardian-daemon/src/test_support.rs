//! Shared fixture for the four servers' in-process `tower::oneshot` tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use guardian_approval::{CommandQueue, DomainQueue, EventHub};
use guardian_core::GuardianPaths;
use guardian_policy::PolicyCache;
use guardian_tokens::TokenRegistry;
use tempfile::TempDir;

use crate::state::SharedState;

/// Build a [`SharedState`] rooted at a fresh temp directory. The executor
/// address is a loopback port nothing is listening on; tests that need a
/// real executor spin one up separately and overwrite the field.
pub fn test_state() -> (SharedState, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = GuardianPaths::rooted_at(dir.path());
    let tokens = Arc::new(TokenRegistry::new(paths.tokens_dir()));
    tokens.load_all();
    let policy = Arc::new(PolicyCache::new(paths.clone(), tokens.clone()));
    let hub = Arc::new(EventHub::new());
    let domain_queue = DomainQueue::new(hub.clone(), Duration::from_secs(60));
    let command_queue = CommandQueue::new(hub.clone(), Duration::from_secs(300));

    let state = SharedState {
        paths,
        tokens,
        policy,
        domain_queue,
        command_queue,
        hub,
        executor_addr: "127.0.0.1:1".parse::<SocketAddr>().expect("valid loopback addr"),
        executor_secret: Arc::from("test-secret"),
    };
    (state, dir)
}
