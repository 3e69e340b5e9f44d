//! Shared, `Arc`-wrapped state handed to every one of the four servers.
//!
//! Every field here is cheap to clone: `Arc` around the long-lived
//! singletons ([`TokenRegistry`], [`PolicyCache`], the two approval
//! queues, the [`EventHub`]) and plain values for the executor's address
//! and shared secret. Nothing here is ever locked across an `.await` —
//! [`PolicyCache`] and [`TokenRegistry`] each hold their own short-lived
//! internal locks.

use std::net::SocketAddr;
use std::sync::Arc;

use guardian_approval::{CommandQueue, DomainQueue, EventHub};
use guardian_core::GuardianPaths;
use guardian_policy::PolicyCache;
use guardian_tokens::TokenRegistry;

/// Everything an axum handler needs to serve any of the four Guardian
/// servers.
#[derive(Clone)]
pub struct SharedState {
    pub paths: GuardianPaths,
    pub tokens: Arc<TokenRegistry>,
    pub policy: Arc<PolicyCache>,
    pub domain_queue: Arc<DomainQueue>,
    pub command_queue: Arc<CommandQueue>,
    pub hub: Arc<EventHub>,
    pub executor_addr: SocketAddr,
    pub executor_secret: Arc<str>,
}
