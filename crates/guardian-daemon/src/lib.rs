//! The four Guardian network servers and the process that hosts them.
//!
//! ```text
//! guardiand
//! ├── Proxy server       (CONNECT tunnel, container-network-facing)
//! ├── API server         (token register/revoke/list, localhost)
//! ├── Request server     (host-command submission, localhost)
//! ├── Approval UI server (pending lists, decisions, SSE events, localhost)
//! └── Lifecycle          (SIGHUP reload, SIGINT/SIGTERM graceful shutdown)
//! ```
//!
//! Every server shares one [`state::SharedState`]: a [`guardian_tokens::TokenRegistry`],
//! a [`guardian_policy::PolicyCache`], the two approval queues from
//! [`guardian_approval`], and the discovered address of the executor
//! process that actually runs host commands.

pub mod api;
pub mod approval_ui;
pub mod lifecycle;
pub mod proxy;
pub mod request;
pub mod state;

#[cfg(test)]
mod test_support;

pub use lifecycle::Lifecycle;
pub use state::SharedState;
