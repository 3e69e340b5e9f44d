//! The host-side Executor (component E): a shared-secret-authenticated
//! TCP server that runs commands on behalf of the Guardian, plus the
//! client the Request server uses to reach it.

pub mod client;
pub mod protocol;
pub mod server;
pub mod state;

pub use client::exec;
pub use protocol::{DaemonState, ExecRequest, ExecResponse, SocketRequest, SocketResponse};
pub use server::serve;
