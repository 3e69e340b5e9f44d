//! Executor wire protocol: one newline-delimited JSON request, one
//! newline-delimited JSON response, per TCP connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The command to run, as the Guardian relays it from a Request-server
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub stdin: Option<String>,
}

/// One request frame: the shared secret plus the command to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketRequest {
    pub secret: String,
    pub request: ExecRequest,
}

/// Captured result of a successfully launched command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// One response frame: either a captured result, or an error with no
/// execution attempted (bad secret, malformed request, spawn failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ExecResponse>,
}

impl SocketResponse {
    #[must_use]
    pub fn ok(response: ExecResponse) -> Self {
        Self {
            success: true,
            error: None,
            response: Some(response),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            response: None,
        }
    }
}

/// Discovery file written by the executor at startup so the Guardian can
/// find its ephemeral port (`<state>/cloister/hostexec-daemon.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub secret: String,
    #[serde(rename = "tcpPort")]
    pub tcp_port: u16,
}
