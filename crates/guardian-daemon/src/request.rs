//! The Request server (component D.3): host-command submission from
//! inside a cloister container.
//!
//! Unlike the Proxy and API servers, denial here is not an HTTP error —
//! it is a structured field in a 200 response, since the caller (a
//! container's host-command client) needs to distinguish "ran with this
//! exit code" from "the Guardian refused to run it" without special-casing
//! HTTP status handling.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use guardian_approval::CommandOutcome;
use guardian_policy::command::PatternClass;
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

const TOKEN_HEADER: &str = "X-Cloister-Token";

pub fn router() -> Router<SharedState> {
    Router::new().route("/execute", post(submit))
}

#[derive(Debug, Deserialize)]
struct CommandSubmission {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    stdin: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct CommandResult {
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl CommandResult {
    fn denied(reason: impl Into<String>) -> Self {
        Self {
            denied: true,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

async fn submit(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<CommandSubmission>) -> Json<CommandResult> {
    let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        return Json(CommandResult::denied("missing X-Cloister-Token header"));
    };
    let Some(info) = state.tokens.lookup(token) else {
        return Json(CommandResult::denied("unknown token"));
    };

    let command_line = if body.args.is_empty() {
        body.command.clone()
    } else {
        format!("{} {}", body.command, body.args.join(" "))
    };

    let result = match state.policy.classify_command(&info.project, &command_line) {
        PatternClass::Deny => CommandResult::denied("command denied by policy"),
        PatternClass::Auto => run_via_executor(&state, body).await,
        PatternClass::Manual => {
            let token = token.to_string();
            let (_id, mut rx) = state.command_queue.add(
                token,
                info.cloister.clone(),
                info.project.clone(),
                body.command.clone(),
                body.args.clone(),
                body.cwd.clone().unwrap_or_default(),
            );
            match rx.recv().await.unwrap_or(CommandOutcome::Timeout) {
                CommandOutcome::Approved => run_via_executor(&state, body).await,
                CommandOutcome::Denied { reason } => CommandResult::denied(reason),
                CommandOutcome::Timeout => CommandResult::denied("approval timed out"),
                CommandOutcome::ShuttingDown => CommandResult::denied("server shutting down"),
            }
        }
    };

    audit(&info, &command_line, &result);
    Json(result)
}

async fn run_via_executor(state: &SharedState, body: CommandSubmission) -> CommandResult {
    let exec_request = guardian_executor::ExecRequest {
        command: body.command,
        args: body.args,
        cwd: body.cwd,
        env: body.env,
        stdin: body.stdin,
    };
    match guardian_executor::exec(state.executor_addr, &state.executor_secret, exec_request).await {
        Ok(resp) if resp.success => {
            let out = resp.response.expect("success response carries a result");
            CommandResult {
                exit_code: Some(out.exit_code),
                stdout: out.stdout,
                stderr: out.stderr,
                denied: false,
                reason: None,
            }
        }
        Ok(resp) => CommandResult::denied(resp.error.unwrap_or_else(|| "executor error".to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "executor unreachable");
            CommandResult::denied(format!("executor unavailable: {e}"))
        }
    }
}

fn audit(info: &guardian_core::TokenInfo, command_line: &str, result: &CommandResult) {
    tracing::info!(
        cloister = %info.cloister,
        project = %info.project,
        command = %command_line,
        denied = result.denied,
        exit_code = ?result.exit_code,
        "host-command request concluded"
    );
}
