//! The executor's TCP accept loop and per-connection command execution.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::watch;

use crate::protocol::{ExecResponse, SocketRequest, SocketResponse};

/// Exit code synthesized when the command itself cannot be spawned (not
/// found, not executable) — passed through as a command failure rather
/// than a protocol error, matching a shell's `127`.
const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Accept connections on `listener` until `shutdown` reports `true`,
/// running each request to completion on its own task. Returns once the
/// listener has been dropped (on shutdown).
pub async fn serve(listener: TcpListener, secret: Arc<str>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else {
                    continue;
                };
                let secret = Arc::clone(&secret);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &secret).await {
                        tracing::debug!(error = %e, %peer, "executor connection ended with an error");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("executor accept loop stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, secret: &str) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<SocketRequest>(line.trim_end()) {
        Ok(req) if req.secret != secret => {
            tracing::warn!("executor rejected a request with an invalid secret");
            SocketResponse::error("invalid secret")
        }
        Ok(req) => run_command(&req.request).await,
        Err(e) => SocketResponse::error(format!("malformed request: {e}")),
    };

    let mut out = serde_json::to_vec(&response).unwrap_or_default();
    out.push(b'\n');
    write_half.write_all(&out).await?;
    write_half.flush().await
}

async fn run_command(req: &crate::protocol::ExecRequest) -> SocketResponse {
    let mut cmd = Command::new(&req.command);
    cmd.args(&req.args);
    if let Some(cwd) = &req.cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(&req.env);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return SocketResponse::ok(ExecResponse {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: e.to_string(),
            });
        }
    };

    if let Some(stdin_data) = &req.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(stdin_data.as_bytes()).await;
        }
    } else {
        drop(child.stdin.take());
    }

    match child.wait_with_output().await {
        Ok(output) => SocketResponse::ok(ExecResponse {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Err(e) => SocketResponse::ok(ExecResponse {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: e.to_string(),
        }),
    }
}
