//! Client for talking to a running executor: one request, one response,
//! over a fresh TCP connection per call.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use guardian_core::error::{GuardianError, GuardianResult};

use crate::protocol::{ExecRequest, SocketRequest, SocketResponse};

/// Send `request` to the executor at `addr`, authenticating with
/// `secret`, and return its response.
///
/// # Errors
///
/// Returns [`GuardianError::TransientIo`] if the connection cannot be
/// established or the protocol frame cannot be exchanged — callers
/// should treat this as a Request-path-only failure, not a proxy
/// failure.
pub async fn exec(addr: SocketAddr, secret: &str, request: ExecRequest) -> GuardianResult<SocketResponse> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| GuardianError::TransientIo(format!("connecting to executor: {e}")))?;

    let frame = SocketRequest {
        secret: secret.to_string(),
        request,
    };
    let mut line = serde_json::to_vec(&frame)
        .map_err(|e| GuardianError::TransientIo(format!("encoding executor request: {e}")))?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .await
        .map_err(|e| GuardianError::TransientIo(format!("writing to executor: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| GuardianError::TransientIo(format!("shutting down executor write half: {e}")))?;

    let mut response_line = String::new();
    BufReader::new(stream)
        .read_line(&mut response_line)
        .await
        .map_err(|e| GuardianError::TransientIo(format!("reading from executor: {e}")))?;

    serde_json::from_str(response_line.trim_end())
        .map_err(|e| GuardianError::TransientIo(format!("decoding executor response: {e}")))
}
