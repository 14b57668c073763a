//! Wire protocol for daemon communication
//!
//! Every message is msgpack, framed by a 4-byte big-endian length prefix.

use crate::{JsboxError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Request to run a script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Program text, mounted as the entry file
    pub code: String,
    /// Text written to the program's stdin
    pub stdin: String,
    /// Optional timeout override
    pub timeout: Option<Duration>,
    /// Run in a throwaway instance instead of the shared one
    pub fresh: bool,
}

/// Response from execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Whether execution succeeded
    pub success: bool,
    /// Run output (if success)
    pub output: Option<String>,
    /// Error message (if !success)
    pub error: Option<String>,
    /// Set when the failure was the run timeout
    pub timed_out: bool,
}

impl ExecuteResponse {
    #[must_use]
    pub const fn ok(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            timed_out: false,
        }
    }

    #[must_use]
    pub fn failed(err: &JsboxError) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(err.to_string()),
            timed_out: err.is_timeout(),
        }
    }
}

/// Request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Execute code
    Execute(ExecuteRequest),
    /// Get shared instance status
    Status,
    /// Drop the shared instance
    Reset,
    /// Ping
    Ping,
}

/// Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Execution result
    Execute(ExecuteResponse),
    /// Shared instance status
    Status {
        cached: bool,
        instance_id: Option<String>,
        boot_attempts: u64,
        boots: u64,
        runs: u64,
    },
    /// Shared instance dropped
    Reset,
    /// Pong
    Pong,
    /// Error
    Error { message: String },
}

/// Encode a message to msgpack, with field names so tagged enums decode
pub fn encode<T: Serialize>(msg: &T) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> std::result::Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

/// Encode `msg` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(JsboxError::Protocol(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| JsboxError::Protocol("frame length overflows u32".into()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it. `Ok(None)` means the peer closed cleanly.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(JsboxError::Protocol(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(decode(&payload)?))
}
