//! Error types for jsbox-core

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Every failure a boot or run can surface.
///
/// `Clone` because a single shared boot result is handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum JsboxError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("boot error: {0}")]
    Boot(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("Execution timed out")]
    Timeout { after: Duration },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl JsboxError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for JsboxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<rmp_serde::encode::Error> for JsboxError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for JsboxError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
