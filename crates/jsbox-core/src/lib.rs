//! # jsbox-core
//!
//! Runs a single script inside a sandboxed execution environment and
//! collects its output under a hard timeout.
//!
//! This crate provides:
//! - The sandbox runtime seam (`SandboxRuntime` / `SandboxInstance`)
//! - A local runtime backed by host processes in private workdirs
//! - `SandboxContext`, a lazily booted shared instance with reset
//! - `Runner`, which mounts, spawns, drains and races the run against a timer
//! - The length-prefixed msgpack protocol spoken by the daemon

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod local;
pub mod protocol;
pub mod result;
pub mod runner;
pub mod runtime;

pub use config::{RunnerConfig, RuntimeConfig};
pub use context::{SandboxContext, get_or_create_instance, reset_instance};
pub use error::JsboxError;
pub use local::LocalRuntime;
pub use result::ExecutionResult;
pub use runner::{RunRequest, Runner, run};
pub use runtime::{FileTree, InstanceId, SandboxHandle, SandboxInstance, SandboxProcess, SandboxRuntime};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, JsboxError>;
