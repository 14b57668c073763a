//! Sandbox runtime seam
//!
//! The runner and the shared context only talk to a runtime through these
//! traits: boot an instance, mount files into it, spawn a process inside it.
//! `local::LocalRuntime` is the bundled implementation; tests plug in
//! scripted ones.

use crate::{JsboxError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};

/// Shared handle to a booted instance
pub type SandboxHandle = Arc<dyn SandboxInstance>;

/// Resolves to the process exit code
pub type ExitFuture = BoxFuture<'static, Result<i32>>;

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;
pub type InputSink = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a booted instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Allocate the next id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sbx-{}-{}", std::process::id(), self.0)
    }
}

/// Boots sandbox instances.
#[async_trait]
pub trait SandboxRuntime: Send + Sync + fmt::Debug {
    /// Whether the host provides the isolation capability instances need.
    ///
    /// Only the shared context consults this; an ad hoc boot does not.
    fn isolation_available(&self) -> bool;

    /// Boot a fresh instance. Failures surface as `JsboxError::Boot`.
    async fn boot(&self) -> Result<SandboxHandle>;
}

/// One booted sandbox environment.
#[async_trait]
pub trait SandboxInstance: Send + Sync + fmt::Debug {
    fn id(&self) -> InstanceId;

    /// Held by a run from mount until its process finishes, since every run
    /// in an instance writes to the same filesystem.
    fn run_lock(&self) -> &Mutex<()>;

    /// Write every file of `tree` into the instance filesystem.
    async fn mount(&self, tree: &FileTree) -> Result<()>;

    /// Start `program` with `args` inside the instance.
    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess>;
}

/// Files to mount, keyed by path relative to the instance root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    files: BTreeMap<String, String>,
}

impl FileTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree holding exactly one file
    #[must_use]
    pub fn single(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self::new().file(path, contents)
    }

    #[must_use]
    pub fn file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Validate a mount path: non-empty, relative, and never climbing out of the root.
pub fn relative_path(path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(JsboxError::Mount("empty file path".into()));
    }

    let candidate = Path::new(path);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(JsboxError::Mount(format!("path escapes instance root: {path}")));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(JsboxError::Mount(format!("path must be relative: {path}")));
            }
        }
    }

    Ok(candidate.to_path_buf())
}

/// Force-terminates a spawned process.
///
/// Dropping the handle is a kill too: once its owner lets go, nothing the
/// process started is left running.
#[derive(Debug)]
pub struct KillHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl KillHandle {
    /// A handle plus the receiving end the process watcher selects on
    #[must_use]
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle with nothing behind it
    #[must_use]
    pub const fn detached() -> Self {
        Self { tx: None }
    }

    /// Request termination. Returns false if nothing is watching the
    /// process any more.
    pub fn kill(mut self) -> bool {
        self.tx.take().is_some_and(|tx| tx.send(()).is_ok())
    }
}

/// A running process inside an instance
pub struct SandboxProcess {
    pub pid: Option<u32>,
    /// Standard output stream
    pub output: OutputStream,
    /// Standard error, when the runtime exposes it separately
    pub stderr: Option<OutputStream>,
    pub stdin: Option<InputSink>,
    pub exit: ExitFuture,
    pub kill: KillHandle,
}

impl SandboxProcess {
    /// A process that only exposes stdout and an exit code
    #[must_use]
    pub fn new(output: OutputStream, exit: ExitFuture) -> Self {
        Self {
            pid: None,
            output,
            stderr: None,
            stdin: None,
            exit,
            kill: KillHandle::detached(),
        }
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr: OutputStream) -> Self {
        self.stderr = Some(stderr);
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: InputSink) -> Self {
        self.stdin = Some(stdin);
        self
    }

    #[must_use]
    pub fn with_kill(mut self, kill: KillHandle) -> Self {
        self.kill = kill;
        self
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }
}

impl fmt::Debug for SandboxProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxProcess")
            .field("pid", &self.pid)
            .field("stderr", &self.stderr.is_some())
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}
