//! Runtime and runner configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock budget for a single run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the local process-backed runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter probed at boot to confirm the instance can run scripts
    pub interpreter: PathBuf,

    /// Arguments for the boot probe; it must exit zero
    pub probe_args: Vec<String>,

    /// Directory under which every instance gets its private workdir
    pub root_dir: PathBuf,

    /// Environment variables visible to spawned processes
    pub env: Vec<(String, String)>,

    /// Maximum time the boot probe may take
    pub boot_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("node"),
            probe_args: vec!["--version".into()],
            root_dir: std::env::temp_dir().join("jsbox"),
            env: vec![
                (
                    "PATH".into(),
                    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into()),
                ),
                ("HOME".into(), "/tmp".into()),
            ],
            boot_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

/// Builder for RuntimeConfig
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    #[must_use]
    pub fn interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.interpreter = path.into();
        self
    }

    #[must_use]
    pub fn probe_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.probe_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn boot_timeout(mut self, duration: Duration) -> Self {
        self.config.boot_timeout = duration;
        self
    }

    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

/// Configuration for the code runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Executable spawned inside the instance
    pub interpreter: String,

    /// Arguments placed before the entry file
    pub interpreter_args: Vec<String>,

    /// Name the source text is mounted under
    pub entry_file: String,

    /// Maximum execution time
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "node".into(),
            interpreter_args: Vec::new(),
            entry_file: "index.js".into(),
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Argument list handed to spawn: interpreter args, then the entry file
    #[must_use]
    pub fn spawn_args(&self) -> Vec<String> {
        let mut args = self.interpreter_args.clone();
        args.push(self.entry_file.clone());
        args
    }
}

#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    #[must_use]
    pub fn interpreter(mut self, program: impl Into<String>) -> Self {
        self.config.interpreter = program.into();
        self
    }

    #[must_use]
    pub fn interpreter_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.interpreter_args.push(arg.into());
        self
    }

    #[must_use]
    pub fn entry_file(mut self, name: impl Into<String>) -> Self {
        self.config.entry_file = name.into();
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    #[must_use]
    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    #[must_use]
    pub fn build(self) -> RunnerConfig {
        self.config
    }
}

/// Get default socket path from JSBOX_SOCKET env var or system default
///
/// Returns:
/// - `$JSBOX_SOCKET` if set (for development)
/// - `/run/jsbox/jsbox.sock` otherwise (production)
pub fn default_socket_path() -> PathBuf {
    std::env::var("JSBOX_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/jsbox/jsbox.sock"))
}
