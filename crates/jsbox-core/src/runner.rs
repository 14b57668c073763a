//! Code runner: mount one script, run it, collect its output under a timeout

use crate::config::{RunnerConfig, RuntimeConfig};
use crate::local::LocalRuntime;
use crate::result::ExecutionResult;
use crate::runtime::{
    ExitFuture, FileTree, InputSink, OutputStream, SandboxHandle, SandboxProcess, SandboxRuntime,
};
use crate::{JsboxError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One run: the program text, what to feed its stdin, and optionally the
/// instance to run it in
#[derive(Debug, Default)]
pub struct RunRequest {
    pub source: String,
    pub stdin: String,
    /// Run here instead of booting an ad hoc instance
    pub instance: Option<SandboxHandle>,
}

impl RunRequest {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = input.into();
        self
    }

    #[must_use]
    pub fn instance(mut self, instance: Option<SandboxHandle>) -> Self {
        self.instance = instance;
        self
    }
}

/// Runs scripts inside sandbox instances
#[derive(Debug, Clone)]
pub struct Runner {
    runtime: Arc<dyn SandboxRuntime>,
    config: RunnerConfig,
}

impl Runner {
    /// `runtime` is only used to boot ad hoc instances for requests that
    /// don't bring one.
    #[must_use]
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: RunnerConfig) -> Self {
        Self { runtime, config }
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// A copy of this runner with a different run timeout
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut runner = self.clone();
        runner.config.timeout = timeout;
        runner
    }

    /// Run and reduce the result to a single text blob: stdout, else
    /// stderr, else `"No output."`.
    ///
    /// # Errors
    ///
    /// Boot, mount and spawn failures from the runtime, or
    /// `JsboxError::Timeout` when the run outlives the configured timeout.
    pub async fn run(&self, request: RunRequest) -> Result<String> {
        Ok(self.execute(request).await?.into_output())
    }

    /// Same pipeline as [`Runner::run`], keeping the structured result.
    ///
    /// # Errors
    ///
    /// See [`Runner::run`].
    pub async fn execute(&self, request: RunRequest) -> Result<ExecutionResult> {
        let RunRequest {
            source,
            stdin,
            instance,
        } = request;

        let instance = match instance {
            Some(instance) => instance,
            None => {
                tracing::info!("booting ad hoc instance");
                let instance = self.runtime.boot().await?;
                tracing::info!(instance = %instance.id(), "ad hoc instance booted");
                instance
            }
        };

        // Runs sharing an instance would overwrite each other's entry file
        let _exclusive = instance.run_lock().lock().await;

        tracing::info!(instance = %instance.id(), file = %self.config.entry_file, "mounting code");
        instance
            .mount(&FileTree::single(self.config.entry_file.clone(), source))
            .await?;

        tracing::info!(
            instance = %instance.id(),
            program = %self.config.interpreter,
            "spawning process"
        );
        let started = Instant::now();
        let SandboxProcess {
            pid,
            output,
            stderr,
            stdin: sink,
            exit,
            kill,
        } = instance
            .spawn(&self.config.interpreter, &self.config.spawn_args())
            .await?;
        tracing::debug!(?pid, "process started");

        let completion = collect(output, stderr, sink, stdin, exit);

        // On expiry `completion` is dropped, which closes both streams
        let Ok(collected) = tokio::time::timeout(self.config.timeout, completion).await else {
            tracing::warn!(
                instance = %instance.id(),
                ?pid,
                timeout = ?self.config.timeout,
                "execution timed out, killing process"
            );
            kill.kill();
            return Err(JsboxError::Timeout {
                after: self.config.timeout,
            });
        };

        let (stdout, stderr, exit_code) = collected?;
        let result = ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration: started.elapsed(),
        };

        tracing::info!(exit_code, duration = ?result.duration, "process exited");
        if !result.stderr.is_empty() {
            tracing::warn!(stderr = %result.stderr, "process wrote to stderr");
        }
        tracing::info!(output = %result.output(), "run finished");

        Ok(result)
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(
            Arc::new(LocalRuntime::new(RuntimeConfig::default())),
            RunnerConfig::default(),
        )
    }
}

/// Run `source` with the default runner.
///
/// Boots an ad hoc local instance when `instance` is `None`.
///
/// # Errors
///
/// See [`Runner::run`].
pub async fn run(source: &str, stdin: &str, instance: Option<SandboxHandle>) -> Result<String> {
    Runner::default()
        .run(RunRequest::new(source).stdin(stdin).instance(instance))
        .await
}

/// Drain both streams, feed stdin and wait for exit, all concurrently
async fn collect(
    output: OutputStream,
    stderr: Option<OutputStream>,
    sink: Option<InputSink>,
    input: String,
    exit: ExitFuture,
) -> Result<(String, String, i32)> {
    let stderr = async {
        match stderr {
            Some(stream) => drain(stream).await,
            None => Ok(String::new()),
        }
    };

    let (stdout, stderr, (), exit_code) =
        tokio::join!(drain(output), stderr, feed(sink, input), exit);

    Ok((stdout?, stderr?, exit_code?))
}

async fn drain(mut stream: OutputStream) -> Result<String> {
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| JsboxError::Execution(format!("failed to read process output: {e}")))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write `input` and close stdin. A process that exits without reading is fine.
async fn feed(sink: Option<InputSink>, input: String) {
    let Some(mut sink) = sink else {
        return;
    };

    if !input.is_empty() {
        if let Err(e) = sink.write_all(input.as_bytes()).await {
            tracing::debug!(error = %e, "stdin closed before input was written");
            return;
        }
    }

    if let Err(e) = sink.shutdown().await {
        tracing::debug!(error = %e, "failed to close stdin");
    }
}
