//! Local runtime backed by host processes
//!
//! Each instance is a private working directory under `root_dir`. Spawned
//! processes run in that directory with a scrubbed environment and in their
//! own process group, so a kill takes down everything they started.

use crate::config::RuntimeConfig;
use crate::runtime::{
    ExitFuture, FileTree, InstanceId, KillHandle, SandboxHandle, SandboxInstance, SandboxProcess,
    SandboxRuntime, relative_path,
};
use crate::{JsboxError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

/// Boots instances as workdirs on the local host
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    config: Arc<RuntimeConfig>,
}

impl LocalRuntime {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    fn isolation_available(&self) -> bool {
        // Process groups are what make kill-on-timeout reach grandchildren
        cfg!(unix) && std::fs::create_dir_all(&self.config.root_dir).is_ok()
    }

    async fn boot(&self) -> Result<SandboxHandle> {
        let id = InstanceId::next();
        let workdir = self.config.root_dir.join(id.to_string());
        tracing::info!(instance = %id, workdir = ?workdir, "booting instance");

        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| JsboxError::Boot(format!("failed to create {}: {e}", workdir.display())))?;

        // Constructed before the probe so a failed boot still removes the workdir
        let instance = LocalInstance {
            id,
            workdir,
            env: self.config.env.clone(),
            run_lock: Mutex::new(()),
        };

        let version = probe_interpreter(&self.config, &instance.workdir).await?;
        tracing::info!(instance = %id, version = %version, "instance booted");

        Ok(Arc::new(instance))
    }
}

/// Run the configured probe to confirm the interpreter starts at all
async fn probe_interpreter(config: &RuntimeConfig, workdir: &Path) -> Result<String> {
    let interpreter = config.interpreter.display().to_string();

    let probe = Command::new(&config.interpreter)
        .args(&config.probe_args)
        .current_dir(workdir)
        .env_clear()
        .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(config.boot_timeout, probe)
        .await
        .map_err(|_| {
            JsboxError::Boot(format!(
                "{interpreter} probe did not finish within {:?}",
                config.boot_timeout
            ))
        })?
        .map_err(|e| JsboxError::Boot(format!("{interpreter} is not runnable: {e}")))?;

    if !output.status.success() {
        return Err(JsboxError::Boot(format!(
            "{interpreter} probe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A booted local instance. Its workdir is removed on drop.
#[derive(Debug)]
pub struct LocalInstance {
    id: InstanceId,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    run_lock: Mutex<()>,
}

#[async_trait]
impl SandboxInstance for LocalInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn run_lock(&self) -> &Mutex<()> {
        &self.run_lock
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        for (path, contents) in tree.iter() {
            let dest = self.workdir.join(relative_path(path)?);

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| JsboxError::Mount(format!("{path}: {e}")))?;
            }

            tokio::fs::write(&dest, contents)
                .await
                .map_err(|e| JsboxError::Mount(format!("{path}: {e}")))?;
        }

        tracing::debug!(instance = %self.id, files = tree.len(), "file tree mounted");
        Ok(())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| JsboxError::Spawn(format!("{program}: {e}")))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JsboxError::Spawn("stdout was not captured".into()))?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let (kill, kill_rx) = KillHandle::pair();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, pid, kill_rx, exit_tx));

        let exit: ExitFuture = Box::pin(async move {
            exit_rx
                .await
                .map_err(|_| JsboxError::Execution("process watcher went away".into()))?
        });

        let mut process = SandboxProcess::new(Box::new(stdout), exit)
            .with_pid(pid)
            .with_kill(kill);
        if let Some(stderr) = stderr {
            process = process.with_stderr(Box::new(stderr));
        }
        if let Some(stdin) = stdin {
            process = process.with_stdin(Box::new(stdin));
        }

        Ok(process)
    }
}

impl Drop for LocalInstance {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.workdir) {
            tracing::debug!(instance = %self.id, error = %e, "workdir cleanup failed");
        }
    }
}

/// Own the child until it exits or a kill is requested, then report its code.
///
/// The process group outlives its leader when a background child keeps
/// running, so the watcher stays around after reporting the exit and kills
/// the group once the `KillHandle` fires or is dropped.
async fn watch_child(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<Result<i32>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut kill_rx => None,
    };

    let status = match exited {
        Some(status) => {
            report_exit(exit_tx, status);
            // Err means the handle was dropped; the group is swept either way
            let _ = kill_rx.await;
            kill_group(pid);
            return;
        }
        None => {
            kill_group(pid);
            if let Err(e) = child.start_kill() {
                tracing::debug!(?pid, error = %e, "child already gone");
            }
            child.wait().await
        }
    };

    report_exit(exit_tx, status);
}

fn report_exit(exit_tx: oneshot::Sender<Result<i32>>, status: std::io::Result<ExitStatus>) {
    let code = status
        .map(exit_code)
        .map_err(|e| JsboxError::Execution(format!("failed to wait for process: {e}")));

    // Receiver is gone when the run was abandoned; nothing left to report to
    let _ = exit_tx.send(code);
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid, "process group killed"),
        Err(e) => tracing::debug!(pgid, error = %e, "process group kill failed"),
    }
}

#[cfg(not(unix))]
const fn kill_group(_pid: Option<u32>) {}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            tracing::debug!(signal, "process terminated by signal");
        }
    }

    status.code().unwrap_or(-1)
}
