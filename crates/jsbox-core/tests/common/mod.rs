//! Scripted in-memory runtime for exercising the context and runner
//! without real processes.

#![allow(dead_code)]

use async_trait::async_trait;
use jsbox_core::runtime::{KillHandle, SandboxProcess};
use jsbox_core::{FileTree, InstanceId, JsboxError, Result, SandboxHandle, SandboxInstance, SandboxRuntime};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// What a spawned process does
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: String,
    /// `None` means the process exposes no stderr stream at all
    pub stderr: Option<String>,
    pub exit_code: i32,
    /// Never exit and never close stdout until killed
    pub hang: bool,
}

impl Script {
    pub fn stdout(text: &str) -> Self {
        Self {
            stdout: text.into(),
            stderr: Some(String::new()),
            ..Self::default()
        }
    }

    pub fn stderr(text: &str) -> Self {
        Self {
            stderr: Some(text.into()),
            exit_code: 1,
            ..Self::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct ScriptedRuntime {
    pub isolated: AtomicBool,
    pub fail_boot: AtomicBool,
    pub boots: AtomicUsize,
    pub boot_delay: Duration,
    pub script: Mutex<Script>,
    pub instances: Mutex<Vec<Arc<ScriptedInstance>>>,
}

impl ScriptedRuntime {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Script, boot_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            isolated: AtomicBool::new(true),
            fail_boot: AtomicBool::new(false),
            boots: AtomicUsize::new(0),
            boot_delay,
            script: Mutex::new(script),
            instances: Mutex::new(Vec::new()),
        })
    }

    pub fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    pub fn last_instance(&self) -> Arc<ScriptedInstance> {
        self.instances.lock().last().cloned().expect("no instance booted")
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    fn isolation_available(&self) -> bool {
        self.isolated.load(Ordering::SeqCst)
    }

    async fn boot(&self) -> Result<SandboxHandle> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        if !self.boot_delay.is_zero() {
            tokio::time::sleep(self.boot_delay).await;
        }
        if self.fail_boot.load(Ordering::SeqCst) {
            return Err(JsboxError::Boot("scripted boot failure".into()));
        }

        let instance = Arc::new(ScriptedInstance {
            id: InstanceId::next(),
            script: self.script.lock().clone(),
            mounted: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            stdin_seen: Arc::new(Mutex::new(String::new())),
            killed: Arc::new(AtomicBool::new(false)),
            run_lock: tokio::sync::Mutex::new(()),
        });
        self.instances.lock().push(Arc::clone(&instance));
        Ok(instance)
    }
}

#[derive(Debug)]
pub struct ScriptedInstance {
    pub id: InstanceId,
    pub script: Script,
    pub mounted: Mutex<Vec<FileTree>>,
    pub spawned: Mutex<Vec<(String, Vec<String>)>>,
    pub stdin_seen: Arc<Mutex<String>>,
    pub killed: Arc<AtomicBool>,
    pub run_lock: tokio::sync::Mutex<()>,
}

#[async_trait]
impl SandboxInstance for ScriptedInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn run_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.run_lock
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        for (path, _) in tree.iter() {
            jsbox_core::runtime::relative_path(path)?;
        }
        self.mounted.lock().push(tree.clone());
        Ok(())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SandboxProcess> {
        if self.mounted.lock().is_empty() {
            return Err(JsboxError::Spawn("nothing mounted".into()));
        }
        self.spawned.lock().push((program.to_string(), args.to_vec()));

        let (stdin_tx, mut stdin_rx) = tokio::io::duplex(1024);
        let seen = Arc::clone(&self.stdin_seen);
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdin_rx.read_to_string(&mut buf).await;
            *seen.lock() = buf;
        });

        let (kill, kill_rx) = KillHandle::pair();
        let killed = Arc::clone(&self.killed);

        let process = if self.script.hang {
            // Writer half stays open until the kill arrives
            let (writer, reader) = tokio::io::duplex(64);
            tokio::spawn(async move {
                if kill_rx.await.is_ok() {
                    killed.store(true, Ordering::SeqCst);
                }
                drop(writer);
            });
            SandboxProcess::new(Box::new(reader), Box::pin(futures::future::pending::<Result<i32>>()))
        } else {
            tokio::spawn(async move {
                if kill_rx.await.is_ok() {
                    killed.store(true, Ordering::SeqCst);
                }
            });
            let code = self.script.exit_code;
            let mut process = SandboxProcess::new(
                Box::new(Cursor::new(self.script.stdout.clone().into_bytes())),
                Box::pin(async move { Ok::<_, JsboxError>(code) }),
            );
            if let Some(stderr) = &self.script.stderr {
                process = process.with_stderr(Box::new(Cursor::new(stderr.clone().into_bytes())));
            }
            process
        };

        Ok(process.with_stdin(Box::new(stdin_tx)).with_kill(kill))
    }
}

/// Whether `sh` can be spawned on this host
pub fn have_sh() -> bool {
    std::process::Command::new("sh")
        .args(["-c", "true"])
        .status()
        .is_ok_and(|s| s.success())
}

/// Whether `node` can be spawned on this host
pub fn have_node() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}
