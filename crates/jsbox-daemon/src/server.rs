//! Unix socket server

use futures::StreamExt;
use jsbox_core::protocol::{self, ExecuteRequest, ExecuteResponse, Request, Response};
use jsbox_core::{JsboxError, RunRequest, Runner, SandboxContext};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{UnixListener, UnixStream};

/// State shared by every connection
#[derive(Debug)]
pub struct Daemon {
    context: Arc<SandboxContext>,
    runner: Runner,
    runs: AtomicU64,
}

impl Daemon {
    pub fn new(context: Arc<SandboxContext>, runner: Runner) -> Self {
        Self {
            context,
            runner,
            runs: AtomicU64::new(0),
        }
    }

    /// Handle a single request
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Execute(req) => Response::Execute(self.execute(req).await),
            Request::Status => {
                let stats = self.context.stats();
                Response::Status {
                    cached: stats.cached.is_some(),
                    instance_id: stats.cached.map(|id| id.to_string()),
                    boot_attempts: stats.boot_attempts,
                    boots: stats.boots,
                    runs: self.runs.load(Ordering::Relaxed),
                }
            }
            Request::Reset => {
                self.context.reset();
                Response::Reset
            }
            Request::Ping => Response::Pong,
        }
    }

    async fn execute(&self, req: ExecuteRequest) -> ExecuteResponse {
        let instance = if req.fresh {
            None
        } else {
            match self.context.get_or_create().await {
                Ok(instance) => Some(instance),
                Err(e) => return ExecuteResponse::failed(&e),
            }
        };

        let runner = match req.timeout {
            Some(timeout) => self.runner.with_timeout(timeout),
            None => self.runner.clone(),
        };

        self.runs.fetch_add(1, Ordering::Relaxed);
        let request = RunRequest::new(req.code).stdin(req.stdin).instance(instance);

        match runner.run(request).await {
            Ok(output) => ExecuteResponse::ok(output),
            Err(e) => {
                tracing::warn!(error = %e, "run failed");
                ExecuteResponse::failed(&e)
            }
        }
    }
}

/// Accept connections until SIGINT or SIGTERM, then remove the socket
pub async fn run(listener: UnixListener, daemon: Daemon, socket_path: &Path) -> anyhow::Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};

    let daemon = Arc::new(daemon);
    let mut signals = signal_hook_tokio::Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let daemon = Arc::clone(&daemon);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, daemon).await {
                        tracing::error!(error = %e, "connection error");
                    }
                });
            }
            Some(signal) = signals.next() => {
                tracing::info!(signal, "shutting down");
                break;
            }
        }
    }

    signals_handle.close();
    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::warn!(error = %e, socket = ?socket_path, "failed to remove socket");
    }

    Ok(())
}

/// Handle a single client connection.
///
/// A frame that can't be read as a request gets an `Error` response, then
/// the connection is closed since the stream may be out of step.
async fn handle_connection(mut stream: UnixStream, daemon: Arc<Daemon>) -> jsbox_core::Result<()> {
    loop {
        let request = match protocol::read_frame::<_, Request>(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(JsboxError::Protocol(message)) => {
                tracing::warn!(error = %message, "malformed request");
                let response = Response::Error { message };
                return protocol::write_frame(&mut stream, &response).await;
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(?request, "received request");
        let response = daemon.handle_request(request).await;
        protocol::write_frame(&mut stream, &response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsbox_core::{LocalRuntime, RunnerConfig, RuntimeConfig};

    fn sh_daemon(root: &Path) -> Daemon {
        let runtime = Arc::new(LocalRuntime::new(
            RuntimeConfig::builder()
                .interpreter("sh")
                .probe_args(["-c", "true"])
                .root_dir(root)
                .build(),
        ));
        let runner = Runner::new(
            runtime.clone(),
            RunnerConfig::builder()
                .interpreter("sh")
                .entry_file("main.sh")
                .build(),
        );
        Daemon::new(Arc::new(SandboxContext::new(runtime)), runner)
    }

    fn execute(code: &str, fresh: bool) -> Request {
        Request::Execute(ExecuteRequest {
            code: code.into(),
            fresh,
            ..ExecuteRequest::default()
        })
    }

    #[tokio::test]
    async fn shared_instance_is_reused_until_reset() {
        let root = tempfile::tempdir().unwrap();
        let daemon = sh_daemon(root.path());

        for _ in 0..2 {
            let Response::Execute(resp) = daemon.handle_request(execute("echo hi", false)).await else {
                panic!("expected execute response");
            };
            assert_eq!(resp.output.as_deref(), Some("hi\n"));
        }

        let Response::Status { cached, boots, runs, .. } = daemon.handle_request(Request::Status).await else {
            panic!("expected status");
        };
        assert!(cached);
        assert_eq!(boots, 1);
        assert_eq!(runs, 2);

        assert!(matches!(daemon.handle_request(Request::Reset).await, Response::Reset));
        let Response::Status { cached, .. } = daemon.handle_request(Request::Status).await else {
            panic!("expected status");
        };
        assert!(!cached);
    }

    #[tokio::test]
    async fn fresh_runs_leave_shared_instance_alone() {
        let root = tempfile::tempdir().unwrap();
        let daemon = sh_daemon(root.path());

        let Response::Execute(resp) = daemon.handle_request(execute("printf boom >&2", true)).await else {
            panic!("expected execute response");
        };
        assert_eq!(resp.output.as_deref(), Some("boom"));

        let Response::Status { cached, boot_attempts, .. } = daemon.handle_request(Request::Status).await else {
            panic!("expected status");
        };
        assert!(!cached);
        assert_eq!(boot_attempts, 0);
    }

    #[tokio::test]
    async fn timeout_override_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let daemon = sh_daemon(root.path());

        let request = Request::Execute(ExecuteRequest {
            code: "sleep 30".into(),
            timeout: Some(std::time::Duration::from_millis(200)),
            fresh: true,
            ..ExecuteRequest::default()
        });
        let Response::Execute(resp) = daemon.handle_request(request).await else {
            panic!("expected execute response");
        };
        assert!(!resp.success);
        assert!(resp.timed_out);
        assert_eq!(resp.error.as_deref(), Some("Execution timed out"));
    }

    #[tokio::test]
    async fn serves_frames_over_a_socket() {
        let root = tempfile::tempdir().unwrap();
        let socket = root.path().join("jsbox.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let daemon = Arc::new(sh_daemon(&root.path().join("instances")));

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, daemon).await
        });

        let mut client = UnixStream::connect(&socket).await.unwrap();
        protocol::write_frame(&mut client, &Request::Ping).await.unwrap();
        let response: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert!(matches!(response, Some(Response::Pong)));

        drop(client);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_response() {
        use tokio::io::AsyncWriteExt;

        let root = tempfile::tempdir().unwrap();
        let socket = root.path().join("jsbox.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let daemon = Arc::new(sh_daemon(&root.path().join("instances")));

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, daemon).await
        });

        let mut client = UnixStream::connect(&socket).await.unwrap();
        // 0xc1 is never valid msgpack
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xc1, 0xc1, 0xc1]).await.unwrap();

        let response: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert!(matches!(response, Some(Response::Error { .. })), "got {response:?}");

        // Server closes its side afterwards
        let next: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert!(next.is_none());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn overlapping_shared_runs_keep_their_output() {
        let root = tempfile::tempdir().unwrap();
        let daemon = sh_daemon(root.path());

        for i in 0..10 {
            let (a, b) = tokio::join!(
                daemon.handle_request(execute(&format!("echo A{i}"), false)),
                daemon.handle_request(execute(&format!("echo B{i}"), false)),
            );
            let (Response::Execute(a), Response::Execute(b)) = (a, b) else {
                panic!("expected execute responses");
            };
            assert_eq!(a.output, Some(format!("A{i}\n")));
            assert_eq!(b.output, Some(format!("B{i}\n")));
        }
    }
}
