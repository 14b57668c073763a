//! jsbox CLI - run scripts in a sandbox, directly or through the daemon

use clap::{Parser, Subcommand};
use jsbox_core::config::default_socket_path;
use jsbox_core::protocol::{self, ExecuteRequest, Request, Response};
use jsbox_core::{LocalRuntime, RunRequest, Runner, RunnerConfig, RuntimeConfig};
use std::error::Error;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "jsbox")]
#[command(author, version, about = "Run scripts in a sandboxed interpreter with a hard timeout")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code through the daemon's shared instance
    Exec {
        /// Code to execute (or - for stdin)
        code: String,

        /// Socket path (defaults to JSBOX_SOCKET env var or /run/jsbox/jsbox.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Text fed to the program's stdin
        #[arg(short, long, default_value = "")]
        input: String,

        /// Timeout in seconds (daemon default if omitted)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Run in a throwaway instance instead of the shared one
        #[arg(long)]
        fresh: bool,
    },

    /// Get daemon status
    Status {
        /// Socket path (defaults to JSBOX_SOCKET env var or /run/jsbox/jsbox.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ping the daemon
    Ping {
        /// Socket path (defaults to JSBOX_SOCKET env var or /run/jsbox/jsbox.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Drop the daemon's shared instance; the next exec boots a new one
    Reset {
        /// Socket path (defaults to JSBOX_SOCKET env var or /run/jsbox/jsbox.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Run code directly in an ad hoc instance (no daemon)
    Run {
        /// Code to execute (or - for stdin)
        code: String,

        /// Text fed to the program's stdin
        #[arg(short, long, default_value = "")]
        input: String,

        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Interpreter to run the code with
        #[arg(long, default_value = "node")]
        interpreter: String,

        /// File name the code is mounted under
        #[arg(long, default_value = "index.js")]
        entry: String,

        /// Boot probe arguments (defaults to --version)
        #[arg(long = "probe-arg", allow_hyphen_values = true)]
        probe_args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("jsbox=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Exec {
            code,
            socket,
            input,
            timeout,
            fresh,
        } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let request = Request::Execute(ExecuteRequest {
                code: read_code(code)?,
                stdin: input,
                timeout: timeout.map(Duration::from_secs),
                fresh,
            });

            match send(&socket, &request).await? {
                Response::Execute(resp) if resp.success => print_output(resp.output.as_deref().unwrap_or_default())?,
                Response::Execute(resp) => {
                    return Err(resp.error.unwrap_or_else(|| "execution failed".into()).into());
                }
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Status { socket, json } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match send(&socket, &Request::Status).await? {
                Response::Status {
                    cached,
                    instance_id,
                    boot_attempts,
                    boots,
                    runs,
                } => {
                    if json {
                        let status = serde_json::json!({
                            "cached": cached,
                            "instance_id": instance_id,
                            "boot_attempts": boot_attempts,
                            "boots": boots,
                            "runs": runs,
                        });
                        println!("{}", serde_json::to_string_pretty(&status)?);
                    } else {
                        println!("instance: {}", instance_id.as_deref().unwrap_or("none"));
                        println!("boots: {boots} ({boot_attempts} attempted)");
                        println!("runs: {runs}");
                    }
                }
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Ping { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match send(&socket, &Request::Ping).await? {
                Response::Pong => println!("pong"),
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Reset { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match send(&socket, &Request::Reset).await? {
                Response::Reset => println!("shared instance reset"),
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Run {
            code,
            input,
            timeout,
            interpreter,
            entry,
            probe_args,
        } => {
            let mut runtime = RuntimeConfig::builder().interpreter(&interpreter);
            if !probe_args.is_empty() {
                runtime = runtime.probe_args(probe_args);
            }

            let runner = Runner::new(
                Arc::new(LocalRuntime::new(runtime.build())),
                RunnerConfig::builder()
                    .interpreter(interpreter)
                    .entry_file(entry)
                    .timeout_secs(timeout)
                    .build(),
            );

            let output = runner
                .run(RunRequest::new(read_code(code)?).stdin(input))
                .await?;
            print_output(&output)?;
        }
    }

    Ok(())
}

/// Take code from the argument, or from stdin when it is `-`
fn read_code(code: String) -> std::io::Result<String> {
    if code != "-" {
        return Ok(code);
    }

    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

async fn send(socket: &Path, request: &Request) -> Result<Response, Box<dyn Error>> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| format!("cannot connect to daemon at {}: {e}", socket.display()))?;

    protocol::write_frame(&mut stream, request).await?;
    protocol::read_frame(&mut stream)
        .await?
        .ok_or_else(|| "daemon closed the connection".into())
}

fn print_output(output: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()
}

fn unexpected(response: &Response) -> Box<dyn Error> {
    match response {
        Response::Error { message } => message.clone().into(),
        other => format!("unexpected response from daemon: {other:?}").into(),
    }
}
