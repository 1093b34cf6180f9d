// CLI main entry point
// Talks to sbs-daemon over the local IPC socket

use clap::{Parser, Subcommand};
use screen_brightness_server::component::{CallResult, Invocation};
use screen_brightness_server::config::Config;
use screen_brightness_server::distribution::DISTRIBUTION;
use screen_brightness_server::ipc::{IpcClient, IpcMessage, IpcResponse, DEFAULT_SOCKET_PATH};
use screen_brightness_server::{Error, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing_subscriber::EnvFilter;

const DAEMON_UNIT: &str = "sbs-daemon.service";

#[derive(Parser)]
#[command(name = "sbs")]
#[command(about = "Control the screen-brightness-server daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon IPC socket (default: server.socket_path from config.toml)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,

    /// List running components
    Components,

    /// Show package information and check its dependency table
    Info,

    /// List registered procedures
    Procedures,

    /// Screen brightness
    Brightness {
        #[command(subcommand)]
        action: BrightnessAction,
    },

    /// Lock the screen
    Lock,

    /// Report whether the screen is locked
    IsLocked,

    /// Pointer control
    Mouse {
        #[command(subcommand)]
        action: MouseAction,
    },

    /// Show the mDNS advertisement
    Discovery,

    /// Call any procedure; arguments are parsed as JSON, falling back to strings
    Call {
        procedure: String,
        args: Vec<String>,
    },

    /// Daemon control commands
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum BrightnessAction {
    /// Print the brightness in percent
    Get,
    /// Set the brightness in percent (clamped to 1-100)
    Set {
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },
}

#[derive(Subcommand)]
enum MouseAction {
    /// Print the pointer position
    Position,
    /// Move the pointer relative to where it is
    Move {
        #[arg(allow_negative_numbers = true)]
        dx: i64,
        #[arg(allow_negative_numbers = true)]
        dy: i64,
    },
    /// Move the pointer to a screen position
    MoveTo { x: i64, y: i64 },
    /// Click a button (left, middle, right or 1-3)
    Click {
        #[arg(default_value = "left")]
        button: String,
        #[arg(default_value_t = 1)]
        count: i64,
    },
    /// Press and hold a button
    Press { button: String },
    /// Release a held button
    Release { button: String },
    /// Scroll up, down, left or right
    Scroll {
        direction: String,
        #[arg(default_value_t = 1)]
        steps: i64,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start,
    /// Stop the daemon
    Stop,
    /// Restart the daemon
    Restart,
    /// Ask the running daemon to exit over IPC (works without systemd)
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = IpcClient::new(socket_path(cli.socket, &Config::get_config_path()));

    match cli.command {
        Commands::Status => handle_status(&client).await,
        Commands::Components => handle_components(&client).await,
        Commands::Info => handle_info(),
        Commands::Procedures => handle_procedures(&client).await,
        Commands::Brightness { action } => handle_brightness(&client, action).await,
        Commands::Lock => {
            client.call("screen.lock", Invocation::default()).await?;
            println!("Screen locked.");
            Ok(())
        }
        Commands::IsLocked => {
            let result = client.call("screen.islocked", Invocation::default()).await?;
            let locked = result.args.first().and_then(Value::as_bool).unwrap_or(false);
            println!("{}", if locked { "locked" } else { "unlocked" });
            Ok(())
        }
        Commands::Mouse { action } => handle_mouse(&client, action).await,
        Commands::Discovery => {
            let result = client.call("discovery.info", Invocation::default()).await?;
            print_result(&result);
            Ok(())
        }
        Commands::Call { procedure, args } => {
            let invocation = Invocation::with_args(args.iter().map(String::as_str).map(parse_call_arg).collect());
            let result = client.call(&procedure, invocation).await?;
            print_result(&result);
            Ok(())
        }
        Commands::Daemon { action } => handle_daemon(&client, action).await,
    }
}

/// Socket from the command line, else from the daemon's config file, else the default
fn socket_path(explicit: Option<PathBuf>, config_path: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if !config_path.exists() {
        return PathBuf::from(DEFAULT_SOCKET_PATH);
    }
    match Config::load_from(config_path) {
        Ok(config) => config.server.socket_path,
        Err(e) => {
            tracing::warn!("Ignoring {}: {}", config_path.display(), e);
            PathBuf::from(DEFAULT_SOCKET_PATH)
        }
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_call_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_result(result: &CallResult) {
    if result.args.is_empty() && result.kwargs.is_empty() {
        println!("ok");
        return;
    }
    if !result.args.is_empty() {
        let args = if result.args.len() == 1 {
            result.args[0].clone()
        } else {
            Value::Array(result.args.clone())
        };
        println!("{}", render(&args));
    }
    if !result.kwargs.is_empty() {
        println!("{}", render(&Value::Object(result.kwargs.clone())));
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn unexpected(response: IpcResponse) -> Error {
    match response {
        IpcResponse::Error { uri, message } => Error::Remote { uri, message },
        other => Error::ipc_protocol(format!("Unexpected response from daemon: {:?}", other)),
    }
}

async fn handle_status(client: &IpcClient) -> Result<()> {
    match client.send_message(&IpcMessage::Status).await? {
        IpcResponse::Status(info) => {
            println!("Screen Brightness Server Status");
            println!("===============================");
            println!("Version:     {} {}", info.name, info.version);
            println!("Endpoint:    ws://{}", info.listen);
            println!("Realm:       {}", info.realm);
            println!("Started:     {}", info.started_at);
            println!("Sessions:    {}", info.sessions);
            println!("Components:  {}", info.components);
            println!("Procedures:  {}", info.procedures);
            for skipped in &info.skipped {
                println!("Unavailable: {} ({})", skipped.identity, skipped.reason.lines().next().unwrap_or(""));
            }
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn handle_components(client: &IpcClient) -> Result<()> {
    match client.send_message(&IpcMessage::ListComponents).await? {
        IpcResponse::Components(components) => {
            println!("Running Components:");
            println!("==================");
            for component in components {
                println!("  - {} [{}]", component.identity, component.kind);
                for uri in component.procedures {
                    println!("      {}", uri);
                }
            }
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn handle_procedures(client: &IpcClient) -> Result<()> {
    match client.send_message(&IpcMessage::ListProcedures).await? {
        IpcResponse::Procedures(procedures) => {
            for uri in procedures {
                println!("{}", uri);
            }
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

fn handle_info() -> Result<()> {
    println!("{} {}", DISTRIBUTION.name, DISTRIBUTION.version);
    println!("{}", DISTRIBUTION.description);
    println!("Author:     {}", DISTRIBUTION.author);
    println!("License:    {}", DISTRIBUTION.license);
    println!("Homepage:   {}", DISTRIBUTION.repository);
    println!("Download:   {}", DISTRIBUTION.download_url);
    println!("Keywords:   {}", DISTRIBUTION.keywords.join(", "));
    println!("Requires:");
    for requirement in DISTRIBUTION.requires {
        println!("  {:<18} {}", requirement.role.as_str(), requirement.crate_name);
    }

    DISTRIBUTION.verify()?;
    println!("Dependency check: ok");
    Ok(())
}

async fn handle_brightness(client: &IpcClient, action: BrightnessAction) -> Result<()> {
    match action {
        BrightnessAction::Get => {
            let result = client
                .call("screen.brightness.get", Invocation::default())
                .await?;
            let percent = result.args.first().and_then(Value::as_i64).ok_or_else(|| {
                Error::ipc_protocol("Brightness reply did not carry a number")
            })?;
            println!("{}%", percent);
        }
        BrightnessAction::Set { percent } => {
            client
                .call("screen.brightness.set", Invocation::with_args(vec![json!(percent)]))
                .await?;
            println!("Brightness set to {}%", percent.clamp(1, 100));
        }
    }
    Ok(())
}

fn mouse_invocation(action: &MouseAction) -> (&'static str, Vec<Value>) {
    match action {
        MouseAction::Position => ("mouse.position", vec![]),
        MouseAction::Move { dx, dy } => ("mouse.move", vec![json!(dx), json!(dy)]),
        MouseAction::MoveTo { x, y } => ("mouse.move_to", vec![json!(x), json!(y)]),
        MouseAction::Click { button, count } => {
            ("mouse.click", vec![parse_call_arg(button), json!(count)])
        }
        MouseAction::Press { button } => ("mouse.press", vec![parse_call_arg(button)]),
        MouseAction::Release { button } => ("mouse.release", vec![parse_call_arg(button)]),
        MouseAction::Scroll { direction, steps } => {
            ("mouse.scroll", vec![json!(direction), json!(steps)])
        }
    }
}

async fn handle_mouse(client: &IpcClient, action: MouseAction) -> Result<()> {
    let (procedure, args) = mouse_invocation(&action);
    let result = client.call(procedure, Invocation::with_args(args)).await?;

    match (&action, result.args.as_slice()) {
        (MouseAction::Position, [x, y]) => println!("{} {}", x, y),
        _ => print_result(&result),
    }
    Ok(())
}

/// Run `systemctl --user <verb>` on the daemon unit
fn systemctl(verb: &str, done: &str) -> Result<()> {
    let output = Command::new("systemctl")
        .args(["--user", verb, DAEMON_UNIT])
        .output()
        .map_err(|e| Error::ipc_connection(format!("Failed to execute systemctl: {}", e)))?;

    if output.status.success() {
        println!("Daemon {} successfully.", done);
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::ipc_connection(format!(
            "Failed to {} daemon: {}",
            verb, stderr
        )))
    }
}

async fn handle_daemon(client: &IpcClient, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start => {
            println!("Starting sbs-daemon...");
            systemctl("start", "started")
        }
        DaemonAction::Stop => {
            println!("Stopping sbs-daemon...");
            systemctl("stop", "stopped")
        }
        DaemonAction::Restart => {
            println!("Restarting sbs-daemon...");
            systemctl("restart", "restarted")
        }
        DaemonAction::Shutdown => match client.send_message(&IpcMessage::Shutdown).await? {
            IpcResponse::Ok => {
                println!("Daemon is shutting down.");
                Ok(())
            }
            other => Err(unexpected(other)),
        },
    }
}
