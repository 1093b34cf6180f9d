// Daemon main entry point
// Hosts the desktop components behind the WAMP router and the local IPC socket

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;
use screen_brightness_server::{
    component::Invocation,
    config::Config,
    distribution::DISTRIBUTION,
    error::uri,
    host::ComponentHost,
    ipc::{IpcMessage, IpcResponse, IpcServer, SkippedComponent, StatusInfo},
    registry::{self, HostContext},
    wamp::{self, Router},
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, UnixStream};
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long a connected CLI may take to send its request
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "sbs-daemon")]
#[command(about = "WAMP server exposing screen brightness, pointer, lock and discovery")]
#[command(version)]
struct Args {
    /// Configuration file (default: $XDG_CONFIG_HOME/screen-brightness-server/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Daemon {
    config: Config,
    host: ComponentHost,
    ipc_server: IpcServer,
    server: JoinHandle<std::io::Result<()>>,
    stop_server: Option<oneshot::Sender<()>>,
    started_at: DateTime<Local>,
}

impl Daemon {
    async fn new(config: Config) -> anyhow::Result<Self> {
        DISTRIBUTION
            .verify()
            .context("Runtime dependency table does not match the build manifest")?;

        let router = Arc::new(
            Router::new(
                config.server.realm.clone(),
                Duration::from_secs(config.server.call_timeout_secs),
            )
            .with_reserved_prefix(config.server.procedure_prefix.clone()),
        );

        let ctx = HostContext::from_system(config.clone()).context("Failed to read hostname")?;
        let host = ComponentHost::start(registry::standard(), &ctx, router.clone())
            .await
            .context("Failed to start components")?;

        let listen = config.listen_addr();
        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", listen))?;

        let (stop_server, stopped) = oneshot::channel::<()>();
        let app = wamp::server::app(router, &config.server.path);
        let server = tokio::spawn(wamp::server::serve(listener, app, async {
            let _ = stopped.await;
        }));
        info!(
            "WAMP endpoint ws://{}{} (realm {})",
            listen, config.server.path, config.server.realm
        );

        let ipc_server = IpcServer::new(&config.server.socket_path)
            .await
            .context("Failed to create IPC server")?;

        Ok(Self {
            config,
            host,
            ipc_server,
            server,
            stop_server: Some(stop_server),
            started_at: Local::now(),
        })
    }

    async fn run(&mut self) -> Result<()> {
        info!(
            "{} {} started, IPC socket: {}",
            DISTRIBUTION.name,
            DISTRIBUTION.version,
            self.ipc_server.socket_path().display()
        );

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down...");
                    break;
                }
                _ = Self::wait_for_sigterm() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }

                accepted = self.ipc_server.accept() => {
                    match accepted {
                        Ok(stream) => {
                            if self.handle_connection(stream).await {
                                info!("Shutdown requested via IPC");
                                break;
                            }
                        }
                        Err(e) => warn!("{}", e),
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Daemon shutdown complete");
        Ok(())
    }

    /// Serve one IPC request; returns true when the daemon should stop
    async fn handle_connection(&self, mut stream: UnixStream) -> bool {
        let message = match timeout(IPC_READ_TIMEOUT, IpcMessage::receive(&mut stream)).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!("Error receiving IPC message: {}", e);
                return false;
            }
            Err(_) => {
                warn!("IPC client sent nothing within {:?}", IPC_READ_TIMEOUT);
                return false;
            }
        };
        debug!("IPC request: {:?}", message);

        let (response, stop) = match message {
            IpcMessage::Status => (IpcResponse::Status(self.status()), false),
            IpcMessage::ListComponents => (IpcResponse::Components(self.host.components()), false),
            IpcMessage::ListProcedures => {
                (IpcResponse::Procedures(self.host.router().procedures()), false)
            }
            IpcMessage::Call {
                procedure,
                args,
                kwargs,
            } => {
                // Calls can take up to the call timeout; answer them off the main loop
                let router = self.host.router().clone();
                let procedure = self.resolve_procedure(&procedure);
                tokio::spawn(async move {
                    let response = match router.call(&procedure, Invocation::new(args, kwargs)).await {
                        Ok(result) => IpcResponse::Result(result),
                        Err(e) => {
                            debug!("IPC call to {} failed: {}", procedure, e);
                            IpcResponse::from_error(&e)
                        }
                    };
                    if let Err(e) = response.send(&mut stream).await {
                        error!("Error sending IPC response: {}", e);
                    }
                });
                return false;
            }
            IpcMessage::Shutdown => (IpcResponse::Ok, true),
        };

        if let Err(e) = response.send(&mut stream).await {
            error!("Error sending IPC response: {}", e);
        }
        stop
    }

    /// Accept both full URIs and bare suffixes such as `screen.lock`
    fn resolve_procedure(&self, name: &str) -> String {
        let prefix = format!("{}.", self.config.server.procedure_prefix);
        if name.starts_with(&prefix) {
            name.to_string()
        } else {
            self.config.procedure_uri(name)
        }
    }

    fn status(&self) -> StatusInfo {
        let router = self.host.router();
        StatusInfo {
            name: DISTRIBUTION.name.to_string(),
            version: DISTRIBUTION.version.to_string(),
            realm: router.realm().to_string(),
            listen: format!("{}{}", self.config.listen_addr(), self.config.server.path),
            sessions: router.session_count(),
            components: self.host.components().len(),
            procedures: router.procedures().len(),
            skipped: self
                .host
                .skipped()
                .iter()
                .map(|(identity, reason)| SkippedComponent {
                    identity: identity.to_string(),
                    reason: reason.clone(),
                })
                .collect(),
            started_at: self.started_at.to_rfc3339(),
        }
    }

    async fn shutdown(&mut self) {
        self.host.router().close_all(uri::SYSTEM_SHUTDOWN);
        self.host.shutdown().await;

        if let Some(stop) = self.stop_server.take() {
            let _ = stop.send(());
        }
        match timeout(Duration::from_secs(5), &mut self.server).await {
            Ok(Ok(Ok(()))) => debug!("WebSocket server stopped"),
            Ok(Ok(Err(e))) => error!("WebSocket server error: {}", e),
            Ok(Err(e)) => error!("WebSocket server task failed: {}", e),
            Err(_) => {
                warn!("WebSocket server did not stop in time, aborting");
                self.server.abort();
            }
        }
    }

    async fn wait_for_sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to set up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(args.config.as_ref()).map_err(|e| {
        if e.is_config_error() {
            error!("Please fix the configuration file and try again.");
        }
        e
    })?;

    let mut daemon = Daemon::new(config).await?;
    daemon.run().await?;
    Ok(())
}
