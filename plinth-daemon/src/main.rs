/*!
 * Plinth Appliance Daemon
 * Bluetooth audio discovery, display, media files and clock control
 */

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::info;

use plinth_daemon::bluetooth::BluetoothManager;
use plinth_daemon::clock::ClockManager;
use plinth_daemon::config::DaemonConfig;
use plinth_daemon::display::DisplayManager;
use plinth_daemon::ipc::{IpcServer, Managers, Request, Response};
use plinth_daemon::storage::StorageManager;

#[derive(Parser)]
#[command(name = "plinthd")]
#[command(about = "Plinth Appliance Daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/plinth/plinthd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check daemon status
    Status,
    /// Stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("plinth_daemon={}", log_level))
        .init();

    let config = DaemonConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config).await,
        Commands::Stop => stop_daemon(&config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("Plinth daemon starting...");

    let storage = StorageManager::new(&config.media_dir)?;
    let display = DisplayManager::new(&config.state_dir)?;
    display.restore();
    let clock = ClockManager::new().await.context("system clock")?;
    let bluetooth = BluetoothManager::new(&config.bluetooth)
        .await
        .context("bluetooth manager")?;

    let listener = bind_socket(&config.socket_path)?;
    let server = IpcServer::new(
        listener,
        Managers {
            bluetooth: Arc::new(bluetooth),
            display: Arc::new(display),
            storage: Arc::new(storage),
            clock: Arc::new(clock),
        },
    );

    info!("Plinth daemon ready on socket: {}", config.socket_path);
    server.run().await?;

    let _ = std::fs::remove_file(&config.socket_path);
    info!("Plinth daemon stopped");
    Ok(())
}

fn bind_socket(path: &str) -> Result<UnixListener> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A previous run may have left a stale socket behind.
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path).with_context(|| format!("binding {}", path))
}

async fn check_status(config: &DaemonConfig) -> Result<()> {
    match send_request(&config.socket_path, Request::GetStatus).await? {
        Response::Status {
            adapter,
            brightness,
            clock,
            media_dir,
        } => {
            match adapter {
                Some(a) => println!(
                    "bluetooth: {} ({}) powered={} discovering={}",
                    a.adapter, a.address, a.powered, a.discovering
                ),
                None => println!("bluetooth: no adapter"),
            }
            println!("brightness: {:.2}", brightness.level);
            match clock {
                Some(c) => println!("clock: {} ({})", c.local_time, c.timezone),
                None => println!("clock: unavailable"),
            }
            println!("media dir: {}", media_dir);
            Ok(())
        }
        Response::Error { message } => bail!("daemon error: {}", message),
        other => bail!("unexpected response: {:?}", other),
    }
}

async fn stop_daemon(config: &DaemonConfig) -> Result<()> {
    match send_request(&config.socket_path, Request::Shutdown).await? {
        Response::Success { message } => {
            println!("{}", message);
            Ok(())
        }
        Response::Error { message } => bail!("daemon error: {}", message),
        other => bail!("unexpected response: {:?}", other),
    }
}

async fn send_request(socket_path: &str, request: Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path))?;
    let mut payload = serde_json::to_vec(&request)?;
    payload.push(b'\n');
    stream.write_all(&payload).await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}
