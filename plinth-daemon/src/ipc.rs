/*!
 * IPC Server for Plinth Daemon
 * JSON protocol over Unix socket
 */

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::bluetooth::{
    AdapterStatus, BluetoothManager, BondedDevice, DiscoveredDevice, ScanSnapshot,
};
use crate::clock::{ClockManager, ClockStatus};
use crate::display::{BrightnessStatus, DisplayManager};
use crate::error::{DaemonError, Result};
use crate::storage::{normalize_filename, StorageManager};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetStatus,
    SetBluetoothPower { on: bool },
    StartScan,
    StopScan,
    GetScanStatus,
    GetBondedDevices,
    PairDevice { address: String },
    ForgetDevice { address: String },
    GetBrightness,
    SetBrightness { level: f32 },
    ListFiles,
    ReadFile { name: String },
    WriteFile { name: String, content: String },
    GetClock,
    SetDateTime { date: String, time: String },
    ListTimezones,
    SetTimezone { timezone: String },
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Status {
        adapter: Option<AdapterStatus>,
        brightness: BrightnessStatus,
        clock: Option<ClockStatus>,
        media_dir: String,
    },
    ScanStatus {
        scan: ScanSnapshot,
    },
    ScanResults {
        devices: Vec<DiscoveredDevice>,
    },
    BondedDevices {
        devices: Vec<BondedDevice>,
    },
    Brightness {
        status: BrightnessStatus,
    },
    Files {
        names: Vec<String>,
    },
    FileContent {
        name: String,
        content: String,
    },
    Clock {
        status: ClockStatus,
    },
    Timezones {
        zones: Vec<String>,
    },
    Success {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Shared handles every client task works against.
#[derive(Clone)]
pub struct Managers {
    pub bluetooth: Arc<BluetoothManager>,
    pub display: Arc<DisplayManager>,
    pub storage: Arc<StorageManager>,
    pub clock: Arc<ClockManager>,
}

pub struct IpcServer {
    listener: UnixListener,
    managers: Managers,
}

impl IpcServer {
    pub fn new(listener: UnixListener, managers: Managers) -> Self {
        Self { listener, managers }
    }

    /// Serves clients until a shutdown request arrives.
    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown requested, leaving accept loop");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!("New client connected");
                        let managers = self.managers.clone();
                        let shutdown = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, managers, shutdown).await {
                                tracing::error!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    managers: Managers,
    shutdown: mpsc::Sender<()>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        tracing::debug!("Received request: {}", raw);

        let (response, stop) = match serde_json::from_str::<Request>(raw) {
            Ok(Request::Shutdown) => (
                Response::Success {
                    message: "Shutting down".to_string(),
                },
                true,
            ),
            Ok(request) => (dispatch(request, &managers).await, false),
            Err(e) => (
                Response::Error {
                    message: format!("invalid request: {}", e),
                },
                false,
            ),
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;

        if stop {
            let _ = shutdown.send(()).await;
            return Ok(());
        }
    }
}

async fn dispatch(request: Request, managers: &Managers) -> Response {
    match request {
        Request::GetStatus => Response::Status {
            adapter: managers.bluetooth.status().await.ok(),
            brightness: managers.display.status(),
            clock: managers.clock.status().await.ok(),
            media_dir: managers.storage.media_dir(),
        },
        Request::SetBluetoothPower { on } => match managers.bluetooth.set_powered(on).await {
            Ok(()) => Response::Success {
                message: format!("Bluetooth powered {}", if on { "on" } else { "off" }),
            },
            Err(e) => fail(e),
        },
        Request::StartScan => match managers.bluetooth.start_scan().await {
            Ok(()) => Response::Success {
                message: "Scan started".to_string(),
            },
            Err(e) => fail(e),
        },
        Request::StopScan => Response::ScanResults {
            devices: managers.bluetooth.stop_scan().await,
        },
        Request::GetScanStatus => Response::ScanStatus {
            scan: managers.bluetooth.scan_status().await,
        },
        Request::GetBondedDevices => match managers.bluetooth.bonded_devices().await {
            Ok(devices) => Response::BondedDevices { devices },
            Err(e) => fail(e),
        },
        Request::PairDevice { address } => match managers.bluetooth.pair(&address).await {
            Ok(()) => Response::Success {
                message: format!("Pairing with {} initiated", address),
            },
            Err(e) => fail(e),
        },
        Request::ForgetDevice { address } => match managers.bluetooth.forget(&address).await {
            Ok(()) => Response::Success {
                message: format!("Removed {}", address),
            },
            Err(e) => fail(e),
        },
        Request::GetBrightness => Response::Brightness {
            status: managers.display.status(),
        },
        Request::SetBrightness { level } => match managers.display.set_level(level) {
            Ok(_) => Response::Brightness {
                status: managers.display.status(),
            },
            Err(e) => fail(e),
        },
        Request::ListFiles => match managers.storage.list_files() {
            Ok(names) => Response::Files { names },
            Err(e) => fail(e),
        },
        Request::ReadFile { name } => match managers.storage.read_file(&name) {
            Ok(content) => Response::FileContent {
                name: normalize_filename(&name),
                content,
            },
            Err(e) => fail(e),
        },
        Request::WriteFile { name, content } => {
            match managers.storage.write_file(&name, &content) {
                Ok(name) => Response::Success {
                    message: format!("Wrote {}", name),
                },
                Err(e) => fail(e),
            }
        }
        Request::GetClock => match managers.clock.status().await {
            Ok(status) => Response::Clock { status },
            Err(e) => fail(e),
        },
        Request::SetDateTime { date, time } => {
            match managers.clock.set_datetime(&date, &time).await {
                Ok(()) => Response::Success {
                    message: format!("Clock set to {} {}", date, time),
                },
                Err(e) => fail(e),
            }
        }
        Request::ListTimezones => match managers.clock.list_timezones().await {
            Ok(zones) => Response::Timezones { zones },
            Err(e) => fail(e),
        },
        Request::SetTimezone { timezone } => match managers.clock.set_timezone(&timezone).await {
            Ok(()) => Response::Success {
                message: format!("Timezone set to {}", timezone),
            },
            Err(e) => fail(e),
        },
        // Answered inline by the client task before it signals the server.
        Request::Shutdown => Response::Success {
            message: "Shutting down".to_string(),
        },
    }
}

fn fail(err: DaemonError) -> Response {
    Response::Error {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_a_type_tag() {
        let raw = r#"{"type":"SetBrightness","level":0.5}"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert!(matches!(request, Request::SetBrightness { level } if level == 0.5));
    }

    #[test]
    fn unit_requests_need_no_payload() {
        let request: Request = serde_json::from_str(r#"{"type":"StartScan"}"#).unwrap();
        assert!(matches!(request, Request::StartScan));
    }

    #[test]
    fn error_responses_carry_their_message() {
        let raw = serde_json::to_string(&fail(DaemonError::AdapterOff)).unwrap();
        assert!(raw.contains(r#""type":"Error""#));
        assert!(raw.contains("powered off"));
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"FlyToTheMoon"}"#).is_err());
    }
}
