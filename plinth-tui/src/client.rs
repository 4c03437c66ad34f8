/*!
 * IPC client for plinthd
 * Connects per request over the daemon's Unix socket
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Requests understood by the daemon. Mirrors the daemon's wire enum.
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub adapter: String,
    pub address: String,
    pub powered: bool,
    pub discovering: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSource {
    Classic,
    Le,
}

impl DeviceSource {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceSource::Classic => "Classic",
            DeviceSource::Le => "BLE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
    pub source: DeviceSource,
    pub matched_rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondedDevice {
    pub address: String,
    pub name: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub retries: u8,
    pub abandoned: bool,
}

/// Session UUIDs travel as plain strings on this side of the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub active: bool,
    pub session: Option<String>,
    pub devices: Vec<DiscoveredDevice>,
    pub classic: RetryState,
    pub le: RetryState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrightnessStatus {
    pub level: f32,
    pub backlight: Option<String>,
    pub writable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockStatus {
    pub local_time: String,
    pub timezone: String,
    pub ntp_synchronized: bool,
}

pub struct PlinthClient {
    socket_path: String,
}

impl PlinthClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// Sends one request and waits for the daemon's reply line.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("connecting to {} (is plinthd running?)", self.socket_path))?;

        let mut payload = serde_json::to_vec(&request)?;
        payload.push(b'\n');

        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(&payload).await?;

        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .context("reading daemon reply")?;
        if line.is_empty() {
            anyhow::bail!("daemon closed the connection without replying");
        }

        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format_is_tagged() {
        let json = serde_json::to_string(&Request::SetBrightness { level: 0.5 }).unwrap();
        assert_eq!(json, r#"{"type":"SetBrightness","level":0.5}"#);
    }

    #[test]
    fn response_round_trips_scan_snapshot() {
        let raw = r#"{"type":"ScanStatus","scan":{"active":true,"session":"8c1f2b34-9a7e-4e0f-b1c2-5d6e7f801234","devices":[{"address":"AA:BB:CC:DD:EE:FF","name":"JBL Speaker","source":"Le","matched_rule":"name"}],"classic":{"retries":1,"abandoned":false},"le":{"retries":0,"abandoned":false}}}"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        match response {
            Response::ScanStatus { scan } => {
                assert!(scan.active);
                assert_eq!(scan.devices.len(), 1);
                assert_eq!(scan.devices[0].source, DeviceSource::Le);
                assert_eq!(scan.classic.retries, 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
