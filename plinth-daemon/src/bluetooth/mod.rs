/*!
Bluetooth Management

Facade over the BlueZ adapter handle and the hybrid discovery
coordinator. The manager owns the scan preconditions (adapter present
and powered) and logs discovery notices for the operator; everything
else is delegated.
*/

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::config::BluetoothConfig;
use crate::error::{DaemonError, Result};

pub mod bluez;
pub mod classify;
pub mod discovery;

pub use discovery::{DiscoveryCoordinator, ScanNotice, ScanSnapshot};

use bluez::{BluezAdapter, BluezClassic, BluezLeScanner};

/// Raw sighting reported by a transport, before classification.
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub address: String,
    pub name: Option<String>,
    pub device_class: Option<u32>,
    pub service_uuids: Vec<Uuid>,
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

/// One entry in the scan result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
    pub source: DeviceSource,
    pub matched_rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub adapter: String,
    pub address: String,
    pub powered: bool,
    pub discovering: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondedDevice {
    pub address: String,
    pub name: String,
    pub connected: bool,
}

/// Uppercase colon-separated form, used as the deduplication key so the
/// same radio reported by both transports lands on one entry.
pub fn normalize_address(raw: &str) -> String {
    let hex: Vec<char> = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if hex.len() < 12 {
        return raw.trim().to_ascii_uppercase();
    }
    hex[hex.len() - 12..]
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

pub struct BluetoothManager {
    adapter: BluezAdapter,
    coordinator: DiscoveryCoordinator,
}

impl BluetoothManager {
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        let adapter = BluezAdapter::connect(&config.adapter).await?;
        let classic = Arc::new(BluezClassic::new(&config.adapter).await?);
        let le = Arc::new(BluezLeScanner::new(&config.adapter).await?);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        tokio::spawn(log_notices(notices_rx));
        Ok(Self {
            adapter,
            coordinator: DiscoveryCoordinator::new(classic, le, notices_tx),
        })
    }

    pub async fn status(&self) -> Result<AdapterStatus> {
        self.adapter.status().await
    }

    pub async fn set_powered(&self, on: bool) -> Result<()> {
        info!("Turning bluetooth {}", if on { "on" } else { "off" });
        self.adapter.set_powered(on).await
    }

    /// Starts the hybrid scan. Requires a present, powered adapter; while
    /// a scan is already running this is a no-op.
    pub async fn start_scan(&self) -> Result<()> {
        let status = self.adapter.status().await?;
        if !status.powered {
            return Err(DaemonError::AdapterOff);
        }
        self.coordinator.start().await;
        Ok(())
    }

    pub async fn stop_scan(&self) -> Vec<DiscoveredDevice> {
        self.coordinator.stop().await
    }

    pub async fn scan_status(&self) -> ScanSnapshot {
        self.coordinator.snapshot().await
    }

    pub async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
        self.adapter.bonded_devices().await
    }

    pub async fn pair(&self, address: &str) -> Result<()> {
        info!("Pairing with {}", address);
        self.adapter.pair(address).await
    }

    pub async fn forget(&self, address: &str) -> Result<()> {
        info!("Forgetting {}", address);
        self.adapter.forget(address).await
    }
}

async fn log_notices(mut notices: mpsc::UnboundedReceiver<ScanNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            ScanNotice::DeviceFound(device) => info!(
                "Found {}: {} ({})",
                device.source.label(),
                device.name.as_deref().unwrap_or("unknown"),
                device.address
            ),
            ScanNotice::ScanComplete(devices) => {
                info!("Scan complete, {} audio device(s)", devices.len())
            }
        }
    }
}
