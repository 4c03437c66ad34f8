/*!
BlueZ Bindings

Talks to bluetoothd over the system bus. The adapter handle covers the
control plane (power, bonding, pairing); each discovery transport holds
its own bus connection because bluetoothd tracks one discovery session
per sender, and the classic inquiry and the BLE scan must coexist.

bluetoothd keeps a discovery session open until the client drops it, so
the classic transport enforces its own bounded inquiry window and emits
the completion event itself. The BLE scan runs until stopped.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbus::arg::{prop_cast, PropMap, RefArg, Variant};
use dbus::message::MatchRule;
use dbus::nonblock::stdintf::org_freedesktop_dbus::{ObjectManager, Properties};
use dbus::nonblock::{MsgMatch, Proxy, SyncConnection};
use dbus::Path;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus;
use crate::error::{DaemonError, Result};

use super::discovery::{ClassicTransport, LeTransport, ScanEvent};
use super::{normalize_address, AdapterStatus, BondedDevice, FoundDevice};

const BLUEZ_BUS: &str = "org.bluez";
const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
const DEVICE_IFACE: &str = "org.bluez.Device1";

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Bonding can take tens of seconds when the remote side prompts.
const PAIR_TIMEOUT: Duration = Duration::from_secs(60);
/// Length of one classic inquiry phase before `ClassicFinished` is emitted.
const INQUIRY_WINDOW: Duration = Duration::from_secs(12);

fn adapter_object(adapter: &str) -> Result<Path<'static>> {
    Path::new(format!("/org/bluez/{}", adapter))
        .map_err(|_| DaemonError::Invalid(format!("bad adapter name: {}", adapter)))
}

fn map_adapter_err(err: dbus::Error) -> DaemonError {
    match err.name() {
        Some("org.freedesktop.DBus.Error.UnknownObject")
        | Some("org.freedesktop.DBus.Error.UnknownMethod")
        | Some("org.freedesktop.DBus.Error.ServiceUnknown")
        | Some("org.freedesktop.DBus.Error.NameHasNoOwner") => DaemonError::AdapterMissing,
        _ => DaemonError::Bus(err.to_string()),
    }
}

fn string_prop(props: &PropMap, key: &str) -> Option<String> {
    props.get(key).and_then(|v| v.0.as_str()).map(str::to_string)
}

fn bool_prop(props: &PropMap, key: &str) -> Option<bool> {
    prop_cast::<bool>(props, key).copied()
}

fn u32_prop(props: &PropMap, key: &str) -> Option<u32> {
    prop_cast::<u32>(props, key).copied()
}

fn string_list(props: &PropMap, key: &str) -> Vec<String> {
    props
        .get(key)
        .and_then(|v| v.0.as_iter())
        .map(|iter| {
            iter.filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Builds a sighting from a `Device1` object belonging to our adapter.
fn parse_device(
    prefix: &str,
    path: &Path<'_>,
    interfaces: &HashMap<String, PropMap>,
) -> Option<FoundDevice> {
    if !path.starts_with(prefix) {
        return None;
    }
    let props = interfaces.get(DEVICE_IFACE)?;
    let address = string_prop(props, "Address")?;
    Some(FoundDevice {
        address: normalize_address(&address),
        name: string_prop(props, "Name").or_else(|| string_prop(props, "Alias")),
        device_class: u32_prop(props, "Class"),
        service_uuids: string_list(props, "UUIDs")
            .iter()
            .filter_map(|raw| Uuid::parse_str(raw).ok())
            .collect(),
    })
}

/// Control-plane handle for one adapter.
pub struct BluezAdapter {
    conn: Arc<SyncConnection>,
    path: Path<'static>,
    name: String,
}

impl BluezAdapter {
    pub async fn connect(adapter: &str) -> Result<Self> {
        Ok(Self {
            conn: bus::system_bus().await?,
            path: adapter_object(adapter)?,
            name: adapter.to_string(),
        })
    }

    fn proxy(&self) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new(BLUEZ_BUS, self.path.clone(), CALL_TIMEOUT, self.conn.clone())
    }

    pub async fn status(&self) -> Result<AdapterStatus> {
        let proxy = self.proxy();
        let powered: bool = proxy
            .get(ADAPTER_IFACE, "Powered")
            .await
            .map_err(map_adapter_err)?;
        let address: String = proxy.get(ADAPTER_IFACE, "Address").await?;
        let discovering: bool = proxy.get(ADAPTER_IFACE, "Discovering").await?;
        Ok(AdapterStatus {
            adapter: self.name.clone(),
            address,
            powered,
            discovering,
        })
    }

    pub async fn set_powered(&self, on: bool) -> Result<()> {
        self.proxy()
            .set(ADAPTER_IFACE, "Powered", on)
            .await
            .map_err(map_adapter_err)
    }

    pub async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
        let objects = self.managed_objects().await?;
        let prefix = format!("{}/", &*self.path);
        let mut devices = Vec::new();
        for (path, interfaces) in &objects {
            if !path.starts_with(&prefix) {
                continue;
            }
            let Some(props) = interfaces.get(DEVICE_IFACE) else {
                continue;
            };
            if !bool_prop(props, "Paired").unwrap_or(false) {
                continue;
            }
            devices.push(BondedDevice {
                address: normalize_address(&string_prop(props, "Address").unwrap_or_default()),
                name: string_prop(props, "Name")
                    .or_else(|| string_prop(props, "Alias"))
                    .unwrap_or_else(|| "unknown".to_string()),
                connected: bool_prop(props, "Connected").unwrap_or(false),
            });
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Starts pairing in the background and returns once the request is on
    /// its way; the outcome lands in the log and in the bonded list.
    pub async fn pair(&self, address: &str) -> Result<()> {
        let device = self.find_device(address).await?;
        let conn = self.conn.clone();
        let address = normalize_address(address);
        tokio::spawn(async move {
            let proxy = Proxy::new(BLUEZ_BUS, device, PAIR_TIMEOUT, conn);
            match proxy
                .method_call::<(), _, _, _>(DEVICE_IFACE, "Pair", ())
                .await
            {
                Ok(()) => info!("Paired with {}", address),
                Err(err) => warn!("Pairing with {} failed: {}", address, err),
            }
        });
        Ok(())
    }

    pub async fn forget(&self, address: &str) -> Result<()> {
        let device = self.find_device(address).await?;
        let () = self
            .proxy()
            .method_call(ADAPTER_IFACE, "RemoveDevice", (device,))
            .await?;
        Ok(())
    }

    async fn managed_objects(
        &self,
    ) -> Result<HashMap<Path<'static>, HashMap<String, PropMap>>> {
        let proxy = Proxy::new(BLUEZ_BUS, "/", CALL_TIMEOUT, self.conn.clone());
        proxy.get_managed_objects().await.map_err(map_adapter_err)
    }

    async fn find_device(&self, address: &str) -> Result<Path<'static>> {
        let wanted = normalize_address(address);
        let objects = self.managed_objects().await?;
        let prefix = format!("{}/", &*self.path);
        for (path, interfaces) in objects {
            if !path.starts_with(&prefix) {
                continue;
            }
            let Some(props) = interfaces.get(DEVICE_IFACE) else {
                continue;
            };
            if let Some(addr) = string_prop(props, "Address") {
                if normalize_address(&addr) == wanted {
                    return Ok(path);
                }
            }
        }
        Err(DaemonError::DeviceNotFound(wanted))
    }
}

/// One discovery session on its own bus connection.
struct DiscoverySession {
    conn: Arc<SyncConnection>,
    adapter_path: Path<'static>,
    transport: &'static str,
    matches: Mutex<Vec<MsgMatch>>,
}

impl DiscoverySession {
    async fn connect(adapter: &str, transport: &'static str) -> Result<Self> {
        Ok(Self {
            conn: bus::system_bus().await?,
            adapter_path: adapter_object(adapter)?,
            transport,
            matches: Mutex::new(Vec::new()),
        })
    }

    fn adapter_proxy(&self) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new(
            BLUEZ_BUS,
            self.adapter_path.clone(),
            CALL_TIMEOUT,
            self.conn.clone(),
        )
    }

    async fn begin(
        &self,
        events: mpsc::UnboundedSender<ScanEvent>,
        wrap: fn(FoundDevice) -> ScanEvent,
    ) -> Result<()> {
        // Drop leftovers from a previous phase before rearming.
        self.end().await;

        let prefix = format!("{}/", &*self.adapter_path);
        let sender = events.clone();
        let rule = MatchRule::new_signal("org.freedesktop.DBus.ObjectManager", "InterfacesAdded");
        let msg_match = self.conn.add_match(rule).await?.cb(
            move |_, (path, interfaces): (Path<'static>, HashMap<String, PropMap>)| {
                if let Some(found) = parse_device(&prefix, &path, &interfaces) {
                    let _ = sender.send(wrap(found));
                }
                true
            },
        );
        self.matches.lock().await.push(msg_match);

        let mut filter: HashMap<&str, Variant<&str>> = HashMap::new();
        filter.insert("Transport", Variant(self.transport));
        let proxy = self.adapter_proxy();
        let () = proxy
            .method_call(ADAPTER_IFACE, "SetDiscoveryFilter", (filter,))
            .await?;
        let () = proxy.method_call(ADAPTER_IFACE, "StartDiscovery", ()).await?;
        debug!("Discovery started on {} ({})", &*self.adapter_path, self.transport);

        // InterfacesAdded only fires for objects bluetoothd does not know
        // yet, so surface the ones it already tracks as sightings too.
        if let Err(err) = self.emit_known(&events, wrap).await {
            warn!("Could not enumerate known devices: {}", err);
        }
        Ok(())
    }

    async fn emit_known(
        &self,
        events: &mpsc::UnboundedSender<ScanEvent>,
        wrap: fn(FoundDevice) -> ScanEvent,
    ) -> Result<()> {
        let proxy = Proxy::new(BLUEZ_BUS, "/", CALL_TIMEOUT, self.conn.clone());
        let objects = proxy.get_managed_objects().await?;
        let prefix = format!("{}/", &*self.adapter_path);
        for (path, interfaces) in objects {
            if let Some(found) = parse_device(&prefix, &path, &interfaces) {
                let _ = events.send(wrap(found));
            }
        }
        Ok(())
    }

    async fn stop_discovery(&self) {
        let proxy = self.adapter_proxy();
        if let Err(err) = proxy
            .method_call::<(), _, _, _>(ADAPTER_IFACE, "StopDiscovery", ())
            .await
        {
            // Expected when the session already ended on the bluetoothd side.
            debug!("StopDiscovery on {}: {}", self.transport, err);
        }
    }

    async fn end(&self) {
        let matches: Vec<MsgMatch> = self.matches.lock().await.drain(..).collect();
        for m in matches {
            let _ = self.conn.remove_match(m.token()).await;
        }
    }
}

/// Classic (BR/EDR) transport with a self-imposed inquiry window.
pub struct BluezClassic {
    session: Arc<DiscoverySession>,
    window: Mutex<Option<JoinHandle<()>>>,
}

impl BluezClassic {
    pub async fn new(adapter: &str) -> Result<Self> {
        Ok(Self {
            session: Arc::new(DiscoverySession::connect(adapter, "bredr").await?),
            window: Mutex::new(None),
        })
    }

    async fn abort_window(&self) {
        if let Some(handle) = self.window.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ClassicTransport for BluezClassic {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        self.abort_window().await;
        self.session.begin(events.clone(), ScanEvent::ClassicDevice).await?;
        let session = self.session.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(INQUIRY_WINDOW).await;
            session.stop_discovery().await;
            session.end().await;
            let _ = events.send(ScanEvent::ClassicFinished);
        });
        *self.window.lock().await = Some(handle);
        Ok(())
    }

    async fn cancel(&self) {
        self.abort_window().await;
        self.session.stop_discovery().await;
        self.session.end().await;
    }
}

/// BLE transport; scans until stopped.
pub struct BluezLeScanner {
    session: DiscoverySession,
}

impl BluezLeScanner {
    pub async fn new(adapter: &str) -> Result<Self> {
        Ok(Self {
            session: DiscoverySession::connect(adapter, "le").await?,
        })
    }
}

#[async_trait]
impl LeTransport for BluezLeScanner {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        self.session.begin(events, ScanEvent::LeDevice).await
    }

    async fn stop(&self) {
        self.session.stop_discovery().await;
        self.session.end().await;
    }
}
