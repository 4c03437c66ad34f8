/*!
Hybrid Discovery Coordinator

Runs a classic (BR/EDR) inquiry and a BLE scan concurrently and merges
their results into one address-keyed set of audio devices. Transport
callbacks and caller commands all land on a single event queue consumed
by a dispatcher task, so session state only ever changes in one place.

Each transport carries its own retry budget: a classic inquiry that
finishes while the shared result set is still empty is retried after a
short delay, a failed classic start is retried immediately, and a failed
BLE scan is retried after a longer delay. A transport that exhausts its
budget is abandoned without affecting the other one.

Retries are scheduled as delayed events tagged with the session epoch.
Stopping or restarting a scan bumps the epoch, so a retry that fires
afterwards is recognized as stale and dropped, and a transport start that
completes after its session ended is halted on the spot.
*/

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

use super::classify;
use super::{DeviceSource, DiscoveredDevice, FoundDevice};

pub const MAX_RETRIES: u8 = 3;
pub const CLASSIC_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const LE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Driver for one classic inquiry phase. `start` begins a bounded inquiry
/// and reports devices plus a completion event on the channel it is given.
#[async_trait]
pub trait ClassicTransport: Send + Sync {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()>;
    async fn cancel(&self);
}

/// Driver for a BLE scan. The scan runs until `stop`; failures are either
/// returned from `start` or reported later as `ScanEvent::LeFailed`.
#[async_trait]
pub trait LeTransport: Send + Sync {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()>;
    async fn stop(&self);
}

#[derive(Debug)]
pub enum ScanEvent {
    ClassicDevice(FoundDevice),
    ClassicFinished,
    LeDevice(FoundDevice),
    LeFailed(String),
    RunClassic { epoch: u64 },
    RunLe { epoch: u64 },
}

/// Pushed to the presentation side as the result set grows.
#[derive(Debug, Clone)]
pub enum ScanNotice {
    DeviceFound(DiscoveredDevice),
    ScanComplete(Vec<DiscoveredDevice>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub retries: u8,
    pub abandoned: bool,
}

impl RetryState {
    /// Takes one retry from the budget, returning the attempt number.
    /// The first call past the budget marks the transport abandoned.
    fn try_consume(&mut self) -> Option<u8> {
        if self.abandoned {
            return None;
        }
        if self.retries < MAX_RETRIES {
            self.retries += 1;
            Some(self.retries)
        } else {
            self.abandoned = true;
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub active: bool,
    pub session: Option<Uuid>,
    pub devices: Vec<DiscoveredDevice>,
    pub classic: RetryState,
    pub le: RetryState,
}

#[derive(Debug, Default)]
struct SessionState {
    active: bool,
    session: Option<Uuid>,
    epoch: u64,
    devices: HashMap<String, DiscoveredDevice>,
    classic: RetryState,
    le: RetryState,
}

impl SessionState {
    /// Arms a fresh session and returns its id and epoch.
    fn begin(&mut self) -> (Uuid, u64) {
        let id = Uuid::new_v4();
        self.active = true;
        self.session = Some(id);
        self.epoch += 1;
        self.devices.clear();
        self.classic = RetryState::default();
        self.le = RetryState::default();
        (id, self.epoch)
    }

    fn stale(&self, epoch: u64) -> bool {
        !self.active || self.epoch != epoch
    }

    /// Classifies and deduplicates one sighting. Returns the new entry if
    /// the device is an audio device not seen before in this session.
    fn record(&mut self, found: FoundDevice, source: DeviceSource) -> Option<DiscoveredDevice> {
        if !self.active {
            return None;
        }
        let rule = classify::classify(&found)?;
        let address = super::normalize_address(&found.address);
        if self.devices.contains_key(&address) {
            return None;
        }
        let device = DiscoveredDevice {
            address: address.clone(),
            name: found.name,
            source,
            matched_rule: rule.to_string(),
        };
        self.devices.insert(address, device.clone());
        Some(device)
    }

    fn snapshot(&self) -> ScanSnapshot {
        let mut devices: Vec<DiscoveredDevice> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        ScanSnapshot {
            active: self.active,
            session: self.session,
            devices,
            classic: self.classic.clone(),
            le: self.le.clone(),
        }
    }
}

struct Inner {
    classic: Arc<dyn ClassicTransport>,
    le: Arc<dyn LeTransport>,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<ScanEvent>,
    notices: mpsc::UnboundedSender<ScanNotice>,
}

pub struct DiscoveryCoordinator {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl DiscoveryCoordinator {
    pub fn new(
        classic: Arc<dyn ClassicTransport>,
        le: Arc<dyn LeTransport>,
        notices: mpsc::UnboundedSender<ScanNotice>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            classic,
            le,
            state: Mutex::new(SessionState::default()),
            events: events_tx,
            notices,
        });
        let dispatcher = tokio::spawn(Inner::dispatch(inner.clone(), events_rx));
        Self { inner, dispatcher }
    }

    /// Starts a scan session. Both transports are launched through the
    /// event queue, so this returns as soon as the session is armed.
    /// Calling it while a session is already active is a no-op.
    pub async fn start(&self) {
        let epoch = {
            let mut state = self.inner.state.lock().await;
            if state.active {
                debug!("Scan already active, ignoring start");
                return;
            }
            let (id, epoch) = state.begin();
            info!("Scan session {} started", id);
            epoch
        };
        let _ = self.inner.events.send(ScanEvent::RunClassic { epoch });
        let _ = self.inner.events.send(ScanEvent::RunLe { epoch });
    }

    /// Stops the active session and returns the accumulated result set,
    /// which stays readable until the next `start`. Safe to call when idle.
    pub async fn stop(&self) -> Vec<DiscoveredDevice> {
        let (was_active, devices) = {
            let mut state = self.inner.state.lock().await;
            let devices = state.snapshot().devices;
            let was_active = state.active;
            state.active = false;
            (was_active, devices)
        };
        if !was_active {
            return devices;
        }
        self.inner.classic.cancel().await;
        self.inner.le.stop().await;
        info!("Scan stopped, {} device(s) found", devices.len());
        let _ = self
            .inner
            .notices
            .send(ScanNotice::ScanComplete(devices.clone()));
        devices
    }

    pub async fn snapshot(&self) -> ScanSnapshot {
        self.inner.state.lock().await.snapshot()
    }
}

impl Drop for DiscoveryCoordinator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl Inner {
    async fn dispatch(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<ScanEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::ClassicDevice(found) => inner.on_device(found, DeviceSource::Classic).await,
                ScanEvent::LeDevice(found) => inner.on_device(found, DeviceSource::Le).await,
                ScanEvent::ClassicFinished => inner.on_classic_finished().await,
                ScanEvent::LeFailed(reason) => inner.on_le_failure(&reason).await,
                ScanEvent::RunClassic { epoch } => inner.run_classic(epoch).await,
                ScanEvent::RunLe { epoch } => inner.run_le(epoch).await,
            }
        }
    }

    async fn on_device(&self, found: FoundDevice, source: DeviceSource) {
        let recorded = self.state.lock().await.record(found, source);
        if let Some(device) = recorded {
            debug!(
                "Recorded {:?} device {} ({}) matched by {} rule",
                device.source,
                device.name.as_deref().unwrap_or("unknown"),
                device.address,
                device.matched_rule
            );
            let _ = self.notices.send(ScanNotice::DeviceFound(device));
        }
    }

    /// A classic inquiry phase ran to completion. Retry only while the
    /// shared result set is empty; a find on either transport settles it.
    async fn on_classic_finished(&self) {
        let decision = {
            let mut state = self.state.lock().await;
            if !state.active {
                return;
            }
            if !state.devices.is_empty() {
                debug!(
                    "Classic discovery finished, result set holds {} device(s)",
                    state.devices.len()
                );
                return;
            }
            state
                .classic
                .try_consume()
                .map(|attempt| (attempt, state.epoch))
        };
        match decision {
            Some((attempt, epoch)) => {
                info!(
                    "Classic discovery finished empty, retry {}/{} in {:?}",
                    attempt, MAX_RETRIES, CLASSIC_RETRY_DELAY
                );
                self.schedule(ScanEvent::RunClassic { epoch }, CLASSIC_RETRY_DELAY);
            }
            None => warn!(
                "Classic discovery still empty after {} retries, giving up",
                MAX_RETRIES
            ),
        }
    }

    /// Launches the classic transport. Start failures are retried at once
    /// until the budget runs out. A stop that lands while the start is in
    /// flight is honored by cancelling the freshly started inquiry.
    async fn run_classic(&self, epoch: u64) {
        loop {
            if self.state.lock().await.stale(epoch) {
                debug!("Dropping stale classic launch");
                return;
            }
            match self.classic.start(self.events.clone()).await {
                Ok(()) => {
                    if self.state.lock().await.stale(epoch) {
                        debug!("Scan stopped during classic start, cancelling");
                        self.classic.cancel().await;
                    } else {
                        debug!("Classic discovery running");
                    }
                    return;
                }
                Err(err) => {
                    let retry = {
                        let mut state = self.state.lock().await;
                        if state.stale(epoch) {
                            return;
                        }
                        state.classic.try_consume()
                    };
                    match retry {
                        Some(attempt) => warn!(
                            "Classic discovery failed to start ({}), retry {}/{}",
                            err, attempt, MAX_RETRIES
                        ),
                        None => {
                            warn!("Classic discovery abandoned: {}", err);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Launches the BLE scan, stopping it again if the session ended
    /// while the start was in flight.
    async fn run_le(&self, epoch: u64) {
        if self.state.lock().await.stale(epoch) {
            debug!("Dropping stale BLE launch");
            return;
        }
        match self.le.start(self.events.clone()).await {
            Ok(()) => {
                if self.state.lock().await.stale(epoch) {
                    debug!("Scan stopped during BLE start, stopping the scan");
                    self.le.stop().await;
                } else {
                    debug!("BLE scan running");
                }
            }
            Err(err) => self.on_le_failure(&err.to_string()).await,
        }
    }

    async fn on_le_failure(&self, reason: &str) {
        let decision = {
            let mut state = self.state.lock().await;
            if !state.active {
                return;
            }
            state.le.try_consume().map(|attempt| (attempt, state.epoch))
        };
        match decision {
            Some((attempt, epoch)) => {
                warn!(
                    "BLE scan failed ({}), retry {}/{} in {:?}",
                    reason, attempt, MAX_RETRIES, LE_RETRY_DELAY
                );
                self.schedule(ScanEvent::RunLe { epoch }, LE_RETRY_DELAY);
            }
            None => warn!("BLE scan abandoned after {} retries: {}", MAX_RETRIES, reason),
        }
    }

    fn schedule(&self, event: ScanEvent, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(address: &str, name: Option<&str>, class: Option<u32>) -> FoundDevice {
        FoundDevice {
            address: address.to_string(),
            name: name.map(str::to_string),
            device_class: class,
            service_uuids: Vec::new(),
        }
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut retry = RetryState::default();
        assert_eq!(retry.try_consume(), Some(1));
        assert_eq!(retry.try_consume(), Some(2));
        assert_eq!(retry.try_consume(), Some(3));
        assert_eq!(retry.try_consume(), None);
        assert!(retry.abandoned);
        // Stays abandoned on further failures.
        assert_eq!(retry.try_consume(), None);
        assert_eq!(retry.retries, MAX_RETRIES);
    }

    #[test]
    fn record_ignores_sightings_when_inactive() {
        let mut state = SessionState::default();
        let sighting = found("AA:BB:CC:DD:EE:FF", Some("JBL Speaker"), None);
        assert!(state.record(sighting, DeviceSource::Classic).is_none());
    }

    #[test]
    fn record_deduplicates_by_address_across_transports() {
        let mut state = SessionState::default();
        state.begin();
        let first = state.record(
            found("AA:BB:CC:DD:EE:FF", Some("JBL Speaker"), None),
            DeviceSource::Classic,
        );
        assert!(first.is_some());
        let second = state.record(
            found("AA:BB:CC:DD:EE:FF", Some("JBL Speaker"), None),
            DeviceSource::Le,
        );
        assert!(second.is_none());
        assert_eq!(state.devices.len(), 1);
        // First sighting wins, including its transport tag.
        assert!(matches!(
            state.devices["AA:BB:CC:DD:EE:FF"].source,
            DeviceSource::Classic
        ));
    }

    #[test]
    fn record_normalizes_addresses_before_keying() {
        let mut state = SessionState::default();
        state.begin();
        let first = state.record(
            found("aa-bb-cc-dd-ee-ff", Some("Speaker"), None),
            DeviceSource::Le,
        );
        assert_eq!(first.unwrap().address, "AA:BB:CC:DD:EE:FF");
        // The same radio in colon form is a duplicate.
        let second = state.record(
            found("AA:BB:CC:DD:EE:FF", Some("Speaker"), None),
            DeviceSource::Classic,
        );
        assert!(second.is_none());
        assert_eq!(state.devices.len(), 1);
    }

    #[test]
    fn record_rejects_non_audio_devices() {
        let mut state = SessionState::default();
        state.begin();
        let sighting = found("AA:BB:CC:DD:EE:01", Some("Thermostat"), Some(0x020C));
        assert!(state.record(sighting, DeviceSource::Le).is_none());
        assert!(state.devices.is_empty());
    }

    #[test]
    fn begin_resets_results_and_budgets() {
        let mut state = SessionState::default();
        state.begin();
        state.record(
            found("AA:BB:CC:DD:EE:FF", Some("Speaker"), None),
            DeviceSource::Classic,
        );
        state.classic.try_consume();
        let first_epoch = state.epoch;
        state.begin();
        assert!(state.devices.is_empty());
        assert_eq!(state.classic.retries, 0);
        assert!(state.epoch > first_epoch);
    }

    #[test]
    fn snapshot_sorts_devices_by_address() {
        let mut state = SessionState::default();
        state.begin();
        state.record(found("CC:00:00:00:00:01", Some("Speaker B"), None), DeviceSource::Le);
        state.record(found("AA:00:00:00:00:01", Some("Speaker A"), None), DeviceSource::Classic);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.devices[0].address, "AA:00:00:00:00:01");
        assert_eq!(snapshot.devices[1].address, "CC:00:00:00:00:01");
    }
}
