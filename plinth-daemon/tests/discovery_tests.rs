use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use plinth_daemon::bluetooth::discovery::{
    ClassicTransport, DiscoveryCoordinator, LeTransport, ScanEvent, ScanNotice,
    CLASSIC_RETRY_DELAY, LE_RETRY_DELAY, MAX_RETRIES,
};
use plinth_daemon::bluetooth::{DeviceSource, FoundDevice};
use plinth_daemon::error::{DaemonError, Result};

#[derive(Clone, Default)]
struct FakeClassic {
    inner: Arc<ClassicState>,
}

#[derive(Default)]
struct ClassicState {
    fail_starts: AtomicU32,
    start_delay: Mutex<Duration>,
    starts: AtomicU32,
    cancels: AtomicU32,
    events: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
}

impl FakeClassic {
    fn failing(times: u32) -> Self {
        let fake = Self::default();
        fake.inner.fail_starts.store(times, Ordering::SeqCst);
        fake
    }

    fn slow(delay: Duration) -> Self {
        let fake = Self::default();
        *fake.inner.start_delay.lock().unwrap() = delay;
        fake
    }

    fn starts(&self) -> u32 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> u32 {
        self.inner.cancels.load(Ordering::SeqCst)
    }

    fn remaining_failures(&self) -> u32 {
        self.inner.fail_starts.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ScanEvent) {
        let guard = self.inner.events.lock().unwrap();
        let sender = guard.as_ref().expect("classic transport never started");
        sender.send(event).unwrap();
    }
}

#[async_trait]
impl ClassicTransport for FakeClassic {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        let delay = *self.inner.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_starts.load(Ordering::SeqCst) > 0 {
            self.inner.fail_starts.fetch_sub(1, Ordering::SeqCst);
            return Err(DaemonError::Bus("inquiry refused".to_string()));
        }
        self.inner.starts.fetch_add(1, Ordering::SeqCst);
        *self.inner.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn cancel(&self) {
        self.inner.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct FakeLe {
    inner: Arc<LeState>,
}

#[derive(Default)]
struct LeState {
    fail_starts: AtomicU32,
    start_delay: Mutex<Duration>,
    starts: AtomicU32,
    stops: AtomicU32,
    events: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
}

impl FakeLe {
    fn failing(times: u32) -> Self {
        let fake = Self::default();
        fake.inner.fail_starts.store(times, Ordering::SeqCst);
        fake
    }

    fn slow(delay: Duration) -> Self {
        let fake = Self::default();
        *fake.inner.start_delay.lock().unwrap() = delay;
        fake
    }

    fn starts(&self) -> u32 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> u32 {
        self.inner.stops.load(Ordering::SeqCst)
    }

    fn remaining_failures(&self) -> u32 {
        self.inner.fail_starts.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ScanEvent) {
        let guard = self.inner.events.lock().unwrap();
        let sender = guard.as_ref().expect("le transport never started");
        sender.send(event).unwrap();
    }
}

#[async_trait]
impl LeTransport for FakeLe {
    async fn start(&self, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        let delay = *self.inner.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_starts.load(Ordering::SeqCst) > 0 {
            self.inner.fail_starts.fetch_sub(1, Ordering::SeqCst);
            return Err(DaemonError::Bus("scan refused".to_string()));
        }
        self.inner.starts.fetch_add(1, Ordering::SeqCst);
        *self.inner.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop(&self) {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    coordinator: DiscoveryCoordinator,
    classic: FakeClassic,
    le: FakeLe,
    notices: mpsc::UnboundedReceiver<ScanNotice>,
}

fn harness_with(classic: FakeClassic, le: FakeLe) -> Harness {
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let coordinator =
        DiscoveryCoordinator::new(Arc::new(classic.clone()), Arc::new(le.clone()), notices_tx);
    Harness {
        coordinator,
        classic,
        le,
        notices: notices_rx,
    }
}

fn harness() -> Harness {
    harness_with(FakeClassic::default(), FakeLe::default())
}

/// Lets the dispatcher drain everything already queued.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// How long a slow fake transport spends inside `start`.
const START_DELAY: Duration = Duration::from_millis(200);

fn speaker(address: &str, name: &str) -> FoundDevice {
    FoundDevice {
        address: address.to_string(),
        name: Some(name.to_string()),
        device_class: None,
        service_uuids: Vec::new(),
    }
}

fn loudspeaker(address: &str) -> FoundDevice {
    FoundDevice {
        address: address.to_string(),
        name: None,
        device_class: Some(0x0414),
        service_uuids: Vec::new(),
    }
}

fn thermostat(address: &str) -> FoundDevice {
    FoundDevice {
        address: address.to_string(),
        name: Some("Hallway".to_string()),
        device_class: Some(0x020C),
        service_uuids: Vec::new(),
    }
}

#[tokio::test]
async fn scan_collects_and_deduplicates_across_transports() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.classic.starts(), 1);
    assert_eq!(h.le.starts(), 1);

    h.classic
        .emit(ScanEvent::ClassicDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    h.le
        .emit(ScanEvent::LeDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    h.le.emit(ScanEvent::LeDevice(loudspeaker("11:22:33:44:55:66")));
    h.classic
        .emit(ScanEvent::ClassicDevice(thermostat("77:88:99:AA:BB:CC")));
    settle().await;

    let snapshot = h.coordinator.snapshot().await;
    assert!(snapshot.active);
    assert_eq!(snapshot.devices.len(), 2);
    let jbl = snapshot
        .devices
        .iter()
        .find(|d| d.address == "AA:BB:CC:DD:EE:FF")
        .unwrap();
    assert_eq!(jbl.source, DeviceSource::Classic);
    assert_eq!(jbl.matched_rule, "name");
    let boombox = snapshot
        .devices
        .iter()
        .find(|d| d.address == "11:22:33:44:55:66")
        .unwrap();
    assert_eq!(boombox.matched_rule, "device-class");
}

#[tokio::test]
async fn start_while_active_is_a_no_op() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.classic.starts(), 1);
    assert_eq!(h.le.starts(), 1);
}

#[tokio::test]
async fn notices_follow_finds_and_completion() {
    let mut h = harness();
    h.coordinator.start().await;
    settle().await;
    h.classic
        .emit(ScanEvent::ClassicDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    settle().await;
    match h.notices.try_recv().unwrap() {
        ScanNotice::DeviceFound(device) => assert_eq!(device.address, "AA:BB:CC:DD:EE:FF"),
        other => panic!("unexpected notice: {:?}", other),
    }

    let results = h.coordinator.stop().await;
    assert_eq!(results.len(), 1);
    match h.notices.try_recv().unwrap() {
        ScanNotice::ScanComplete(list) => assert_eq!(list.len(), 1),
        other => panic!("unexpected notice: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_classic_finish_retries_after_delay() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;
    assert_eq!(h.classic.starts(), 1);

    tokio::time::advance(CLASSIC_RETRY_DELAY).await;
    settle().await;
    assert_eq!(h.classic.starts(), 2);
    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.classic.retries, 1);
    assert!(!snapshot.classic.abandoned);
}

#[tokio::test(start_paused = true)]
async fn ble_find_suppresses_classic_empty_retry() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.le.emit(ScanEvent::LeDevice(loudspeaker("11:22:33:44:55:66")));
    settle().await;
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;

    tokio::time::advance(CLASSIC_RETRY_DELAY * 2).await;
    settle().await;
    assert_eq!(h.classic.starts(), 1);
    assert_eq!(h.coordinator.snapshot().await.classic.retries, 0);
}

#[tokio::test(start_paused = true)]
async fn classic_empty_retries_stop_at_the_budget() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;

    for round in 0..MAX_RETRIES {
        h.classic.emit(ScanEvent::ClassicFinished);
        settle().await;
        tokio::time::advance(CLASSIC_RETRY_DELAY).await;
        settle().await;
        assert_eq!(h.classic.starts(), round as u32 + 2);
    }

    // Budget spent: another empty finish must not restart the inquiry.
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;
    tokio::time::advance(CLASSIC_RETRY_DELAY * 4).await;
    settle().await;
    assert_eq!(h.classic.starts(), MAX_RETRIES as u32 + 1);

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.classic.retries, MAX_RETRIES);
    assert!(snapshot.classic.abandoned);
    // The BLE side is untouched by the classic budget.
    assert!(!snapshot.le.abandoned);
    assert_eq!(h.le.starts(), 1);
}

#[tokio::test]
async fn failed_classic_start_retries_immediately() {
    let h = harness_with(FakeClassic::failing(2), FakeLe::default());
    h.coordinator.start().await;
    settle().await;
    // Two refusals burned on the spot, the third attempt sticks.
    assert_eq!(h.classic.starts(), 1);
    assert_eq!(h.coordinator.snapshot().await.classic.retries, 2);
}

#[tokio::test]
async fn classic_start_abandoned_after_budget() {
    let h = harness_with(FakeClassic::failing(10), FakeLe::default());
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.classic.starts(), 0);
    // One initial attempt plus three retries were consumed.
    assert_eq!(h.classic.remaining_failures(), 6);
    let snapshot = h.coordinator.snapshot().await;
    assert!(snapshot.classic.abandoned);
    assert_eq!(snapshot.classic.retries, MAX_RETRIES);
}

#[tokio::test(start_paused = true)]
async fn failed_le_start_retries_after_delay() {
    let h = harness_with(FakeClassic::default(), FakeLe::failing(1));
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.le.starts(), 0);

    tokio::time::advance(LE_RETRY_DELAY).await;
    settle().await;
    assert_eq!(h.le.starts(), 1);
    assert_eq!(h.coordinator.snapshot().await.le.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn le_failures_abandoned_after_budget() {
    let h = harness_with(FakeClassic::default(), FakeLe::failing(10));
    h.coordinator.start().await;
    settle().await;

    for _ in 0..MAX_RETRIES {
        tokio::time::advance(LE_RETRY_DELAY).await;
        settle().await;
    }
    // One initial attempt plus three retries, each refused.
    assert_eq!(h.le.starts(), 0);
    assert_eq!(h.le.remaining_failures(), 6);

    // The budget is spent; more time brings no further attempts.
    tokio::time::advance(LE_RETRY_DELAY * 4).await;
    settle().await;
    assert_eq!(h.le.remaining_failures(), 6);

    let snapshot = h.coordinator.snapshot().await;
    assert!(snapshot.le.abandoned);
    assert_eq!(snapshot.le.retries, MAX_RETRIES);
    // The classic side is untouched by the LE budget.
    assert!(!snapshot.classic.abandoned);
    assert_eq!(h.classic.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn le_failure_after_start_is_retried() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.le.starts(), 1);

    h.le.emit(ScanEvent::LeFailed("controller reset".to_string()));
    settle().await;
    tokio::time::advance(LE_RETRY_DELAY).await;
    settle().await;
    assert_eq!(h.le.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_invalidates_scheduled_retries() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;

    let results = h.coordinator.stop().await;
    assert!(results.is_empty());
    assert_eq!(h.classic.cancels(), 1);
    assert_eq!(h.le.stops(), 1);

    tokio::time::advance(CLASSIC_RETRY_DELAY * 2).await;
    settle().await;
    // The armed retry fired into a dead session.
    assert_eq!(h.classic.starts(), 1);
    assert!(!h.coordinator.snapshot().await.active);
}

#[tokio::test(start_paused = true)]
async fn stop_during_le_start_halts_the_late_scan() {
    let h = harness_with(FakeClassic::default(), FakeLe::slow(START_DELAY));
    h.coordinator.start().await;
    settle().await;
    // The BLE start is still in flight when the operator stops the scan.
    assert_eq!(h.le.starts(), 0);
    h.coordinator.stop().await;
    assert_eq!(h.le.stops(), 1);

    tokio::time::advance(START_DELAY).await;
    settle().await;
    // The start completed into a dead session and was stopped again.
    assert_eq!(h.le.starts(), 1);
    assert_eq!(h.le.stops(), 2);
    assert!(!h.coordinator.snapshot().await.active);
}

#[tokio::test(start_paused = true)]
async fn stop_during_classic_start_cancels_the_late_inquiry() {
    let h = harness_with(FakeClassic::slow(START_DELAY), FakeLe::default());
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.classic.starts(), 0);
    h.coordinator.stop().await;
    assert_eq!(h.classic.cancels(), 1);

    tokio::time::advance(START_DELAY).await;
    settle().await;
    assert_eq!(h.classic.starts(), 1);
    assert_eq!(h.classic.cancels(), 2);
    assert!(!h.coordinator.snapshot().await.active);
}

#[tokio::test(start_paused = true)]
async fn restart_does_not_inherit_old_retries() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;

    h.coordinator.stop().await;
    h.coordinator.start().await;
    settle().await;
    assert_eq!(h.classic.starts(), 2);

    tokio::time::advance(CLASSIC_RETRY_DELAY * 2).await;
    settle().await;
    // The first session's retry was dropped, not replayed into this one.
    assert_eq!(h.classic.starts(), 2);
    assert_eq!(h.coordinator.snapshot().await.classic.retries, 0);
}

#[tokio::test]
async fn stop_is_idempotent_and_results_remain_readable() {
    let mut h = harness();
    h.coordinator.start().await;
    settle().await;
    h.classic
        .emit(ScanEvent::ClassicDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    settle().await;

    let first = h.coordinator.stop().await;
    assert_eq!(first.len(), 1);
    let second = h.coordinator.stop().await;
    assert_eq!(second.len(), 1);
    assert_eq!(h.classic.cancels(), 1);
    assert_eq!(h.le.stops(), 1);

    // Only one completion notice went out.
    drop(h.coordinator);
    let mut completions = 0;
    while let Ok(notice) = h.notices.try_recv() {
        if matches!(notice, ScanNotice::ScanComplete(_)) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn sightings_after_stop_are_ignored() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;
    h.coordinator.stop().await;

    h.classic
        .emit(ScanEvent::ClassicDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    settle().await;
    assert!(h.coordinator.snapshot().await.devices.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_finish_then_finds_on_both_transports() {
    let h = harness();
    h.coordinator.start().await;
    settle().await;

    // First inquiry round comes back empty while the BLE scan is quiet.
    h.classic.emit(ScanEvent::ClassicFinished);
    settle().await;

    // A BLE advertisement lands while the classic retry is pending.
    h.le
        .emit(ScanEvent::LeDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    settle().await;

    tokio::time::advance(CLASSIC_RETRY_DELAY).await;
    settle().await;
    assert_eq!(h.classic.starts(), 2);

    // The retried inquiry finds a loudspeaker and re-reports the speaker.
    h.classic
        .emit(ScanEvent::ClassicDevice(loudspeaker("11:22:33:44:55:66")));
    h.classic
        .emit(ScanEvent::ClassicDevice(speaker("AA:BB:CC:DD:EE:FF", "JBL Speaker")));
    settle().await;

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.devices.len(), 2);
    assert_eq!(snapshot.classic.retries, 1);
    let entry = snapshot
        .devices
        .iter()
        .find(|d| d.address == "AA:BB:CC:DD:EE:FF")
        .unwrap();
    // The first sighting won, transport tag included.
    assert_eq!(entry.source, DeviceSource::Le);
}
