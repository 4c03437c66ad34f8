use anyhow::Result;
use tui_input::Input;

use crate::client::{
    AdapterStatus, BondedDevice, BrightnessStatus, ClockStatus, PlinthClient, Request, Response,
    ScanSnapshot,
};

const BRIGHTNESS_STEP: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FocusedPanel {
    Devices,
    Controls,
    Files,
}

/// Which list inside the devices panel a selection row points at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceRow {
    Discovered(usize),
    Bonded(usize),
}

pub enum Dialog {
    None,
    WriteFile {
        name: Input,
        content: Input,
        editing_content: bool,
    },
    SetDateTime {
        date: Input,
        time: Input,
        editing_time: bool,
    },
    Timezones {
        filter: Input,
        zones: Vec<String>,
        selected: usize,
    },
    ViewFile {
        name: String,
        content: String,
    },
}

/// Case-insensitive substring match over the daemon's timezone list.
pub fn filter_zones<'a>(zones: &'a [String], filter: &str) -> Vec<&'a String> {
    let needle = filter.to_lowercase();
    zones
        .iter()
        .filter(|zone| zone.to_lowercase().contains(&needle))
        .collect()
}

pub struct App {
    client: PlinthClient,
    pub adapter: Option<AdapterStatus>,
    pub brightness: Option<BrightnessStatus>,
    pub clock: Option<ClockStatus>,
    pub media_dir: String,
    pub scan: Option<ScanSnapshot>,
    pub bonded: Vec<BondedDevice>,
    pub files: Vec<String>,
    pub focused_panel: FocusedPanel,
    pub selected_device: usize,
    pub selected_file: usize,
    pub dialog: Dialog,
    pub message: Option<String>,
}

impl App {
    pub async fn new(socket_path: &str) -> Result<Self> {
        let mut app = Self {
            client: PlinthClient::new(socket_path.to_string()),
            adapter: None,
            brightness: None,
            clock: None,
            media_dir: String::new(),
            scan: None,
            bonded: Vec::new(),
            files: Vec::new(),
            focused_panel: FocusedPanel::Devices,
            selected_device: 0,
            selected_file: 0,
            dialog: Dialog::None,
            message: None,
        };

        // Load initial data
        app.refresh_data().await?;
        Ok(app)
    }

    pub async fn refresh_data(&mut self) -> Result<()> {
        self.refresh_status().await?;
        self.refresh_scan().await?;
        self.refresh_bonded().await?;
        self.refresh_files().await?;
        Ok(())
    }

    /// Periodic poll; keeps the status header and a live scan fresh.
    pub async fn update(&mut self) -> Result<()> {
        self.refresh_status().await?;
        self.refresh_scan().await?;
        Ok(())
    }

    async fn refresh_status(&mut self) -> Result<()> {
        if let Response::Status {
            adapter,
            brightness,
            clock,
            media_dir,
        } = self.client.send_request(Request::GetStatus).await?
        {
            self.adapter = adapter;
            self.brightness = Some(brightness);
            self.clock = clock;
            self.media_dir = media_dir;
        }
        Ok(())
    }

    async fn refresh_scan(&mut self) -> Result<()> {
        if let Response::ScanStatus { scan } =
            self.client.send_request(Request::GetScanStatus).await?
        {
            self.scan = Some(scan);
        }
        let rows = self.device_rows().len();
        if self.selected_device >= rows && rows > 0 {
            self.selected_device = 0;
        }
        Ok(())
    }

    async fn refresh_bonded(&mut self) -> Result<()> {
        // An unpowered adapter answers with an error; keep the old list.
        if let Response::BondedDevices { devices } =
            self.client.send_request(Request::GetBondedDevices).await?
        {
            self.bonded = devices;
        }
        Ok(())
    }

    async fn refresh_files(&mut self) -> Result<()> {
        match self.client.send_request(Request::ListFiles).await? {
            Response::Files { names } => {
                self.files = names;
                if self.selected_file >= self.files.len() {
                    self.selected_file = 0;
                }
            }
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        Ok(())
    }

    /// Discovered rows first, then the paired list, as rendered.
    pub fn device_rows(&self) -> Vec<DeviceRow> {
        let discovered = self.scan.as_ref().map_or(0, |scan| scan.devices.len());
        let mut rows: Vec<DeviceRow> = (0..discovered).map(DeviceRow::Discovered).collect();
        rows.extend((0..self.bonded.len()).map(DeviceRow::Bonded));
        rows
    }

    pub fn selected_row(&self) -> Option<DeviceRow> {
        self.device_rows().get(self.selected_device).copied()
    }

    pub fn previous_item(&mut self) {
        let count = match self.focused_panel {
            FocusedPanel::Devices => self.device_rows().len(),
            FocusedPanel::Files => self.files.len(),
            FocusedPanel::Controls => return,
        };
        if count == 0 {
            return;
        }
        let selected = match self.focused_panel {
            FocusedPanel::Devices => &mut self.selected_device,
            _ => &mut self.selected_file,
        };
        *selected = if *selected == 0 { count - 1 } else { *selected - 1 };
    }

    pub fn next_item(&mut self) {
        let count = match self.focused_panel {
            FocusedPanel::Devices => self.device_rows().len(),
            FocusedPanel::Files => self.files.len(),
            FocusedPanel::Controls => return,
        };
        if count == 0 {
            return;
        }
        let selected = match self.focused_panel {
            FocusedPanel::Devices => &mut self.selected_device,
            _ => &mut self.selected_file,
        };
        *selected = (*selected + 1) % count;
    }

    pub fn next_panel(&mut self) {
        self.focused_panel = match self.focused_panel {
            FocusedPanel::Devices => FocusedPanel::Controls,
            FocusedPanel::Controls => FocusedPanel::Files,
            FocusedPanel::Files => FocusedPanel::Devices,
        };
    }

    pub async fn toggle_scan(&mut self) -> Result<()> {
        let scanning = self.scan.as_ref().map_or(false, |scan| scan.active);
        let request = if scanning {
            Request::StopScan
        } else {
            Request::StartScan
        };
        match self.client.send_request(request).await? {
            Response::Success { message } => self.message = Some(message),
            Response::ScanResults { devices } => {
                self.message = Some(format!("Scan stopped, {} audio device(s)", devices.len()));
            }
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_scan().await
    }

    pub async fn toggle_power(&mut self) -> Result<()> {
        let on = self.adapter.as_ref().map_or(false, |adapter| adapter.powered);
        match self
            .client
            .send_request(Request::SetBluetoothPower { on: !on })
            .await?
        {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_status().await
    }

    pub async fn pair_selected(&mut self) -> Result<()> {
        let address = match self.selected_row() {
            Some(DeviceRow::Discovered(index)) => self
                .scan
                .as_ref()
                .and_then(|scan| scan.devices.get(index))
                .map(|device| device.address.clone()),
            _ => None,
        };
        let Some(address) = address else {
            self.message = Some("Select a discovered device to pair".to_string());
            return Ok(());
        };
        match self
            .client
            .send_request(Request::PairDevice { address })
            .await?
        {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_bonded().await
    }

    pub async fn forget_selected(&mut self) -> Result<()> {
        let address = match self.selected_row() {
            Some(DeviceRow::Bonded(index)) => {
                self.bonded.get(index).map(|device| device.address.clone())
            }
            _ => None,
        };
        let Some(address) = address else {
            self.message = Some("Select a paired device to forget".to_string());
            return Ok(());
        };
        match self
            .client
            .send_request(Request::ForgetDevice { address })
            .await?
        {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_bonded().await
    }

    pub async fn brightness_up(&mut self) -> Result<()> {
        self.nudge_brightness(BRIGHTNESS_STEP).await
    }

    pub async fn brightness_down(&mut self) -> Result<()> {
        self.nudge_brightness(-BRIGHTNESS_STEP).await
    }

    /// The daemon clamps to its own range, so out-of-range values are fine.
    async fn nudge_brightness(&mut self, delta: f32) -> Result<()> {
        let level = self.brightness.as_ref().map_or(1.0, |b| b.level) + delta;
        match self
            .client
            .send_request(Request::SetBrightness { level })
            .await?
        {
            Response::Brightness { status } => {
                self.message = Some(format!("Brightness {:.0}%", status.level * 100.0));
                self.brightness = Some(status);
            }
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        Ok(())
    }

    pub fn open_write_dialog(&mut self) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.dialog = Dialog::WriteFile {
            name: Input::default(),
            content: Input::new(format!("Test content written on {}", stamp)),
            editing_content: false,
        };
    }

    pub async fn submit_write_dialog(&mut self) -> Result<()> {
        let Dialog::WriteFile { name, content, .. } =
            std::mem::replace(&mut self.dialog, Dialog::None)
        else {
            return Ok(());
        };
        let request = Request::WriteFile {
            name: name.value().to_string(),
            content: content.value().to_string(),
        };
        match self.client.send_request(request).await? {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_files().await
    }

    pub async fn read_selected_file(&mut self) -> Result<()> {
        let Some(name) = self.files.get(self.selected_file).cloned() else {
            self.message = Some("No file selected".to_string());
            return Ok(());
        };
        match self.client.send_request(Request::ReadFile { name }).await? {
            Response::FileContent { name, content } => {
                self.dialog = Dialog::ViewFile { name, content };
            }
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        Ok(())
    }

    pub fn open_datetime_dialog(&mut self) {
        let now = chrono::Local::now();
        self.dialog = Dialog::SetDateTime {
            date: Input::new(now.format("%Y-%m-%d").to_string()),
            time: Input::new(now.format("%H:%M").to_string()),
            editing_time: false,
        };
    }

    pub async fn submit_datetime_dialog(&mut self) -> Result<()> {
        let Dialog::SetDateTime { date, time, .. } =
            std::mem::replace(&mut self.dialog, Dialog::None)
        else {
            return Ok(());
        };
        let request = Request::SetDateTime {
            date: date.value().to_string(),
            time: time.value().to_string(),
        };
        match self.client.send_request(request).await? {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_status().await
    }

    pub async fn open_timezone_dialog(&mut self) -> Result<()> {
        match self.client.send_request(Request::ListTimezones).await? {
            Response::Timezones { zones } => {
                self.dialog = Dialog::Timezones {
                    filter: Input::default(),
                    zones,
                    selected: 0,
                };
            }
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        Ok(())
    }

    pub fn timezone_up(&mut self) {
        if let Dialog::Timezones { selected, .. } = &mut self.dialog {
            *selected = selected.saturating_sub(1);
        }
    }

    pub fn timezone_down(&mut self) {
        if let Dialog::Timezones {
            filter,
            zones,
            selected,
        } = &mut self.dialog
        {
            let count = filter_zones(zones, filter.value()).len();
            if count > 0 && *selected + 1 < count {
                *selected += 1;
            }
        }
    }

    pub async fn submit_timezone_dialog(&mut self) -> Result<()> {
        let Dialog::Timezones {
            filter,
            zones,
            selected,
        } = std::mem::replace(&mut self.dialog, Dialog::None)
        else {
            return Ok(());
        };
        let matches = filter_zones(&zones, filter.value());
        let Some(timezone) = matches.get(selected).map(|zone| zone.to_string()) else {
            return Ok(());
        };
        match self
            .client
            .send_request(Request::SetTimezone { timezone })
            .await?
        {
            Response::Success { message } => self.message = Some(message),
            Response::Error { message } => self.message = Some(message),
            _ => {}
        }
        self.refresh_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeviceSource, DiscoveredDevice, RetryState};

    fn app() -> App {
        App {
            client: PlinthClient::new("/tmp/plinth-test.sock".to_string()),
            adapter: None,
            brightness: None,
            clock: None,
            media_dir: String::new(),
            scan: None,
            bonded: Vec::new(),
            files: Vec::new(),
            focused_panel: FocusedPanel::Devices,
            selected_device: 0,
            selected_file: 0,
            dialog: Dialog::None,
            message: None,
        }
    }

    fn snapshot(count: usize) -> ScanSnapshot {
        ScanSnapshot {
            active: true,
            session: None,
            devices: (0..count)
                .map(|i| DiscoveredDevice {
                    address: format!("AA:BB:CC:DD:EE:{:02X}", i),
                    name: Some(format!("Speaker {}", i)),
                    source: DeviceSource::Classic,
                    matched_rule: "device-class".to_string(),
                })
                .collect(),
            classic: RetryState::default(),
            le: RetryState::default(),
        }
    }

    #[test]
    fn device_rows_list_discovered_before_bonded() {
        let mut app = app();
        app.scan = Some(snapshot(2));
        app.bonded = vec![BondedDevice {
            address: "11:22:33:44:55:66".to_string(),
            name: "Soundbar".to_string(),
            connected: true,
        }];

        let rows = app.device_rows();
        assert_eq!(
            rows,
            vec![
                DeviceRow::Discovered(0),
                DeviceRow::Discovered(1),
                DeviceRow::Bonded(0),
            ]
        );

        app.selected_device = 2;
        assert_eq!(app.selected_row(), Some(DeviceRow::Bonded(0)));
    }

    #[test]
    fn selection_wraps_across_both_lists() {
        let mut app = app();
        app.scan = Some(snapshot(1));
        app.bonded = vec![BondedDevice {
            address: "11:22:33:44:55:66".to_string(),
            name: "Soundbar".to_string(),
            connected: false,
        }];

        app.next_item();
        assert_eq!(app.selected_device, 1);
        app.next_item();
        assert_eq!(app.selected_device, 0);
        app.previous_item();
        assert_eq!(app.selected_device, 1);
    }

    #[test]
    fn selection_ignores_empty_lists() {
        let mut app = app();
        app.next_item();
        app.previous_item();
        assert_eq!(app.selected_device, 0);
    }

    #[test]
    fn filter_zones_is_case_insensitive() {
        let zones = vec![
            "America/New_York".to_string(),
            "Europe/Berlin".to_string(),
            "Europe/London".to_string(),
        ];
        let matched = filter_zones(&zones, "europe");
        assert_eq!(matched.len(), 2);
        assert!(filter_zones(&zones, "").len() == 3);
        assert_eq!(filter_zones(&zones, "york"), vec!["America/New_York"]);
    }
}
