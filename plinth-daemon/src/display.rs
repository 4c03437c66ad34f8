/*!
Display Brightness

Brightness is a fraction in [0.10, 1.00], persisted as a small TOML
state file and mirrored into the first sysfs backlight device when one
is present and writable. The persisted value is restored at startup, so
a power cycle keeps the operator's setting.
*/

use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};

pub const MIN_BRIGHTNESS: f32 = 0.10;
pub const MAX_BRIGHTNESS: f32 = 1.00;

const STATE_FILE: &str = "brightness.toml";
const BACKLIGHT_ROOT: &str = "/sys/class/backlight";
const DEFAULT_LEVEL: f32 = 1.0;

#[derive(Debug, Serialize, Deserialize)]
struct BrightnessState {
    level: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrightnessStatus {
    pub level: f32,
    pub backlight: Option<String>,
    pub writable: bool,
}

#[derive(Debug)]
struct Backlight {
    name: String,
    brightness_path: PathBuf,
    max: u32,
    writable: bool,
}

pub struct DisplayManager {
    state_path: PathBuf,
    backlight: Option<Backlight>,
}

impl DisplayManager {
    pub fn new(state_dir: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let backlight = detect_backlight(Path::new(BACKLIGHT_ROOT));
        match &backlight {
            Some(b) => info!(
                "Using backlight {} (max {}, {})",
                b.name,
                b.max,
                if b.writable { "writable" } else { "read-only" }
            ),
            None => info!("No backlight device, brightness changes persist only"),
        }
        Ok(Self {
            state_path: Path::new(state_dir).join(STATE_FILE),
            backlight,
        })
    }

    /// Last persisted level; falls back to full brightness when the state
    /// file is missing or unreadable.
    pub fn level(&self) -> f32 {
        fs::read_to_string(&self.state_path)
            .ok()
            .and_then(|raw| toml::from_str::<BrightnessState>(&raw).ok())
            .map(|state| clamp_level(state.level))
            .unwrap_or(DEFAULT_LEVEL)
    }

    /// Clamps, persists and applies a new level, returning the effective
    /// value.
    pub fn set_level(&self, level: f32) -> Result<f32> {
        let level = clamp_level(level);
        let raw = toml::to_string_pretty(&BrightnessState { level })
            .map_err(|e| DaemonError::Serialization(e.to_string()))?;
        fs::write(&self.state_path, raw)?;
        self.apply(level);
        debug!("Brightness set to {:.2}", level);
        Ok(level)
    }

    /// Reapplies the persisted level, used once at daemon startup.
    pub fn restore(&self) {
        let level = self.level();
        self.apply(level);
        info!("Restored brightness {:.2}", level);
    }

    pub fn status(&self) -> BrightnessStatus {
        BrightnessStatus {
            level: self.level(),
            backlight: self.backlight.as_ref().map(|b| b.name.clone()),
            writable: self.backlight.as_ref().map_or(false, |b| b.writable),
        }
    }

    fn apply(&self, level: f32) {
        let Some(backlight) = &self.backlight else {
            return;
        };
        if !backlight.writable {
            debug!("Backlight {} not writable, keeping persisted value only", backlight.name);
            return;
        }
        let raw = raw_for_level(level, backlight.max);
        if let Err(err) = fs::write(&backlight.brightness_path, raw.to_string()) {
            warn!("Could not set backlight {}: {}", backlight.name, err);
        }
    }
}

pub fn clamp_level(level: f32) -> f32 {
    level.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS)
}

/// Maps a level onto the device range, never below a tenth of the
/// maximum so the panel stays readable.
fn raw_for_level(level: f32, max: u32) -> u32 {
    let raw = (level * max as f32) as u32;
    raw.clamp((max / 10).max(1), max)
}

fn detect_backlight(root: &Path) -> Option<Backlight> {
    let mut entries: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for dir in entries {
        let max = fs::read_to_string(dir.join("max_brightness"))
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        // A zero range means the device cannot be driven.
        let Some(max) = max.filter(|max| *max > 0) else {
            continue;
        };
        let brightness_path = dir.join("brightness");
        let writable = access(&brightness_path, AccessFlags::W_OK).is_ok();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Some(Backlight {
            name,
            brightness_path,
            max,
            writable,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir) -> DisplayManager {
        DisplayManager {
            state_path: dir.path().join(STATE_FILE),
            backlight: None,
        }
    }

    #[test]
    fn defaults_to_full_brightness() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(manager(&dir).level(), DEFAULT_LEVEL);
    }

    #[test]
    fn set_level_clamps_to_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let display = manager(&dir);
        assert_eq!(display.set_level(1.5).unwrap(), MAX_BRIGHTNESS);
        assert_eq!(display.set_level(0.01).unwrap(), MIN_BRIGHTNESS);
    }

    #[test]
    fn level_survives_a_new_manager_over_the_same_state() {
        let dir = tempfile::tempdir().unwrap();
        manager(&dir).set_level(0.4).unwrap();
        let reborn = manager(&dir);
        assert!((reborn.level() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn garbage_state_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let display = manager(&dir);
        std::fs::write(&display.state_path, "not toml at all").unwrap();
        assert_eq!(display.level(), DEFAULT_LEVEL);
    }

    #[test]
    fn raw_value_maps_range_with_floor() {
        assert_eq!(raw_for_level(1.0, 255), 255);
        assert_eq!(raw_for_level(0.1, 255), 25);
        assert_eq!(raw_for_level(0.5, 255), 127);
        assert_eq!(raw_for_level(0.1, 100), 10);
        // Tiny ranges still end up visible.
        assert_eq!(raw_for_level(0.1, 5), 1);
    }

    #[test]
    fn detect_skips_devices_with_zero_range() {
        let root = tempfile::tempdir().unwrap();
        let dead = root.path().join("acpi_video0");
        std::fs::create_dir(&dead).unwrap();
        std::fs::write(dead.join("max_brightness"), "0\n").unwrap();
        std::fs::write(dead.join("brightness"), "0\n").unwrap();
        assert!(detect_backlight(root.path()).is_none());

        // A drivable device behind it is still found.
        let panel = root.path().join("panel0");
        std::fs::create_dir(&panel).unwrap();
        std::fs::write(panel.join("max_brightness"), "255\n").unwrap();
        std::fs::write(panel.join("brightness"), "128\n").unwrap();
        let found = detect_backlight(root.path()).unwrap();
        assert_eq!(found.name, "panel0");
        assert_eq!(found.max, 255);
    }
}
