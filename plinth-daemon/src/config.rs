use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub state_dir: String,
    pub media_dir: String,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub adapter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/plinth/plinth.sock".to_string(),
            state_dir: "/var/lib/plinth".to_string(),
            media_dir: "/var/lib/plinth/media".to_string(),
            bluetooth: BluetoothConfig::default(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: "hci0".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                let _ = fs::write(path, toml::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
            socket_path = "/tmp/plinth-test.sock"
            state_dir = "/tmp/plinth-state"
            media_dir = "/tmp/plinth-media"

            [bluetooth]
            adapter = "hci1"
        "#;
        let config: DaemonConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.socket_path, "/tmp/plinth-test.sock");
        assert_eq!(config.media_dir, "/tmp/plinth-media");
        assert_eq!(config.bluetooth.adapter, "hci1");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: DaemonConfig = toml::from_str("media_dir = \"/srv/media\"").unwrap();
        assert_eq!(config.media_dir, "/srv/media");
        assert_eq!(config.socket_path, "/run/plinth/plinth.sock");
        assert_eq!(config.bluetooth.adapter, "hci0");
    }

    #[test]
    fn load_creates_default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plinthd.toml");
        let config = DaemonConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.bluetooth.adapter, "hci0");
        // The default file is written back for the operator to edit.
        assert!(path.exists());
    }
}
