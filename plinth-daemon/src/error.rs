use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("bluetooth adapter not found")]
    AdapterMissing,

    #[error("bluetooth adapter is powered off")]
    AdapterOff,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file {0} not found")]
    FileNotFound(String),

    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::Io(err.to_string())
    }
}

impl From<dbus::Error> for DaemonError {
    fn from(err: dbus::Error) -> Self {
        DaemonError::Bus(err.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(err: serde_json::Error) -> Self {
        DaemonError::Serialization(err.to_string())
    }
}
