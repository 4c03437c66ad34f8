/*!
 * Plinth Appliance Daemon
 * Management core for a kiosk media appliance: hybrid bluetooth audio
 * discovery, display brightness, media files and system clock.
 */

pub mod bluetooth;
pub mod bus;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod ipc;
pub mod storage;

pub use error::{DaemonError, Result};
