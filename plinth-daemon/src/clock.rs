/*!
System Clock

Date, time and timezone go through systemd's `org.freedesktop.timedate1`
service, which owns the RTC and `/etc/localtime`. Wall-clock input is
interpreted in the current local timezone before it is handed over.
*/

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use dbus::nonblock::stdintf::org_freedesktop_dbus::Properties;
use dbus::nonblock::{Proxy, SyncConnection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus;
use crate::error::{DaemonError, Result};

const TIMEDATE_BUS: &str = "org.freedesktop.timedate1";
const TIMEDATE_PATH: &str = "/org/freedesktop/timedate1";
const TIMEDATE_IFACE: &str = "org.freedesktop.timedate1";
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockStatus {
    pub local_time: String,
    pub timezone: String,
    pub ntp_synchronized: bool,
}

pub struct ClockManager {
    conn: Arc<SyncConnection>,
}

impl ClockManager {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            conn: bus::system_bus().await?,
        })
    }

    fn proxy(&self) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new(TIMEDATE_BUS, TIMEDATE_PATH, CALL_TIMEOUT, self.conn.clone())
    }

    pub async fn status(&self) -> Result<ClockStatus> {
        let proxy = self.proxy();
        let timezone: String = proxy.get(TIMEDATE_IFACE, "Timezone").await?;
        let ntp_synchronized: bool = proxy.get(TIMEDATE_IFACE, "NTPSynchronized").await?;
        Ok(ClockStatus {
            local_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            timezone,
            ntp_synchronized,
        })
    }

    /// Sets the wall clock. `date` is `YYYY-MM-DD`, `time` is `HH:MM`
    /// (seconds optional), both read in the current local timezone.
    pub async fn set_datetime(&self, date: &str, time: &str) -> Result<()> {
        let micros = local_datetime_micros(date, time)?;
        let () = self
            .proxy()
            .method_call(TIMEDATE_IFACE, "SetTime", (micros, false, false))
            .await?;
        info!("Clock set to {} {}", date, time);
        Ok(())
    }

    pub async fn list_timezones(&self) -> Result<Vec<String>> {
        let (zones,): (Vec<String>,) = self
            .proxy()
            .method_call(TIMEDATE_IFACE, "ListTimezones", ())
            .await?;
        Ok(zones)
    }

    pub async fn set_timezone(&self, timezone: &str) -> Result<()> {
        if timezone.trim().is_empty() {
            return Err(DaemonError::Invalid("empty timezone".to_string()));
        }
        let () = self
            .proxy()
            .method_call(TIMEDATE_IFACE, "SetTimezone", (timezone, false))
            .await?;
        info!("Timezone set to {}", timezone);
        Ok(())
    }
}

/// Microseconds since the epoch for a local wall-clock date and time.
fn local_datetime_micros(date: &str, time: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| DaemonError::Invalid(format!("bad date: {}", e)))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .map_err(|e| DaemonError::Invalid(format!("bad time: {}", e)))?;
    let naive = date.and_time(time);
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| DaemonError::Invalid("time does not exist in this timezone".to_string()))?;
    Ok(local.timestamp_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_input() {
        assert!(local_datetime_micros("2024-13-01", "10:00").is_err());
        assert!(local_datetime_micros("yesterday", "10:00").is_err());
        assert!(local_datetime_micros("2024-05-01", "25:61").is_err());
    }

    #[test]
    fn accepts_minutes_and_seconds_forms() {
        assert!(local_datetime_micros("2024-05-01", "09:30").is_ok());
        assert!(local_datetime_micros("2024-05-01", "09:30:15").is_ok());
    }

    #[test]
    fn round_trips_through_the_local_timezone() {
        let micros = local_datetime_micros("2024-05-01", "09:30").unwrap();
        let back = Local.timestamp_micros(micros).single().unwrap();
        assert_eq!(back.format("%Y-%m-%d %H:%M").to_string(), "2024-05-01 09:30");
    }
}
