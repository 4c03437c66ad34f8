use std::sync::Arc;

use dbus::nonblock::SyncConnection;
use tracing::error;

use crate::error::Result;

/// Opens a connection to the system bus and spawns the task that drives it.
/// The task only returns if the connection is lost, so the error is terminal
/// for every manager holding this handle.
pub async fn system_bus() -> Result<Arc<SyncConnection>> {
    let (resource, conn) = dbus_tokio::connection::new_system_sync()?;
    tokio::spawn(async move {
        let err = resource.await;
        error!("D-Bus connection lost: {}", err);
    });
    Ok(conn)
}
