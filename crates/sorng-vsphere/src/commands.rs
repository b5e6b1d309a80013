//! Tauri command handlers.
//!
//! Every command is `async`, takes `State<'_, VsphereServiceState>` and
//! returns `Result<T, String>` (Tauri requires `String` errors). Errors are
//! rendered as `[Kind] message` so callers can branch on the kind.

use crate::service::VsphereServiceState;
use crate::types::*;
use tauri::State;

fn config(
    host: String,
    port: Option<u16>,
    username: String,
    password: String,
    insecure: Option<bool>,
    timeout_secs: Option<u64>,
) -> VsphereConfig {
    VsphereConfig {
        host,
        port: port.unwrap_or(443),
        username,
        password,
        insecure: insecure.unwrap_or(true),
        timeout_secs: timeout_secs.unwrap_or(30),
        ..Default::default()
    }
}

#[tauri::command]
#[allow(clippy::too_many_arguments)]
pub async fn vsphere_gather_facts(
    state: State<'_, VsphereServiceState>,
    host: String,
    port: Option<u16>,
    username: String,
    password: String,
    insecure: Option<bool>,
    timeout_secs: Option<u64>,
    guest: Option<String>,
    uuid: Option<String>,
) -> Result<FactRecord, String> {
    let cfg = config(host, port, username, password, insecure, timeout_secs);
    let target = TargetSpec { name: guest.unwrap_or_default(), instance_id: uuid };
    state.gather_facts(&cfg, &target).await.map_err(String::from)
}

#[tauri::command]
#[allow(clippy::too_many_arguments)]
pub async fn vsphere_set_power_state(
    state: State<'_, VsphereServiceState>,
    host: String,
    port: Option<u16>,
    username: String,
    password: String,
    insecure: Option<bool>,
    timeout_secs: Option<u64>,
    uuid: String,
    power_state: String,
    boot_from_cdrom: Option<bool>,
) -> Result<ChangeResult, String> {
    let requested: RequestedPowerState = power_state.parse()?;
    let cfg = config(host, port, username, password, insecure, timeout_secs);
    state
        .set_power_state(&cfg, &uuid, requested, boot_from_cdrom.unwrap_or(false))
        .await
        .map_err(String::from)
}

#[tauri::command]
#[allow(clippy::too_many_arguments)]
pub async fn vsphere_unmount_cdrom(
    state: State<'_, VsphereServiceState>,
    host: String,
    port: Option<u16>,
    username: String,
    password: String,
    insecure: Option<bool>,
    timeout_secs: Option<u64>,
    uuid: String,
    device: String,
) -> Result<ChangeResult, String> {
    let cfg = config(host, port, username, password, insecure, timeout_secs);
    state
        .unmount_cdrom(&cfg, &uuid, &device)
        .await
        .map_err(String::from)
}

#[tauri::command]
pub async fn vsphere_cancel_pending(state: State<'_, VsphereServiceState>) -> Result<(), String> {
    state.cancel_pending();
    Ok(())
}
