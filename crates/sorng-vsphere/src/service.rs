//! Entry points: fact gathering, power state and cdrom unmount.
//!
//! Each top-level call opens its own session, runs one operation and logs
//! out on every exit path; nothing is kept between invocations. The
//! `*_with` variants take any [`Inventory`] and leave session handling to
//! the caller.

use crate::correlator;
use crate::device::DeviceReconfigurer;
use crate::error::VsphereResult;
use crate::inventory::Inventory;
use crate::power::PowerController;
use crate::resolver;
use crate::task::TaskWaiter;
use crate::types::*;
use crate::vsphere::VsphereClient;

use log::info;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ── Backend-generic operations ──────────────────────────────────────

pub async fn gather_facts_with(
    inventory: &dyn Inventory,
    target: &TargetSpec,
) -> VsphereResult<FactRecord> {
    let vm = resolver::resolve_vm(inventory, target).await?;
    correlator::correlate(&vm, inventory).await
}

pub async fn set_power_state_with(
    inventory: &dyn Inventory,
    uuid: &str,
    requested: RequestedPowerState,
    boot_from_cdrom: bool,
    waiter: TaskWaiter,
) -> VsphereResult<ChangeResult> {
    let vm = resolver::resolve_vm(inventory, &TargetSpec::by_instance_id(uuid)).await?;
    let changed = PowerController::new(inventory, waiter)
        .apply(&vm, requested, boot_from_cdrom)
        .await?;
    Ok(ChangeResult { changed })
}

pub async fn unmount_cdrom_with(
    inventory: &dyn Inventory,
    uuid: &str,
    device_label: &str,
    waiter: TaskWaiter,
) -> VsphereResult<ChangeResult> {
    let vm = resolver::resolve_vm(inventory, &TargetSpec::by_instance_id(uuid)).await?;
    let changed = DeviceReconfigurer::new(inventory, waiter)
        .unmount_cdrom(&vm, device_label)
        .await?;
    Ok(ChangeResult { changed })
}

// ── Session-scoped operations ───────────────────────────────────────

/// Log in, gather facts for `target`, log out.
pub async fn gather_facts(config: &VsphereConfig, target: &TargetSpec) -> VsphereResult<FactRecord> {
    info!("Gathering facts for {target} on {}", config.host);
    let mut client = VsphereClient::connect(config).await?;
    let result = gather_facts_with(&client, target).await;
    client.logout().await;
    result
}

/// Log in, drive the VM with instance uuid `uuid` to `requested`, log out.
pub async fn set_power_state(
    config: &VsphereConfig,
    uuid: &str,
    requested: RequestedPowerState,
    boot_from_cdrom: bool,
    waiter: TaskWaiter,
) -> VsphereResult<ChangeResult> {
    info!("Setting powerState of {uuid} on {} to {requested}", config.host);
    let mut client = VsphereClient::connect(config).await?;
    let result = set_power_state_with(&client, uuid, requested, boot_from_cdrom, waiter).await;
    client.logout().await;
    result
}

/// Log in, unmount the cdrom `device_label` of VM `uuid`, log out.
pub async fn unmount_cdrom(
    config: &VsphereConfig,
    uuid: &str,
    device_label: &str,
    waiter: TaskWaiter,
) -> VsphereResult<ChangeResult> {
    info!("Unmounting {device_label} of {uuid} on {}", config.host);
    let mut client = VsphereClient::connect(config).await?;
    let result = unmount_cdrom_with(&client, uuid, device_label, waiter).await;
    client.logout().await;
    result
}

// ── Tauri state ─────────────────────────────────────────────────────

/// Thread-safe handle managed by Tauri.
pub type VsphereServiceState = Arc<VsphereService>;

/// Holds the task polling policy and the token that aborts pending waits.
pub struct VsphereService {
    wait: TaskWaitConfig,
    cancel: Mutex<CancellationToken>,
}

impl VsphereService {
    pub fn new(wait: TaskWaitConfig) -> Self {
        Self { wait, cancel: Mutex::new(CancellationToken::new()) }
    }

    pub fn wait_config(&self) -> &TaskWaitConfig {
        &self.wait
    }

    /// Waiter tied to the current cancellation generation.
    pub fn waiter(&self) -> TaskWaiter {
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).child_token();
        TaskWaiter::with_cancellation(self.wait.clone(), token)
    }

    /// Abort every wait started so far. Later waits are unaffected.
    pub fn cancel_pending(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        info!("Cancelled pending vSphere task waits");
    }

    pub async fn gather_facts(&self, config: &VsphereConfig, target: &TargetSpec) -> VsphereResult<FactRecord> {
        gather_facts(config, target).await
    }

    pub async fn set_power_state(
        &self,
        config: &VsphereConfig,
        uuid: &str,
        requested: RequestedPowerState,
        boot_from_cdrom: bool,
    ) -> VsphereResult<ChangeResult> {
        set_power_state(config, uuid, requested, boot_from_cdrom, self.waiter()).await
    }

    pub async fn unmount_cdrom(
        &self,
        config: &VsphereConfig,
        uuid: &str,
        device_label: &str,
    ) -> VsphereResult<ChangeResult> {
        unmount_cdrom(config, uuid, device_label, self.waiter()).await
    }
}

impl Default for VsphereService {
    fn default() -> Self {
        Self::new(TaskWaitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VsphereError;
    use crate::simulated::{SimulatedInventory, SimulatedVm};

    fn waiter() -> TaskWaiter {
        TaskWaiter::new(TaskWaitConfig { initial_interval_ms: 1, max_interval_ms: 2, timeout_secs: Some(5) })
    }

    fn inventory() -> SimulatedInventory {
        let inv = SimulatedInventory::new();
        let dc = inv.add_datacenter("lab");
        inv.add_datastore(&dc, "ds1");
        let host = inv.add_host(
            &dc,
            "esx01.lab",
            vec![HostMount { volume_name: "ds1".into(), capacity: Some(500), max_blocks: Some(10) }],
        );
        inv.add_vm(
            &dc,
            SimulatedVm::new("web01")
                .instance_uuid("5011-aa")
                .vmx_path("[ds1] web01/web01.vmx")
                .on_host(&host)
                .power_state(VmPowerState::PoweredOff)
                .device(VirtualDevice::Cdrom {
                    info: DeviceInfo { key: 3002, controller_key: Some(201), label: "CD/DVD drive 1".into(), ..Default::default() },
                    backing: CdromBacking::Iso { file_name: "[ds1] iso/rhel.iso".into() },
                    connectable: None,
                }),
        );
        inv
    }

    #[tokio::test]
    async fn gather_facts_end_to_end() {
        let inv = inventory();
        let facts = gather_facts_with(&inv, &TargetSpec::by_name("web01")).await.unwrap();
        assert_eq!(facts.general.datacenter.as_deref(), Some("lab"));
        assert_eq!(facts.hm_datastore.capacity, Some(500));
        assert!(facts.vm_removeable_media.contains_key("CD/DVD drive 1"));

        let json = serde_json::to_value(&facts).unwrap();
        for key in ["general", "vm_state", "hm_datastore", "vm_bios", "vm_network", "vm_removeable_media"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("warnings").is_none());
    }

    #[tokio::test]
    async fn power_then_repeat_is_idempotent() {
        let inv = inventory();
        let first = set_power_state_with(&inv, "5011-aa", RequestedPowerState::PoweredOn, false, waiter())
            .await
            .unwrap();
        let second = set_power_state_with(&inv, "5011-aa", RequestedPowerState::PoweredOn, false, waiter())
            .await
            .unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(inv.power_ops().len(), 1);
    }

    #[tokio::test]
    async fn unmount_then_repeat_is_idempotent() {
        let inv = inventory();
        let first = unmount_cdrom_with(&inv, "5011-aa", "CD/DVD drive 1", waiter()).await.unwrap();
        let second = unmount_cdrom_with(&inv, "5011-aa", "CD/DVD drive 1", waiter()).await.unwrap();
        assert_eq!(first, ChangeResult { changed: true });
        assert_eq!(second, ChangeResult { changed: false });
    }

    #[tokio::test]
    async fn mutations_require_known_uuid() {
        let inv = inventory();
        let err = unmount_cdrom_with(&inv, "nope", "CD/DVD drive 1", waiter()).await.unwrap_err();
        assert!(matches!(err, VsphereError::NotFound { .. }));
    }

    #[tokio::test]
    async fn session_entry_point_rejects_missing_host() {
        let err = gather_facts(&VsphereConfig::default(), &TargetSpec::by_name("web01"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConnectionError");
    }

    #[test]
    fn cancel_pending_only_hits_earlier_waiters() {
        let svc = VsphereService::default();
        let before = svc.waiter();
        svc.cancel_pending();
        let after = svc.waiter();
        assert!(before.cancellation_token().is_cancelled());
        assert!(!after.cancellation_token().is_cancelled());
    }
}
