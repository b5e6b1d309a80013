//! Virtual device reconfiguration (cdrom unmount).

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::task::TaskWaiter;
use crate::types::*;

use log::{debug, info};

/// Submits device-level config changes and checks they took effect.
pub struct DeviceReconfigurer<'a> {
    inventory: &'a dyn Inventory,
    waiter: TaskWaiter,
}

/// Edit spec that detaches a cdrom: client passthrough backing and a
/// disconnected, guest-controllable connection.
pub fn build_unmount_spec(info: &DeviceInfo) -> VmConfigSpec {
    VmConfigSpec {
        extra_config: Vec::new(),
        device_change: vec![DeviceConfigSpec {
            operation: DeviceOperation::Edit,
            device: VirtualDevice::Cdrom {
                info: DeviceInfo {
                    key: info.key,
                    controller_key: info.controller_key,
                    unit_number: None,
                    label: info.label.clone(),
                    summary: String::new(),
                },
                backing: CdromBacking::RemotePassthrough,
                connectable: Some(ConnectInfo {
                    start_connected: false,
                    allow_guest_control: true,
                    connected: false,
                }),
            },
        }],
    }
}

/// First cdrom labelled `label` in device order. Later devices carrying the
/// same label are never touched.
fn find_cdrom<'v>(devices: &'v [VirtualDevice], label: &str) -> Option<(&'v DeviceInfo, &'v CdromBacking)> {
    devices.iter().find_map(|dev| match dev {
        VirtualDevice::Cdrom { info, backing, .. } if info.label == label => Some((info, backing)),
        _ => None,
    })
}

impl<'a> DeviceReconfigurer<'a> {
    pub fn new(inventory: &'a dyn Inventory, waiter: TaskWaiter) -> Self {
        Self { inventory, waiter }
    }

    /// Switch the cdrom labelled `label` to remote passthrough. With
    /// duplicate labels the first matching device is the one reconfigured.
    ///
    /// Returns `false` without submitting anything when it already is.
    /// After a successful task the device list is read again; if the
    /// backing did not change the result is [`VsphereError::UnknownDeviceState`].
    pub async fn unmount_cdrom(&self, vm: &ResolvedVm, label: &str) -> VsphereResult<bool> {
        let (info, backing) = find_cdrom(&vm.devices, label).ok_or_else(|| VsphereError::DeviceNotFound {
            vm: vm.display_id(),
            device: label.to_string(),
        })?;

        if *backing == CdromBacking::RemotePassthrough {
            debug!("{label} on {} already on passthrough backing", vm.display_id());
            return Ok(false);
        }

        let spec = build_unmount_spec(info);
        let unknown_state = |message: Option<String>| VsphereError::UnknownDeviceState {
            vm: vm.display_id(),
            device: label.to_string(),
            spec: serde_json::to_string(&spec).unwrap_or_default(),
            message,
        };

        info!("Unmounting {label} ({backing:?}) on {}", vm.display_id());
        let task = self.inventory.reconfigure(vm.moref(), &spec).await?;
        let outcome = self.waiter.wait(self.inventory, &task).await?;
        if outcome.state != TaskState::Success {
            return Err(unknown_state(outcome.error));
        }

        let fresh = self.inventory.vm_config(vm.moref()).await?;
        let applied = fresh.devices.iter().any(|dev| {
            matches!(
                dev,
                VirtualDevice::Cdrom { info: now, backing: CdromBacking::RemotePassthrough, .. }
                    if now.key == info.key
            )
        });
        if !applied {
            return Err(unknown_state(None));
        }
        Ok(true)
    }
}
