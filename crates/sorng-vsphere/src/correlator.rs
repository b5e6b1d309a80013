//! Fact correlation: join a resolved VM against the datacenter, host,
//! datastore and device subtrees into one [`FactRecord`].
//!
//! Every scan here is first-match-wins in the order the inventory returns
//! objects. A miss never fails the record; the affected fields stay unset
//! and the miss is reported in [`FactRecord::warnings`].

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::types::*;

use log::{debug, warn};
use std::collections::BTreeMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Datastore path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vmx path in its raw and slash-separated forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastorePath {
    /// Datastore the file lives on
    pub datastore: String,
    /// As reported, e.g. `[ds1] web01/web01.vmx`
    pub guest_disk: String,
    /// `ds1/web01/web01.vmx`
    pub guest_disk_sane: String,
    /// `ds1/web01`
    pub guest_path_sane: String,
    /// `[ds1] web01`
    pub guest_path: String,
}

fn drop_last_segment(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Split `[datastore] dir/file.vmx` into its datastore and path forms.
///
/// Parsing `guest_path_sane` or `guest_disk_sane` again yields the same
/// datastore.
pub fn parse_datastore_path(raw: &str) -> DatastorePath {
    let guest_disk_sane = raw.replace('[', "").replace("] ", "/");
    let guest_path_sane = drop_last_segment(&guest_disk_sane);
    let datastore = guest_disk_sane
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();
    DatastorePath {
        datastore,
        guest_disk: raw.to_string(),
        guest_path: drop_last_segment(raw),
        guest_disk_sane,
        guest_path_sane,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Inventory joins
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Name of `obj`, or `None` when it was deleted after being listed.
async fn name_if_present(
    inventory: &dyn Inventory,
    obj: &ManagedObjectRef,
) -> VsphereResult<Option<String>> {
    match inventory.entity_name(obj).await {
        Ok(name) => Ok(Some(name)),
        Err(VsphereError::ObjectNotFound(msg)) => {
            warn!("Skipping {obj}, it disappeared during the scan: {msg}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Name of the first datacenter holding a datastore called `datastore`.
/// Datastores deleted mid-scan are skipped.
pub async fn find_datacenter(
    inventory: &dyn Inventory,
    datastore: &str,
) -> VsphereResult<Option<String>> {
    for dc in inventory.list(InventoryKind::Datacenter, None).await? {
        for ds in inventory.list(InventoryKind::Datastore, Some(&dc)).await? {
            if name_if_present(inventory, &ds).await?.as_deref() == Some(datastore) {
                return inventory.entity_name(&dc).await.map(Some);
            }
        }
    }
    Ok(None)
}

/// First host named `host_name`, and on it the first mount of `datastore`.
///
/// The outer `Option` is the host, the inner one the mount.
pub async fn find_host_mount(
    inventory: &dyn Inventory,
    host_name: &str,
    datastore: &str,
) -> VsphereResult<Option<Option<HostMount>>> {
    for host in inventory.list(InventoryKind::HostSystem, None).await? {
        if name_if_present(inventory, &host).await?.as_deref() != Some(host_name) {
            continue;
        }
        let mount = inventory
            .host_mounts(&host)
            .await?
            .into_iter()
            .find(|m| m.volume_name == datastore);
        return Ok(Some(mount));
    }
    Ok(None)
}

/// Network cards in device order, keyed `eth0`, `eth1`, ...
pub fn network_interfaces(devices: &[VirtualDevice]) -> BTreeMap<String, NetworkInterface> {
    devices
        .iter()
        .filter_map(|dev| match dev {
            VirtualDevice::Nic { info, mac_address, address_type } => {
                Some((info, mac_address, address_type))
            }
            _ => None,
        })
        .enumerate()
        .map(|(slot_index, (info, mac, address_type))| {
            (
                format!("eth{slot_index}"),
                NetworkInterface {
                    slot_index,
                    address_type: address_type.clone(),
                    mac: mac.clone(),
                    mac_upper: mac.to_uppercase(),
                    mac_dash: mac.replace(':', "-"),
                    summary: info.summary.clone(),
                },
            )
        })
        .collect()
}

/// Removable media keyed by label; a repeated label keeps the last device.
pub fn removable_media(devices: &[VirtualDevice]) -> BTreeMap<String, RemovableDevice> {
    devices
        .iter()
        .filter(|dev| dev.is_removable_media())
        .map(|dev| {
            let info = dev.info();
            (
                info.label.clone(),
                RemovableDevice {
                    label: info.label.clone(),
                    summary: info.summary.clone(),
                    unit_number: info.unit_number,
                },
            )
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the fact sheet for `vm`.
pub async fn correlate(vm: &ResolvedVm, inventory: &dyn Inventory) -> VsphereResult<FactRecord> {
    let summary = &vm.summary;
    let path = parse_datastore_path(&summary.vm_path_name);
    let mut warnings = Vec::new();

    let datacenter = find_datacenter(inventory, &path.datastore).await?;
    if datacenter.is_none() {
        warnings.push(format!("no datacenter holds datastore {}", path.datastore));
    }

    let mount = match &vm.host_name {
        Some(host_name) => match find_host_mount(inventory, host_name, &path.datastore).await? {
            Some(Some(mount)) => Some(mount),
            Some(None) => {
                warnings.push(format!("host {host_name} has no mount for datastore {}", path.datastore));
                None
            }
            None => {
                warnings.push(format!("host {host_name} not found in inventory"));
                None
            }
        },
        None => {
            warnings.push(format!("{} is not placed on a host", summary.name));
            None
        }
    };

    for w in &warnings {
        warn!("Facts for {}: {w}", vm.display_id());
    }
    debug!(
        "Correlated {} (datacenter {:?}, datastore {})",
        vm.display_id(),
        datacenter,
        path.datastore
    );

    Ok(FactRecord {
        general: GeneralFacts {
            name: summary.name.clone(),
            full_name: summary.guest_full_name.clone(),
            id: summary.guest_id.clone(),
            instance_uuid: summary.instance_uuid.clone(),
            bios_uuid: summary.bios_uuid.clone(),
            processor_count: summary.num_cpu,
            memtotal_mb: summary.memory_size_mb,
            datacenter,
        },
        vm_state: VmStateFacts {
            host: vm.host_name.clone(),
            power: summary.power_state,
            status: summary.overall_status.clone(),
        },
        hm_datastore: DatastoreFacts {
            name: mount.as_ref().map(|m| m.volume_name.clone()),
            capacity: mount.as_ref().and_then(|m| m.capacity),
            max_block_size: mount.as_ref().and_then(|m| m.max_blocks),
            guest_disk: path.guest_disk,
            guest_path_sane: path.guest_path_sane,
            guest_path: path.guest_path,
            guest_disk_sane: path.guest_disk_sane,
        },
        vm_bios: BiosFacts { boot_order: vm.boot_order.clone() },
        vm_network: network_interfaces(&vm.devices),
        vm_removeable_media: removable_media(&vm.devices),
        warnings,
    })
}
