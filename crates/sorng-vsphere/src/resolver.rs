//! Target resolution: one [`TargetSpec`] to exactly one VM.

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::types::*;

use log::{debug, warn};

/// Pick the VM a target designates out of `candidates`.
///
/// An instance uuid selects the first VM carrying it; `name` is then not
/// consulted at all. A name must match exactly one display name.
pub fn resolve(target: &TargetSpec, candidates: &[VmSummary]) -> VsphereResult<VmSummary> {
    if let Some(id) = &target.instance_id {
        return candidates
            .iter()
            .find(|vm| vm.instance_uuid.as_deref() == Some(id.as_str()))
            .cloned()
            .ok_or_else(|| VsphereError::NotFound { target: target.to_string() });
    }

    let matches: Vec<&VmSummary> = candidates.iter().filter(|vm| vm.name == target.name).collect();
    match matches.as_slice() {
        [] => Err(VsphereError::NotFound { target: target.to_string() }),
        [only] => Ok((*only).clone()),
        many => Err(VsphereError::AmbiguousTarget {
            target: target.to_string(),
            matches: many.iter().map(|vm| vm.vm.value.clone()).collect(),
        }),
    }
}

fn validate(target: &TargetSpec) -> VsphereResult<()> {
    match &target.instance_id {
        Some(id) if id.trim().is_empty() => {
            Err(VsphereError::InvalidTarget("instance uuid is empty".to_string()))
        }
        Some(_) => Ok(()),
        None if target.name.trim().is_empty() => Err(VsphereError::InvalidTarget(
            "either a VM name or an instance uuid is required".to_string(),
        )),
        None => Ok(()),
    }
}

/// Read the summary of every VM in the inventory.
///
/// A VM deleted between the listing and the read is skipped.
pub async fn list_vm_summaries(inventory: &dyn Inventory) -> VsphereResult<Vec<VmSummary>> {
    let vms = inventory.list(InventoryKind::VirtualMachine, None).await?;
    let mut summaries = Vec::with_capacity(vms.len());
    for vm in &vms {
        match inventory.vm_summary(vm).await {
            Ok(summary) => summaries.push(summary),
            Err(VsphereError::ObjectNotFound(msg)) => {
                warn!("Skipping {vm}, it disappeared during the scan: {msg}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summaries)
}

/// Resolve `target` against the live inventory and load everything the
/// later stages read (device list, boot order, host name).
pub async fn resolve_vm(inventory: &dyn Inventory, target: &TargetSpec) -> VsphereResult<ResolvedVm> {
    validate(target)?;
    let summaries = list_vm_summaries(inventory).await?;
    debug!("Resolving {target} among {} VM(s)", summaries.len());

    let summary = resolve(target, &summaries)?;
    let resolved = load(inventory, summary).await?;
    debug!("Resolved {target} to {}", resolved.moref());
    Ok(resolved)
}

/// Load config and host name for an already-selected VM.
pub async fn load(inventory: &dyn Inventory, summary: VmSummary) -> VsphereResult<ResolvedVm> {
    let config = inventory.vm_config(&summary.vm).await?;
    let host_name = match &summary.host {
        Some(host) => match inventory.entity_name(host).await {
            Ok(name) => Some(name),
            Err(VsphereError::ObjectNotFound(msg)) => {
                warn!("Host {host} of {} is gone: {msg}", summary.name);
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };
    Ok(ResolvedVm::new(summary, host_name, config))
}
