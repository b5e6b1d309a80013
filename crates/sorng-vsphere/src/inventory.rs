//! Call surface over the management endpoint.
//!
//! The engine only talks to the endpoint through [`Inventory`], so the same
//! resolution, correlation and state-machine code runs against the live
//! VI/JSON client ([`crate::vsphere::VsphereClient`]) and the in-memory
//! [`crate::simulated::SimulatedInventory`].

use crate::error::VsphereResult;
use crate::types::*;

/// Inventory reads and mutating calls consumed by the engine.
///
/// Implementations must be `Send + Sync` so a single session can be shared
/// by reference across the stages of one invocation.
#[async_trait::async_trait]
pub trait Inventory: Send + Sync {
    /// Recursively list objects of `kind` under `root` (the root folder when
    /// `None`). Any server-side view backing the listing is released before
    /// this returns, on success and on failure.
    async fn list(
        &self,
        kind: InventoryKind,
        root: Option<&ManagedObjectRef>,
    ) -> VsphereResult<Vec<ManagedObjectRef>>;

    /// `VirtualMachine.summary`.
    async fn vm_summary(&self, vm: &ManagedObjectRef) -> VsphereResult<VmSummary>;

    /// `VirtualMachine.config` (boot order + device list).
    async fn vm_config(&self, vm: &ManagedObjectRef) -> VsphereResult<VmConfig>;

    /// `ManagedEntity.name` of a host, datastore or datacenter.
    async fn entity_name(&self, obj: &ManagedObjectRef) -> VsphereResult<String>;

    /// File-system volumes mounted on a host.
    async fn host_mounts(&self, host: &ManagedObjectRef) -> VsphereResult<Vec<HostMount>>;

    /// Submit `ReconfigVM_Task`.
    async fn reconfigure(
        &self,
        vm: &ManagedObjectRef,
        spec: &VmConfigSpec,
    ) -> VsphereResult<TaskRef>;

    /// Submit a power task.
    async fn power(&self, vm: &ManagedObjectRef, op: PowerOp) -> VsphereResult<TaskRef>;

    /// Read `Task.info`.
    async fn task_info(&self, task: &TaskRef) -> VsphereResult<TaskInfo>;
}
