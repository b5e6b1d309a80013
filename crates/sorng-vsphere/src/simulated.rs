//! In-memory inventory backend.
//!
//! Models a small datacenter tree (datacenters, datastores, hosts, VMs) and
//! a task table, so the resolver, correlator and state machines can run
//! without an endpoint. Mutations submitted through [`Inventory`] are
//! recorded and applied the way vCenter would apply them; tasks settle
//! after a configurable number of polls.

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::types::*;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Description of a VM to place in a [`SimulatedInventory`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedVm {
    summary: VmSummary,
    config: VmConfig,
}

impl SimulatedVm {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            summary: VmSummary {
                vm_path_name: format!("[datastore1] {name}/{name}.vmx"),
                name,
                power_state: VmPowerState::PoweredOff,
                overall_status: "green".to_string(),
                ..Default::default()
            },
            config: VmConfig::default(),
        }
    }

    pub fn instance_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.summary.instance_uuid = Some(uuid.into());
        self
    }

    pub fn bios_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.summary.bios_uuid = Some(uuid.into());
        self
    }

    pub fn guest(mut self, id: impl Into<String>, full_name: impl Into<String>) -> Self {
        self.summary.guest_id = Some(id.into());
        self.summary.guest_full_name = Some(full_name.into());
        self
    }

    pub fn hardware(mut self, num_cpu: u32, memory_size_mb: u64) -> Self {
        self.summary.num_cpu = Some(num_cpu);
        self.summary.memory_size_mb = Some(memory_size_mb);
        self
    }

    pub fn vmx_path(mut self, path: impl Into<String>) -> Self {
        self.summary.vm_path_name = path.into();
        self
    }

    pub fn power_state(mut self, state: VmPowerState) -> Self {
        self.summary.power_state = state;
        self
    }

    pub fn on_host(mut self, host: &ManagedObjectRef) -> Self {
        self.summary.host = Some(host.clone());
        self
    }

    pub fn boot_order(mut self, order: Vec<BootDevice>) -> Self {
        self.config.boot_order = order;
        self
    }

    pub fn device(mut self, device: VirtualDevice) -> Self {
        self.config.devices.push(device);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Recorded operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A mutating call received by the simulated endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedOp {
    Reconfigure { vm: ManagedObjectRef, spec: VmConfigSpec },
    Power { vm: ManagedObjectRef, op: PowerOp },
}

/// Which mutating call a scripted task failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatedCall {
    /// A `ReconfigVM_Task` carrying extraConfig only (boot device classes)
    BootConfig,
    /// A `ReconfigVM_Task` carrying device changes
    DeviceChange,
    Power(PowerOp),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct Entity {
    moref: ManagedObjectRef,
    name: String,
    /// Owning datacenter; `None` for datacenters themselves
    datacenter: Option<ManagedObjectRef>,
}

#[derive(Debug)]
struct SimTask {
    info: TaskInfo,
    polls_left: u32,
    outcome: TaskState,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    entities: Vec<Entity>,
    mounts: HashMap<ManagedObjectRef, Vec<HostMount>>,
    vms: HashMap<ManagedObjectRef, SimulatedVm>,
    vanished: HashSet<ManagedObjectRef>,
    tasks: HashMap<TaskRef, SimTask>,
    submitted: Vec<SubmittedOp>,
    task_failures: HashMap<SimulatedCall, String>,
    list_failure: Option<String>,
    polls_before_done: u32,
    ignore_device_changes: bool,
    views_created: usize,
    views_open: usize,
}

impl SimState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory [`Inventory`] implementation.
#[derive(Debug, Default)]
pub struct SimulatedInventory {
    state: Mutex<SimState>,
}

impl SimulatedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add_entity(
        &self,
        kind: InventoryKind,
        prefix: &str,
        name: &str,
        datacenter: Option<&ManagedObjectRef>,
    ) -> ManagedObjectRef {
        let mut st = self.state();
        let moref = ManagedObjectRef::new(kind.as_api_str(), st.mint(prefix));
        st.entities.push(Entity {
            moref: moref.clone(),
            name: name.to_string(),
            datacenter: datacenter.cloned(),
        });
        moref
    }

    // ── Inventory construction ──────────────────────────────────────

    pub fn add_datacenter(&self, name: &str) -> ManagedObjectRef {
        self.add_entity(InventoryKind::Datacenter, "datacenter", name, None)
    }

    pub fn add_datastore(&self, datacenter: &ManagedObjectRef, name: &str) -> ManagedObjectRef {
        self.add_entity(InventoryKind::Datastore, "datastore", name, Some(datacenter))
    }

    pub fn add_host(
        &self,
        datacenter: &ManagedObjectRef,
        name: &str,
        mounts: Vec<HostMount>,
    ) -> ManagedObjectRef {
        let host = self.add_entity(InventoryKind::HostSystem, "host", name, Some(datacenter));
        self.state().mounts.insert(host.clone(), mounts);
        host
    }

    pub fn add_vm(&self, datacenter: &ManagedObjectRef, vm: SimulatedVm) -> ManagedObjectRef {
        let moref = self.add_entity(
            InventoryKind::VirtualMachine,
            "vm",
            &vm.summary.name,
            Some(datacenter),
        );
        let mut vm = vm;
        vm.summary.vm = moref.clone();
        self.state().vms.insert(moref.clone(), vm);
        moref
    }

    /// Keep the object in listings but fail reads of it with `ObjectNotFound`,
    /// as happens when it is deleted between listing and reading.
    pub fn vanish(&self, obj: &ManagedObjectRef) {
        self.state().vanished.insert(obj.clone());
    }

    // ── Behaviour knobs ─────────────────────────────────────────────

    /// Number of non-terminal `task_info` reads before a task settles.
    pub fn set_polls_before_done(&self, polls: u32) {
        self.state().polls_before_done = polls;
    }

    /// Tasks for `call` finish in the error state with `message`.
    pub fn fail_tasks(&self, call: SimulatedCall, message: &str) {
        self.state().task_failures.insert(call, message.to_string());
    }

    /// Reads of a container view fail (the view is still destroyed).
    pub fn fail_listing(&self, message: &str) {
        self.state().list_failure = Some(message.to_string());
    }

    /// Device changes report success without touching the device list.
    pub fn ignore_device_changes(&self, ignore: bool) {
        self.state().ignore_device_changes = ignore;
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn submitted(&self) -> Vec<SubmittedOp> {
        self.state().submitted.clone()
    }

    pub fn power_ops(&self) -> Vec<PowerOp> {
        self.state()
            .submitted
            .iter()
            .filter_map(|op| match op {
                SubmittedOp::Power { op, .. } => Some(*op),
                _ => None,
            })
            .collect()
    }

    pub fn views_created(&self) -> usize {
        self.state().views_created
    }

    pub fn open_views(&self) -> usize {
        self.state().views_open
    }

    pub fn power_state_of(&self, vm: &ManagedObjectRef) -> Option<VmPowerState> {
        self.state().vms.get(vm).map(|v| v.summary.power_state)
    }

    /// Current value of an extraConfig key, as last written.
    pub fn extra_config_of(&self, vm: &ManagedObjectRef, key: &str) -> Option<String> {
        self.state().submitted.iter().rev().find_map(|op| match op {
            SubmittedOp::Reconfigure { vm: v, spec } if v == vm => spec
                .extra_config
                .iter()
                .find(|o| o.key == key)
                .map(|o| o.value.clone()),
            _ => None,
        })
    }

    // ── Internals ───────────────────────────────────────────────────

    fn submit_task(st: &mut SimState, call: SimulatedCall, description: &str) -> TaskRef {
        let task = ManagedObjectRef::new("Task", st.mint("task"));
        let error = st.task_failures.get(&call).cloned();
        let outcome = if error.is_some() { TaskState::Error } else { TaskState::Success };
        let polls_left = st.polls_before_done;
        st.tasks.insert(
            task.clone(),
            SimTask {
                info: TaskInfo {
                    task: task.clone(),
                    state: if polls_left == 0 { outcome } else { TaskState::Queued },
                    description_id: Some(description.to_string()),
                    error: if polls_left == 0 { error.clone() } else { None },
                },
                polls_left,
                outcome,
                error,
            },
        );
        task
    }

    fn vm_mut<'s>(
        st: &'s mut SimState,
        vm: &ManagedObjectRef,
    ) -> VsphereResult<&'s mut SimulatedVm> {
        if st.vanished.contains(vm) {
            return Err(VsphereError::object_not_found(format!("ManagedObjectNotFound: {vm}")));
        }
        st.vms
            .get_mut(vm)
            .ok_or_else(|| VsphereError::object_not_found(format!("ManagedObjectNotFound: {vm}")))
    }
}

fn apply_device_change(vm: &mut SimulatedVm, change: &DeviceConfigSpec) {
    let key = change.device.info().key;
    let devices = &mut vm.config.devices;
    match change.operation {
        DeviceOperation::Add => devices.push(change.device.clone()),
        DeviceOperation::Remove => devices.retain(|d| d.info().key != key),
        DeviceOperation::Edit => {
            if let Some(existing) = devices.iter_mut().find(|d| d.info().key == key) {
                // The server keeps the label and summary of an edited device.
                let label = existing.info().label.clone();
                let mut updated = change.device.clone();
                if let VirtualDevice::Cdrom { info, .. } = &mut updated {
                    info.label = label;
                }
                *existing = updated;
            }
        }
    }
}

#[async_trait::async_trait]
impl Inventory for SimulatedInventory {
    async fn list(
        &self,
        kind: InventoryKind,
        root: Option<&ManagedObjectRef>,
    ) -> VsphereResult<Vec<ManagedObjectRef>> {
        let mut st = self.state();
        st.views_created += 1;
        st.views_open += 1;

        let result = match &st.list_failure {
            Some(message) => Err(VsphereError::api(500, message.clone())),
            None => Ok(st
                .entities
                .iter()
                .filter(|e| e.moref.kind == kind.as_api_str())
                .filter(|e| match root {
                    None => true,
                    Some(root) => e.datacenter.as_ref() == Some(root),
                })
                .map(|e| e.moref.clone())
                .collect()),
        };

        st.views_open -= 1;
        result
    }

    async fn vm_summary(&self, vm: &ManagedObjectRef) -> VsphereResult<VmSummary> {
        let mut st = self.state();
        Ok(Self::vm_mut(&mut st, vm)?.summary.clone())
    }

    async fn vm_config(&self, vm: &ManagedObjectRef) -> VsphereResult<VmConfig> {
        let mut st = self.state();
        Ok(Self::vm_mut(&mut st, vm)?.config.clone())
    }

    async fn entity_name(&self, obj: &ManagedObjectRef) -> VsphereResult<String> {
        let st = self.state();
        if st.vanished.contains(obj) {
            return Err(VsphereError::object_not_found(format!("ManagedObjectNotFound: {obj}")));
        }
        st.entities
            .iter()
            .find(|e| &e.moref == obj)
            .map(|e| e.name.clone())
            .ok_or_else(|| VsphereError::object_not_found(format!("ManagedObjectNotFound: {obj}")))
    }

    async fn host_mounts(&self, host: &ManagedObjectRef) -> VsphereResult<Vec<HostMount>> {
        let st = self.state();
        if st.vanished.contains(host) {
            return Err(VsphereError::object_not_found(format!("ManagedObjectNotFound: {host}")));
        }
        st.mounts
            .get(host)
            .cloned()
            .ok_or_else(|| VsphereError::object_not_found(format!("ManagedObjectNotFound: {host}")))
    }

    async fn reconfigure(
        &self,
        vm: &ManagedObjectRef,
        spec: &VmConfigSpec,
    ) -> VsphereResult<TaskRef> {
        let mut st = self.state();
        Self::vm_mut(&mut st, vm)?;
        st.submitted.push(SubmittedOp::Reconfigure { vm: vm.clone(), spec: spec.clone() });

        let call = if spec.device_change.is_empty() {
            SimulatedCall::BootConfig
        } else {
            SimulatedCall::DeviceChange
        };
        let fails = st.task_failures.contains_key(&call);
        if !fails && !st.ignore_device_changes {
            let target = Self::vm_mut(&mut st, vm)?;
            for change in &spec.device_change {
                apply_device_change(target, change);
            }
        }
        Ok(Self::submit_task(&mut st, call, "VirtualMachine.reconfigure"))
    }

    async fn power(&self, vm: &ManagedObjectRef, op: PowerOp) -> VsphereResult<TaskRef> {
        let mut st = self.state();
        Self::vm_mut(&mut st, vm)?;
        st.submitted.push(SubmittedOp::Power { vm: vm.clone(), op });

        let call = SimulatedCall::Power(op);
        if !st.task_failures.contains_key(&call) {
            let target = Self::vm_mut(&mut st, vm)?;
            target.summary.power_state = match op {
                PowerOp::PowerOff => VmPowerState::PoweredOff,
                PowerOp::PowerOn | PowerOp::Reset => VmPowerState::PoweredOn,
            };
        }
        let description = match op {
            PowerOp::PowerOn => "VirtualMachine.powerOn",
            PowerOp::PowerOff => "VirtualMachine.powerOff",
            PowerOp::Reset => "VirtualMachine.reset",
        };
        Ok(Self::submit_task(&mut st, call, description))
    }

    async fn task_info(&self, task: &TaskRef) -> VsphereResult<TaskInfo> {
        let mut st = self.state();
        let sim = st
            .tasks
            .get_mut(task)
            .ok_or_else(|| VsphereError::object_not_found(format!("ManagedObjectNotFound: {task}")))?;

        if sim.polls_left > 0 {
            sim.polls_left -= 1;
            sim.info.state = TaskState::Running;
        } else {
            sim.info.state = sim.outcome;
            sim.info.error = sim.error.clone();
        }
        Ok(sim.info.clone())
    }
}
