//! Shared types for vSphere inventory correlation and VM operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for connecting to a vCenter / ESXi endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfig {
    /// vCenter or ESXi hostname / IP (e.g. "vcenter.lab.local")
    pub host: String,
    /// Port (default 443)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    /// Password
    pub password: String,
    /// Skip TLS certificate verification (self-signed labs)
    #[serde(default)]
    pub insecure: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// VI/JSON release segment of the API path (`/sdk/vim25/{release}`)
    #[serde(default = "default_api_release")]
    pub api_release: String,
}

fn default_port() -> u16 { 443 }
fn default_timeout() -> u64 { 30 }
fn default_api_release() -> String { "8.0.1.0".to_string() }

impl Default for VsphereConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            insecure: false,
            timeout_secs: default_timeout(),
            api_release: default_api_release(),
        }
    }
}

/// Config without the password, safe to log or hand back to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfigSafe {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub insecure: bool,
}

impl From<&VsphereConfig> for VsphereConfigSafe {
    fn from(c: &VsphereConfig) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            username: c.username.clone(),
            insecure: c.insecure,
        }
    }
}

/// Polling policy for remote tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWaitConfig {
    /// Delay before the second poll; doubles after every non-terminal read
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    /// Upper bound for the poll delay
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    /// Overall deadline. `None` waits until the task settles.
    #[serde(default = "default_task_timeout")]
    pub timeout_secs: Option<u64>,
}

fn default_initial_interval() -> u64 { 500 }
fn default_max_interval() -> u64 { 5_000 }
fn default_task_timeout() -> Option<u64> { Some(1_800) }

impl Default for TaskWaitConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            timeout_secs: default_task_timeout(),
        }
    }
}

impl TaskWaitConfig {
    /// First poll delay, never below one millisecond.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(1))
    }

    /// Backoff ceiling, never below the initial delay.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms).max(self.initial_interval())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks an active VI/JSON session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereSession {
    pub host: String,
    pub username: String,
    pub session_id: String,
    pub connected_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Managed objects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque handle to a managed object (e.g. `VirtualMachine:vm-42`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// A remote task is addressed like any other managed object.
pub type TaskRef = ManagedObjectRef;

/// Object kinds that can be listed through a container view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryKind {
    VirtualMachine,
    HostSystem,
    Datastore,
    Datacenter,
}

impl InventoryKind {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "VirtualMachine",
            Self::HostSystem => "HostSystem",
            Self::Datastore => "Datastore",
            Self::Datacenter => "Datacenter",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Power state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Observed `runtime.powerState` of a VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VmPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[serde(other)]
    Unknown,
}

impl Default for VmPowerState {
    fn default() -> Self { Self::Unknown }
}

impl fmt::Display for VmPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
            Self::Suspended => "suspended",
            Self::Unknown => "unknown",
        })
    }
}

/// Power state a caller asks for. There is no suspend target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RequestedPowerState {
    Reset,
    PoweredOn,
    PoweredOff,
}

impl fmt::Display for RequestedPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reset => "reset",
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
        })
    }
}

impl FromStr for RequestedPowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(Self::Reset),
            "poweredOn" => Ok(Self::PoweredOn),
            "poweredOff" => Ok(Self::PoweredOff),
            other => Err(format!(
                "unrecognized powerState requested: {other} (expected reset, poweredOn or poweredOff)"
            )),
        }
    }
}

/// Remote power operation submitted against a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerOp {
    PowerOn,
    PowerOff,
    Reset,
}

impl PowerOp {
    /// VI method name for this operation.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::PowerOn => "PowerOnVM_Task",
            Self::PowerOff => "PowerOffVM_Task",
            Self::Reset => "ResetVM_Task",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the caller wants to operate on. A set `instance_id` wins over `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl TargetSpec {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self { name: name.into(), instance_id: None }
    }

    pub fn by_instance_id(instance_id: impl Into<String>) -> Self {
        Self { name: String::new(), instance_id: Some(instance_id.into()) }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_id {
            Some(id) => write!(f, "instanceUuid={id}"),
            None => write!(f, "name={}", self.name),
        }
    }
}

/// The subset of `VirtualMachine.summary` the engine consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
    pub vm: ManagedObjectRef,
    pub name: String,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub bios_uuid: Option<String>,
    #[serde(default)]
    pub guest_full_name: Option<String>,
    #[serde(default)]
    pub guest_id: Option<String>,
    #[serde(default)]
    pub num_cpu: Option<u32>,
    #[serde(default)]
    pub memory_size_mb: Option<u64>,
    /// Raw vmx path, e.g. `[datastore1] web01/web01.vmx`
    #[serde(default)]
    pub vm_path_name: String,
    #[serde(default)]
    pub power_state: VmPowerState,
    /// Managed-entity health colour (green / yellow / red / gray)
    #[serde(default)]
    pub overall_status: String,
    #[serde(default)]
    pub host: Option<ManagedObjectRef>,
}

/// Config-level data of a VM: BIOS boot order and the classified device list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfig {
    #[serde(default)]
    pub boot_order: Vec<BootDevice>,
    #[serde(default)]
    pub devices: Vec<VirtualDevice>,
}

/// A VM matched for a `TargetSpec` together with everything later stages read.
#[derive(Debug, Clone)]
pub struct ResolvedVm {
    pub summary: VmSummary,
    /// Name of the host in `summary.host`, if the VM is placed on one
    pub host_name: Option<String>,
    pub boot_order: Vec<BootDevice>,
    pub devices: Vec<VirtualDevice>,
}

impl ResolvedVm {
    pub fn new(summary: VmSummary, host_name: Option<String>, config: VmConfig) -> Self {
        Self {
            summary,
            host_name,
            boot_order: config.boot_order,
            devices: config.devices,
        }
    }

    pub fn moref(&self) -> &ManagedObjectRef {
        &self.summary.vm
    }

    /// Human-readable identifier used in error context.
    pub fn display_id(&self) -> String {
        match &self.summary.instance_uuid {
            Some(uuid) => format!("{} ({uuid})", self.summary.name),
            None => format!("{} ({})", self.summary.name, self.summary.vm.value),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Virtual devices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Device-class labels that count as removable media.
pub const REMOVABLE_MEDIA_CLASSES: [&str; 3] = ["CD/DVD drive", "USB controller", "Floppy drive"];

/// Fields every virtual device carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub key: i32,
    #[serde(default)]
    pub controller_key: Option<i32>,
    #[serde(default)]
    pub unit_number: Option<i32>,
    pub label: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub start_connected: bool,
    pub allow_guest_control: bool,
    pub connected: bool,
}

/// What a CD-ROM is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CdromBacking {
    /// Client-device passthrough; the drive has no media mounted.
    RemotePassthrough,
    Iso { file_name: String },
    HostDevice { device_name: String },
    Other { type_name: String },
    Unset,
}

/// Device classified once from its VI data-object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VirtualDevice {
    Nic {
        info: DeviceInfo,
        mac_address: String,
        address_type: String,
    },
    Cdrom {
        info: DeviceInfo,
        backing: CdromBacking,
        connectable: Option<ConnectInfo>,
    },
    Floppy {
        info: DeviceInfo,
    },
    UsbController {
        info: DeviceInfo,
    },
    Other {
        info: DeviceInfo,
        type_name: String,
    },
}

impl VirtualDevice {
    pub fn info(&self) -> &DeviceInfo {
        match self {
            Self::Nic { info, .. }
            | Self::Cdrom { info, .. }
            | Self::Floppy { info }
            | Self::UsbController { info }
            | Self::Other { info, .. } => info,
        }
    }

    pub fn label(&self) -> &str {
        &self.info().label
    }

    /// Hardware address, present only on network cards.
    pub fn mac_address(&self) -> Option<&str> {
        match self {
            Self::Nic { mac_address, .. } => Some(mac_address),
            _ => None,
        }
    }

    /// Non-network device whose label names a removable media class.
    pub fn is_removable_media(&self) -> bool {
        self.mac_address().is_none()
            && REMOVABLE_MEDIA_CLASSES
                .iter()
                .any(|class| self.info().label.contains(class))
    }
}

/// One entry of `config.bootOptions.bootOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BootDevice {
    Cdrom,
    Disk { device_key: i32 },
    Ethernet { device_key: i32 },
    Floppy,
    Other { type_name: String },
}

/// Mounted file-system volume as seen by a host's storage system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMount {
    pub volume_name: String,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub max_blocks: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Reconfiguration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// extraConfig key holding the BIOS boot device classes.
pub const BOOT_DEVICE_CLASSES_KEY: &str = "bios.bootDeviceClasses";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOperation {
    Add,
    Edit,
    Remove,
}

impl DeviceOperation {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigSpec {
    pub operation: DeviceOperation,
    pub device: VirtualDevice,
}

/// Subset of `VirtualMachineConfigSpec` submitted through `ReconfigVM_Task`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfigSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_config: Vec<OptionValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<DeviceConfigSpec>,
}

impl VmConfigSpec {
    /// Spec that sets (or with `""` clears) the BIOS boot device classes.
    pub fn boot_device_classes(classes: impl Into<String>) -> Self {
        Self {
            extra_config: vec![OptionValue {
                key: BOOT_DEVICE_CLASSES_KEY.to_string(),
                value: classes.into(),
            }],
            device_change: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Snapshot of `Task.info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task: TaskRef,
    pub state: TaskState,
    #[serde(default)]
    pub description_id: Option<String>,
    /// Localized fault message when `state` is `Error`
    #[serde(default)]
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Facts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Fact keys keep the snake_case names automation consumers read
// (`vm_network`, `hm_datastore`, ...), so these structs do not use
// `rename_all = "camelCase"`.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralFacts {
    pub name: String,
    pub full_name: Option<String>,
    pub id: Option<String>,
    pub instance_uuid: Option<String>,
    pub bios_uuid: Option<String>,
    pub processor_count: Option<u32>,
    pub memtotal_mb: Option<u64>,
    pub datacenter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmStateFacts {
    pub host: Option<String>,
    pub power: VmPowerState,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreFacts {
    pub name: Option<String>,
    pub capacity: Option<i64>,
    pub max_block_size: Option<i64>,
    pub guest_disk: String,
    pub guest_path_sane: String,
    pub guest_path: String,
    pub guest_disk_sane: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiosFacts {
    #[serde(rename = "bootOrder")]
    pub boot_order: Vec<BootDevice>,
}

/// A network card, numbered by enumeration order (not by device key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub slot_index: usize,
    pub address_type: String,
    pub mac: String,
    pub mac_upper: String,
    pub mac_dash: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovableDevice {
    pub label: String,
    pub summary: String,
    #[serde(rename = "unitNumber")]
    pub unit_number: Option<i32>,
}

/// Cross-referenced, read-only fact sheet for one VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRecord {
    pub general: GeneralFacts,
    pub vm_state: VmStateFacts,
    pub hm_datastore: DatastoreFacts,
    pub vm_bios: BiosFacts,
    /// Keyed `eth0`, `eth1`, ...
    pub vm_network: BTreeMap<String, NetworkInterface>,
    /// Keyed by device label
    pub vm_removeable_media: BTreeMap<String, RemovableDevice>,
    /// Correlation misses (unmatched datacenter, host or mount)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of a mutation: `false` means a confirmed no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub changed: bool,
}
