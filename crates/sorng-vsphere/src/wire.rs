//! VI/JSON encoding of data objects.
//!
//! Data objects on the wire carry a `_typeName` discriminant. Decoding
//! classifies devices and boot entries once, here, so nothing downstream
//! checks for optional fields.

use crate::error::{VsphereError, VsphereResult};
use crate::types::*;

use serde::Deserialize;
use serde_json::{json, Value};

const TYPE_NAME: &str = "_typeName";

// ── Managed object references ───────────────────────────────────────

pub fn moref_to_wire(obj: &ManagedObjectRef) -> Value {
    json!({
        TYPE_NAME: "ManagedObjectReference",
        "type": obj.kind,
        "value": obj.value,
    })
}

// ── VirtualMachine.summary ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVmSummary {
    #[serde(default)]
    runtime: WireVmRuntime,
    #[serde(default)]
    config: WireVmSummaryConfig,
    #[serde(default)]
    overall_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVmRuntime {
    #[serde(default)]
    host: Option<ManagedObjectRef>,
    #[serde(default)]
    power_state: VmPowerState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVmSummaryConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    vm_path_name: String,
    #[serde(default)]
    num_cpu: Option<u32>,
    #[serde(default, rename = "memorySizeMB")]
    memory_size_mb: Option<u64>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    instance_uuid: Option<String>,
    #[serde(default)]
    guest_id: Option<String>,
    #[serde(default)]
    guest_full_name: Option<String>,
}

pub fn decode_vm_summary(vm: &ManagedObjectRef, value: Value) -> VsphereResult<VmSummary> {
    let wire: WireVmSummary = serde_json::from_value(value)
        .map_err(|e| VsphereError::parse(format!("VirtualMachineSummary of {vm}: {e}")))?;
    Ok(VmSummary {
        vm: vm.clone(),
        name: wire.config.name,
        instance_uuid: wire.config.instance_uuid,
        bios_uuid: wire.config.uuid,
        guest_full_name: wire.config.guest_full_name,
        guest_id: wire.config.guest_id,
        num_cpu: wire.config.num_cpu,
        memory_size_mb: wire.config.memory_size_mb,
        vm_path_name: wire.config.vm_path_name,
        power_state: wire.runtime.power_state,
        overall_status: wire.overall_status.unwrap_or_else(|| "gray".to_string()),
        host: wire.runtime.host,
    })
}

// ── VirtualMachine.config ───────────────────────────────────────────

pub fn decode_vm_config(value: &Value) -> VmConfig {
    let boot_order = value
        .pointer("/bootOptions/bootOrder")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(decode_boot_device).collect())
        .unwrap_or_default();
    let devices = value
        .pointer("/hardware/device")
        .and_then(Value::as_array)
        .map(|devs| devs.iter().map(decode_device).collect())
        .unwrap_or_default();
    VmConfig { boot_order, devices }
}

fn type_name(value: &Value) -> &str {
    value.get(TYPE_NAME).and_then(Value::as_str).unwrap_or("")
}

fn int_field(value: &Value, key: &str) -> Option<i32> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode_boot_device(value: &Value) -> BootDevice {
    match type_name(value) {
        "VirtualMachineBootOptionsBootableCdromDevice" => BootDevice::Cdrom,
        "VirtualMachineBootOptionsBootableFloppyDevice" => BootDevice::Floppy,
        "VirtualMachineBootOptionsBootableDiskDevice" => BootDevice::Disk {
            device_key: int_field(value, "deviceKey").unwrap_or_default(),
        },
        "VirtualMachineBootOptionsBootableEthernetDevice" => BootDevice::Ethernet {
            device_key: int_field(value, "deviceKey").unwrap_or_default(),
        },
        other => BootDevice::Other { type_name: other.to_string() },
    }
}

/// Classify one entry of `config.hardware.device`.
///
/// A device with a `macAddress` is a network card whatever its concrete
/// type (`VirtualVmxnet3`, `VirtualE1000e`, ...).
pub fn decode_device(value: &Value) -> VirtualDevice {
    let device_info = value.get("deviceInfo").cloned().unwrap_or(Value::Null);
    let info = DeviceInfo {
        key: int_field(value, "key").unwrap_or_default(),
        controller_key: int_field(value, "controllerKey"),
        unit_number: int_field(value, "unitNumber"),
        label: str_field(&device_info, "label"),
        summary: str_field(&device_info, "summary"),
    };

    if let Some(mac) = value.get("macAddress").and_then(Value::as_str) {
        return VirtualDevice::Nic {
            info,
            mac_address: mac.to_string(),
            address_type: str_field(value, "addressType"),
        };
    }

    match type_name(value) {
        "VirtualCdrom" => VirtualDevice::Cdrom {
            info,
            backing: value
                .get("backing")
                .map(decode_cdrom_backing)
                .unwrap_or(CdromBacking::Unset),
            connectable: value.get("connectable").map(|c| ConnectInfo {
                start_connected: c.get("startConnected").and_then(Value::as_bool).unwrap_or(false),
                allow_guest_control: c.get("allowGuestControl").and_then(Value::as_bool).unwrap_or(false),
                connected: c.get("connected").and_then(Value::as_bool).unwrap_or(false),
            }),
        },
        "VirtualFloppy" => VirtualDevice::Floppy { info },
        t if t.starts_with("VirtualUSB") && t.ends_with("Controller") => {
            VirtualDevice::UsbController { info }
        }
        other => VirtualDevice::Other { info, type_name: other.to_string() },
    }
}

fn decode_cdrom_backing(value: &Value) -> CdromBacking {
    match type_name(value) {
        "VirtualCdromRemotePassthroughBackingInfo" => CdromBacking::RemotePassthrough,
        "VirtualCdromIsoBackingInfo" => CdromBacking::Iso {
            file_name: str_field(value, "fileName"),
        },
        "VirtualCdromAtapiBackingInfo" => CdromBacking::HostDevice {
            device_name: str_field(value, "deviceName"),
        },
        "" => CdromBacking::Unset,
        other => CdromBacking::Other { type_name: other.to_string() },
    }
}

// ── Host storage ────────────────────────────────────────────────────

pub fn decode_mounts(value: &Value) -> Vec<HostMount> {
    value
        .get("mountInfo")
        .and_then(Value::as_array)
        .map(|mounts| {
            mounts
                .iter()
                .filter_map(|m| m.get("volume"))
                .map(|vol| HostMount {
                    volume_name: str_field(vol, "name"),
                    capacity: vol.get("capacity").and_then(Value::as_i64),
                    max_blocks: vol.get("maxBlocks").and_then(Value::as_i64),
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── Task.info ───────────────────────────────────────────────────────

pub fn decode_task_info(task: &TaskRef, value: &Value) -> VsphereResult<TaskInfo> {
    let state = value
        .get("state")
        .cloned()
        .ok_or_else(|| VsphereError::parse(format!("TaskInfo of {task} has no state")))?;
    let state: TaskState = serde_json::from_value(state)
        .map_err(|e| VsphereError::parse(format!("TaskInfo state of {task}: {e}")))?;
    let error = value.get("error").filter(|f| !f.is_null()).map(|fault| {
        fault
            .get("localizedMessage")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fault_type(fault).to_string())
    });
    Ok(TaskInfo {
        task: task.clone(),
        state,
        description_id: value
            .get("descriptionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        error,
    })
}

fn fault_type(fault: &Value) -> &str {
    fault
        .pointer("/fault/_typeName")
        .and_then(Value::as_str)
        .unwrap_or_else(|| type_name(fault))
}

/// Pull a readable message out of a fault body.
pub fn fault_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.chars().take(500).collect();
    };
    let kind = type_name(&value);
    let text = value
        .get("localizedMessage")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .pointer("/faultMessage/0/message")
                .and_then(Value::as_str)
        })
        .unwrap_or_default();
    match (kind.is_empty(), text.is_empty()) {
        (false, false) => format!("{kind}: {text}"),
        (false, true) => kind.to_string(),
        (true, false) => text.to_string(),
        (true, true) => body.chars().take(500).collect(),
    }
}

// ── VirtualMachineConfigSpec ────────────────────────────────────────

pub fn encode_config_spec(spec: &VmConfigSpec) -> VsphereResult<Value> {
    let mut out = json!({ TYPE_NAME: "VirtualMachineConfigSpec" });
    if !spec.extra_config.is_empty() {
        out["extraConfig"] = spec
            .extra_config
            .iter()
            .map(|opt| {
                json!({
                    TYPE_NAME: "OptionValue",
                    "key": opt.key,
                    "value": { TYPE_NAME: "string", "_value": opt.value },
                })
            })
            .collect();
    }
    if !spec.device_change.is_empty() {
        let changes = spec
            .device_change
            .iter()
            .map(|change| {
                Ok(json!({
                    TYPE_NAME: "VirtualDeviceConfigSpec",
                    "operation": change.operation.as_api_str(),
                    "device": encode_device(&change.device)?,
                }))
            })
            .collect::<VsphereResult<Vec<Value>>>()?;
        out["deviceChange"] = Value::Array(changes);
    }
    Ok(out)
}

fn encode_device(device: &VirtualDevice) -> VsphereResult<Value> {
    let VirtualDevice::Cdrom { info, backing, connectable } = device else {
        return Err(VsphereError::InvalidTarget(format!(
            "reconfiguration of {} is not supported",
            device.label()
        )));
    };
    let mut out = json!({
        TYPE_NAME: "VirtualCdrom",
        "key": info.key,
        "backing": encode_cdrom_backing(backing)?,
    });
    if let Some(controller_key) = info.controller_key {
        out["controllerKey"] = json!(controller_key);
    }
    if let Some(unit_number) = info.unit_number {
        out["unitNumber"] = json!(unit_number);
    }
    if let Some(c) = connectable {
        out["connectable"] = json!({
            TYPE_NAME: "VirtualDeviceConnectInfo",
            "startConnected": c.start_connected,
            "allowGuestControl": c.allow_guest_control,
            "connected": c.connected,
        });
    }
    Ok(out)
}

fn encode_cdrom_backing(backing: &CdromBacking) -> VsphereResult<Value> {
    match backing {
        CdromBacking::RemotePassthrough => Ok(json!({
            TYPE_NAME: "VirtualCdromRemotePassthroughBackingInfo",
            "deviceName": "",
            "exclusive": false,
        })),
        CdromBacking::Iso { file_name } => Ok(json!({
            TYPE_NAME: "VirtualCdromIsoBackingInfo",
            "fileName": file_name,
        })),
        CdromBacking::HostDevice { device_name } => Ok(json!({
            TYPE_NAME: "VirtualCdromAtapiBackingInfo",
            "deviceName": device_name,
        })),
        CdromBacking::Other { type_name } => Err(VsphereError::InvalidTarget(format!(
            "cannot encode cdrom backing {type_name}"
        ))),
        CdromBacking::Unset => Err(VsphereError::InvalidTarget(
            "cdrom backing must be set in a device spec".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_list() -> Value {
        json!({
            "bootOptions": {
                "bootOrder": [
                    { "_typeName": "VirtualMachineBootOptionsBootableCdromDevice" },
                    { "_typeName": "VirtualMachineBootOptionsBootableDiskDevice", "deviceKey": 2000 }
                ]
            },
            "hardware": {
                "device": [
                    { "_typeName": "VirtualIDEController", "key": 200,
                      "deviceInfo": { "label": "IDE 0", "summary": "IDE 0" } },
                    { "_typeName": "VirtualDisk", "key": 2000, "controllerKey": 1000, "unitNumber": 0,
                      "deviceInfo": { "label": "Hard disk 1", "summary": "41,943,040 KB" } },
                    { "_typeName": "VirtualVmxnet3", "key": 4000, "controllerKey": 100, "unitNumber": 7,
                      "macAddress": "00:50:56:9a:01:02", "addressType": "assigned",
                      "deviceInfo": { "label": "Network adapter 1", "summary": "VM Network" } },
                    { "_typeName": "VirtualCdrom", "key": 3002, "controllerKey": 201, "unitNumber": 0,
                      "deviceInfo": { "label": "CD/DVD drive 1", "summary": "ISO [ds1] iso/rhel.iso" },
                      "backing": { "_typeName": "VirtualCdromIsoBackingInfo", "fileName": "[ds1] iso/rhel.iso" },
                      "connectable": { "startConnected": true, "allowGuestControl": true, "connected": true } },
                    { "_typeName": "VirtualFloppy", "key": 8000, "unitNumber": 0,
                      "deviceInfo": { "label": "Floppy drive 1", "summary": "Remote" } },
                    { "_typeName": "VirtualUSBXHCIController", "key": 14000,
                      "deviceInfo": { "label": "USB xHCI controller ", "summary": "USB xHCI controller" } }
                ]
            }
        })
    }

    #[test]
    fn decodes_device_kinds_once() {
        let cfg = decode_vm_config(&device_list());
        assert_eq!(cfg.devices.len(), 6);
        assert!(matches!(cfg.devices[0], VirtualDevice::Other { ref type_name, .. } if type_name == "VirtualIDEController"));
        assert_eq!(cfg.devices[2].mac_address(), Some("00:50:56:9a:01:02"));
        match &cfg.devices[3] {
            VirtualDevice::Cdrom { info, backing, connectable } => {
                assert_eq!(info.controller_key, Some(201));
                assert_eq!(backing, &CdromBacking::Iso { file_name: "[ds1] iso/rhel.iso".into() });
                assert!(connectable.as_ref().unwrap().connected);
            }
            other => panic!("expected cdrom, got {other:?}"),
        }
        assert!(matches!(cfg.devices[4], VirtualDevice::Floppy { .. }));
        assert!(matches!(cfg.devices[5], VirtualDevice::UsbController { .. }));
    }

    #[test]
    fn decodes_boot_order() {
        let cfg = decode_vm_config(&device_list());
        assert_eq!(cfg.boot_order, vec![BootDevice::Cdrom, BootDevice::Disk { device_key: 2000 }]);
    }

    #[test]
    fn missing_hardware_yields_empty_config() {
        let cfg = decode_vm_config(&json!({}));
        assert!(cfg.devices.is_empty());
        assert!(cfg.boot_order.is_empty());
    }

    #[test]
    fn decodes_summary() {
        let vm = ManagedObjectRef::new("VirtualMachine", "vm-42");
        let s = decode_vm_summary(&vm, json!({
            "_typeName": "VirtualMachineSummary",
            "runtime": { "host": { "_typeName": "ManagedObjectReference", "type": "HostSystem", "value": "host-9" },
                         "powerState": "poweredOff" },
            "config": { "name": "web01", "vmPathName": "[ds1] web01/web01.vmx", "numCpu": 2,
                        "memorySizeMB": 4096, "uuid": "4211-bios", "instanceUuid": "5011-inst",
                        "guestId": "rhel8_64Guest", "guestFullName": "Red Hat Enterprise Linux 8 (64-bit)" },
            "overallStatus": "green"
        })).unwrap();
        assert_eq!(s.name, "web01");
        assert_eq!(s.power_state, VmPowerState::PoweredOff);
        assert_eq!(s.memory_size_mb, Some(4096));
        assert_eq!(s.host, Some(ManagedObjectRef::new("HostSystem", "host-9")));
        assert_eq!(s.instance_uuid.as_deref(), Some("5011-inst"));
    }

    #[test]
    fn decodes_mounts() {
        let mounts = decode_mounts(&json!({
            "mountInfo": [
                { "volume": { "_typeName": "HostVmfsVolume", "name": "ds1", "capacity": 1099511627776i64, "maxBlocks": 63963136 } },
                { "volume": { "_typeName": "HostNasVolume", "name": "nfs-iso", "capacity": 5000 } }
            ]
        }));
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].max_blocks, Some(63963136));
        assert_eq!(mounts[1].max_blocks, None);
    }

    #[test]
    fn decodes_task_error_message() {
        let task = ManagedObjectRef::new("Task", "task-7");
        let info = decode_task_info(&task, &json!({
            "state": "error",
            "descriptionId": "VirtualMachine.powerOn",
            "error": { "_typeName": "LocalizedMethodFault", "localizedMessage": "Insufficient resources." }
        })).unwrap();
        assert_eq!(info.state, TaskState::Error);
        assert_eq!(info.error.as_deref(), Some("Insufficient resources."));

        let running = decode_task_info(&task, &json!({ "state": "running" })).unwrap();
        assert!(!running.state.is_terminal());
        assert!(decode_task_info(&task, &json!({})).is_err());
    }

    #[test]
    fn encodes_boot_classes_as_typed_string() {
        let v = encode_config_spec(&VmConfigSpec::boot_device_classes("cd")).unwrap();
        assert_eq!(v["extraConfig"][0]["key"], BOOT_DEVICE_CLASSES_KEY);
        assert_eq!(v["extraConfig"][0]["value"]["_value"], "cd");
        assert!(v.get("deviceChange").is_none());
    }

    #[test]
    fn encodes_cdrom_edit() {
        let spec = VmConfigSpec {
            extra_config: vec![],
            device_change: vec![DeviceConfigSpec {
                operation: DeviceOperation::Edit,
                device: VirtualDevice::Cdrom {
                    info: DeviceInfo { key: 3002, controller_key: Some(201), label: "CD/DVD drive 1".into(), ..Default::default() },
                    backing: CdromBacking::RemotePassthrough,
                    connectable: Some(ConnectInfo { start_connected: false, allow_guest_control: true, connected: false }),
                },
            }],
        };
        let v = encode_config_spec(&spec).unwrap();
        let dev = &v["deviceChange"][0];
        assert_eq!(dev["operation"], "edit");
        assert_eq!(dev["device"]["controllerKey"], 201);
        assert_eq!(dev["device"]["backing"]["_typeName"], "VirtualCdromRemotePassthroughBackingInfo");
        assert_eq!(dev["device"]["connectable"]["allowGuestControl"], true);
    }

    #[test]
    fn refuses_non_cdrom_device_changes() {
        let spec = VmConfigSpec {
            extra_config: vec![],
            device_change: vec![DeviceConfigSpec {
                operation: DeviceOperation::Edit,
                device: VirtualDevice::Floppy { info: DeviceInfo::default() },
            }],
        };
        assert!(encode_config_spec(&spec).is_err());
    }

    #[test]
    fn fault_message_prefers_type_and_text() {
        let msg = fault_message(r#"{"_typeName":"InvalidLogin","message":"Cannot complete login due to an incorrect user name or password."}"#);
        assert!(msg.starts_with("InvalidLogin: "));
        assert_eq!(fault_message("plain text"), "plain text");
    }
}
