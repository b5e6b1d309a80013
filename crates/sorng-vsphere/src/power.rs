//! Power-state transitions, preceded by the BIOS boot-device step.

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::task::TaskWaiter;
use crate::types::*;

use log::{debug, info};

/// What the transition table decides for a (current, requested) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// Already in the requested state; nothing is submitted
    Unchanged,
    Submit(PowerOp),
    /// Transitions out of `suspended` are not handled
    Unsupported,
    Invalid,
}

/// The transition table. Pure; no remote calls.
pub fn plan_transition(current: VmPowerState, requested: RequestedPowerState) -> PowerAction {
    use crate::types::RequestedPowerState as Req;
    use crate::types::VmPowerState as Cur;

    match (current, requested) {
        (Cur::Suspended, _) => PowerAction::Unsupported,
        (Cur::PoweredOn, Req::PoweredOn) | (Cur::PoweredOff, Req::PoweredOff) => {
            PowerAction::Unchanged
        }
        (Cur::PoweredOn, Req::Reset) => PowerAction::Submit(PowerOp::Reset),
        (Cur::PoweredOff, Req::Reset | Req::PoweredOn) => PowerAction::Submit(PowerOp::PowerOn),
        (_, Req::PoweredOff) => PowerAction::Submit(PowerOp::PowerOff),
        _ => PowerAction::Invalid,
    }
}

/// Value written to `bios.bootDeviceClasses`.
pub fn boot_device_classes(boot_from_cdrom: bool) -> &'static str {
    if boot_from_cdrom {
        "cd"
    } else {
        ""
    }
}

/// Drives a resolved VM to a requested power state.
pub struct PowerController<'a> {
    inventory: &'a dyn Inventory,
    waiter: TaskWaiter,
}

impl<'a> PowerController<'a> {
    pub fn new(inventory: &'a dyn Inventory, waiter: TaskWaiter) -> Self {
        Self { inventory, waiter }
    }

    /// Apply the boot-device setting, then move the VM to `requested`.
    ///
    /// Returns `true` when a power task ran, `false` when the VM was already
    /// in the requested state. The boot-device reconfiguration is submitted
    /// in both cases.
    pub async fn apply(
        &self,
        vm: &ResolvedVm,
        requested: RequestedPowerState,
        boot_from_cdrom: bool,
    ) -> VsphereResult<bool> {
        self.set_boot_classes(vm, boot_device_classes(boot_from_cdrom)).await?;

        let current = self.inventory.vm_summary(vm.moref()).await?.power_state;
        let op = match plan_transition(current, requested) {
            PowerAction::Unchanged => {
                debug!("{} already {current}, nothing to do", vm.display_id());
                return Ok(false);
            }
            PowerAction::Submit(op) => op,
            PowerAction::Unsupported => {
                return Err(VsphereError::UnsupportedTransition {
                    vm: vm.display_id(),
                    current,
                    requested,
                })
            }
            PowerAction::Invalid => {
                return Err(VsphereError::InvalidState {
                    vm: vm.display_id(),
                    current,
                    requested,
                })
            }
        };

        info!("{}: {current} -> {requested} via {}", vm.display_id(), op.method_name());
        let task = self.inventory.power(vm.moref(), op).await?;
        let outcome = self.waiter.wait(self.inventory, &task).await?;
        if outcome.state != TaskState::Success {
            return Err(VsphereError::PowerTransitionFailed {
                vm: vm.display_id(),
                requested,
                message: outcome.error,
            });
        }
        Ok(true)
    }

    async fn set_boot_classes(&self, vm: &ResolvedVm, classes: &str) -> VsphereResult<()> {
        debug!("Setting boot device classes of {} to {classes:?}", vm.display_id());
        let spec = VmConfigSpec::boot_device_classes(classes);
        let task = self.inventory.reconfigure(vm.moref(), &spec).await?;
        let outcome = self.waiter.wait(self.inventory, &task).await?;
        if outcome.state != TaskState::Success {
            return Err(VsphereError::BootOrderConfigFailed {
                vm: vm.display_id(),
                boot_classes: classes.to_string(),
                message: outcome.error,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver;
    use crate::simulated::{SimulatedCall, SimulatedInventory, SimulatedVm, SubmittedOp};

    fn waiter() -> TaskWaiter {
        TaskWaiter::new(TaskWaitConfig { initial_interval_ms: 1, max_interval_ms: 2, timeout_secs: Some(5) })
    }

    async fn setup(state: VmPowerState) -> (SimulatedInventory, ResolvedVm) {
        let inv = SimulatedInventory::new();
        let dc = inv.add_datacenter("dc");
        inv.add_vm(&dc, SimulatedVm::new("web01").instance_uuid("5011-aa").power_state(state));
        inv.set_polls_before_done(1);
        let vm = resolver::resolve_vm(&inv, &TargetSpec::by_instance_id("5011-aa")).await.unwrap();
        (inv, vm)
    }

    #[test]
    fn transition_table() {
        use crate::types::RequestedPowerState as Req;
        use crate::types::VmPowerState as Cur;

        assert_eq!(plan_transition(Cur::PoweredOn, Req::PoweredOn), PowerAction::Unchanged);
        assert_eq!(plan_transition(Cur::PoweredOff, Req::PoweredOff), PowerAction::Unchanged);
        assert_eq!(plan_transition(Cur::PoweredOn, Req::Reset), PowerAction::Submit(PowerOp::Reset));
        assert_eq!(plan_transition(Cur::PoweredOff, Req::Reset), PowerAction::Submit(PowerOp::PowerOn));
        assert_eq!(plan_transition(Cur::PoweredOff, Req::PoweredOn), PowerAction::Submit(PowerOp::PowerOn));
        assert_eq!(plan_transition(Cur::PoweredOn, Req::PoweredOff), PowerAction::Submit(PowerOp::PowerOff));
        assert_eq!(plan_transition(Cur::Unknown, Req::PoweredOff), PowerAction::Submit(PowerOp::PowerOff));
        assert_eq!(plan_transition(Cur::Unknown, Req::PoweredOn), PowerAction::Invalid);
        assert_eq!(plan_transition(Cur::Unknown, Req::Reset), PowerAction::Invalid);
        for req in [Req::Reset, Req::PoweredOn, Req::PoweredOff] {
            assert_eq!(plan_transition(Cur::Suspended, req), PowerAction::Unsupported);
        }
    }

    #[tokio::test]
    async fn same_state_is_a_no_op_but_boot_step_runs() {
        let (inv, vm) = setup(VmPowerState::PoweredOn).await;
        let changed = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::PoweredOn, true)
            .await
            .unwrap();

        assert!(!changed);
        assert!(inv.power_ops().is_empty());
        assert_eq!(inv.submitted().len(), 1);
        assert_eq!(inv.extra_config_of(vm.moref(), BOOT_DEVICE_CLASSES_KEY).as_deref(), Some("cd"));
    }

    #[tokio::test]
    async fn powers_on_and_clears_boot_classes() {
        let (inv, vm) = setup(VmPowerState::PoweredOff).await;
        let changed = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::PoweredOn, false)
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(inv.power_ops(), vec![PowerOp::PowerOn]);
        assert_eq!(inv.power_state_of(vm.moref()), Some(VmPowerState::PoweredOn));
        assert_eq!(inv.extra_config_of(vm.moref(), BOOT_DEVICE_CLASSES_KEY).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn reset_of_running_vm() {
        let (inv, vm) = setup(VmPowerState::PoweredOn).await;
        let changed = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::Reset, false)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(inv.power_ops(), vec![PowerOp::Reset]);
    }

    #[tokio::test]
    async fn suspended_vm_only_gets_boot_step() {
        let (inv, vm) = setup(VmPowerState::Suspended).await;
        let err = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::PoweredOn, false)
            .await
            .unwrap_err();

        assert!(matches!(err, VsphereError::UnsupportedTransition { .. }));
        let submitted = inv.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(matches!(submitted[0], SubmittedOp::Reconfigure { .. }));
    }

    #[tokio::test]
    async fn failed_power_task_carries_message() {
        let (inv, vm) = setup(VmPowerState::PoweredOn).await;
        inv.fail_tasks(SimulatedCall::Power(PowerOp::PowerOff), "The operation is not allowed in the current state.");
        let err = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::PoweredOff, false)
            .await
            .unwrap_err();

        match err {
            VsphereError::PowerTransitionFailed { requested, message, .. } => {
                assert_eq!(requested, RequestedPowerState::PoweredOff);
                assert_eq!(message.as_deref(), Some("The operation is not allowed in the current state."));
            }
            other => panic!("expected PowerTransitionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_boot_step_stops_before_power() {
        let (inv, vm) = setup(VmPowerState::PoweredOff).await;
        inv.fail_tasks(SimulatedCall::BootConfig, "Invalid configuration for device '0'.");
        let err = PowerController::new(&inv, waiter())
            .apply(&vm, RequestedPowerState::PoweredOn, true)
            .await
            .unwrap_err();

        match err {
            VsphereError::BootOrderConfigFailed { boot_classes, message, .. } => {
                assert_eq!(boot_classes, "cd");
                assert!(message.is_some());
            }
            other => panic!("expected BootOrderConfigFailed, got {other:?}"),
        }
        assert!(inv.power_ops().is_empty());
    }
}
