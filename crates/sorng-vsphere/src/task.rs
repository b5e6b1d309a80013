//! Waiting on remote tasks.

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::types::*;

use log::debug;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polls `Task.info` until the task reaches a terminal state.
///
/// Delays between polls start at `initial_interval` and double up to
/// `max_interval`. The waiter gives up with [`VsphereError::Timeout`] once
/// the configured deadline passes and with [`VsphereError::Cancelled`] as
/// soon as its token is cancelled. Nothing is retried: a failed read of the
/// task is returned as is.
#[derive(Debug, Clone)]
pub struct TaskWaiter {
    config: TaskWaitConfig,
    cancel: CancellationToken,
}

impl TaskWaiter {
    pub fn new(config: TaskWaitConfig) -> Self {
        Self { config, cancel: CancellationToken::new() }
    }

    pub fn with_cancellation(config: TaskWaitConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Block until `task` succeeds or fails and return its final info.
    ///
    /// A task that ends in [`TaskState::Error`] is *not* an `Err` here; the
    /// caller decides which domain error it maps to.
    pub async fn wait(&self, inventory: &dyn Inventory, task: &TaskRef) -> VsphereResult<TaskInfo> {
        let started = Instant::now();
        // A timeout past the end of the clock means no deadline.
        let deadline = self.config.timeout().and_then(|t| started.checked_add(t));
        let max_interval = self.config.max_interval();
        let mut interval = self.config.initial_interval();
        let mut polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(VsphereError::Cancelled(format!("wait for {task}")));
            }

            let info = inventory.task_info(task).await?;
            polls += 1;
            if info.state.is_terminal() {
                debug!(
                    "{task} finished {:?} after {polls} poll(s) in {:?}",
                    info.state,
                    started.elapsed()
                );
                return Ok(info);
            }

            let mut delay = interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(VsphereError::timeout(format!(
                        "{task} still {:?} after {:?}",
                        info.state,
                        started.elapsed()
                    )));
                }
                delay = delay.min(deadline - now);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(VsphereError::Cancelled(format!("wait for {task}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            interval = interval.saturating_mul(2).min(max_interval);
        }
    }
}

impl Default for TaskWaiter {
    fn default() -> Self {
        Self::new(TaskWaitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedCall, SimulatedInventory, SimulatedVm};

    fn fast(timeout_secs: Option<u64>) -> TaskWaitConfig {
        TaskWaitConfig { initial_interval_ms: 1, max_interval_ms: 4, timeout_secs }
    }

    fn setup() -> (SimulatedInventory, ManagedObjectRef) {
        let inv = SimulatedInventory::new();
        let dc = inv.add_datacenter("dc");
        let vm = inv.add_vm(&dc, SimulatedVm::new("web01"));
        (inv, vm)
    }

    #[tokio::test]
    async fn waits_through_queued_and_running() {
        let (inv, vm) = setup();
        inv.set_polls_before_done(5);
        let task = inv.power(&vm, PowerOp::PowerOn).await.unwrap();

        let info = TaskWaiter::new(fast(Some(10))).wait(&inv, &task).await.unwrap();
        assert_eq!(info.state, TaskState::Success);
    }

    #[tokio::test]
    async fn error_state_is_returned_not_raised() {
        let (inv, vm) = setup();
        inv.fail_tasks(SimulatedCall::Power(PowerOp::PowerOn), "No host is compatible");
        let task = inv.power(&vm, PowerOp::PowerOn).await.unwrap();

        let info = TaskWaiter::new(fast(None)).wait(&inv, &task).await.unwrap();
        assert_eq!(info.state, TaskState::Error);
        assert_eq!(info.error.as_deref(), Some("No host is compatible"));
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let (inv, vm) = setup();
        inv.set_polls_before_done(u32::MAX);
        let task = inv.power(&vm, PowerOp::PowerOn).await.unwrap();

        let err = TaskWaiter::new(fast(Some(0))).wait(&inv, &task).await.unwrap_err();
        assert!(matches!(err, VsphereError::Timeout(_)));
    }

    #[tokio::test]
    async fn huge_timeout_means_no_deadline() {
        let (inv, vm) = setup();
        inv.set_polls_before_done(3);
        let task = inv.power(&vm, PowerOp::PowerOn).await.unwrap();

        let config: TaskWaitConfig = serde_json::from_str(
            r#"{"initialIntervalMs":1,"maxIntervalMs":2,"timeoutSecs":18446744073709551615}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, Some(u64::MAX));

        let info = TaskWaiter::new(config).wait(&inv, &task).await.unwrap();
        assert_eq!(info.state, TaskState::Success);
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let (inv, vm) = setup();
        inv.set_polls_before_done(u32::MAX);
        let task = inv.power(&vm, PowerOp::PowerOn).await.unwrap();

        let token = CancellationToken::new();
        let waiter = TaskWaiter::with_cancellation(fast(None), token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = waiter.wait(&inv, &task).await.unwrap_err();
        assert!(matches!(err, VsphereError::Cancelled(_)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_task_surfaces_read_error() {
        let (inv, _) = setup();
        let bogus = ManagedObjectRef::new("Task", "task-404");
        let err = TaskWaiter::new(fast(None)).wait(&inv, &bogus).await.unwrap_err();
        assert!(matches!(err, VsphereError::ObjectNotFound(_)));
    }
}
