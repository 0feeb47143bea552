/// Execution timeout guard
///
/// Arms a one-shot task when a controller is created. If the controller is
/// still open when the task fires, it is stopped with cause `Timeout` and
/// closed. A normal close cancels the task. The task only holds a weak
/// reference, so it never keeps a finished controller alive.
use crate::config::types::StopCause;
use crate::core::controller::RemoteController;
use crate::exec::scheduler::{Scheduler, TaskHandle};
use crate::observability::audit;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct ExecutionTimeoutGuard;

impl ExecutionTimeoutGuard {
    /// Schedule the guard and attach it to the controller
    pub fn arm(
        controller: &Arc<RemoteController>,
        timeout: Duration,
        scheduler: &Scheduler,
    ) -> TaskHandle {
        let weak = Arc::downgrade(controller);
        let handle = scheduler.schedule(timeout, move || {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            Self::expire(&controller, timeout);
        });
        controller.set_timeout_task(handle.clone());
        handle
    }

    fn expire(controller: &RemoteController, timeout: Duration) {
        if controller.is_closed() {
            return;
        }
        warn!(
            "Controller {} exceeded execution timeout of {} ms, terminating",
            controller.id(),
            timeout.as_millis()
        );
        audit::timeout_preemption(controller.correlation(), timeout);
        if let Err(e) = controller.stop(StopCause::Timeout) {
            warn!("Stop on timeout failed for {}: {}", controller.id(), e);
        }
        controller.close();
        info!("Controller {} terminated after timeout", controller.id());
    }
}
