/// Forked execution environment: creates one controller per evaluation and
/// arms its timeout guard. Each controller gets its own empty code store
/// built from the environment's template, so unit names never collide
/// between child runtimes.
use crate::config::config::SandboxConfig;
use crate::config::types::Result;
use crate::core::controller::{ControllerSettings, RemoteController};
use crate::core::launcher::{AgentLauncher, JvmLauncher};
use crate::exec::scheduler::Scheduler;
use crate::exec::watchdog::ExecutionTimeoutGuard;
use crate::store::CodeStore;
use std::sync::Arc;
use std::time::Duration;

pub struct ForkedExecutionEnvironment {
    launcher: Arc<dyn AgentLauncher>,
    store: Arc<dyn CodeStore>,
    settings: ControllerSettings,
    execution_timeout: Duration,
    scheduler: &'static Scheduler,
}

impl ForkedExecutionEnvironment {
    pub fn new(
        launcher: Arc<dyn AgentLauncher>,
        store: Arc<dyn CodeStore>,
        settings: ControllerSettings,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            store,
            settings,
            execution_timeout,
            scheduler: Scheduler::shared(),
        }
    }

    /// Environment launching real child runtimes as configured
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(JvmLauncher::new(config.launch_profile())),
            config.code_store()?,
            config.controller_settings(),
            config.execution_timeout(),
        ))
    }

    pub fn with_scheduler(mut self, scheduler: &'static Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Template the per-controller stores are made from
    pub fn store(&self) -> &Arc<dyn CodeStore> {
        &self.store
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Spawn a child, connect to it and arm the execution timeout
    pub fn create_controller(&self) -> Result<Arc<RemoteController>> {
        let controller = RemoteController::connect(
            self.launcher.as_ref(),
            self.store.fresh(),
            self.settings.clone(),
        )?;
        ExecutionTimeoutGuard::arm(&controller, self.execution_timeout, self.scheduler);
        Ok(controller)
    }
}
