/// Remote execution controller
///
/// Owns one child runtime: its control channel, its debugger handle and the
/// process itself. Three locks, always taken in this order when nested:
/// `channel` (serialises request/response exchanges), `state` (the stop
/// mutex), `runtime`. `stop` and `close` never take `channel`, so they can
/// run while another thread is blocked waiting for a response.
use crate::config::types::{Result, SandboxError, StopCause, UserException};
use crate::core::channel::ControlChannel;
use crate::core::launcher::{accept_within, AgentLauncher, ControllerBox};
use crate::core::types::{ControlRequest, ControlResponse, OutputSink};
use crate::exec::scheduler::TaskHandle;
use crate::interrupt::{AgentLayout, ForcefulInterrupt, InterruptOutcome, RuntimeHandle};
use crate::kernel::signal::{terminate_process_group, KillReport};
use crate::observability::audit::{self, CorrelationIds};
use crate::store::{CodeStore, CompiledUnit, LoadOutcome};
use log::{debug, info, warn};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub layout: AgentLayout,
    pub connect_timeout: Duration,
    /// Time between SIGTERM and SIGKILL when the child is released
    pub kill_grace: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            layout: AgentLayout::default(),
            connect_timeout: Duration::from_millis(3000),
            kill_grace: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Connected,
    Running,
    Stopped,
    Disposed,
}

#[derive(Debug, Default)]
struct StopState {
    user_code_running: bool,
    stop_cause: Option<StopCause>,
    /// No further calls accepted
    closed: bool,
}

pub struct RemoteController {
    id: Uuid,
    child_pid: u32,
    settings: ControllerSettings,
    store: Arc<dyn CodeStore>,
    channel: Mutex<ControlChannel>,
    socket: TcpStream,
    state: Mutex<StopState>,
    runtime: Mutex<Option<Box<dyn RuntimeHandle>>>,
    process: Mutex<Option<Child>>,
    released: AtomicBool,
    timeout_task: Mutex<Option<TaskHandle>>,
    last_kill: Mutex<Option<KillReport>>,
}

impl RemoteController {
    /// Launch a child and wait for its agent to connect back. On any failure
    /// the child is terminated before the error is returned.
    pub fn connect(
        launcher: &dyn AgentLauncher,
        store: Arc<dyn CodeStore>,
        settings: ControllerSettings,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| SandboxError::ChildSetup(format!("bind control listener: {}", e)))?;
        let port = listener.local_addr()?.port();

        let mut boxed = launcher.launch(port)?;
        let connected = accept_within(&listener, settings.connect_timeout, &mut boxed.process)
            .and_then(ControlChannel::new);
        let channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                boxed.abandon();
                return Err(match e {
                    SandboxError::ChildSetup(_) => e,
                    other => SandboxError::ChildSetup(format!("control connection: {}", other)),
                });
            }
        };
        let socket = match channel.shutdown_handle() {
            Ok(socket) => socket,
            Err(e) => {
                boxed.abandon();
                return Err(e);
            }
        };

        let ControllerBox { process, runtime } = boxed;
        let controller = Arc::new(Self {
            id: Uuid::new_v4(),
            child_pid: process.id(),
            settings,
            store,
            channel: Mutex::new(channel),
            socket,
            state: Mutex::new(StopState::default()),
            runtime: Mutex::new(Some(runtime)),
            process: Mutex::new(Some(process)),
            released: AtomicBool::new(false),
            timeout_task: Mutex::new(None),
            last_kill: Mutex::new(None),
        });
        info!(
            "Controller {} connected to child pid={}",
            controller.id, controller.child_pid
        );
        spawn_exit_monitor(&controller);
        Ok(controller)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid
    }

    /// Units installed in this controller's child
    pub fn store(&self) -> &Arc<dyn CodeStore> {
        &self.store
    }

    pub fn correlation(&self) -> CorrelationIds {
        CorrelationIds::for_controller(self.id).with_child_pid(self.child_pid)
    }

    pub fn state(&self) -> ControllerState {
        if self.is_closed() {
            return ControllerState::Disposed;
        }
        let state = lock(&self.state);
        if state.stop_cause.is_some() || state.closed {
            ControllerState::Stopped
        } else if state.user_code_running {
            ControllerState::Running
        } else {
            ControllerState::Connected
        }
    }

    /// True once `close` has run, from any path
    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn stop_cause(&self) -> Option<StopCause> {
        lock(&self.state).stop_cause
    }

    /// Report of the process-group termination done by `close`
    pub fn kill_report(&self) -> Option<KillReport> {
        lock(&self.last_kill).clone()
    }

    /// Attach the timeout task so `close` can cancel it
    pub fn set_timeout_task(&self, task: TaskHandle) {
        if self.is_closed() {
            task.cancel();
            return;
        }
        *lock(&self.timeout_task) = Some(task);
    }

    pub fn load(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        let outcomes = self.store.load(units)?;
        self.install(
            ControlRequest::Load {
                units: units.to_vec(),
            },
            units,
            outcomes,
        )
    }

    pub fn redefine(&self, units: &[CompiledUnit]) -> Result<Vec<LoadOutcome>> {
        let outcomes = self.store.redefine(units)?;
        self.install(
            ControlRequest::Redefine {
                units: units.to_vec(),
            },
            units,
            outcomes,
        )
    }

    /// Run an entry point of loaded code; returns its result value as text
    pub fn invoke(&self, class_name: &str, method: &str, sink: &dyn OutputSink) -> Result<String> {
        self.run_user_code(
            ControlRequest::Invoke {
                class_name: class_name.to_string(),
                method: method.to_string(),
            },
            sink,
        )
    }

    pub fn var_value(&self, class_name: &str, variable: &str, sink: &dyn OutputSink) -> Result<String> {
        self.run_user_code(
            ControlRequest::VarValue {
                class_name: class_name.to_string(),
                variable: variable.to_string(),
            },
            sink,
        )
    }

    pub fn add_to_classpath(&self, path: &str) -> Result<()> {
        let mut channel = lock(&self.channel);
        self.ensure_open()?;
        channel
            .send(&ControlRequest::AddToClasspath {
                path: path.to_string(),
            })
            .map_err(|e| self.translate(e))?;
        loop {
            match channel.receive().map_err(|e| self.translate(e))? {
                ControlResponse::Done => return Ok(()),
                ControlResponse::Output { stream, text } => {
                    debug!("Output during add_to_classpath ({:?}): {}", stream, text)
                }
                ControlResponse::Failure { message } => return Err(SandboxError::Remote(message)),
                other => return Err(unexpected("add_to_classpath", &other)),
            }
        }
    }

    /// Record `cause`, refuse further calls and interrupt user code that is
    /// running right now. Does not release the child; `close` does.
    pub fn stop(&self, cause: StopCause) -> Result<Option<InterruptOutcome>> {
        let mut state = lock(&self.state);
        if state.stop_cause.is_none() {
            state.stop_cause = Some(cause);
        }
        state.closed = true;
        if !state.user_code_running {
            debug!("Controller {} stopped ({:?}) while idle", self.id, cause);
            return Ok(None);
        }

        warn!("Stopping user code in controller {} ({:?})", self.id, cause);
        let mut runtime = lock(&self.runtime);
        let Some(runtime) = runtime.as_mut() else {
            return Ok(None);
        };
        match ForcefulInterrupt::new(runtime.as_mut(), &self.settings.layout).run() {
            Ok(outcome) => {
                audit::forced_interrupt(self.correlation(), &outcome);
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!("Forceful interrupt of controller {} failed: {}", self.id, e);
                audit::interrupt_failure(self.correlation(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Release everything. Idempotent.
    pub fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.state).closed = true;
        if let Some(task) = lock(&self.timeout_task).take() {
            task.cancel();
        }

        // unblocks a reader waiting for a response
        let _ = self.socket.shutdown(Shutdown::Both);

        if let Some(mut runtime) = lock(&self.runtime).take() {
            match runtime.dispose() {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => debug!("Runtime already disconnected"),
                Err(e) => debug!("Failed to dispose runtime of {}: {}", self.id, e),
            }
        }

        if let Some(mut child) = lock(&self.process).take() {
            let report = terminate_process_group(&mut child, self.settings.kill_grace);
            if report.reaped {
                info!(
                    "Controller {} released child pid={} (exit code {:?})",
                    self.id, self.child_pid, report.exit_code
                );
            } else {
                log::error!(
                    "Controller {} could not reap child pid={}: {:?}",
                    self.id,
                    self.child_pid,
                    report.notes
                );
            }
            audit::cleanup(self.correlation(), &report);
            *lock(&self.last_kill) = Some(report);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        let state = lock(&self.state);
        if let Some(cause) = state.stop_cause {
            return Err(SandboxError::Preempted(cause));
        }
        if state.closed || self.is_closed() {
            return Err(SandboxError::EngineTerminated(
                "controller is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Map a transport failure to what the caller should see
    fn translate(&self, err: SandboxError) -> SandboxError {
        if let Some(cause) = lock(&self.state).stop_cause {
            return SandboxError::Preempted(cause);
        }
        if err.is_disconnect() || self.is_closed() {
            return SandboxError::EngineTerminated(format!("child runtime is gone: {}", err));
        }
        err
    }

    fn install(
        &self,
        request: ControlRequest,
        units: &[CompiledUnit],
        outcomes: Vec<LoadOutcome>,
    ) -> Result<Vec<LoadOutcome>> {
        let result = self.exchange_install(request);
        if result.is_err() {
            let names: Vec<String> = units.iter().map(|unit| unit.name.clone()).collect();
            self.store.evict(&names);
        }
        result.map(|()| outcomes)
    }

    fn exchange_install(&self, request: ControlRequest) -> Result<()> {
        let mut channel = lock(&self.channel);
        self.ensure_open()?;
        let name = request.name();
        channel.send(&request).map_err(|e| self.translate(e))?;
        loop {
            match channel.receive().map_err(|e| self.translate(e))? {
                ControlResponse::Loaded { units } => {
                    debug!("Child installed {} unit(s)", units.len());
                    return Ok(());
                }
                ControlResponse::InstallFailed { unit, message } => {
                    return Err(SandboxError::Remote(format!(
                        "{} of {} failed: {}",
                        name, unit, message
                    )));
                }
                ControlResponse::Failure { message } => return Err(SandboxError::Remote(message)),
                ControlResponse::Output { stream, text } => {
                    debug!("Output during {} ({:?}): {}", name, stream, text)
                }
                other => return Err(unexpected(name, &other)),
            }
        }
    }

    fn run_user_code(&self, request: ControlRequest, sink: &dyn OutputSink) -> Result<String> {
        let mut channel = lock(&self.channel);
        {
            let mut state = lock(&self.state);
            if let Some(cause) = state.stop_cause {
                return Err(SandboxError::Preempted(cause));
            }
            if state.closed || self.is_closed() {
                return Err(SandboxError::EngineTerminated(
                    "controller is closed".to_string(),
                ));
            }
            // the flag goes up while the request is on the wire, under the
            // stop mutex, so a concurrent stop either refuses the call or
            // sees user code as running
            state.user_code_running = true;
            if let Err(e) = channel.send(&request) {
                state.user_code_running = false;
                drop(state);
                return Err(self.translate(e));
            }
        }

        let result = self.await_value(&mut channel, sink);
        lock(&self.state).user_code_running = false;
        result
    }

    fn await_value(&self, channel: &mut ControlChannel, sink: &dyn OutputSink) -> Result<String> {
        loop {
            let response = match channel.receive() {
                Ok(response) => response,
                Err(e) => return Err(self.translate(e)),
            };
            match response {
                ControlResponse::Output { stream, text } => sink.write(stream, &text),
                ControlResponse::Value { value } => return Ok(value),
                ControlResponse::UserException {
                    exception_class,
                    message,
                } => {
                    return Err(SandboxError::UserException(UserException {
                        exception_class,
                        message,
                    }))
                }
                ControlResponse::Stopped => {
                    let cause = self.stop_cause().unwrap_or(StopCause::Requested);
                    return Err(SandboxError::Preempted(cause));
                }
                ControlResponse::Failure { message } => return Err(SandboxError::Remote(message)),
                other => return Err(unexpected("invoke", &other)),
            }
        }
    }

    /// Poll result of the child; `None` while it runs or after release
    fn poll_child_exit(&self) -> Option<Option<i32>> {
        let mut process = lock(&self.process);
        let child = process.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                warn!("Polling child pid={} failed: {}", self.child_pid, e);
                None
            }
        }
    }
}

impl Drop for RemoteController {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(request: &str, response: &ControlResponse) -> SandboxError {
    SandboxError::Channel(format!(
        "unexpected response to {}: {:?}",
        request, response
    ))
}

/// Release the controller as soon as its child exits on its own
fn spawn_exit_monitor(controller: &Arc<RemoteController>) {
    let weak: Weak<RemoteController> = Arc::downgrade(controller);
    let name = format!("snipbox-exit-{}", controller.child_pid);
    let spawned = thread::Builder::new().name(name).spawn(move || loop {
        thread::sleep(EXIT_POLL_INTERVAL);
        let Some(controller) = weak.upgrade() else {
            return;
        };
        if controller.is_closed() {
            return;
        }
        if let Some(exit_code) = controller.poll_child_exit() {
            warn!(
                "Child pid={} of controller {} exited on its own (code {:?})",
                controller.child_pid, controller.id, exit_code
            );
            audit::child_exit(controller.correlation(), exit_code);
            controller.close();
            return;
        }
    });
    if let Err(e) = spawned {
        warn!("Failed to start exit monitor for {}: {}", controller.id, e);
    }
}
