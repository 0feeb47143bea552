/// Signal handling and child process-group termination
///
/// The handler only flips atomics; the CLI polls them to stop a running
/// evaluation. Child runtimes are started in their own process group so a
/// single group signal reaches every process they fork.
use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Last signal received, 0 if none
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct SignalHandler;

impl SignalHandler {
    /// Install SIGINT/SIGTERM handlers. Call early in main(), before any
    /// threads are spawned.
    pub fn init() -> Result<Self, String> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        unsafe {
            signal::sigaction(Signal::SIGINT, &sig_action)
                .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;
            signal::sigaction(Signal::SIGTERM, &sig_action)
                .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM)");
        Ok(Self)
    }

    /// Only atomic stores: no allocation, locks or I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    pub fn get_signal(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    /// Returns true if a signal arrived before `timeout`
    pub fn wait_for_signal(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

/// What termination of a child process group actually did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    /// The child had already exited before any signal was sent
    pub already_exited: bool,
    /// The child was waited for; `exit_code` is `None` when a signal ended it
    pub reaped: bool,
    pub exit_code: Option<i32>,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// SIGTERM the child's process group, wait up to `grace` for it to exit,
/// then SIGKILL the group and reap the child. The group is always swept
/// with SIGKILL, even when the child itself exited on its own.
pub fn terminate_process_group(child: &mut Child, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();
    let pid = Pid::from_raw(child.id() as i32);

    if let Ok(Some(status)) = child.try_wait() {
        report.already_exited = true;
        report.reaped = true;
        report.exit_code = status.code();
        report.kill_sent = sweep_group(pid, &mut report.notes);
        return report;
    }

    report.term_sent = signal_group(pid, Signal::SIGTERM, &mut report.notes);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                report.reaped = true;
                report.exit_code = status.code();
                report.waited_ms = start.elapsed().as_millis() as u64;
                report.kill_sent = sweep_group(pid, &mut report.notes);
                return report;
            }
            Ok(None) => std::thread::sleep(REAP_POLL_INTERVAL),
            Err(e) => {
                report.notes.push(format!("try_wait failed: {}", e));
                break;
            }
        }
    }

    report.kill_sent = signal_group(pid, Signal::SIGKILL, &mut report.notes);
    match child.wait() {
        Ok(status) => {
            report.reaped = true;
            report.exit_code = status.code();
        }
        Err(e) => report.notes.push(format!("wait failed: {}", e)),
    }
    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// SIGKILL whatever is left in the group of a reaped leader. No fallback to
/// the leader's pid, which may already belong to another process.
fn sweep_group(pid: Pid, notes: &mut Vec<String>) -> bool {
    match killpg(pid, Signal::SIGKILL) {
        Ok(()) => {
            notes.push(format!("killed stragglers in process group {}", pid));
            true
        }
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("sweep of process group {} failed: {}", pid, e);
            notes.push(format!("group sweep failed: {}", e));
            false
        }
    }
}

/// Signal the group, falling back to the leader alone when the group is gone
fn signal_group(pid: Pid, sig: Signal, notes: &mut Vec<String>) -> bool {
    match killpg(pid, sig) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            notes.push(format!("process group {} already gone for {}", pid, sig));
            signal::kill(pid, sig).is_ok()
        }
        Err(e) => {
            warn!("group {} failed for {}: {}", sig, pid, e);
            notes.push(format!("group {} fallback used: {}", sig, e));
            signal::kill(pid, sig).is_ok()
        }
    }
}
