/// One-shot delayed tasks on a single worker thread
///
/// The worker keeps pending tasks in a deadline heap and sleeps on the
/// command channel until the earliest deadline. A due task runs on its own
/// short-lived thread so a slow job never delays the others.
///
/// Every task carries an atomic state. Firing and cancelling both move it out
/// of `PENDING` with a compare-exchange, so exactly one of them wins.
use crossbeam_channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fired,
    Cancelled,
}

/// Handle to a scheduled task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: u64,
    state: Arc<AtomicU8>,
    commands: Sender<Command>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        match self.state.load(Ordering::SeqCst) {
            PENDING => TaskState::Pending,
            FIRED => TaskState::Fired,
            _ => TaskState::Cancelled,
        }
    }

    /// Cancel the task. Returns false when it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            // the worker may be gone already; the state flag alone suffices then
            let _ = self.commands.send(Command::Cancel(self.id));
        }
        won
    }
}

enum Command {
    Schedule(ScheduledTask),
    Cancel(u64),
    Shutdown,
}

struct ScheduledTask {
    id: u64,
    deadline: Instant,
    state: Arc<AtomicU8>,
    job: Job,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// reversed: BinaryHeap is a max-heap, the earliest deadline must surface
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct Scheduler {
    name: String,
    commands: Sender<Command>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

static SHARED: Lazy<Scheduler> = Lazy::new(|| Scheduler::new("snipbox-timeouts"));

impl Scheduler {
    pub fn new(name: &str) -> Self {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let worker_name = name.to_string();
        let worker = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || run_worker(&worker_name, receiver));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start scheduler thread {}: {}", name, e);
                None
            }
        };
        Self {
            name: name.to_string(),
            commands,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(worker),
        }
    }

    /// Process-wide scheduler, started on first use
    pub fn shared() -> &'static Scheduler {
        &SHARED
    }

    /// Run `job` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, job: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(AtomicU8::new(PENDING));
        let task = ScheduledTask {
            id,
            deadline: Instant::now() + delay,
            state: Arc::clone(&state),
            job: Box::new(job),
        };
        if self.commands.send(Command::Schedule(task)).is_err() {
            warn!("Scheduler {} is shut down, task {} will never fire", self.name, id);
            state.store(CANCELLED, Ordering::SeqCst);
        }
        TaskHandle {
            id,
            state,
            commands: self.commands.clone(),
        }
    }

    /// Stop the worker. Pending tasks are dropped without firing.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Scheduler thread {} panicked", self.name);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(name: &str, commands: Receiver<Command>) {
    debug!("Scheduler {} started", name);
    let mut pending: BinaryHeap<ScheduledTask> = BinaryHeap::new();

    loop {
        let next = match pending.peek() {
            Some(task) => {
                let wait = task.deadline.saturating_duration_since(Instant::now());
                commands.recv_timeout(wait)
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(Command::Schedule(task)) => pending.push(task),
            Ok(Command::Cancel(id)) => pending.retain(|task| task.id != id),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while pending.peek().map_or(false, |task| task.deadline <= now) {
            let Some(task) = pending.pop() else { break };
            fire(name, task);
        }
    }

    for task in pending.drain() {
        let _ = task
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
    }
    info!("Scheduler {} stopped", name);
}

fn fire(name: &str, task: ScheduledTask) {
    if task
        .state
        .compare_exchange(PENDING, FIRED, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    let id = task.id;
    let spawned = thread::Builder::new()
        .name(format!("{}-{}", name, id))
        .spawn(task.job);
    if let Err(e) = spawned {
        warn!("Failed to run scheduled task {}: {}", id, e);
    }
}
