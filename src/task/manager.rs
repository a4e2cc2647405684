//! Bounded worker-thread task manager: a fixed pool of OS threads drains a
//! shared FIFO backlog, a dedicated timer thread promotes delayed tasks
//! once their start time arrives, and callers blocked on a task's
//! completion steal backlog work instead of idling.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::Timestamp;
use crate::error::{CoreError, ErrorKind};
use crate::future::{Future, Promise};
use crate::value::Value;

/// Worker-thread count used when a plugin does not request a specific size.
pub const DEFAULT_WORKER_COUNT: usize = 5;

pub type Step = Box<dyn FnMut() -> Result<Value, CoreError> + Send>;
pub type Finalizer = Box<dyn FnOnce(&Result<Value, CoreError>) + Send>;

/// Identifies a submitted task for the lifetime of the [`TaskManager`] that
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandleId(u64);

/// A unit of work: an ordered list of steps run on one worker thread,
/// short-circuiting at the first error, an optional finalizer that always
/// runs (success, failure, or cancellation), an optional affinity key that
/// pins every task sharing it to the same worker so their relative order
/// is preserved, and an optional start time that defers the task until the
/// timer thread promotes it to the backlog.
pub struct TaskSpec {
    steps: Vec<Step>,
    finalizer: Option<Finalizer>,
    affinity: Option<String>,
    start_time: Option<Timestamp>,
}

impl TaskSpec {
    pub fn new(step: Step) -> Self {
        Self { steps: vec![step], finalizer: None, affinity: None, start_time: None }
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn with_affinity(mut self, key: impl Into<String>) -> Self {
        self.affinity = Some(key.into());
        self
    }

    pub fn starting_at(mut self, when: Timestamp) -> Self {
        self.start_time = Some(when);
        self
    }
}

struct QueuedTask {
    spec: Mutex<Option<TaskSpec>>,
    promise: Promise,
    cancelled: AtomicBool,
    worker: Mutex<Option<usize>>,
}

struct DelayedEntry {
    when: Timestamp,
    task: Arc<QueuedTask>,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when
    }
}
impl Eq for DelayedEntry {}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed so `BinaryHeap` (a max-heap) pops the earliest time first
        other.when.cmp(&self.when)
    }
}

struct State {
    backlog: VecDeque<Arc<QueuedTask>>,
    delayed: BinaryHeap<DelayedEntry>,
    affinity_workers: HashMap<String, usize>,
    next_worker: usize,
    shutting_down: bool,
}

/// A fixed pool of worker threads executing [`TaskSpec`]s submitted via
/// [`TaskManager::queue_task`].
pub struct TaskManager {
    state: Mutex<State>,
    backlog_wake: Condvar,
    idle: Condvar,
    worker_count: usize,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Arc<QueuedTask>>>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    timer_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    clock: SharedClock,
}

impl TaskManager {
    pub fn start(worker_count: usize) -> Arc<Self> {
        Self::start_with_clock(worker_count, Arc::new(SystemClock))
    }

    /// Like [`TaskManager::start`], but draws delayed-task and timer-thread
    /// comparisons from `clock` instead of the system clock, so a host that
    /// injects a [`crate::clock::MockClock`] gets deterministic timers.
    pub fn start_with_clock(worker_count: usize, clock: SharedClock) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let manager = Arc::new(Self {
            state: Mutex::new(State {
                backlog: VecDeque::new(),
                delayed: BinaryHeap::new(),
                affinity_workers: HashMap::new(),
                next_worker: 0,
                shutting_down: false,
            }),
            backlog_wake: Condvar::new(),
            idle: Condvar::new(),
            worker_count,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
            timer_thread: Mutex::new(None),
            clock,
        });

        let mut threads = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let worker = Arc::clone(&manager);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("task-worker-{idx}"))
                    .spawn(move || worker.run_worker(idx))
                    .expect("failed to spawn task worker"),
            );
        }
        *manager.threads.lock() = threads;

        let timer = Arc::clone(&manager);
        let timer_handle = std::thread::Builder::new()
            .name("task-timer".into())
            .spawn(move || timer.run_timer())
            .expect("failed to spawn task timer");
        *manager.timer_thread.lock() = Some(timer_handle);

        manager
    }

    pub fn default_pool() -> Arc<Self> {
        Self::start(DEFAULT_WORKER_COUNT)
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.now_millis())
    }

    /// Submits `spec`, returning an id for cancellation/queries and a
    /// future that completes with the task's final result.
    pub fn queue_task(&self, spec: TaskSpec) -> (TaskHandleId, Future) {
        let id = TaskHandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let promise = Promise::create();
        let future = promise.future();
        let start_time = spec.start_time;
        let task = Arc::new(QueuedTask {
            spec: Mutex::new(Some(spec)),
            promise,
            cancelled: AtomicBool::new(false),
            worker: Mutex::new(None),
        });
        self.tasks.lock().insert(id.0, Arc::clone(&task));

        match start_time {
            Some(when) if when > self.now() => {
                let mut state = self.state.lock();
                state.delayed.push(DelayedEntry { when, task });
                drop(state);
                self.backlog_wake.notify_all();
            }
            _ => self.enqueue_ready(task),
        }

        (id, future)
    }

    /// Requests cancellation. Cooperative: a task already mid-execution is
    /// only interrupted between steps.
    pub fn cancel(&self, handle: TaskHandleId) {
        if let Some(task) = self.tasks.lock().get(&handle.0) {
            task.cancelled.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self, handle: TaskHandleId) -> bool {
        self.tasks
            .lock()
            .get(&handle.0)
            .map(|t| t.cancelled.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn enqueue_ready(&self, task: Arc<QueuedTask>) {
        let mut state = self.state.lock();
        let worker = self.allocate_next_worker(&mut state, &task);
        *task.worker.lock() = Some(worker);
        state.backlog.push_back(task);
        drop(state);
        self.backlog_wake.notify_all();
    }

    /// Picks a worker for `task`: every task sharing an affinity key sticks
    /// to the same worker; everything else round-robins.
    fn allocate_next_worker(&self, state: &mut State, task: &QueuedTask) -> usize {
        let affinity = task.spec.lock().as_ref().and_then(|s| s.affinity.clone());
        match affinity {
            Some(key) => *state.affinity_workers.entry(key).or_insert_with(|| {
                let idx = state.next_worker;
                state.next_worker = (state.next_worker + 1) % self.worker_count;
                idx
            }),
            None => {
                let idx = state.next_worker;
                state.next_worker = (state.next_worker + 1) % self.worker_count;
                idx
            }
        }
    }

    fn run_worker(&self, idx: usize) {
        loop {
            let task = {
                let mut state = self.state.lock();
                loop {
                    if let Some(pos) = state.backlog.iter().position(|t| *t.worker.lock() == Some(idx)) {
                        break Some(state.backlog.remove(pos).expect("position just checked"));
                    }
                    if state.shutting_down {
                        break None;
                    }
                    self.backlog_wake.wait(&mut state);
                }
            };
            match task {
                Some(task) => {
                    self.execute(&task);
                    let state = self.state.lock();
                    if state.backlog.is_empty() && state.delayed.is_empty() {
                        self.idle.notify_all();
                    }
                }
                None => return,
            }
        }
    }

    fn execute(&self, task: &Arc<QueuedTask>) {
        let Some(mut spec) = task.spec.lock().take() else { return };
        let mut result: Result<Value, CoreError> = Ok(Value::Bool(true));

        if task.cancelled.load(Ordering::Acquire) {
            result = Err(CoreError::new(ErrorKind::TaskCancelled, "task cancelled before it started"));
        } else {
            for step in spec.steps.iter_mut() {
                if task.cancelled.load(Ordering::Acquire) {
                    result = Err(CoreError::new(ErrorKind::TaskCancelled, "task cancelled mid-execution"));
                    break;
                }
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| step())) {
                    Ok(Ok(value)) => result = Ok(value),
                    Ok(Err(err)) => {
                        result = Err(err);
                        break;
                    }
                    Err(_) => {
                        result = Err(CoreError::new(ErrorKind::TaskPanicked, "task step panicked"));
                        break;
                    }
                }
            }
        }

        let explicitly_cancelled = matches!(&result, Err(err) if err.kind() == ErrorKind::TaskCancelled);
        if let Some(finalizer) = spec.finalizer.take() {
            if !explicitly_cancelled {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| finalizer(&result)));
            }
        }

        match result {
            Ok(value) => {
                let _ = task.promise.set_value(value);
            }
            Err(err) if err.kind() == ErrorKind::TaskCancelled => {
                let _ = task.promise.cancel();
            }
            Err(err) => {
                let _ = task.promise.set_error(err);
            }
        }
    }

    fn run_timer(&self) {
        loop {
            let mut state = self.state.lock();
            loop {
                match state.delayed.peek() {
                    Some(entry) => {
                        let now = self.now();
                        if entry.when <= now {
                            let entry = state.delayed.pop().expect("peek just confirmed an entry");
                            drop(state);
                            self.enqueue_ready(entry.task);
                            state = self.state.lock();
                            continue;
                        }
                        let wait_ms = entry.when.as_millis().saturating_sub(now.as_millis()).clamp(1, 250);
                        self.backlog_wake.wait_for(&mut state, Duration::from_millis(wait_ms));
                    }
                    None => {
                        if state.shutting_down {
                            return;
                        }
                        self.backlog_wake.wait_for(&mut state, Duration::from_millis(250));
                    }
                }
                if state.shutting_down && state.delayed.is_empty() {
                    return;
                }
            }
        }
    }

    /// Blocks until `future` completes, or `timeout` elapses. While
    /// waiting, steals and runs one pending backlog task per iteration
    /// instead of idling, so a caller blocked on a task's result helps
    /// drain the backlog rather than adding a thread that does nothing.
    ///
    /// Returns `false` if the wait timed out, and also if `future` settled
    /// into the cancelled outcome: a cancelled task never reports as
    /// completed to a waiter.
    pub fn wait_for_completion(&self, future: &Future, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            if future.is_ready() {
                return Self::settled_not_cancelled(future);
            }
            let stolen = self.state.lock().backlog.pop_front();
            match stolen {
                Some(task) => {
                    self.execute(&task);
                    let state = self.state.lock();
                    if state.backlog.is_empty() && state.delayed.is_empty() {
                        self.idle.notify_all();
                    }
                }
                None => {
                    let remaining = deadline.map(|d| d.saturating_duration_since(std::time::Instant::now()));
                    if let Some(d) = remaining {
                        if d.is_zero() {
                            return future.is_ready() && Self::settled_not_cancelled(future);
                        }
                        return future.wait(Some(d)) && Self::settled_not_cancelled(future);
                    }
                    if future.wait(Some(Duration::from_millis(20))) {
                        return Self::settled_not_cancelled(future);
                    }
                }
            }
        }
    }

    fn settled_not_cancelled(future: &Future) -> bool {
        !matches!(future.get_value(), Err(ref err) if err.kind() == ErrorKind::PromiseCancelled)
    }

    /// Waits for every currently queued and delayed task to finish, then
    /// stops every worker and timer thread and joins them. Safe to call at
    /// most once.
    pub fn shutdown_and_wait(&self) {
        {
            let mut state = self.state.lock();
            while !(state.backlog.is_empty() && state.delayed.is_empty()) {
                self.idle.wait(&mut state);
            }
            state.shutting_down = true;
        }
        self.backlog_wake.notify_all();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.timer_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
