//! The runtime aggregate: one [`Context`] per loaded plugin host process,
//! owning every subsystem and handing out [`crate::scope::ModuleScope`]s to
//! plugins loaded into it.

use std::sync::Arc;

use crate::abi::LifecyclePhase;
use crate::audit::TransactionLog;
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::{ConfigCtx, Timestamp, Topics};
use crate::error::{CoreError, ErrorKind};
use crate::handle::{HandleTable, DEFAULT_CAPACITY, GROWTH_INCREMENT};
use crate::pubsub::PubSub;
use crate::scope::{ModuleScope, ThreadContext};
use crate::symbol::SymbolTable;
use crate::task::{TaskManager, DEFAULT_WORKER_COUNT};

const DEFAULT_VALIDATION_LAP_CAP: u32 = 3;

/// Tunables resolved once at [`Context::new`] time; callers only override
/// what they need via the builder methods.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    worker_count: usize,
    clock: Option<SharedClock>,
    handle_table_initial_capacity: usize,
    handle_table_growth_increment: usize,
    validation_lap_cap: u32,
    publish_queue_depth: Option<usize>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            clock: None,
            handle_table_initial_capacity: DEFAULT_CAPACITY,
            handle_table_growth_increment: GROWTH_INCREMENT,
            validation_lap_cap: DEFAULT_VALIDATION_LAP_CAP,
            publish_queue_depth: None,
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of OS threads in the task manager's worker pool.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Overrides the clock that drives `Context::now`, config-write
    /// timestamps, and the task manager's timer thread. Tests inject a
    /// [`crate::clock::MockClock`] here; production code leaves this unset
    /// and gets [`SystemClock`].
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Starting size of the handle table's slot array.
    pub fn handle_table_initial_capacity(mut self, capacity: usize) -> Self {
        self.handle_table_initial_capacity = capacity;
        self
    }

    /// Slots added each time the handle table's slot array fills up.
    pub fn handle_table_growth_increment(mut self, increment: usize) -> Self {
        self.handle_table_growth_increment = increment;
        self
    }

    /// Maximum number of validator-rewrite passes a config write is given
    /// to converge before the value is committed as-is.
    pub fn validation_lap_cap(mut self, cap: u32) -> Self {
        self.validation_lap_cap = cap;
        self
    }

    /// Caps the config publish queue at this many pending notifications;
    /// `None` leaves it unbounded.
    pub fn publish_queue_depth(mut self, depth: usize) -> Self {
        self.publish_queue_depth = Some(depth);
        self
    }
}

/// The shared runtime: string interning, handle table, config tree, pub/sub
/// registry, task manager, and clock, all reachable from one `Arc`.
///
/// A process normally builds exactly one `Context` and loads every plugin
/// into it; each plugin gets its own [`ModuleScope`] so unloading it
/// reclaims everything it allocated without disturbing its siblings.
pub struct Context {
    symbols: Arc<SymbolTable>,
    handles: Arc<HandleTable>,
    config_ctx: ConfigCtx,
    config_root: Topics,
    pubsub: Arc<PubSub>,
    tasks: Arc<TaskManager>,
    clock: SharedClock,
}

impl Context {
    /// Builds a new runtime with default tunables.
    pub fn new() -> Result<Arc<Self>, CoreError> {
        Self::with_config(CoreConfig::default())
    }

    /// Builds a new runtime with the given [`CoreConfig`].
    pub fn with_config(config: CoreConfig) -> Result<Arc<Self>, CoreError> {
        let symbols = Arc::new(SymbolTable::new());
        let handles = Arc::new(HandleTable::with_capacity(
            config.handle_table_initial_capacity,
            config.handle_table_growth_increment,
        ));
        let queue = crate::config::PublishQueue::start_with_depth(config.publish_queue_depth);
        let config_root_anchor = handles.create_root();
        let clock = config.clock.unwrap_or_else(|| Arc::new(SystemClock) as SharedClock);
        let config_ctx = ConfigCtx {
            table: Arc::clone(&handles),
            symbols: Arc::clone(&symbols),
            queue,
            root: config_root_anchor,
            clock: Arc::clone(&clock),
            log: Arc::new(TransactionLog::default()),
            validation_lap_cap: config.validation_lap_cap,
        };
        let config_root = Topics::new_root(&config_ctx)?;

        Ok(Arc::new(Self {
            symbols,
            handles,
            config_ctx,
            config_root,
            pubsub: Arc::new(PubSub::new()),
            tasks: TaskManager::start_with_clock(config.worker_count.max(1), Arc::clone(&clock)),
            clock,
        }))
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn config_ctx(&self) -> &ConfigCtx {
        &self.config_ctx
    }

    /// The root of the configuration tree.
    pub fn config_root(&self) -> &Topics {
        &self.config_root
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.now_millis())
    }

    /// Allocates a fresh [`ModuleScope`] anchored to this context's handle
    /// table. A host loading a plugin calls this once and keeps the scope
    /// alive for exactly as long as the plugin is loaded.
    pub fn new_module_scope(self: &Arc<Self>) -> Arc<ModuleScope> {
        Arc::new(ModuleScope::new(Arc::clone(&self.handles)))
    }

    /// Returns (creating if necessary) the calling thread's
    /// [`ThreadContext`], bound to this context's handle table.
    pub fn thread_context(self: &Arc<Self>) -> Arc<ThreadContext> {
        crate::scope::thread_context(&self.handles)
    }

    /// Runs a module through its lifecycle phases in order, stopping at the
    /// first phase that returns an error. `run_phase` is supplied by the
    /// caller (typically a thin wrapper around the plugin's ABI entry
    /// point); this method only owns the ordering and short-circuit policy.
    pub fn drive_lifecycle<F>(&self, mut run_phase: F) -> Result<(), CoreError>
    where
        F: FnMut(LifecyclePhase) -> Result<(), CoreError>,
    {
        const PHASES: [LifecyclePhase; 5] = [
            LifecyclePhase::Bootstrap,
            LifecyclePhase::Discover,
            LifecyclePhase::Start,
            LifecyclePhase::Run,
            LifecyclePhase::Terminate,
        ];
        for phase in PHASES {
            run_phase(phase).map_err(|err| {
                tracing::warn!(phase = ?phase, error = %err, "lifecycle phase failed");
                err
            })?;
        }
        Ok(())
    }

    /// Shuts the runtime down: drains and stops the task manager, then the
    /// config publish queue. Called from `main` once every module's
    /// lifecycle has reached `Terminate`.
    pub fn shutdown(&self) {
        self.tasks.shutdown_and_wait();
        self.config_ctx.queue.stop();
    }
}

/// Converts a panic caught at a plugin callback boundary into a
/// [`CoreError`], the one place every callback call site (lifecycle entry
/// points, topic listeners, config watchers, task steps) funnels through so
/// the "cross-boundary exception" error-handling rule lives in one spot.
pub fn catch_callback_panic<F, T>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(result) => result,
        Err(_) => Err(CoreError::new(ErrorKind::Callback, "plugin callback panicked across the ABI boundary")),
    }
}
