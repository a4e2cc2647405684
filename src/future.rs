//! Single-shot blocking futures and promises.
//!
//! Unlike the rest of the Rust ecosystem's `Future` trait, these are
//! blocking cells: a promise is fulfilled exactly once from a producer
//! thread, and any number of consumer threads may block on
//! [`Future::wait`] or register a [`Future::when_valid`] continuation that
//! runs either immediately (already-set future) or synchronously on the
//! fulfilling thread (still-unset future).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CoreError, ErrorKind};
use crate::value::Value;

#[derive(Clone)]
enum Outcome {
    Value(Value),
    Error(CoreError),
    Cancelled,
}

struct Shared {
    state: Mutex<Option<Outcome>>,
    ready: Condvar,
    callbacks: Mutex<Vec<Box<dyn FnOnce(&Result<Value, CoreError>) + Send>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            ready: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn complete(&self, outcome: Outcome) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(CoreError::new(
                ErrorKind::PromiseDoubleWrite,
                "promise already fulfilled",
            ));
        }
        *state = Some(outcome.clone());
        drop(state);
        self.ready.notify_all();

        let result = to_result(&outcome);
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for cb in callbacks {
            cb(&result);
        }
        Ok(())
    }
}

fn to_result(outcome: &Outcome) -> Result<Value, CoreError> {
    match outcome {
        Outcome::Value(v) => Ok(v.clone()),
        Outcome::Error(e) => Err(e.clone()),
        Outcome::Cancelled => Err(CoreError::new(ErrorKind::PromiseCancelled, "promise was cancelled")),
    }
}

/// Consumer-side handle to a single-shot result.
#[derive(Clone)]
pub struct Future {
    shared: Arc<Shared>,
}

impl Future {
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().is_some()
    }

    /// Returns the stored value, the stored error, or
    /// `ErrorKind::PromiseNotFulfilled` if called before completion.
    pub fn get_value(&self) -> Result<Value, CoreError> {
        match &*self.shared.state.lock() {
            Some(outcome) => to_result(outcome),
            None => Err(CoreError::new(
                ErrorKind::PromiseNotFulfilled,
                "future has not completed yet",
            )),
        }
    }

    /// Blocks until completion or `timeout` elapses. `None` means wait
    /// forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.shared.state.lock();
        if state.is_some() {
            return true;
        }
        match timeout {
            None => {
                while state.is_none() {
                    self.shared.ready.wait(&mut state);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if state.is_some() {
                        return true;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return state.is_some();
                    }
                    let result = self.shared.ready.wait_for(&mut state, remaining);
                    if state.is_some() {
                        return true;
                    }
                    if result.timed_out() {
                        return false;
                    }
                }
            }
        }
    }

    /// Registers a continuation. If already set, runs `cb` immediately on
    /// the calling thread before returning; otherwise `cb` runs once, on
    /// the thread that eventually fulfils the promise. Called exactly
    /// once per registration.
    pub fn when_valid<F>(&self, cb: F)
    where
        F: FnOnce(&Result<Value, CoreError>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = state.as_ref() {
            let result = to_result(outcome);
            drop(state);
            cb(&result);
            return;
        }
        self.shared.callbacks.lock().push(Box::new(cb));
    }

    /// Creates a new promise/future pair and a continuation that invokes
    /// `f(new_promise, self_result)` once this future completes. `f` is
    /// responsible for fulfilling `new_promise`; if `f` panics, the new
    /// promise is left unfulfilled and the panic is logged (it cannot be
    /// re-raised across the thread that eventually fulfils `self`).
    pub fn and_then<F>(&self, f: F) -> Future
    where
        F: FnOnce(&Promise, &Result<Value, CoreError>) + Send + 'static,
    {
        let next = Promise::create();
        let next_future = next.future();
        self.when_valid(move |result| {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&next, result))).is_err()
            {
                tracing::warn!("and_then continuation panicked; next promise left unfulfilled");
            }
        });
        next_future
    }
}

/// Producer-side handle. Exactly one of [`Promise::set_value`],
/// [`Promise::set_error`], [`Promise::cancel`] may succeed.
pub struct Promise {
    shared: Arc<Shared>,
}

impl Promise {
    pub fn create() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn future(&self) -> Future {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_value(&self, value: Value) -> Result<(), CoreError> {
        self.shared.complete(Outcome::Value(value))
    }

    pub fn set_error(&self, error: CoreError) -> Result<(), CoreError> {
        self.shared.complete(Outcome::Error(error))
    }

    pub fn cancel(&self) -> Result<(), CoreError> {
        self.shared.complete(Outcome::Cancelled)
    }
}

/// A collection of futures returned by broadcasting a call to every
/// listener on a topic (see [`crate::pubsub::PubSub::call_topic_all`]).
pub struct FutureSet {
    futures: Vec<Future>,
}

impl FutureSet {
    pub fn new(futures: Vec<Future>) -> Self {
        Self { futures }
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Future> {
        self.futures.iter()
    }

    /// Blocks until every future in the set has completed or `timeout`
    /// elapses for all of them combined.
    pub fn wait_all(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        for f in &self.futures {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if !f.wait(remaining) {
                return false;
            }
        }
        true
    }
}
