//! Crate-wide error type.
//!
//! Every operation that can fail inside the plugin runtime reports a
//! [`CoreError`]: a stable [`ErrorKind`] plus a human message and an optional
//! boxed cause. At the ABI boundary this collapses to a `(kind, message)`
//! pair (see [`crate::abi`]); internally `CoreError` is the first-class
//! error type propagated with `?`.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Stable, cross-boundary error classification.
///
/// Each variant maps to a dot-separated code via [`ErrorKind::code`] so a
/// host outside this process can key off a string even though the enum
/// itself is Rust-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    NullHandle,
    InvalidHandle,
    InvalidSymbol,
    InvalidContainer,
    InvalidList,
    InvalidStruct,
    InvalidBuffer,
    InvalidFuture,
    InvalidPromise,
    PromiseNotFulfilled,
    PromiseDoubleWrite,
    PromiseCancelled,
    Callback,
    Cycle,
    JsonParse,
    UnhandledLifecycleEvent,
    InvalidArgument,
    TaskCancelled,
    TaskPanicked,
    ExecutorTerminated,
    ConfigValidationRejected,
    AuditChainBroken,
}

impl ErrorKind {
    /// Stable `<domain>.<reason>` code, suitable for logs or FFI callers.
    pub const fn code(self) -> &'static str {
        use ErrorKind::*;
        match self {
            NullHandle => "handle.null",
            InvalidHandle => "handle.invalid",
            InvalidSymbol => "symbol.invalid",
            InvalidContainer => "container.invalid",
            InvalidList => "container.invalid_list",
            InvalidStruct => "container.invalid_struct",
            InvalidBuffer => "container.invalid_buffer",
            InvalidFuture => "future.invalid",
            InvalidPromise => "promise.invalid",
            PromiseNotFulfilled => "promise.not_fulfilled",
            PromiseDoubleWrite => "promise.double_write",
            PromiseCancelled => "promise.cancelled",
            Callback => "callback.failed",
            Cycle => "container.cycle",
            JsonParse => "json.parse",
            UnhandledLifecycleEvent => "lifecycle.unhandled_event",
            InvalidArgument => "argument.invalid",
            TaskCancelled => "task.cancelled",
            TaskPanicked => "task.panicked",
            ExecutorTerminated => "task.executor_terminated",
            ConfigValidationRejected => "config.validation_rejected",
            AuditChainBroken => "audit.chain_broken",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The crate's unified error type.
#[derive(Debug, Clone)]
pub struct CoreError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    cause: Option<std::sync::Arc<dyn StdError + Send + Sync + 'static>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(std::sync::Arc::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

macro_rules! bail {
    ($kind:expr, $($arg:tt)*) => {
        return Err($crate::error::CoreError::new($kind, format!($($arg)*)))
    };
}
pub(crate) use bail;

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CoreError>> = std::cell::RefCell::new(None);
}

/// Clears the thread-local last-error slot.
///
/// Called on entry to the core from a plugin callback so a stale error from
/// a previous call cannot be mistaken for a fresh one.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Records `err` as the thread-local last error and returns it unchanged,
/// so it can be chained with `?` at the point an error escapes to a plugin.
pub fn set_last_error(err: CoreError) -> CoreError {
    tracing::debug!(kind = err.kind().code(), message = %err.message(), "core error escaping to plugin boundary");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.clone()));
    err
}

/// Returns a clone of the last error recorded on this thread, if any.
pub fn last_error() -> Option<CoreError> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_round_trips_per_thread() {
        clear_last_error();
        assert!(last_error().is_none());
        set_last_error(CoreError::new(ErrorKind::InvalidHandle, "bad handle"));
        let err = last_error().expect("error recorded");
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        clear_last_error();
        assert!(last_error().is_none());
    }

    #[test]
    fn display_includes_stable_code() {
        let err = CoreError::new(ErrorKind::Cycle, "would create a cycle");
        assert_eq!(err.to_string(), "container.cycle: would create a cycle");
    }
}
