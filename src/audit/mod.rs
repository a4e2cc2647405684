//! Hash-chained transaction log of config writes, for startup replay and
//! tamper detection: an ordered `(timestamp, path, value)` record stream,
//! last write per path winning on replay.

mod in_memory;
mod log;
mod record;
mod recorder;

pub use in_memory::InMemoryAuditRecorder;
pub use log::{replay, TransactionLog};
pub use record::{TransactionRecord, GENESIS_HASH};
pub use recorder::{AuditError, AuditRecorder};
