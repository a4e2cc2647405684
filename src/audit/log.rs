//! Append-only transaction log of config writes, and replay of that log
//! back into a config tree at startup: an ordered `(timestamp, path,
//! value)` record stream, each record hash-chained to the one before it,
//! with last-writer-wins falling out of replaying in path order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ConfigCtx, Timestamp, Topics};
use crate::error::CoreError;
use crate::symbol::Symbol;
use crate::value::Value;

use super::in_memory::InMemoryAuditRecorder;
use super::record::{TransactionRecord, GENESIS_HASH};
use super::recorder::AuditRecorder;

/// Appends [`TransactionRecord`]s to a pluggable sink, tracking the running
/// sequence number and last hash so each append chains correctly.
pub struct TransactionLog {
    sink: Arc<dyn AuditRecorder>,
    next_seq: AtomicU64,
    last_hash: parking_lot::Mutex<String>,
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryAuditRecorder::new()))
    }
}

impl TransactionLog {
    pub fn new(sink: Arc<dyn AuditRecorder>) -> Self {
        Self {
            sink,
            next_seq: AtomicU64::new(1),
            last_hash: parking_lot::Mutex::new(GENESIS_HASH.to_string()),
        }
    }

    /// Appends one record covering a write to `path` at `timestamp`.
    pub fn append(&self, path: &[&str], value: serde_json::Value, timestamp: Timestamp) -> Result<(), CoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut last_hash = self.last_hash.lock();
        let record = TransactionRecord::new(
            seq,
            timestamp,
            path.iter().map(|s| s.to_string()).collect(),
            value,
            last_hash.clone(),
        );
        *last_hash = record.hash.clone();
        self.sink.record(record).map_err(Into::into)
    }

    pub fn flush(&self) -> Result<(), CoreError> {
        self.sink.flush().map_err(Into::into)
    }
}

/// Replays `records`, in order, into the config tree rooted at `root`.
/// Last-writer-wins falls naturally out of replaying in order and letting
/// [`crate::config::Topic::with_newer_value`] apply its own timestamp rule,
/// so an out-of-order log still converges to the same state a live system
/// would have reached.
pub fn replay(ctx: &ConfigCtx, root: &Topics, records: &[TransactionRecord]) -> Result<(), CoreError> {
    for record in records {
        if !record.is_self_consistent() {
            return Err(CoreError::new(
                crate::error::ErrorKind::AuditChainBroken,
                format!("transaction record {} failed self-consistency check on replay", record.seq),
            ));
        }
        let path: Vec<&str> = record.path.iter().map(String::as_str).collect();
        let topic = root.lookup(ctx, &path)?;
        let value = json_to_scalar(&record.value, &ctx.symbols);
        topic.with_newer_value(ctx, Timestamp::from_millis(record.timestamp_ms), value, true, true)?;
    }
    Ok(())
}

fn json_to_scalar(json: &serde_json::Value, symbols: &crate::symbol::SymbolTable) -> Value {
    match json {
        serde_json::Value::Null => Value::Str(String::new()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        other => {
            let _: Symbol = Symbol::NONE;
            let _ = symbols;
            Value::Str(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_root() -> (ConfigCtx, Topics) {
        let ctx = ConfigCtx::default();
        let root = Topics::new_root(&ctx).unwrap();
        (ctx, root)
    }

    #[test]
    fn appended_entries_replay_to_the_same_values() {
        let sink = Arc::new(InMemoryAuditRecorder::new());
        let log = TransactionLog::new(Arc::clone(&sink) as Arc<dyn AuditRecorder>);
        log.append(&["net", "port"], serde_json::json!(1883), Timestamp::from_millis(1)).unwrap();
        log.append(&["net", "host"], serde_json::json!("edge01"), Timestamp::from_millis(2)).unwrap();

        let (ctx, root) = ctx_with_root();
        replay(&ctx, &root, &sink.entries()).unwrap();
        let port = root.find(&ctx, &["net", "port"]).unwrap();
        assert_eq!(port.value(), Value::Int(1883));
        let host = root.find(&ctx, &["net", "host"]).unwrap();
        assert_eq!(host.value(), Value::Str("edge01".into()));
        ctx.queue.stop();
    }

    #[test]
    fn replay_rejects_a_tampered_record() {
        let sink = Arc::new(InMemoryAuditRecorder::new());
        let log = TransactionLog::new(Arc::clone(&sink) as Arc<dyn AuditRecorder>);
        log.append(&["flag"], serde_json::json!(true), Timestamp::from_millis(1)).unwrap();
        let mut tampered = sink.entries();
        tampered[0].value = serde_json::json!(false);

        let (ctx, root) = ctx_with_root();
        assert!(replay(&ctx, &root, &tampered).is_err());
        ctx.queue.stop();
    }
}
