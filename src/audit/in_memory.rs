//! Reference recorder: keeps every record in memory and verifies the hash
//! chain on every append. Used by tests and by [`super::TransactionLog`]
//! when no durable sink has been configured.

use parking_lot::Mutex;

use super::record::TransactionRecord;
use super::recorder::{AuditError, AuditRecorder};

#[derive(Default)]
pub struct InMemoryAuditRecorder {
    entries: Mutex<Vec<TransactionRecord>>,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TransactionRecord> {
        self.entries.lock().clone()
    }
}

impl AuditRecorder for InMemoryAuditRecorder {
    fn record(&self, entry: TransactionRecord) -> Result<(), AuditError> {
        if !entry.is_self_consistent() {
            return Err(AuditError::new("transaction record hash does not match its own contents"));
        }
        let mut entries = self.entries.lock();
        if let Some(last) = entries.last() {
            if last.hash != entry.prev_hash {
                return Err(AuditError::new("transaction record does not chain from the last recorded entry"));
            }
        }
        entries.push(entry);
        Ok(())
    }
}
