//! A single transaction-log entry: one config write, hash-chained to the
//! entry before it so an [`super::InMemoryAuditRecorder`] can verify the
//! chain on replay.

use sha2::{Digest, Sha256};

use crate::config::Timestamp;

/// Hash of the empty chain: the `prev_hash` of the first record ever
/// appended to a fresh [`super::TransactionLog`].
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One applied config write, in replay order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransactionRecord {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub path: Vec<String>,
    pub value: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

impl TransactionRecord {
    /// Builds the next record in the chain: `seq` and `prev_hash` are taken
    /// from the caller (the log tracks both), `hash` is computed here.
    pub fn new(seq: u64, timestamp: Timestamp, path: Vec<String>, value: serde_json::Value, prev_hash: String) -> Self {
        let hash = compute_hash(seq, timestamp, &path, &value, &prev_hash);
        Self { seq, timestamp_ms: timestamp.as_millis(), path, value, prev_hash, hash }
    }

    /// Recomputes this record's hash from its own fields and compares it
    /// against the stored one, detecting tampering or a corrupted log.
    pub fn is_self_consistent(&self) -> bool {
        let expected = compute_hash(
            self.seq,
            Timestamp::from_millis(self.timestamp_ms),
            &self.path,
            &self.value,
            &self.prev_hash,
        );
        expected == self.hash
    }
}

fn compute_hash(seq: u64, timestamp: Timestamp, path: &[String], value: &serde_json::Value, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(timestamp.as_millis().to_le_bytes());
    for segment in path {
        hasher.update(segment.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(value.to_string().as_bytes());
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}
