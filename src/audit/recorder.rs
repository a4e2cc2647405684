//! The pluggable write sink for [`super::TransactionRecord`]s: callers only
//! care that a record was durably written, not where — a file, a message
//! queue, or (for tests) memory.

use std::borrow::Cow;

use super::record::TransactionRecord;

pub trait AuditRecorder: Send + Sync {
    fn record(&self, entry: TransactionRecord) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditError {
    message: Cow<'static, str>,
}

impl AuditError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AuditError {}

impl From<AuditError> for crate::error::CoreError {
    fn from(err: AuditError) -> Self {
        crate::error::CoreError::new(crate::error::ErrorKind::AuditChainBroken, err.message)
    }
}
