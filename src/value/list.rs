//! List-specific container operations.

use crate::error::{CoreError, ErrorKind};
use crate::handle::HandleTable;

use super::{reject_cycle, Container, Payload, Value};

/// List-specific operations. `-1` means "append" for both `put` and
/// `insert`; any other negative index fails.
pub trait ListOps {
    fn list_get(&self, index: i64) -> Option<Value>;
    fn list_put(&self, table: &HandleTable, index: i64, value: Value) -> Result<(), CoreError>;
    fn list_insert(&self, table: &HandleTable, index: i64, value: Value) -> Result<(), CoreError>;
    fn list_len(&self) -> usize;
}

fn resolve_index(len: usize, index: i64, for_insert: bool) -> Result<usize, CoreError> {
    if index == -1 {
        return Ok(len);
    }
    if index < 0 {
        return Err(CoreError::new(
            ErrorKind::InvalidList,
            format!("negative index {index} is only valid as -1 (append)"),
        ));
    }
    let index = index as usize;
    let bound = if for_insert { len + 1 } else { len };
    if index >= bound {
        return Err(CoreError::new(
            ErrorKind::InvalidList,
            format!("index {index} out of bounds for list of length {len}"),
        ));
    }
    Ok(index)
}

impl ListOps for Container {
    fn list_get(&self, index: i64) -> Option<Value> {
        let Payload::List(entries) = &*self.inner_ref() else {
            return None;
        };
        let index = if index == -1 && !entries.is_empty() {
            entries.len() - 1
        } else if index >= 0 {
            index as usize
        } else {
            return None;
        };
        entries.get(index).cloned()
    }

    fn list_put(&self, table: &HandleTable, index: i64, value: Value) -> Result<(), CoreError> {
        let self_handle = self.self_handle().unwrap_or(crate::handle::Handle::NULL);
        if !self_handle.is_null() {
            reject_cycle(table, self_handle, &value)?;
        }
        let mut payload = self.inner_mut();
        let Payload::List(entries) = &mut *payload else {
            return Err(CoreError::new(ErrorKind::InvalidList, "put called on a non-list container"));
        };
        let idx = resolve_index(entries.len(), index, false)?;
        if idx == entries.len() {
            entries.push(value);
        } else {
            entries[idx] = value;
        }
        Ok(())
    }

    fn list_insert(&self, table: &HandleTable, index: i64, value: Value) -> Result<(), CoreError> {
        let self_handle = self.self_handle().unwrap_or(crate::handle::Handle::NULL);
        if !self_handle.is_null() {
            reject_cycle(table, self_handle, &value)?;
        }
        let mut payload = self.inner_mut();
        let Payload::List(entries) = &mut *payload else {
            return Err(CoreError::new(ErrorKind::InvalidList, "insert called on a non-list container"));
        };
        let idx = resolve_index(entries.len(), index, true)?;
        entries.insert(idx, value);
        Ok(())
    }

    fn list_len(&self) -> usize {
        match &*self.inner_ref() {
            Payload::List(entries) => entries.len(),
            _ => 0,
        }
    }
}
