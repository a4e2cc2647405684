//! Buffer-specific container operations: a resizable byte array.

use crate::error::{CoreError, ErrorKind};

use super::{Container, Payload};

/// Buffer-specific operations.
pub trait BufferOps {
    /// Copies at most `span` bytes starting at `offset` into a fresh
    /// `Vec<u8>`, returning it; the returned vector may be shorter than
    /// `span` if the buffer ends first.
    fn buf_get(&self, offset: usize, span: usize) -> Result<Vec<u8>, CoreError>;
    /// Writes `data` at `offset`, growing the buffer as needed.
    fn buf_put(&self, offset: usize, data: &[u8]) -> Result<(), CoreError>;
    /// Inserts `data` at `offset`, shifting the tail right.
    fn buf_insert(&self, offset: usize, data: &[u8]) -> Result<(), CoreError>;
    /// Truncates or zero-extends the buffer to exactly `len` bytes.
    fn buf_resize(&self, len: usize) -> Result<(), CoreError>;
}

fn not_a_buffer() -> CoreError {
    CoreError::new(ErrorKind::InvalidBuffer, "operation requires a buffer container")
}

impl BufferOps for Container {
    fn buf_get(&self, offset: usize, span: usize) -> Result<Vec<u8>, CoreError> {
        let Payload::Buffer(bytes) = &*self.inner_ref() else {
            return Err(not_a_buffer());
        };
        if offset > bytes.len() {
            return Ok(Vec::new());
        }
        let end = (offset + span).min(bytes.len());
        Ok(bytes[offset..end].to_vec())
    }

    fn buf_put(&self, offset: usize, data: &[u8]) -> Result<(), CoreError> {
        let mut payload = self.inner_mut();
        let Payload::Buffer(bytes) = &mut *payload else {
            return Err(not_a_buffer());
        };
        let end = offset + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn buf_insert(&self, offset: usize, data: &[u8]) -> Result<(), CoreError> {
        let mut payload = self.inner_mut();
        let Payload::Buffer(bytes) = &mut *payload else {
            return Err(not_a_buffer());
        };
        let offset = offset.min(bytes.len());
        bytes.splice(offset..offset, data.iter().copied());
        Ok(())
    }

    fn buf_resize(&self, len: usize) -> Result<(), CoreError> {
        let mut payload = self.inner_mut();
        let Payload::Buffer(bytes) = &mut *payload else {
            return Err(not_a_buffer());
        };
        bytes.resize(len, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_grows_buffer() {
        let buf = Container::new_buffer();
        buf.buf_put(4, &[1, 2, 3]).unwrap();
        assert_eq!(buf.size(), 7);
        assert_eq!(buf.buf_get(0, 7).unwrap(), vec![0, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn insert_shifts_tail() {
        let buf = Container::new_buffer();
        buf.buf_put(0, &[1, 2, 3]).unwrap();
        buf.buf_insert(1, &[9, 9]).unwrap();
        assert_eq!(buf.buf_get(0, 5).unwrap(), vec![1, 9, 9, 2, 3]);
    }

    #[test]
    fn resize_truncates_and_zero_extends() {
        let buf = Container::new_buffer();
        buf.buf_put(0, &[1, 2, 3, 4]).unwrap();
        buf.buf_resize(2).unwrap();
        assert_eq!(buf.buf_get(0, 2).unwrap(), vec![1, 2]);
        buf.buf_resize(4).unwrap();
        assert_eq!(buf.buf_get(0, 4).unwrap(), vec![1, 2, 0, 0]);
    }

    #[test]
    fn get_beyond_length_returns_partial() {
        let buf = Container::new_buffer();
        buf.buf_put(0, &[1, 2]).unwrap();
        assert_eq!(buf.buf_get(1, 10).unwrap(), vec![2]);
    }
}
