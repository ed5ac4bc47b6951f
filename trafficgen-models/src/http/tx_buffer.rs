//! Server side per-connection transmission buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TxBufferError;
use crate::header::{ContentType, HttpHeader};

/// Object currently being pushed onto one connection.
///
/// Holds the object's type and how many payload bytes have not been framed into
/// chunks yet, plus any framed bytes the transport refused. Only one object can
/// be in the buffer at a time.
#[derive(Debug, Clone)]
pub struct TransmissionBuffer {
    content_type: ContentType,
    size: u32,
    remaining: u32,
    has_partially_sent: bool,
    unsent: Bytes,
}

impl Default for TransmissionBuffer {
    fn default() -> Self {
        Self {
            content_type: ContentType::NotSet,
            size: 0,
            remaining: 0,
            has_partially_sent: false,
            unsent: Bytes::new(),
        }
    }
}

impl TransmissionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no object is loaded.
    pub fn is_empty(&self) -> bool {
        self.content_type == ContentType::NotSet
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Bytes not yet accepted by the transport: refused chunk bytes plus payload
    /// that has not been framed.
    pub fn remaining(&self) -> usize {
        self.remaining as usize + self.unsent.len()
    }

    pub fn has_partially_sent(&self) -> bool {
        self.has_partially_sent
    }

    /// Start a new object of `size` payload bytes.
    pub fn write_new_object(&mut self, content_type: ContentType, size: u32) -> Result<(), TxBufferError> {
        if !self.is_empty() {
            return Err(TxBufferError::ObjectPending {
                content_type: self.content_type,
                remaining: self.remaining(),
            });
        }
        if content_type == ContentType::NotSet {
            return Err(TxBufferError::InvalidContentType(content_type));
        }
        self.content_type = content_type;
        self.size = size;
        self.remaining = size;
        self.has_partially_sent = false;
        Ok(())
    }

    /// Next chunk to send, at most `mtu` bytes.
    ///
    /// Refused bytes come first. The first chunk of an object starts with a header
    /// declaring everything still to come, stamped with `now_nanos`.
    pub fn next_chunk(&mut self, mtu: usize, now_nanos: i64) -> Option<Bytes> {
        if !self.unsent.is_empty() {
            return Some(std::mem::take(&mut self.unsent));
        }
        if self.is_empty() || (self.remaining == 0 && self.has_partially_sent) {
            return None;
        }
        let mut chunk = BytesMut::with_capacity(mtu);
        let room = if self.has_partially_sent {
            mtu
        } else {
            HttpHeader::new(self.content_type, self.remaining, now_nanos).encode(&mut chunk);
            self.has_partially_sent = true;
            mtu.saturating_sub(HttpHeader::LEN).max(1)
        };
        let payload = room.min(self.remaining as usize);
        chunk.put_bytes(0, payload);
        self.remaining -= payload as u32;
        Some(chunk.freeze())
    }

    /// Put back the part of a chunk the transport did not accept.
    pub fn requeue(&mut self, unsent: Bytes) {
        debug_assert!(self.unsent.is_empty(), "requeue over pending bytes");
        self.unsent = unsent;
    }

    /// If the object has been fully handed over, clear the buffer and return what
    /// it was.
    pub fn take_completed(&mut self) -> Option<(ContentType, u32)> {
        let handed_over = self.has_partially_sent && self.remaining == 0 && self.unsent.is_empty();
        if !self.is_empty() && handed_over {
            self.has_partially_sent = false;
            let done = (self.content_type, self.size);
            self.content_type = ContentType::NotSet;
            self.size = 0;
            Some(done)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_carry_one_header_with_remaining_length() {
        let mut buf = TransmissionBuffer::new();
        buf.write_new_object(ContentType::MainObject, 3000).unwrap();

        let first = buf.next_chunk(1460, 42).unwrap();
        assert_eq!(first.len(), 1460);
        let header = HttpHeader::decode(&first).unwrap();
        assert_eq!(header.content_length, 3000);
        assert_eq!(header.arrival_timestamp, 42);
        assert!(buf.has_partially_sent());

        let second = buf.next_chunk(1460, 43).unwrap();
        assert_eq!(second.len(), 1460);
        let third = buf.next_chunk(1460, 44).unwrap();
        assert_eq!(third.len(), 3000 - (1460 - 14) - 1460);
        assert!(buf.next_chunk(1460, 45).is_none());
        assert_eq!(buf.take_completed(), Some((ContentType::MainObject, 3000)));
        assert!(!buf.has_partially_sent());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_object_still_sends_header() {
        let mut buf = TransmissionBuffer::new();
        buf.write_new_object(ContentType::EmbeddedObject, 0).unwrap();
        assert_eq!(buf.next_chunk(536, 0).unwrap().len(), HttpHeader::LEN);
        assert!(buf.next_chunk(536, 0).is_none());
        assert_eq!(buf.take_completed(), Some((ContentType::EmbeddedObject, 0)));
    }

    #[test]
    fn test_write_new_object_while_pending_fails() {
        let mut buf = TransmissionBuffer::new();
        buf.write_new_object(ContentType::MainObject, 100).unwrap();
        assert_eq!(
            buf.write_new_object(ContentType::EmbeddedObject, 10),
            Err(TxBufferError::ObjectPending {
                content_type: ContentType::MainObject,
                remaining: 100
            })
        );

        // still pending while refused bytes wait
        let chunk = buf.next_chunk(1460, 0).unwrap();
        buf.requeue(chunk.slice(50..));
        assert!(buf.write_new_object(ContentType::EmbeddedObject, 10).is_err());
        assert_eq!(buf.take_completed(), None);

        assert_eq!(buf.next_chunk(1460, 0).unwrap().len(), 114 - 50);
        assert!(buf.take_completed().is_some());
        assert!(buf.write_new_object(ContentType::EmbeddedObject, 10).is_ok());
    }

    #[test]
    fn test_not_set_rejected() {
        let mut buf = TransmissionBuffer::new();
        assert_eq!(
            buf.write_new_object(ContentType::NotSet, 10),
            Err(TxBufferError::InvalidContentType(ContentType::NotSet))
        );
    }
}
