//! Client side object framing.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FramingError;
use crate::header::{ContentType, HttpHeader};

/// An object whose declared length has fully arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedObject {
    pub content_type: ContentType,
    /// Payload bytes, header excluded.
    pub size: u32,
    pub arrival_timestamp: i64,
    /// Bytes that followed the object in the same read and were discarded.
    pub trailing: usize,
}

/// Tracks how much of the current object has arrived.
///
/// The header itself may be split across reads; it is buffered until complete.
#[derive(Debug, Default)]
pub struct ObjectAccumulator {
    header_buf: BytesMut,
    current: Option<HttpHeader>,
    received: u32,
}

impl ObjectAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header of the object being received, once it has been read.
    pub fn current(&self) -> Option<&HttpHeader> {
        self.current.as_ref()
    }

    /// Payload bytes of the current object received so far.
    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn reset(&mut self) {
        self.header_buf.clear();
        self.current = None;
        self.received = 0;
    }

    /// Feed one read. Returns the object once its declared length is reached.
    ///
    /// On error the partial object is dropped and the accumulator starts over.
    pub fn push(&mut self, mut data: Bytes) -> Result<Option<ReceivedObject>, FramingError> {
        let header = match self.current {
            Some(header) => header,
            None => {
                let needed = HttpHeader::LEN - self.header_buf.len();
                let take = needed.min(data.len());
                self.header_buf.extend_from_slice(&data[..take]);
                data.advance(take);
                if self.header_buf.len() < HttpHeader::LEN {
                    return Ok(None);
                }
                let decoded = HttpHeader::decode(&self.header_buf);
                self.header_buf.clear();
                let header = match decoded {
                    Ok(header) => header,
                    Err(e) => {
                        self.reset();
                        return Err(e.into());
                    }
                };
                self.current = Some(header);
                self.received = 0;
                header
            }
        };

        let missing = (header.content_length - self.received) as usize;
        let take = missing.min(data.len());
        self.received += take as u32;
        if self.received < header.content_length {
            return Ok(None);
        }

        let object = ReceivedObject {
            content_type: header.content_type,
            size: header.content_length,
            arrival_timestamp: header.arrival_timestamp,
            trailing: data.len() - take,
        };
        self.current = None;
        self.received = 0;
        Ok(Some(object))
    }
}
