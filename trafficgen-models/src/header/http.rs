//! Content descriptor for the web browsing model.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::HeaderError;

/// Kind of object a request asks for or a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    NotSet,
    MainObject,
    EmbeddedObject,
}

impl ContentType {
    pub fn to_wire(self) -> u16 {
        match self {
            ContentType::NotSet => 0,
            ContentType::MainObject => 1,
            ContentType::EmbeddedObject => 2,
        }
    }

    pub fn from_wire(value: u16) -> Result<Self, HeaderError> {
        match value {
            0 => Ok(ContentType::NotSet),
            1 => Ok(ContentType::MainObject),
            2 => Ok(ContentType::EmbeddedObject),
            other => Err(HeaderError::UnknownContentType(other)),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContentType::NotSet => "not-set",
            ContentType::MainObject => "main",
            ContentType::EmbeddedObject => "embedded",
        };
        f.write_str(label)
    }
}

/// Header in front of the first byte of every request and every object.
///
/// `content_length` is the number of object bytes that follow the header. When
/// an object is split into several chunks only the first carries a header, and
/// its length is the whole remaining object. Requests carry a length of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpHeader {
    pub content_type: ContentType,
    pub content_length: u32,
    /// Simulation time in nanoseconds when the server started sending the object.
    pub arrival_timestamp: i64,
}

impl HttpHeader {
    /// Serialized size in bytes.
    pub const LEN: usize = 14;

    pub fn new(content_type: ContentType, content_length: u32, arrival_timestamp: i64) -> Self {
        Self {
            content_type,
            content_length,
            arrival_timestamp,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::LEN);
        buf.put_u16(self.content_type.to_wire());
        buf.put_u32(self.content_length);
        buf.put_i64(self.arrival_timestamp);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse a header from the front of `data`. Trailing bytes are ignored.
    pub fn decode(mut data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::LEN {
            return Err(HeaderError::Truncated {
                needed: Self::LEN,
                available: data.len(),
            });
        }
        let content_type = ContentType::from_wire(data.get_u16())?;
        let content_length = data.get_u32();
        let arrival_timestamp = data.get_i64();
        Ok(Self {
            content_type,
            content_length,
            arrival_timestamp,
        })
    }
}
