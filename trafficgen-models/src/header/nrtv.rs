//! Frame and slice descriptor for the video streaming model.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::HeaderError;

/// Header in front of every video slice.
///
/// The first 12 bytes describe where the slice sits in the video; `slice_size`
/// follows and gives the number of payload bytes after the header. Frame and
/// slice numbers start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrtvHeader {
    pub frame_number: u32,
    pub num_frames: u32,
    pub slice_number: u16,
    pub num_slices: u16,
    pub slice_size: u32,
}

impl NrtvHeader {
    /// Serialized size in bytes.
    pub const LEN: usize = 16;

    /// Size of a whole slice on the wire, header included.
    pub fn wire_len(&self) -> usize {
        Self::LEN + self.slice_size as usize
    }

    pub fn is_last_slice_of_frame(&self) -> bool {
        self.slice_number.saturating_add(1) == self.num_slices
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::LEN);
        buf.put_u32(self.frame_number);
        buf.put_u32(self.num_frames);
        buf.put_u16(self.slice_number);
        buf.put_u16(self.num_slices);
        buf.put_u32(self.slice_size);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse and sanity-check a header from the front of `data`.
    pub fn decode(mut data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::LEN {
            return Err(HeaderError::Truncated {
                needed: Self::LEN,
                available: data.len(),
            });
        }
        let header = Self {
            frame_number: data.get_u32(),
            num_frames: data.get_u32(),
            slice_number: data.get_u16(),
            num_slices: data.get_u16(),
            slice_size: data.get_u32(),
        };
        if header.slice_number >= header.num_slices {
            return Err(HeaderError::SliceOutOfRange {
                slice_number: header.slice_number,
                num_slices: header.num_slices,
            });
        }
        if header.frame_number >= header.num_frames {
            return Err(HeaderError::FrameOutOfRange {
                frame_number: header.frame_number,
                num_frames: header.num_frames,
            });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> NrtvHeader {
        NrtvHeader {
            frame_number: 4,
            num_frames: 3000,
            slice_number: 7,
            num_slices: 8,
            slice_size: 120,
        }
    }

    #[test]
    fn test_wire_layout() {
        let bytes = header().to_bytes();
        assert_eq!(bytes.len(), NrtvHeader::LEN);
        assert_eq!(&bytes[..4], &[0, 0, 0, 4]);
        assert_eq!(&bytes[4..8], &3000u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &[0, 7, 0, 8]);
        assert_eq!(&bytes[12..], &[0, 0, 0, 120]);
        assert_eq!(NrtvHeader::decode(&bytes).unwrap(), header());
        assert_eq!(header().wire_len(), 136);
        assert!(header().is_last_slice_of_frame());
    }

    #[test]
    fn test_slice_out_of_range() {
        let bad = NrtvHeader {
            slice_number: 8,
            ..header()
        };
        assert_eq!(
            NrtvHeader::decode(&bad.to_bytes()),
            Err(HeaderError::SliceOutOfRange {
                slice_number: 8,
                num_slices: 8
            })
        );
    }

    #[test]
    fn test_frame_out_of_range() {
        let bad = NrtvHeader {
            frame_number: 3000,
            ..header()
        };
        assert!(matches!(
            NrtvHeader::decode(&bad.to_bytes()),
            Err(HeaderError::FrameOutOfRange { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = header().to_bytes();
        assert!(matches!(
            NrtvHeader::decode(&bytes[..12]),
            Err(HeaderError::Truncated { needed: 16, available: 12 })
        ));
    }
}
