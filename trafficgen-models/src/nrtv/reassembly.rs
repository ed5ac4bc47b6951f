//! Reassembly of video slices from transport fragments.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

use crate::error::ReassemblyError;
use crate::header::NrtvHeader;

/// Buffers fragments until a whole slice, header included, is available.
///
/// A slice may span any number of fragments and a fragment may hold the end of
/// one slice and the start of the next.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    fragments: VecDeque<Bytes>,
    buffered: usize,
    /// Wire length of the slice at the front, once its header is readable.
    expected: Option<usize>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held, header bytes included.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn expected_slice_size(&self) -> Option<usize> {
        self.expected
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.buffered = 0;
        self.expected = None;
    }

    /// Append a fragment.
    ///
    /// Fails when the header at the front of the buffer is invalid; the buffer is
    /// emptied since no slice boundary can be found after that.
    pub fn push(&mut self, fragment: Bytes) -> Result<(), ReassemblyError> {
        if fragment.is_empty() {
            return Ok(());
        }
        self.buffered += fragment.len();
        self.fragments.push_back(fragment);
        self.refresh_expected()
    }

    pub fn has_complete_slice(&self) -> bool {
        self.expected.is_some_and(|expected| self.buffered >= expected)
    }

    /// Remove the slice at the front and return it as one contiguous buffer.
    pub fn pop_slice(&mut self) -> Result<Bytes, ReassemblyError> {
        let expected = match self.expected {
            Some(expected) if self.buffered >= expected => expected,
            expected => {
                return Err(ReassemblyError::Incomplete {
                    buffered: self.buffered,
                    expected,
                })
            }
        };
        let slice = self.take_front(expected);
        self.buffered -= expected;
        self.expected = None;
        if let Err(e) = self.refresh_expected() {
            warn!(error = %e, "Invalid slice header, buffered data dropped");
        }
        Ok(slice)
    }

    fn take_front(&mut self, len: usize) -> Bytes {
        if let Some(front) = self.fragments.front_mut() {
            if front.len() >= len {
                let slice = front.split_to(len);
                if front.is_empty() {
                    self.fragments.pop_front();
                }
                return slice;
            }
        }
        let mut slice = BytesMut::with_capacity(len);
        while slice.len() < len {
            let Some(front) = self.fragments.front_mut() else {
                break;
            };
            let take = (len - slice.len()).min(front.len());
            slice.extend_from_slice(&front[..take]);
            front.advance(take);
            if front.is_empty() {
                self.fragments.pop_front();
            }
        }
        slice.freeze()
    }

    fn refresh_expected(&mut self) -> Result<(), ReassemblyError> {
        if self.expected.is_some() || self.buffered < NrtvHeader::LEN {
            return Ok(());
        }
        let mut header = [0u8; NrtvHeader::LEN];
        let mut filled = 0;
        for fragment in &self.fragments {
            let take = (NrtvHeader::LEN - filled).min(fragment.len());
            header[filled..filled + take].copy_from_slice(&fragment[..take]);
            filled += take;
            if filled == NrtvHeader::LEN {
                break;
            }
        }
        match NrtvHeader::decode(&header) {
            Ok(header) => {
                self.expected = Some(header.wire_len());
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e.into())
            }
        }
    }
}
