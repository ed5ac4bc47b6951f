//! Error types for the traffic models

use thiserror::Error;
use trafficgen_core::{DistributionError, SimError, ValidationError};

use crate::header::http::ContentType;
use crate::transport::{ConnId, ListenerId};

/// Failures reported by a [`crate::transport::StreamTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection {0} is not established")]
    NotConnected(ConnId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),

    #[error("unknown listener {0}")]
    UnknownListener(ListenerId),

    #[error("address {0} is already in use")]
    AddressInUse(std::net::SocketAddr),
}

/// Malformed entity headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("header needs {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown content type {0}")]
    UnknownContentType(u16),

    #[error("slice {slice_number} out of range for {num_slices} slices per frame")]
    SliceOutOfRange { slice_number: u16, num_slices: u16 },

    #[error("frame {frame_number} out of range for a video of {num_frames} frames")]
    FrameOutOfRange { frame_number: u32, num_frames: u32 },
}

/// Misuse of the server's per-connection transmission buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxBufferError {
    #[error("{remaining} bytes of a {content_type} object are still waiting to be sent")]
    ObjectPending {
        content_type: ContentType,
        remaining: usize,
    },

    #[error("cannot transmit an object of type {0}")]
    InvalidContentType(ContentType),
}

/// Failures of the NRTV client's reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("no complete slice buffered ({buffered} bytes, expecting {expected:?})")]
    Incomplete {
        buffered: usize,
        expected: Option<usize>,
    },

    #[error("invalid slice header: {0}")]
    InvalidHeader(#[from] HeaderError),
}

/// Received data that does not fit the expected object framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid entity header: {0}")]
    Header(#[from] HeaderError),

    #[error("expected a {expected} object, received {actual}")]
    UnexpectedContentType {
        expected: ContentType,
        actual: ContentType,
    },
}

/// Umbrella error for building and running the traffic models.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Simulation(#[from] SimError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    TxBuffer(#[from] TxBufferError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

impl From<ValidationError> for ModelError {
    fn from(err: ValidationError) -> Self {
        ModelError::Simulation(SimError::Configuration(err))
    }
}

impl From<DistributionError> for ModelError {
    fn from(err: DistributionError) -> Self {
        ModelError::Simulation(SimError::Distribution(err))
    }
}
