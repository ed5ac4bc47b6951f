//! Byte-stream transport used by the traffic models
//!
//! The models only see the [`StreamTransport`] trait: connect, listen, flow
//! controlled `send`, `recv` of whatever has arrived, and two flavours of close.
//! Everything asynchronous comes back as a [`SocketEvent`] delivered through the
//! [`SocketSink`] registered with the connection or listener.
//!
//! [`SimNetwork`] is the in-process implementation driven by the simulation
//! scheduler.

pub mod network_model;
pub mod sim_network;

pub use network_model::NetworkConfig;
pub use sim_network::{NetworkStats, SimNetwork, SimNetworkHandle, NETWORK_COMPONENT};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use trafficgen_core::{Key, Scheduler};

use crate::error::TransportError;

/// Identifier of one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifier of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Asynchronous notifications from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// An outgoing connection was established.
    Connected { conn: ConnId },
    /// An outgoing connection could not be established.
    ConnectFailed { conn: ConnId },
    /// A listener accepted a new connection.
    Accepted { listener: ListenerId, conn: ConnId },
    /// New bytes can be read with [`StreamTransport::recv`].
    DataAvailable { conn: ConnId },
    /// Send buffer space freed up after a short send.
    SendBufferAvailable { conn: ConnId, available: usize },
    /// The peer closed the connection after delivering all its data.
    NormalClose { conn: ConnId },
    /// The connection was reset.
    ErrorClose { conn: ConnId },
    /// The listener stopped accepting connections.
    ListenerClosed { listener: ListenerId },
}

impl SocketEvent {
    /// Connection the event refers to, if any.
    pub fn conn(&self) -> Option<ConnId> {
        match *self {
            SocketEvent::Connected { conn }
            | SocketEvent::ConnectFailed { conn }
            | SocketEvent::Accepted { conn, .. }
            | SocketEvent::DataAvailable { conn }
            | SocketEvent::SendBufferAvailable { conn, .. }
            | SocketEvent::NormalClose { conn }
            | SocketEvent::ErrorClose { conn } => Some(conn),
            SocketEvent::ListenerClosed { .. } => None,
        }
    }
}

/// Where socket events for a connection or listener are delivered.
#[derive(Clone)]
pub struct SocketSink(Arc<dyn Fn(&mut Scheduler, SocketEvent) + Send + Sync>);

impl SocketSink {
    /// Deliver events to a simulation component, right away in simulation time.
    pub fn component<E>(key: Key<E>) -> Self
    where
        E: From<SocketEvent> + fmt::Debug + 'static,
    {
        Self(Arc::new(move |scheduler: &mut Scheduler, event: SocketEvent| {
            scheduler.schedule_now(key, E::from(event));
        }))
    }

    /// Deliver events to an arbitrary callback.
    pub fn from_fn(f: impl Fn(&mut Scheduler, SocketEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn deliver(&self, scheduler: &mut Scheduler, event: SocketEvent) {
        (self.0)(scheduler, event)
    }
}

impl fmt::Debug for SocketSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SocketSink")
    }
}

/// Connection-oriented, flow-controlled byte stream.
pub trait StreamTransport {
    /// Start accepting connections on `address`.
    fn listen(
        &self,
        scheduler: &mut Scheduler,
        address: SocketAddr,
        sink: SocketSink,
    ) -> Result<ListenerId, TransportError>;

    /// Stop accepting connections. Established connections are unaffected.
    fn close_listener(&self, scheduler: &mut Scheduler, listener: ListenerId);

    /// Open a connection; the outcome arrives as `Connected` or `ConnectFailed`.
    fn connect(&self, scheduler: &mut Scheduler, address: SocketAddr, sink: SocketSink) -> ConnId;

    /// Queue bytes for transmission. Returns how many were accepted, which may be
    /// fewer than offered, or zero when the send buffer is full.
    fn send(&self, scheduler: &mut Scheduler, conn: ConnId, data: Bytes)
        -> Result<usize, TransportError>;

    /// Take everything received so far. Empty when nothing is buffered.
    fn recv(&self, conn: ConnId) -> Bytes;

    /// Free space in the send buffer.
    fn tx_available(&self, conn: ConnId) -> usize;

    /// Close after all queued data has been delivered.
    fn close(&self, scheduler: &mut Scheduler, conn: ConnId);

    /// Reset the connection, discarding undelivered data.
    fn abort(&self, scheduler: &mut Scheduler, conn: ConnId);
}
