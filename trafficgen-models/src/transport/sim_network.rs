//! In-process stream transport driven by the simulation scheduler
//!
//! [`SimNetwork`] is a component that owns the delivery events; applications talk
//! to it through a cloneable [`SimNetworkHandle`] that implements
//! [`StreamTransport`]. Both share the connection table.
//!
//! Timing: a connection attempt reaches the listener after one latency and the
//! client learns the outcome after two. Data is cut into segments that arrive in
//! order after the link delay. Send buffer space is released when a segment is
//! delivered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};
use trafficgen_core::{
    Component, Key, Scheduler, SimTime, Simulation, SimulationMetrics, Validate, ValidationError,
};

use super::network_model::{Link, NetworkConfig};
use super::{ConnId, ListenerId, SocketEvent, SocketSink, StreamTransport};
use crate::error::TransportError;

/// Internal delivery events of the simulated network.
#[derive(Debug)]
pub enum NetworkEvent {
    Accept { listener: ListenerId, conn: ConnId },
    Establish { conn: ConnId },
    Segment { from: ConnId, to: ConnId, data: Bytes },
    Fin { to: ConnId },
    Reset { to: ConnId },
}

/// Counters over the lifetime of the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub connections_opened: u64,
    pub connections_refused: u64,
    pub segments_delivered: u64,
    pub bytes_delivered: u64,
    /// Bytes that arrived at a connection that no longer existed.
    pub bytes_dropped: u64,
}

/// Component label of the network's metrics.
pub const NETWORK_COMPONENT: &str = "network";

impl NetworkStats {
    fn from_metrics(metrics: &SimulationMetrics) -> Self {
        Self {
            connections_opened: metrics.counter("connections_opened", NETWORK_COMPONENT),
            connections_refused: metrics.counter("connections_refused", NETWORK_COMPONENT),
            segments_delivered: metrics.counter("segments_delivered", NETWORK_COMPONENT),
            bytes_delivered: metrics.counter("bytes_delivered", NETWORK_COMPONENT),
            bytes_dropped: metrics.counter("bytes_dropped", NETWORK_COMPONENT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Established,
}

#[derive(Debug)]
struct Connection {
    peer: Option<ConnId>,
    sink: SocketSink,
    state: ConnState,
    rx: BytesMut,
    in_flight: usize,
    blocked: bool,
    link: Link,
}

impl Connection {
    fn new(peer: Option<ConnId>, sink: SocketSink) -> Self {
        Self {
            peer,
            sink,
            state: ConnState::Connecting,
            rx: BytesMut::new(),
            in_flight: 0,
            blocked: false,
            link: Link::default(),
        }
    }
}

#[derive(Debug)]
struct Listener {
    address: SocketAddr,
    sink: SocketSink,
}

#[derive(Debug)]
struct NetworkState {
    config: NetworkConfig,
    listeners: HashMap<ListenerId, Listener>,
    by_address: HashMap<SocketAddr, ListenerId>,
    connections: HashMap<ConnId, Connection>,
    next_conn: u64,
    next_listener: u64,
    metrics: SimulationMetrics,
}

impl NetworkState {
    fn allocate_conn(&mut self) -> ConnId {
        self.next_conn += 1;
        ConnId(self.next_conn)
    }

    fn tx_available(&self, conn: ConnId) -> usize {
        self.connections
            .get(&conn)
            .map_or(0, |c| self.config.tx_buffer_size.saturating_sub(c.in_flight))
    }
}

type SharedState = Arc<Mutex<NetworkState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, NetworkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Component delivering the network's in-flight events.
pub struct SimNetwork {
    state: SharedState,
}

impl SimNetwork {
    /// Register a network with the simulation and return the handle applications use.
    pub fn install(
        sim: &mut Simulation,
        config: NetworkConfig,
    ) -> Result<SimNetworkHandle, ValidationError> {
        config.validate()?;
        let state = Arc::new(Mutex::new(NetworkState {
            config,
            listeners: HashMap::new(),
            by_address: HashMap::new(),
            connections: HashMap::new(),
            next_conn: 0,
            next_listener: 0,
            metrics: SimulationMetrics::new(),
        }));
        let key = sim.add_component(SimNetwork {
            state: Arc::clone(&state),
        });
        Ok(SimNetworkHandle { state, key })
    }

    fn accept(state: &mut NetworkState, scheduler: &mut Scheduler, listener: ListenerId, conn: ConnId) {
        let Some(sink) = state.listeners.get(&listener).map(|l| l.sink.clone()) else {
            // listener went away while the handshake was in flight
            if let Some(server_side) = state.connections.remove(&conn) {
                if let Some(client) = server_side.peer.and_then(|p| state.connections.get_mut(&p)) {
                    client.peer = None;
                }
            }
            return;
        };
        if let Some(c) = state.connections.get_mut(&conn) {
            c.state = ConnState::Established;
            debug!(%listener, %conn, "Connection accepted");
            sink.deliver(scheduler, SocketEvent::Accepted { listener, conn });
        }
    }

    fn establish(state: &mut NetworkState, scheduler: &mut Scheduler, conn: ConnId) {
        let peer_alive = match state.connections.get(&conn) {
            Some(c) => c.peer.is_some_and(|p| state.connections.contains_key(&p)),
            None => return,
        };
        if peer_alive {
            if let Some(c) = state.connections.get_mut(&conn) {
                c.state = ConnState::Established;
                state.metrics.increment_counter("connections_opened", NETWORK_COMPONENT);
                debug!(%conn, "Connection established");
                c.sink.deliver(scheduler, SocketEvent::Connected { conn });
            }
        } else if let Some(c) = state.connections.remove(&conn) {
            state.metrics.increment_counter("connections_refused", NETWORK_COMPONENT);
            debug!(%conn, "Connection refused");
            c.sink.deliver(scheduler, SocketEvent::ConnectFailed { conn });
        }
    }

    fn segment(state: &mut NetworkState, scheduler: &mut Scheduler, from: ConnId, to: ConnId, data: &Bytes) {
        let len = data.len();
        match state.connections.get_mut(&to) {
            Some(receiver) if receiver.state == ConnState::Established => {
                receiver.rx.extend_from_slice(data);
                state.metrics.increment_counter("segments_delivered", NETWORK_COMPONENT);
                state.metrics.increment_counter_by("bytes_delivered", NETWORK_COMPONENT, len as u64);
                trace!(%from, %to, bytes = len, "Segment delivered");
                receiver.sink.deliver(scheduler, SocketEvent::DataAvailable { conn: to });
            }
            _ => {
                state.metrics.increment_counter_by("bytes_dropped", NETWORK_COMPONENT, len as u64);
                trace!(%from, %to, bytes = len, "Segment dropped");
            }
        }

        let capacity = state.config.tx_buffer_size;
        if let Some(sender) = state.connections.get_mut(&from) {
            sender.in_flight = sender.in_flight.saturating_sub(len);
            if sender.blocked {
                sender.blocked = false;
                let available = capacity.saturating_sub(sender.in_flight);
                sender
                    .sink
                    .deliver(scheduler, SocketEvent::SendBufferAvailable { conn: from, available });
            }
        }
    }

    fn teardown(state: &mut NetworkState, scheduler: &mut Scheduler, to: ConnId, error: bool) {
        if let Some(c) = state.connections.remove(&to) {
            debug!(conn = %to, error, "Connection closed by peer");
            let event = if error {
                SocketEvent::ErrorClose { conn: to }
            } else {
                SocketEvent::NormalClose { conn: to }
            };
            c.sink.deliver(scheduler, event);
        }
    }
}

impl Component for SimNetwork {
    type Event = NetworkEvent;

    fn process_event(
        &mut self,
        _self_id: Key<Self::Event>,
        event: &Self::Event,
        scheduler: &mut Scheduler,
    ) {
        let mut state = lock(&self.state);
        match event {
            NetworkEvent::Accept { listener, conn } => {
                Self::accept(&mut state, scheduler, *listener, *conn)
            }
            NetworkEvent::Establish { conn } => Self::establish(&mut state, scheduler, *conn),
            NetworkEvent::Segment { from, to, data } => {
                Self::segment(&mut state, scheduler, *from, *to, data)
            }
            NetworkEvent::Fin { to } => Self::teardown(&mut state, scheduler, *to, false),
            NetworkEvent::Reset { to } => Self::teardown(&mut state, scheduler, *to, true),
        }
    }
}

/// Application-side access to a [`SimNetwork`].
#[derive(Clone)]
pub struct SimNetworkHandle {
    state: SharedState,
    key: Key<NetworkEvent>,
}

impl SimNetworkHandle {
    pub fn stats(&self) -> NetworkStats {
        NetworkStats::from_metrics(&lock(&self.state).metrics)
    }

    /// Snapshot of the network's metrics store.
    pub fn metrics(&self) -> SimulationMetrics {
        lock(&self.state).metrics.clone()
    }

    pub fn config(&self) -> NetworkConfig {
        lock(&self.state).config.clone()
    }

    /// Number of connections currently open or opening.
    pub fn open_connections(&self) -> usize {
        lock(&self.state).connections.len()
    }

    fn schedule_at(&self, scheduler: &mut Scheduler, at: SimTime, event: NetworkEvent) {
        let delay = at.duration_since(scheduler.time());
        scheduler.schedule(SimTime::from_duration(delay), self.key, event);
    }
}

impl StreamTransport for SimNetworkHandle {
    fn listen(
        &self,
        _scheduler: &mut Scheduler,
        address: SocketAddr,
        sink: SocketSink,
    ) -> Result<ListenerId, TransportError> {
        let mut state = lock(&self.state);
        if state.by_address.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.insert(id, Listener { address, sink });
        state.by_address.insert(address, id);
        debug!(listener = %id, %address, "Listening");
        Ok(id)
    }

    fn close_listener(&self, scheduler: &mut Scheduler, listener: ListenerId) {
        let mut state = lock(&self.state);
        if let Some(l) = state.listeners.remove(&listener) {
            state.by_address.remove(&l.address);
            debug!(%listener, address = %l.address, "Listener closed");
            l.sink.deliver(scheduler, SocketEvent::ListenerClosed { listener });
        }
    }

    fn connect(&self, scheduler: &mut Scheduler, address: SocketAddr, sink: SocketSink) -> ConnId {
        let now = scheduler.time();
        let mut state = lock(&self.state);
        let latency = state.config.latency();
        let client = state.allocate_conn();

        let listener = state
            .by_address
            .get(&address)
            .copied()
            .and_then(|id| state.listeners.get(&id).map(|l| (id, l.sink.clone())));
        match listener {
            Some((listener, listener_sink)) => {
                let server = state.allocate_conn();
                state.connections.insert(client, Connection::new(Some(server), sink));
                state
                    .connections
                    .insert(server, Connection::new(Some(client), listener_sink));
                drop(state);
                self.schedule_at(scheduler, now + latency, NetworkEvent::Accept { listener, conn: server });
            }
            None => {
                state.connections.insert(client, Connection::new(None, sink));
                drop(state);
            }
        }
        trace!(conn = %client, %address, "Connecting");
        self.schedule_at(scheduler, now + latency + latency, NetworkEvent::Establish { conn: client });
        client
    }

    fn send(
        &self,
        scheduler: &mut Scheduler,
        conn: ConnId,
        data: Bytes,
    ) -> Result<usize, TransportError> {
        let now = scheduler.time();
        let mut state = lock(&self.state);
        let available = state.tx_available(conn);
        let NetworkState {
            config, connections, ..
        } = &mut *state;
        let c = connections
            .get_mut(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        let peer = match (c.state, c.peer) {
            (ConnState::Established, Some(peer)) => peer,
            _ => return Err(TransportError::NotConnected(conn)),
        };

        let accepted = data.len().min(available);
        if accepted < data.len() {
            c.blocked = true;
        }
        if accepted == 0 {
            return Ok(0);
        }
        c.in_flight += accepted;

        let mut deliveries = Vec::new();
        let mut offset = 0;
        while offset < accepted {
            let end = (offset + config.segment_size).min(accepted);
            let arrival = c.link.transmit(config, now, end - offset);
            deliveries.push((arrival, data.slice(offset..end)));
            offset = end;
        }
        drop(state);

        trace!(%conn, offered = data.len(), accepted, "Send");
        for (arrival, segment) in deliveries {
            self.schedule_at(
                scheduler,
                arrival,
                NetworkEvent::Segment {
                    from: conn,
                    to: peer,
                    data: segment,
                },
            );
        }
        Ok(accepted)
    }

    fn recv(&self, conn: ConnId) -> Bytes {
        lock(&self.state)
            .connections
            .get_mut(&conn)
            .map(|c| c.rx.split().freeze())
            .unwrap_or_default()
    }

    fn tx_available(&self, conn: ConnId) -> usize {
        lock(&self.state).tx_available(conn)
    }

    fn close(&self, scheduler: &mut Scheduler, conn: ConnId) {
        let now = scheduler.time();
        let mut state = lock(&self.state);
        let Some(c) = state.connections.remove(&conn) else {
            trace!(%conn, "Close of unknown connection ignored");
            return;
        };
        let fin_at = c.link.after_in_flight(&state.config, now);
        drop(state);
        debug!(%conn, "Closing connection");
        if let Some(peer) = c.peer {
            self.schedule_at(scheduler, fin_at, NetworkEvent::Fin { to: peer });
        }
    }

    fn abort(&self, scheduler: &mut Scheduler, conn: ConnId) {
        let now = scheduler.time();
        let mut state = lock(&self.state);
        let Some(c) = state.connections.remove(&conn) else {
            return;
        };
        let latency = state.config.latency();
        drop(state);
        debug!(%conn, "Aborting connection");
        if let Some(peer) = c.peer {
            self.schedule_at(scheduler, now + latency, NetworkEvent::Reset { to: peer });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use trafficgen_core::{Execute, Executor};

    #[derive(Debug)]
    struct Recorded(SocketEvent);

    impl From<SocketEvent> for Recorded {
        fn from(event: SocketEvent) -> Self {
            Recorded(event)
        }
    }

    struct Recorder {
        log: Arc<StdMutex<Vec<(SimTime, SocketEvent)>>>,
    }

    impl Component for Recorder {
        type Event = Recorded;

        fn process_event(&mut self, _: Key<Recorded>, event: &Recorded, scheduler: &mut Scheduler) {
            self.log.lock().unwrap().push((scheduler.time(), event.0.clone()));
        }
    }

    fn addr() -> SocketAddr {
        "10.0.0.1:80".parse().unwrap()
    }

    fn setup(
        config: NetworkConfig,
    ) -> (
        Simulation,
        SimNetworkHandle,
        SocketSink,
        Arc<StdMutex<Vec<(SimTime, SocketEvent)>>>,
    ) {
        let mut sim = Simulation::default();
        let net = SimNetwork::install(&mut sim, config).unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let key = sim.add_component(Recorder { log: log.clone() });
        (sim, net, SocketSink::component(key), log)
    }

    #[test]
    fn test_connect_without_listener_fails_after_round_trip() {
        let (mut sim, net, sink, log) = setup(NetworkConfig::default().with_latency_ms(10.0));
        let conn = net.connect(sim.scheduler_mut(), addr(), sink);
        Executor::unbound().execute(&mut sim);

        let log = log.lock().unwrap();
        assert_eq!(*log, vec![(SimTime::from_millis(20), SocketEvent::ConnectFailed { conn })]);
        assert_eq!(net.stats().connections_refused, 1);
    }

    #[test]
    fn test_handshake_and_ordered_delivery() {
        let config = NetworkConfig::default().with_latency_ms(10.0).with_segment_size(100);
        let (mut sim, net, sink, log) = setup(config);
        let listener = net.listen(sim.scheduler_mut(), addr(), sink.clone()).unwrap();
        let client = net.connect(sim.scheduler_mut(), addr(), sink);
        Executor::timed(SimTime::from_millis(20)).execute(&mut sim);

        let server = {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 2);
            let SocketEvent::Accepted { listener: l, conn } = log[0].1 else {
                panic!("expected accept, got {:?}", log[0]);
            };
            assert_eq!(l, listener);
            assert_eq!(log[0].0, SimTime::from_millis(10));
            assert_eq!(log[1], (SimTime::from_millis(20), SocketEvent::Connected { conn: client }));
            conn
        };

        let payload: Bytes = (0..250u32).map(|i| i as u8).collect::<Vec<_>>().into();
        assert_eq!(net.send(sim.scheduler_mut(), client, payload.clone()), Ok(250));
        Executor::unbound().execute(&mut sim);

        let data_events = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| *e == SocketEvent::DataAvailable { conn: server })
            .count();
        assert_eq!(data_events, 3);
        assert_eq!(net.recv(server), payload);
        assert!(net.recv(server).is_empty());
    }

    #[test]
    fn test_backpressure_and_send_buffer_available() {
        let config = NetworkConfig::default().with_latency_ms(1.0).with_tx_buffer_size(1000);
        let (mut sim, net, sink, log) = setup(config);
        net.listen(sim.scheduler_mut(), addr(), sink.clone()).unwrap();
        let client = net.connect(sim.scheduler_mut(), addr(), sink);
        Executor::unbound().execute(&mut sim);

        let accepted = net
            .send(sim.scheduler_mut(), client, Bytes::from(vec![1u8; 1500]))
            .unwrap();
        assert_eq!(accepted, 1000);
        assert_eq!(net.tx_available(client), 0);
        assert_eq!(net.send(sim.scheduler_mut(), client, Bytes::from_static(b"x")), Ok(0));

        Executor::unbound().execute(&mut sim);
        assert_eq!(net.tx_available(client), 1000);
        let log = log.lock().unwrap();
        assert!(log
            .iter()
            .any(|(_, e)| matches!(e, SocketEvent::SendBufferAvailable { conn, .. } if *conn == client)));
    }

    #[test]
    fn test_close_after_data_and_abort() {
        let (mut sim, net, sink, log) = setup(NetworkConfig::default().with_latency_ms(2.0));
        net.listen(sim.scheduler_mut(), addr(), sink.clone()).unwrap();
        let first = net.connect(sim.scheduler_mut(), addr(), sink.clone());
        let second = net.connect(sim.scheduler_mut(), addr(), sink);
        Executor::unbound().execute(&mut sim);

        let accepted: Vec<ConnId> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, e)| match e {
                SocketEvent::Accepted { conn, .. } => Some(*conn),
                _ => None,
            })
            .collect();
        assert_eq!(accepted.len(), 2);

        net.send(sim.scheduler_mut(), first, Bytes::from_static(b"bye")).unwrap();
        net.close(sim.scheduler_mut(), first);
        net.abort(sim.scheduler_mut(), second);
        Executor::unbound().execute(&mut sim);

        let log = log.lock().unwrap();
        let tail: Vec<&SocketEvent> = log.iter().rev().take(3).map(|(_, e)| e).collect();
        assert!(tail.contains(&&SocketEvent::NormalClose { conn: accepted[0] }));
        assert!(tail.contains(&&SocketEvent::ErrorClose { conn: accepted[1] }));
        let data_at = log
            .iter()
            .position(|(_, e)| *e == SocketEvent::DataAvailable { conn: accepted[0] })
            .unwrap();
        let fin_at = log
            .iter()
            .position(|(_, e)| *e == SocketEvent::NormalClose { conn: accepted[0] })
            .unwrap();
        assert!(data_at < fin_at);
        assert_eq!(net.open_connections(), 0);
    }

    #[test]
    fn test_listener_closed_and_address_reuse() {
        let (mut sim, net, sink, log) = setup(NetworkConfig::default());
        let listener = net.listen(sim.scheduler_mut(), addr(), sink.clone()).unwrap();
        assert_eq!(
            net.listen(sim.scheduler_mut(), addr(), sink.clone()),
            Err(TransportError::AddressInUse(addr()))
        );
        net.close_listener(sim.scheduler_mut(), listener);
        Executor::unbound().execute(&mut sim);
        assert_eq!(log.lock().unwrap()[0].1, SocketEvent::ListenerClosed { listener });
        assert!(net.listen(sim.scheduler_mut(), addr(), sink).is_ok());
    }
}
