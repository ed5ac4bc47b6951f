//! Video streaming server component

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use tracing::{debug, error, trace, warn};
use trafficgen_core::{Component, EventId, Key, Scheduler, SimTime, SimulationMetrics};

use super::server::{
    NrtvServerEffect, NrtvServerInput, NrtvServerMachine, NrtvServerNotification, NrtvServerState,
};
use super::worker::WorkerTimer;
use crate::transport::{ConnId, ListenerId, SocketEvent, SocketSink, StreamTransport};
use crate::variables::NrtvVariables;

#[derive(Debug, Clone)]
pub enum NrtvServerEvent {
    Start,
    Stop,
    Socket(SocketEvent),
    Timer { conn: ConnId, timer: WorkerTimer },
}

impl From<SocketEvent> for NrtvServerEvent {
    fn from(event: SocketEvent) -> Self {
        NrtvServerEvent::Socket(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NrtvServerStats {
    pub connections_accepted: u64,
    pub slices_served: u64,
    pub slices_skipped: u64,
    /// Slice payload, headers excluded.
    pub bytes_served: u64,
    pub videos_finished: u64,
}

impl NrtvServerStats {
    fn from_metrics(metrics: &SimulationMetrics, component: &str) -> Self {
        Self {
            connections_accepted: metrics.counter("connections_accepted", component),
            slices_served: metrics.counter("slices_served", component),
            slices_skipped: metrics.counter("slices_skipped", component),
            bytes_served: metrics.counter("bytes_served", component),
            videos_finished: metrics.counter("videos_finished", component),
        }
    }
}

fn record(metrics: &mut SimulationMetrics, component: &str, notification: &NrtvServerNotification) {
    match notification {
        NrtvServerNotification::ConnectionAccepted { .. } => {
            metrics.increment_counter("connections_accepted", component)
        }
        NrtvServerNotification::SliceServed { size, .. } => {
            metrics.increment_counter("slices_served", component);
            metrics.increment_counter_by("bytes_served", component, u64::from(*size));
            metrics.record_histogram("slice_size", component, f64::from(*size));
        }
        NrtvServerNotification::SlicesSkipped { count, .. } => {
            metrics.increment_counter_by("slices_skipped", component, u64::from(*count))
        }
        NrtvServerNotification::VideoFinished { .. } => metrics.increment_counter("videos_finished", component),
        NrtvServerNotification::StateChanged { .. } | NrtvServerNotification::ConnectionClosed { .. } => {}
    }
}

type Observer = Box<dyn FnMut(SimTime, &NrtvServerNotification)>;

/// Video streaming server listening on one address.
pub struct NrtvServer<T: StreamTransport> {
    pub name: String,
    machine: NrtvServerMachine,
    transport: T,
    address: SocketAddr,
    listener: Option<ListenerId>,
    timers: HashMap<(ConnId, WorkerTimer), EventId>,
    metrics: SimulationMetrics,
    observer: Option<Observer>,
}

impl<T: StreamTransport> NrtvServer<T> {
    pub fn new(name: impl Into<String>, transport: T, address: SocketAddr, variables: NrtvVariables) -> Self {
        Self {
            name: name.into(),
            machine: NrtvServerMachine::new(variables),
            transport,
            address,
            listener: None,
            timers: HashMap::new(),
            metrics: SimulationMetrics::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl FnMut(SimTime, &NrtvServerNotification) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> NrtvServerState {
        self.machine.state()
    }

    pub fn stats(&self) -> NrtvServerStats {
        NrtvServerStats::from_metrics(&self.metrics, &self.name)
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn workers(&self) -> usize {
        self.machine.workers()
    }

    pub fn listener(&self) -> Option<ListenerId> {
        self.listener
    }

    fn socket_input(&mut self, event: &SocketEvent) -> Option<NrtvServerInput> {
        match *event {
            SocketEvent::Accepted { conn, .. } => Some(NrtvServerInput::Accepted { conn }),
            SocketEvent::DataAvailable { conn } => {
                let data = self.transport.recv(conn);
                trace!(server = %self.name, %conn, bytes = data.len(), "Inbound data discarded");
                None
            }
            SocketEvent::SendBufferAvailable { conn, .. } => Some(NrtvServerInput::SendBufferAvailable { conn }),
            SocketEvent::NormalClose { conn } => Some(NrtvServerInput::Closed { conn, error: false }),
            SocketEvent::ErrorClose { conn } => Some(NrtvServerInput::Closed { conn, error: true }),
            SocketEvent::ListenerClosed { listener } => {
                if self.listener != Some(listener) {
                    return None;
                }
                self.listener = None;
                Some(NrtvServerInput::ListenerClosed)
            }
            SocketEvent::Connected { .. } | SocketEvent::ConnectFailed { .. } => None,
        }
    }

    fn drive(&mut self, self_id: Key<NrtvServerEvent>, scheduler: &mut Scheduler, input: NrtvServerInput) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            let effects = self.machine.handle(scheduler.time(), input);
            for effect in effects {
                if let Some(feedback) = self.apply(self_id, scheduler, effect) {
                    inputs.push_front(feedback);
                }
            }
        }
    }

    fn apply(
        &mut self,
        self_id: Key<NrtvServerEvent>,
        scheduler: &mut Scheduler,
        effect: NrtvServerEffect,
    ) -> Option<NrtvServerInput> {
        match effect {
            NrtvServerEffect::Listen => {
                let sink = SocketSink::component(self_id);
                match self.transport.listen(scheduler, self.address, sink) {
                    Ok(listener) => {
                        debug!(server = %self.name, address = %self.address, %listener, "Server listening");
                        self.listener = Some(listener);
                        None
                    }
                    Err(e) => {
                        error!(server = %self.name, address = %self.address, error = %e, "Listen failed");
                        Some(NrtvServerInput::Stop)
                    }
                }
            }
            NrtvServerEffect::CloseListener => {
                if let Some(listener) = self.listener {
                    self.transport.close_listener(scheduler, listener);
                }
                None
            }
            NrtvServerEffect::CloseConnection(conn) => {
                self.transport.close(scheduler, conn);
                None
            }
            NrtvServerEffect::Send { conn, data } => {
                match self.transport.send(scheduler, conn, data) {
                    Ok(accepted) => Some(NrtvServerInput::SendCompleted { conn, accepted }),
                    Err(e) => {
                        warn!(server = %self.name, %conn, error = %e, "Send failed, dropping connection");
                        Some(NrtvServerInput::Closed { conn, error: true })
                    }
                }
            }
            NrtvServerEffect::ScheduleTimer { conn, timer, delay } => {
                let event = NrtvServerEvent::Timer { conn, timer };
                let id = scheduler.schedule(SimTime::from_duration(delay), self_id, event);
                if let Some(old) = self.timers.insert((conn, timer), id) {
                    scheduler.cancel(old);
                }
                None
            }
            NrtvServerEffect::CancelTimers { conn } => {
                for timer in [WorkerTimer::Frame, WorkerTimer::Slice] {
                    if let Some(id) = self.timers.remove(&(conn, timer)) {
                        scheduler.cancel(id);
                    }
                }
                None
            }
            NrtvServerEffect::Notify(notification) => {
                record(&mut self.metrics, &self.name, &notification);
                if matches!(
                    notification,
                    NrtvServerNotification::ConnectionAccepted { .. } | NrtvServerNotification::ConnectionClosed { .. }
                ) {
                    let active = self.machine.workers() as f64;
                    self.metrics.record_gauge("active_workers", &self.name, active);
                }
                if let Some(observer) = self.observer.as_mut() {
                    observer(scheduler.time(), &notification);
                }
                None
            }
        }
    }
}

impl<T: StreamTransport + 'static> Component for NrtvServer<T> {
    type Event = NrtvServerEvent;

    fn process_event(&mut self, self_id: Key<Self::Event>, event: &Self::Event, scheduler: &mut Scheduler) {
        let input = match event {
            NrtvServerEvent::Start => Some(NrtvServerInput::Start),
            NrtvServerEvent::Stop => Some(NrtvServerInput::Stop),
            NrtvServerEvent::Timer { conn, timer } => {
                self.timers.remove(&(*conn, *timer));
                Some(NrtvServerInput::TimerExpired {
                    conn: *conn,
                    timer: *timer,
                })
            }
            NrtvServerEvent::Socket(socket_event) => self.socket_input(socket_event),
        };
        if let Some(input) = input {
            self.drive(self_id, scheduler, input);
        }
    }
}
