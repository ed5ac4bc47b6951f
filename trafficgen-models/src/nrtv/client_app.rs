//! Video streaming client component

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, trace};
use trafficgen_core::{Component, EventId, Key, Scheduler, SimTime, SimulationMetrics};

use super::client::{
    NrtvClientEffect, NrtvClientInput, NrtvClientMachine, NrtvClientNotification, NrtvClientState,
    NrtvClientTimer,
};
use crate::transport::{ConnId, SocketEvent, SocketSink, StreamTransport};
use crate::variables::NrtvVariables;

#[derive(Debug, Clone)]
pub enum NrtvClientEvent {
    Start,
    Stop,
    Socket(SocketEvent),
    Timer(NrtvClientTimer),
}

impl From<SocketEvent> for NrtvClientEvent {
    fn from(event: SocketEvent) -> Self {
        NrtvClientEvent::Socket(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NrtvClientStats {
    pub slices_received: u64,
    pub frames_received: u64,
    /// Slice payload, headers excluded.
    pub bytes_received: u64,
    /// Videos ended by the server with a normal close.
    pub videos_completed: u64,
    pub reconnects: u64,
}

impl NrtvClientStats {
    fn from_metrics(metrics: &SimulationMetrics, component: &str) -> Self {
        Self {
            slices_received: metrics.counter("slices_received", component),
            frames_received: metrics.counter("frames_received", component),
            bytes_received: metrics.counter("bytes_received", component),
            videos_completed: metrics.counter("videos_completed", component),
            reconnects: metrics.counter("reconnects", component),
        }
    }
}

fn record(metrics: &mut SimulationMetrics, component: &str, notification: &NrtvClientNotification) {
    match notification {
        NrtvClientNotification::SliceReceived { size, .. } => {
            metrics.increment_counter("slices_received", component);
            metrics.increment_counter_by("bytes_received", component, u64::from(*size));
        }
        NrtvClientNotification::FrameReceived { .. } => metrics.increment_counter("frames_received", component),
        NrtvClientNotification::IdleStarted { .. } => metrics.increment_counter("videos_completed", component),
        NrtvClientNotification::Reconnecting => metrics.increment_counter("reconnects", component),
        NrtvClientNotification::StateChanged { .. } => {}
    }
}

type Observer = Box<dyn FnMut(SimTime, &NrtvClientNotification)>;

/// Video streaming client bound to one remote server address.
pub struct NrtvClient<T: StreamTransport> {
    pub name: String,
    machine: NrtvClientMachine,
    transport: T,
    remote: SocketAddr,
    conn: Option<ConnId>,
    timers: HashMap<NrtvClientTimer, EventId>,
    metrics: SimulationMetrics,
    observer: Option<Observer>,
}

impl<T: StreamTransport> NrtvClient<T> {
    pub fn new(name: impl Into<String>, transport: T, remote: SocketAddr, variables: NrtvVariables) -> Self {
        Self {
            name: name.into(),
            machine: NrtvClientMachine::new(variables),
            transport,
            remote,
            conn: None,
            timers: HashMap::new(),
            metrics: SimulationMetrics::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl FnMut(SimTime, &NrtvClientNotification) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> NrtvClientState {
        self.machine.state()
    }

    pub fn stats(&self) -> NrtvClientStats {
        NrtvClientStats::from_metrics(&self.metrics, &self.name)
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }

    fn socket_input(&mut self, event: &SocketEvent) -> Option<NrtvClientInput> {
        if event.conn().is_none() || event.conn() != self.conn {
            trace!(client = %self.name, ?event, "Socket event for stale connection ignored");
            return None;
        }
        match *event {
            SocketEvent::Connected { conn } => {
                debug!(client = %self.name, %conn, "Connected");
                Some(NrtvClientInput::Connected)
            }
            SocketEvent::ConnectFailed { .. } => {
                self.conn = None;
                Some(NrtvClientInput::ConnectFailed)
            }
            SocketEvent::DataAvailable { conn } => {
                let data = self.transport.recv(conn);
                (!data.is_empty()).then_some(NrtvClientInput::Data(data))
            }
            SocketEvent::NormalClose { .. } => {
                self.conn = None;
                Some(NrtvClientInput::Closed { error: false })
            }
            SocketEvent::ErrorClose { .. } => {
                self.conn = None;
                Some(NrtvClientInput::Closed { error: true })
            }
            SocketEvent::SendBufferAvailable { .. }
            | SocketEvent::Accepted { .. }
            | SocketEvent::ListenerClosed { .. } => None,
        }
    }

    fn apply(&mut self, self_id: Key<NrtvClientEvent>, scheduler: &mut Scheduler, effect: NrtvClientEffect) {
        match effect {
            NrtvClientEffect::Connect => {
                let sink = SocketSink::component(self_id);
                self.conn = Some(self.transport.connect(scheduler, self.remote, sink));
            }
            NrtvClientEffect::Close => {
                if let Some(conn) = self.conn.take() {
                    self.transport.close(scheduler, conn);
                }
            }
            NrtvClientEffect::ScheduleTimer { timer, delay } => {
                if let Some(old) = self.timers.remove(&timer) {
                    scheduler.cancel(old);
                }
                let id = scheduler.schedule(SimTime::from_duration(delay), self_id, NrtvClientEvent::Timer(timer));
                self.timers.insert(timer, id);
            }
            NrtvClientEffect::CancelTimer(timer) => {
                if let Some(id) = self.timers.remove(&timer) {
                    scheduler.cancel(id);
                }
            }
            NrtvClientEffect::CancelAllTimers => {
                for (_, id) in self.timers.drain() {
                    scheduler.cancel(id);
                }
            }
            NrtvClientEffect::Notify(notification) => {
                record(&mut self.metrics, &self.name, &notification);
                if let Some(observer) = self.observer.as_mut() {
                    observer(scheduler.time(), &notification);
                }
            }
        }
    }
}

impl<T: StreamTransport + 'static> Component for NrtvClient<T> {
    type Event = NrtvClientEvent;

    fn process_event(&mut self, self_id: Key<Self::Event>, event: &Self::Event, scheduler: &mut Scheduler) {
        let input = match event {
            NrtvClientEvent::Start => Some(NrtvClientInput::Start),
            NrtvClientEvent::Stop => Some(NrtvClientInput::Stop),
            NrtvClientEvent::Timer(timer) => {
                self.timers.remove(timer);
                Some(NrtvClientInput::TimerExpired(*timer))
            }
            NrtvClientEvent::Socket(socket_event) => self.socket_input(socket_event),
        };
        if let Some(input) = input {
            for effect in self.machine.handle(input) {
                self.apply(self_id, scheduler, effect);
            }
        }
    }
}
