//! Web browsing client component
//!
//! Drives an [`HttpClientMachine`] from socket events and its own timers, and
//! carries out the machine's effects on a [`StreamTransport`].

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace, warn};
use trafficgen_core::{Component, EventId, Key, Scheduler, SimTime, SimulationMetrics};

use super::client::{
    HttpClientEffect, HttpClientInput, HttpClientMachine, HttpClientNotification, HttpClientState,
    HttpClientTimer,
};
use crate::header::ContentType;
use crate::transport::{ConnId, SocketEvent, SocketSink, StreamTransport};
use crate::variables::HttpVariables;

/// Events that the HttpClient can handle
#[derive(Debug, Clone)]
pub enum HttpClientEvent {
    Start,
    Stop,
    Socket(SocketEvent),
    Timer(HttpClientTimer),
}

impl From<SocketEvent> for HttpClientEvent {
    fn from(event: SocketEvent) -> Self {
        HttpClientEvent::Socket(event)
    }
}

/// Counters collected from the client's notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpClientStats {
    pub requests_sent: u64,
    pub main_objects_received: u64,
    pub embedded_objects_received: u64,
    pub bytes_received: u64,
    pub reading_periods: u64,
    pub reconnects: u64,
    /// Sum of per-object delays, server send start to full arrival.
    pub total_object_delay: Duration,
}

impl HttpClientStats {
    fn from_metrics(metrics: &SimulationMetrics, component: &str) -> Self {
        Self {
            requests_sent: metrics.counter("requests_sent", component),
            main_objects_received: metrics.counter("main_objects_received", component),
            embedded_objects_received: metrics.counter("embedded_objects_received", component),
            bytes_received: metrics.counter("bytes_received", component),
            reading_periods: metrics.counter("reading_periods", component),
            reconnects: metrics.counter("reconnects", component),
            total_object_delay: metrics.total_duration("total_object_delay", component),
        }
    }
}

fn record(metrics: &mut SimulationMetrics, component: &str, notification: &HttpClientNotification) {
    match notification {
        HttpClientNotification::RequestSent { .. } => metrics.increment_counter("requests_sent", component),
        HttpClientNotification::ObjectReceived {
            content_type,
            size,
            delay,
        } => {
            let name = match content_type {
                ContentType::MainObject => "main_objects_received",
                _ => "embedded_objects_received",
            };
            metrics.increment_counter(name, component);
            metrics.increment_counter_by("bytes_received", component, u64::from(*size));
            metrics.record_duration("total_object_delay", component, *delay);
        }
        HttpClientNotification::ReadingStarted { .. } => metrics.increment_counter("reading_periods", component),
        HttpClientNotification::Reconnecting => metrics.increment_counter("reconnects", component),
        HttpClientNotification::StateChanged { .. } => {}
    }
}

type Observer = Box<dyn FnMut(SimTime, &HttpClientNotification)>;

/// Web browsing client bound to one remote server address.
pub struct HttpClient<T: StreamTransport> {
    pub name: String,
    machine: HttpClientMachine,
    transport: T,
    remote: SocketAddr,
    conn: Option<ConnId>,
    timers: HashMap<HttpClientTimer, EventId>,
    metrics: SimulationMetrics,
    observer: Option<Observer>,
}

impl<T: StreamTransport> HttpClient<T> {
    pub fn new(name: impl Into<String>, transport: T, remote: SocketAddr, variables: HttpVariables) -> Self {
        Self {
            name: name.into(),
            machine: HttpClientMachine::new(variables),
            transport,
            remote,
            conn: None,
            timers: HashMap::new(),
            metrics: SimulationMetrics::new(),
            observer: None,
        }
    }

    /// Call `observer` for every notification, in order.
    pub fn with_observer(mut self, observer: impl FnMut(SimTime, &HttpClientNotification) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> HttpClientState {
        self.machine.state()
    }

    pub fn stats(&self) -> HttpClientStats {
        HttpClientStats::from_metrics(&self.metrics, &self.name)
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn variables_mut(&mut self) -> &mut HttpVariables {
        self.machine.variables_mut()
    }

    fn socket_input(&mut self, event: &SocketEvent) -> Option<HttpClientInput> {
        if event.conn().is_none() || event.conn() != self.conn {
            trace!(client = %self.name, ?event, "Socket event for stale connection ignored");
            return None;
        }
        match *event {
            SocketEvent::Connected { conn } => {
                debug!(client = %self.name, %conn, "Connected");
                Some(HttpClientInput::Connected)
            }
            SocketEvent::ConnectFailed { .. } => {
                self.conn = None;
                Some(HttpClientInput::ConnectFailed)
            }
            SocketEvent::DataAvailable { conn } => {
                let data = self.transport.recv(conn);
                (!data.is_empty()).then_some(HttpClientInput::Data(data))
            }
            SocketEvent::SendBufferAvailable { .. } => Some(HttpClientInput::SendBufferAvailable),
            SocketEvent::NormalClose { .. } => {
                self.conn = None;
                Some(HttpClientInput::Closed { error: false })
            }
            SocketEvent::ErrorClose { .. } => {
                self.conn = None;
                Some(HttpClientInput::Closed { error: true })
            }
            SocketEvent::Accepted { .. } | SocketEvent::ListenerClosed { .. } => None,
        }
    }

    fn drive(&mut self, self_id: Key<HttpClientEvent>, scheduler: &mut Scheduler, input: HttpClientInput) {
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
        self_id: Key<HttpClientEvent>,
        scheduler: &mut Scheduler,
        effect: HttpClientEffect,
    ) -> Option<HttpClientInput> {
        match effect {
            HttpClientEffect::Connect => {
                let sink = SocketSink::component(self_id);
                self.conn = Some(self.transport.connect(scheduler, self.remote, sink));
                None
            }
            HttpClientEffect::Close => {
                if let Some(conn) = self.conn.take() {
                    self.transport.close(scheduler, conn);
                }
                None
            }
            HttpClientEffect::Send(data) => {
                let accepted = match self.conn {
                    Some(conn) => self.transport.send(scheduler, conn, data).unwrap_or_else(|e| {
                        warn!(client = %self.name, error = %e, "Send failed");
                        0
                    }),
                    None => 0,
                };
                Some(HttpClientInput::SendCompleted { accepted })
            }
            HttpClientEffect::ScheduleTimer { timer, delay } => {
                if let Some(old) = self.timers.remove(&timer) {
                    scheduler.cancel(old);
                }
                let id = scheduler.schedule(SimTime::from_duration(delay), self_id, HttpClientEvent::Timer(timer));
                self.timers.insert(timer, id);
                None
            }
            HttpClientEffect::CancelAllTimers => {
                for (_, id) in self.timers.drain() {
                    scheduler.cancel(id);
                }
                None
            }
            HttpClientEffect::Notify(notification) => {
                record(&mut self.metrics, &self.name, &notification);
                if let Some(observer) = self.observer.as_mut() {
                    observer(scheduler.time(), &notification);
                }
                None
            }
        }
    }
}

impl<T: StreamTransport + 'static> Component for HttpClient<T> {
    type Event = HttpClientEvent;

    fn process_event(&mut self, self_id: Key<Self::Event>, event: &Self::Event, scheduler: &mut Scheduler) {
        let input = match event {
            HttpClientEvent::Start => Some(HttpClientInput::Start),
            HttpClientEvent::Stop => Some(HttpClientInput::Stop),
            HttpClientEvent::Timer(timer) => {
                self.timers.remove(timer);
                Some(HttpClientInput::TimerExpired(*timer))
            }
            HttpClientEvent::Socket(socket_event) => self.socket_input(socket_event),
        };
        if let Some(input) = input {
            self.drive(self_id, scheduler, input);
        }
    }
}
