//! Web browsing server component

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use tracing::{debug, error, trace, warn};
use trafficgen_core::{Component, EventId, Key, Scheduler, SimTime, SimulationMetrics};

use super::server::{
    HttpServerEffect, HttpServerInput, HttpServerMachine, HttpServerNotification, HttpServerState,
    ServeToken,
};
use crate::header::ContentType;
use crate::transport::{ListenerId, SocketEvent, SocketSink, StreamTransport};
use crate::variables::HttpVariables;

/// Events that the HttpServer can handle
#[derive(Debug, Clone)]
pub enum HttpServerEvent {
    Start,
    Stop,
    Socket(SocketEvent),
    Serve(ServeToken),
}

impl From<SocketEvent> for HttpServerEvent {
    fn from(event: SocketEvent) -> Self {
        HttpServerEvent::Socket(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpServerStats {
    pub connections_accepted: u64,
    pub requests_received: u64,
    pub main_objects_served: u64,
    pub embedded_objects_served: u64,
    /// Object payload handed to the transport, headers excluded.
    pub bytes_served: u64,
}

impl HttpServerStats {
    fn from_metrics(metrics: &SimulationMetrics, component: &str) -> Self {
        Self {
            connections_accepted: metrics.counter("connections_accepted", component),
            requests_received: metrics.counter("requests_received", component),
            main_objects_served: metrics.counter("main_objects_served", component),
            embedded_objects_served: metrics.counter("embedded_objects_served", component),
            bytes_served: metrics.counter("bytes_served", component),
        }
    }
}

fn record(metrics: &mut SimulationMetrics, component: &str, notification: &HttpServerNotification) {
    match notification {
        HttpServerNotification::ConnectionAccepted { .. } => {
            metrics.increment_counter("connections_accepted", component)
        }
        HttpServerNotification::RequestReceived { .. } => metrics.increment_counter("requests_received", component),
        HttpServerNotification::ObjectServed { content_type, size, .. } => {
            let name = match content_type {
                ContentType::MainObject => "main_objects_served",
                _ => "embedded_objects_served",
            };
            metrics.increment_counter(name, component);
            metrics.increment_counter_by("bytes_served", component, u64::from(*size));
            metrics.record_histogram("object_size", component, f64::from(*size));
        }
        HttpServerNotification::StateChanged { .. } | HttpServerNotification::ConnectionClosed { .. } => {}
    }
}

type Observer = Box<dyn FnMut(SimTime, &HttpServerNotification)>;

/// Web browsing server listening on one address.
pub struct HttpServer<T: StreamTransport> {
    pub name: String,
    machine: HttpServerMachine,
    transport: T,
    address: SocketAddr,
    listener: Option<ListenerId>,
    serve_timers: HashMap<ServeToken, EventId>,
    metrics: SimulationMetrics,
    observer: Option<Observer>,
}

impl<T: StreamTransport> HttpServer<T> {
    pub fn new(name: impl Into<String>, transport: T, address: SocketAddr, variables: HttpVariables) -> Self {
        Self {
            name: name.into(),
            machine: HttpServerMachine::new(variables),
            transport,
            address,
            listener: None,
            serve_timers: HashMap::new(),
            metrics: SimulationMetrics::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl FnMut(SimTime, &HttpServerNotification) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> HttpServerState {
        self.machine.state()
    }

    pub fn stats(&self) -> HttpServerStats {
        HttpServerStats::from_metrics(&self.metrics, &self.name)
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Connections with a live session.
    pub fn connections(&self) -> usize {
        self.machine.connections()
    }

    fn socket_input(&mut self, event: &SocketEvent) -> Option<HttpServerInput> {
        match *event {
            SocketEvent::Accepted { conn, .. } => Some(HttpServerInput::Accepted { conn }),
            SocketEvent::DataAvailable { conn } => {
                let data = self.transport.recv(conn);
                (!data.is_empty()).then_some(HttpServerInput::Data { conn, data })
            }
            SocketEvent::SendBufferAvailable { conn, .. } => Some(HttpServerInput::SendBufferAvailable { conn }),
            SocketEvent::NormalClose { conn } => Some(HttpServerInput::Closed { conn, error: false }),
            SocketEvent::ErrorClose { conn } => Some(HttpServerInput::Closed { conn, error: true }),
            SocketEvent::ListenerClosed { listener } => {
                debug!(server = %self.name, %listener, "Listener closed");
                if self.listener == Some(listener) {
                    self.listener = None;
                }
                None
            }
            SocketEvent::Connected { .. } | SocketEvent::ConnectFailed { .. } => {
                trace!(server = %self.name, ?event, "Unexpected socket event ignored");
                None
            }
        }
    }

    fn drive(&mut self, self_id: Key<HttpServerEvent>, scheduler: &mut Scheduler, input: HttpServerInput) {
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
        self_id: Key<HttpServerEvent>,
        scheduler: &mut Scheduler,
        effect: HttpServerEffect,
    ) -> Option<HttpServerInput> {
        match effect {
            HttpServerEffect::Listen => {
                let sink = SocketSink::component(self_id);
                match self.transport.listen(scheduler, self.address, sink) {
                    Ok(listener) => {
                        debug!(server = %self.name, address = %self.address, %listener, "Server listening");
                        self.listener = Some(listener);
                        None
                    }
                    Err(e) => {
                        error!(server = %self.name, address = %self.address, error = %e, "Listen failed");
                        Some(HttpServerInput::Stop)
                    }
                }
            }
            HttpServerEffect::CloseListener => {
                if let Some(listener) = self.listener {
                    self.transport.close_listener(scheduler, listener);
                }
                None
            }
            HttpServerEffect::CloseConnection(conn) => {
                self.transport.close(scheduler, conn);
                None
            }
            HttpServerEffect::Send { conn, data } => {
                match self.transport.send(scheduler, conn, data) {
                    Ok(accepted) => Some(HttpServerInput::SendCompleted { conn, accepted }),
                    Err(e) => {
                        warn!(server = %self.name, %conn, error = %e, "Send failed, dropping connection");
                        Some(HttpServerInput::Closed { conn, error: true })
                    }
                }
            }
            HttpServerEffect::ScheduleServe { token, delay } => {
                let id = scheduler.schedule(SimTime::from_duration(delay), self_id, HttpServerEvent::Serve(token));
                self.serve_timers.insert(token, id);
                None
            }
            HttpServerEffect::CancelServe { token } => {
                if let Some(id) = self.serve_timers.remove(&token) {
                    scheduler.cancel(id);
                }
                None
            }
            HttpServerEffect::Notify(notification) => {
                record(&mut self.metrics, &self.name, &notification);
                if matches!(
                    notification,
                    HttpServerNotification::ConnectionAccepted { .. } | HttpServerNotification::ConnectionClosed { .. }
                ) {
                    let open = self.machine.connections() as f64;
                    self.metrics.record_gauge("open_connections", &self.name, open);
                }
                if let Some(observer) = self.observer.as_mut() {
                    observer(scheduler.time(), &notification);
                }
                None
            }
        }
    }
}

impl<T: StreamTransport + 'static> Component for HttpServer<T> {
    type Event = HttpServerEvent;

    fn process_event(&mut self, self_id: Key<Self::Event>, event: &Self::Event, scheduler: &mut Scheduler) {
        let input = match event {
            HttpServerEvent::Start => Some(HttpServerInput::Start),
            HttpServerEvent::Stop => Some(HttpServerInput::Stop),
            HttpServerEvent::Serve(token) => {
                self.serve_timers.remove(token);
                Some(HttpServerInput::ServeTimerExpired { token: *token })
            }
            HttpServerEvent::Socket(socket_event) => self.socket_input(socket_event),
        };
        if let Some(input) = input {
            self.drive(self_id, scheduler, input);
        }
    }
}
