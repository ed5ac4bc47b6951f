//! Web browsing server state machine
//!
//! A single coarse state for the server plus one session per accepted
//! connection. Each session owns its request parser, transmission buffer, MTU
//! and the requests waiting for the buffer to free up.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};
use trafficgen_core::logging::events::component_state_changed;
use trafficgen_core::SimTime;

use super::tx_buffer::TransmissionBuffer;
use crate::error::HeaderError;
use crate::header::{ContentType, HttpHeader};
use crate::transport::ConnId;
use crate::variables::HttpVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpServerState {
    NotStarted,
    Listening,
    Stopped,
}

impl fmt::Display for HttpServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpServerState::NotStarted => "NOT_STARTED",
            HttpServerState::Listening => "STARTED",
            HttpServerState::Stopped => "STOPPED",
        })
    }
}

/// Handle of a pending serve timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServeToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpServerInput {
    Start,
    Stop,
    Accepted { conn: ConnId },
    Data { conn: ConnId, data: Bytes },
    /// Outcome of the last [`HttpServerEffect::Send`] on `conn`.
    SendCompleted { conn: ConnId, accepted: usize },
    SendBufferAvailable { conn: ConnId },
    Closed { conn: ConnId, error: bool },
    ServeTimerExpired { token: ServeToken },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpServerNotification {
    StateChanged {
        from: HttpServerState,
        to: HttpServerState,
    },
    ConnectionAccepted {
        conn: ConnId,
        mtu: usize,
    },
    RequestReceived {
        conn: ConnId,
        content_type: ContentType,
    },
    /// The whole object has been accepted by the transport.
    ObjectServed {
        conn: ConnId,
        content_type: ContentType,
        size: u32,
    },
    ConnectionClosed {
        conn: ConnId,
        error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpServerEffect {
    Listen,
    CloseListener,
    CloseConnection(ConnId),
    Send { conn: ConnId, data: Bytes },
    ScheduleServe { token: ServeToken, delay: Duration },
    CancelServe { token: ServeToken },
    Notify(HttpServerNotification),
}

/// Splits the inbound byte stream of a connection into fixed size requests.
///
/// Every request is one header followed by zero padding up to the request size;
/// the header is decoded at each request boundary and the padding skipped.
#[derive(Debug)]
pub struct RequestParser {
    frame_len: usize,
    header_buf: BytesMut,
    skip: usize,
}

impl RequestParser {
    pub fn new(request_size: usize) -> Self {
        Self {
            frame_len: request_size.max(HttpHeader::LEN),
            header_buf: BytesMut::with_capacity(HttpHeader::LEN),
            skip: 0,
        }
    }

    /// Feed one read, returning the headers of every request it completes.
    pub fn push(&mut self, mut data: Bytes) -> Vec<Result<HttpHeader, HeaderError>> {
        let mut requests = Vec::new();
        while data.has_remaining() {
            if self.skip > 0 {
                let n = self.skip.min(data.len());
                data.advance(n);
                self.skip -= n;
                continue;
            }
            let n = (HttpHeader::LEN - self.header_buf.len()).min(data.len());
            self.header_buf.extend_from_slice(&data[..n]);
            data.advance(n);
            if self.header_buf.len() == HttpHeader::LEN {
                requests.push(HttpHeader::decode(&self.header_buf));
                self.header_buf.clear();
                self.skip = self.frame_len - HttpHeader::LEN;
            }
        }
        requests
    }
}

#[derive(Debug)]
struct Session {
    mtu: usize,
    parser: RequestParser,
    tx: TransmissionBuffer,
    /// Requests whose serve delay elapsed, waiting for the buffer.
    ready: VecDeque<ContentType>,
    /// Chunk handed to the transport, awaiting its outcome.
    in_send: Option<Bytes>,
    blocked: bool,
}

/// Web browsing server logic, free of any transport or scheduler.
#[derive(Debug)]
pub struct HttpServerMachine {
    state: HttpServerState,
    variables: HttpVariables,
    sessions: BTreeMap<ConnId, Session>,
    serve_timers: HashMap<ServeToken, (ConnId, ContentType)>,
    next_token: u64,
}

impl HttpServerMachine {
    pub fn new(variables: HttpVariables) -> Self {
        Self {
            state: HttpServerState::NotStarted,
            variables,
            sessions: BTreeMap::new(),
            serve_timers: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn state(&self) -> HttpServerState {
        self.state
    }

    pub fn connections(&self) -> usize {
        self.sessions.len()
    }

    pub fn handle(&mut self, now: SimTime, input: HttpServerInput) -> Vec<HttpServerEffect> {
        let mut fx = Vec::new();
        match (self.state, input) {
            (HttpServerState::NotStarted, HttpServerInput::Start) => {
                fx.push(HttpServerEffect::Listen);
                self.transition(HttpServerState::Listening, &mut fx);
            }
            (HttpServerState::Stopped, input) => {
                debug!(?input, "Server stopped, input ignored");
            }
            (_, HttpServerInput::Stop) => {
                let sessions = std::mem::take(&mut self.sessions);
                for conn in sessions.into_keys() {
                    fx.push(HttpServerEffect::CloseConnection(conn));
                }
                for token in self.serve_timers.drain().map(|(token, _)| token) {
                    fx.push(HttpServerEffect::CancelServe { token });
                }
                fx.push(HttpServerEffect::CloseListener);
                self.transition(HttpServerState::Stopped, &mut fx);
            }
            (HttpServerState::Listening, HttpServerInput::Accepted { conn }) => {
                let mtu = self.variables.mtu_size() as usize;
                let request_size = self.variables.request_size() as usize;
                debug!(%conn, mtu, "Connection accepted");
                self.sessions.insert(
                    conn,
                    Session {
                        mtu,
                        parser: RequestParser::new(request_size),
                        tx: TransmissionBuffer::new(),
                        ready: VecDeque::new(),
                        in_send: None,
                        blocked: false,
                    },
                );
                fx.push(HttpServerEffect::Notify(HttpServerNotification::ConnectionAccepted { conn, mtu }));
            }
            (HttpServerState::Listening, HttpServerInput::Data { conn, data }) => {
                self.receive(now, conn, data, &mut fx);
            }
            (HttpServerState::Listening, HttpServerInput::SendCompleted { conn, accepted }) => {
                self.send_completed(now, conn, accepted, &mut fx);
            }
            (HttpServerState::Listening, HttpServerInput::SendBufferAvailable { conn }) => {
                match self.sessions.get_mut(&conn) {
                    Some(session) if session.blocked => {
                        session.blocked = false;
                        trace!(%conn, "Resuming transmission");
                        self.drain(now, conn, &mut fx);
                    }
                    _ => {}
                }
            }
            (HttpServerState::Listening, HttpServerInput::Closed { conn, error }) => {
                if self.sessions.remove(&conn).is_some() {
                    debug!(%conn, error, "Connection closed");
                    let stale: Vec<ServeToken> = self
                        .serve_timers
                        .iter()
                        .filter(|(_, (c, _))| *c == conn)
                        .map(|(token, _)| *token)
                        .collect();
                    for token in stale {
                        self.serve_timers.remove(&token);
                        fx.push(HttpServerEffect::CancelServe { token });
                    }
                    fx.push(HttpServerEffect::Notify(HttpServerNotification::ConnectionClosed { conn, error }));
                }
            }
            (HttpServerState::Listening, HttpServerInput::ServeTimerExpired { token }) => {
                if let Some((conn, content_type)) = self.serve_timers.remove(&token) {
                    self.serve(now, conn, content_type, &mut fx);
                }
            }
            (state, input) => {
                warn!(%state, ?input, "Input not valid in current state, ignored");
            }
        }
        fx
    }

    fn transition(&mut self, to: HttpServerState, fx: &mut Vec<HttpServerEffect>) {
        let from = self.state;
        self.state = to;
        component_state_changed("http-server", &from.to_string(), &to.to_string());
        fx.push(HttpServerEffect::Notify(HttpServerNotification::StateChanged { from, to }));
    }

    fn receive(&mut self, now: SimTime, conn: ConnId, data: Bytes, fx: &mut Vec<HttpServerEffect>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            warn!(%conn, bytes = data.len(), "Data for unknown connection discarded");
            return;
        };
        for request in session.parser.push(data) {
            let content_type = match request {
                Ok(header) => header.content_type,
                Err(e) => {
                    warn!(%conn, error = %e, "Malformed request discarded");
                    continue;
                }
            };
            let delay = match content_type {
                ContentType::MainObject => self.variables.main_object_generation_delay(),
                ContentType::EmbeddedObject => self.variables.embedded_object_generation_delay(),
                ContentType::NotSet => {
                    warn!(%conn, "Request without content type discarded");
                    continue;
                }
            } + self.variables.response_delay();
            debug!(%conn, %content_type, ?delay, "Request received");
            fx.push(HttpServerEffect::Notify(HttpServerNotification::RequestReceived { conn, content_type }));
            if delay.is_zero() {
                self.serve(now, conn, content_type, fx);
            } else {
                self.next_token += 1;
                let token = ServeToken(self.next_token);
                self.serve_timers.insert(token, (conn, content_type));
                fx.push(HttpServerEffect::ScheduleServe { token, delay });
            }
        }
    }

    fn serve(&mut self, now: SimTime, conn: ConnId, content_type: ContentType, fx: &mut Vec<HttpServerEffect>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        session.ready.push_back(content_type);
        self.start_next_object(now, conn, fx);
    }

    fn start_next_object(&mut self, now: SimTime, conn: ConnId, fx: &mut Vec<HttpServerEffect>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if !session.tx.is_empty() {
            return;
        }
        let Some(content_type) = session.ready.pop_front() else {
            return;
        };
        let size = match content_type {
            ContentType::MainObject => self.variables.main_object_size(),
            _ => self.variables.embedded_object_size(),
        };
        if let Err(e) = session.tx.write_new_object(content_type, size) {
            warn!(%conn, error = %e, "Object not started");
            return;
        }
        debug!(%conn, %content_type, size, "Serving object");
        self.drain(now, conn, fx);
    }

    fn drain(&mut self, now: SimTime, conn: ConnId, fx: &mut Vec<HttpServerEffect>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.blocked || session.in_send.is_some() {
            return;
        }
        if let Some(chunk) = session.tx.next_chunk(session.mtu, now.as_nanos_i64()) {
            session.in_send = Some(chunk.clone());
            fx.push(HttpServerEffect::Send { conn, data: chunk });
            return;
        }
        if let Some((content_type, size)) = session.tx.take_completed() {
            fx.push(HttpServerEffect::Notify(HttpServerNotification::ObjectServed {
                conn,
                content_type,
                size,
            }));
            self.start_next_object(now, conn, fx);
        }
    }

    fn send_completed(&mut self, now: SimTime, conn: ConnId, accepted: usize, fx: &mut Vec<HttpServerEffect>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let Some(chunk) = session.in_send.take() else {
            return;
        };
        if accepted < chunk.len() {
            trace!(%conn, accepted, offered = chunk.len(), "Short send, waiting for buffer space");
            session.tx.requeue(chunk.slice(accepted..));
            session.blocked = true;
            return;
        }
        self.drain(now, conn, fx);
    }
}
