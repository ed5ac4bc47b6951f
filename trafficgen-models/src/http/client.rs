//! Web browsing client state machine
//!
//! One page load: request the main object, wait for all of it, spend a parsing
//! delay, fetch the embedded objects one by one, then spend a reading delay
//! before the next page. The machine is pure: every input returns the effects
//! the runtime has to carry out, in order.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};
use trafficgen_core::logging::events::component_state_changed;
use trafficgen_core::SimTime;

use super::accumulator::{ObjectAccumulator, ReceivedObject};
use crate::error::FramingError;
use crate::header::{ContentType, HttpHeader};
use crate::variables::HttpVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpClientState {
    NotStarted,
    Connecting,
    ExpectingMainObject,
    ParsingMainObject,
    ExpectingEmbeddedObject,
    Reading,
    Stopped,
}

impl fmt::Display for HttpClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HttpClientState::NotStarted => "NOT_STARTED",
            HttpClientState::Connecting => "CONNECTING",
            HttpClientState::ExpectingMainObject => "EXPECTING_MAIN_OBJECT",
            HttpClientState::ParsingMainObject => "PARSING_MAIN_OBJECT",
            HttpClientState::ExpectingEmbeddedObject => "EXPECTING_EMBEDDED_OBJECT",
            HttpClientState::Reading => "READING",
            HttpClientState::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Timers owned by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpClientTimer {
    Retry,
    Parse,
    Reading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpClientInput {
    Start,
    Stop,
    Connected,
    ConnectFailed,
    /// The connection went away; `error` tells a reset from a normal close.
    Closed { error: bool },
    Data(Bytes),
    /// Outcome of the last [`HttpClientEffect::Send`].
    SendCompleted { accepted: usize },
    SendBufferAvailable,
    TimerExpired(HttpClientTimer),
}

/// Observable milestones, for statistics and tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpClientNotification {
    StateChanged {
        from: HttpClientState,
        to: HttpClientState,
    },
    RequestSent {
        content_type: ContentType,
        size: usize,
    },
    ObjectReceived {
        content_type: ContentType,
        size: u32,
        /// Time since the server started sending the object.
        delay: Duration,
    },
    ReadingStarted {
        duration: Duration,
    },
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpClientEffect {
    Connect,
    Close,
    Send(Bytes),
    ScheduleTimer {
        timer: HttpClientTimer,
        delay: Duration,
    },
    CancelAllTimers,
    Notify(HttpClientNotification),
}

#[derive(Debug)]
struct PendingRequest {
    content_type: ContentType,
    unsent: Bytes,
    size: usize,
}

/// Web browsing client logic, free of any transport or scheduler.
#[derive(Debug)]
pub struct HttpClientMachine {
    state: HttpClientState,
    variables: HttpVariables,
    accumulator: ObjectAccumulator,
    pending_request: Option<PendingRequest>,
    embedded_objects_left: u32,
}

impl HttpClientMachine {
    pub fn new(variables: HttpVariables) -> Self {
        Self {
            state: HttpClientState::NotStarted,
            variables,
            accumulator: ObjectAccumulator::new(),
            pending_request: None,
            embedded_objects_left: 0,
        }
    }

    pub fn state(&self) -> HttpClientState {
        self.state
    }

    pub fn variables_mut(&mut self) -> &mut HttpVariables {
        &mut self.variables
    }

    /// Embedded objects of the current page not requested yet.
    pub fn embedded_objects_left(&self) -> u32 {
        self.embedded_objects_left
    }

    pub fn handle(&mut self, now: SimTime, input: HttpClientInput) -> Vec<HttpClientEffect> {
        let mut fx = Vec::new();
        match (self.state, input) {
            (HttpClientState::Stopped, input) => {
                debug!(?input, "Client stopped, input ignored");
            }
            (_, HttpClientInput::Stop) => {
                fx.push(HttpClientEffect::CancelAllTimers);
                fx.push(HttpClientEffect::Close);
                self.reset_page();
                self.transition(HttpClientState::Stopped, &mut fx);
            }
            (HttpClientState::NotStarted, HttpClientInput::Start) => {
                fx.push(HttpClientEffect::Connect);
                self.transition(HttpClientState::Connecting, &mut fx);
            }
            (HttpClientState::NotStarted, input) => {
                warn!(?input, "Client not started, input ignored");
            }
            (HttpClientState::Connecting, HttpClientInput::Connected) => {
                self.request_object(now, ContentType::MainObject, &mut fx);
            }
            (HttpClientState::Connecting, HttpClientInput::ConnectFailed) => {
                debug!("Connection attempt failed, retrying");
                fx.push(HttpClientEffect::Notify(HttpClientNotification::Reconnecting));
                fx.push(HttpClientEffect::ScheduleTimer {
                    timer: HttpClientTimer::Retry,
                    delay: Duration::ZERO,
                });
            }
            (HttpClientState::Connecting, HttpClientInput::TimerExpired(HttpClientTimer::Retry)) => {
                fx.push(HttpClientEffect::Connect);
            }
            (_, HttpClientInput::Closed { error }) => {
                debug!(error, state = %self.state, "Connection closed, reconnecting");
                fx.push(HttpClientEffect::CancelAllTimers);
                self.reset_page();
                self.transition(HttpClientState::Connecting, &mut fx);
                fx.push(HttpClientEffect::Notify(HttpClientNotification::Reconnecting));
                fx.push(HttpClientEffect::ScheduleTimer {
                    timer: HttpClientTimer::Retry,
                    delay: Duration::ZERO,
                });
            }
            (_, HttpClientInput::SendCompleted { accepted }) => {
                self.request_send_completed(accepted, &mut fx);
            }
            (_, HttpClientInput::SendBufferAvailable) => {
                if let Some(pending) = &self.pending_request {
                    debug!(bytes = pending.unsent.len(), "Resending request remainder");
                    fx.push(HttpClientEffect::Send(pending.unsent.clone()));
                }
            }
            (
                HttpClientState::ExpectingMainObject | HttpClientState::ExpectingEmbeddedObject,
                HttpClientInput::Data(data),
            ) => {
                self.receive(now, data, &mut fx);
            }
            (state, HttpClientInput::Data(data)) => {
                warn!(%state, bytes = data.len(), "Unexpected data discarded");
            }
            (HttpClientState::ParsingMainObject, HttpClientInput::TimerExpired(HttpClientTimer::Parse)) => {
                self.embedded_objects_left = self.variables.num_of_embedded_objects();
                debug!(count = self.embedded_objects_left, "Main object parsed");
                if self.embedded_objects_left == 0 {
                    self.enter_reading_time(&mut fx);
                } else {
                    self.request_object(now, ContentType::EmbeddedObject, &mut fx);
                }
            }
            (HttpClientState::Reading, HttpClientInput::TimerExpired(HttpClientTimer::Reading)) => {
                self.request_object(now, ContentType::MainObject, &mut fx);
            }
            (state, input) => {
                warn!(%state, ?input, "Input not valid in current state, ignored");
            }
        }
        fx
    }

    fn transition(&mut self, to: HttpClientState, fx: &mut Vec<HttpClientEffect>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        component_state_changed("http-client", &from.to_string(), &to.to_string());
        fx.push(HttpClientEffect::Notify(HttpClientNotification::StateChanged { from, to }));
    }

    fn reset_page(&mut self) {
        self.accumulator.reset();
        self.pending_request = None;
        self.embedded_objects_left = 0;
    }

    fn request_object(&mut self, now: SimTime, content_type: ContentType, fx: &mut Vec<HttpClientEffect>) {
        if let Some(pending) = &self.pending_request {
            warn!(pending = %pending.content_type, requested = %content_type, "Request still in progress");
            return;
        }
        let size = (self.variables.request_size() as usize).max(HttpHeader::LEN);
        let mut request = BytesMut::with_capacity(size);
        HttpHeader::new(content_type, 0, now.as_nanos_i64()).encode(&mut request);
        request.put_bytes(0, size - HttpHeader::LEN);
        let request = request.freeze();
        self.pending_request = Some(PendingRequest {
            content_type,
            unsent: request.clone(),
            size,
        });
        fx.push(HttpClientEffect::Send(request));
    }

    fn request_send_completed(&mut self, accepted: usize, fx: &mut Vec<HttpClientEffect>) {
        let Some(pending) = self.pending_request.as_mut() else {
            return;
        };
        if accepted < pending.unsent.len() {
            debug!(accepted, left = pending.unsent.len() - accepted, "Short request send");
            pending.unsent = pending.unsent.slice(accepted..);
            return;
        }
        let Some(done) = self.pending_request.take() else {
            return;
        };
        fx.push(HttpClientEffect::Notify(HttpClientNotification::RequestSent {
            content_type: done.content_type,
            size: done.size,
        }));
        match done.content_type {
            ContentType::MainObject => {
                self.transition(HttpClientState::ExpectingMainObject, fx);
            }
            ContentType::EmbeddedObject => {
                self.embedded_objects_left = self.embedded_objects_left.saturating_sub(1);
                self.transition(HttpClientState::ExpectingEmbeddedObject, fx);
            }
            ContentType::NotSet => {}
        }
    }

    fn receive(&mut self, now: SimTime, data: Bytes, fx: &mut Vec<HttpClientEffect>) {
        let expected = match self.state {
            HttpClientState::ExpectingMainObject => ContentType::MainObject,
            _ => ContentType::EmbeddedObject,
        };
        let object = match self.accumulator.push(data) {
            Ok(Some(object)) => object,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, state = %self.state, "Framing error, data discarded");
                return;
            }
        };
        if object.content_type != expected {
            let e = FramingError::UnexpectedContentType {
                expected,
                actual: object.content_type,
            };
            warn!(error = %e, "Object discarded");
            return;
        }
        if object.trailing > 0 {
            warn!(bytes = object.trailing, "Bytes after end of object discarded");
        }
        self.object_received(now, object, fx);
    }

    fn object_received(&mut self, now: SimTime, object: ReceivedObject, fx: &mut Vec<HttpClientEffect>) {
        let sent_at = SimTime::from_nanos(u64::try_from(object.arrival_timestamp).unwrap_or(0));
        fx.push(HttpClientEffect::Notify(HttpClientNotification::ObjectReceived {
            content_type: object.content_type,
            size: object.size,
            delay: now.duration_since(sent_at),
        }));
        match object.content_type {
            ContentType::MainObject => {
                self.transition(HttpClientState::ParsingMainObject, fx);
                fx.push(HttpClientEffect::ScheduleTimer {
                    timer: HttpClientTimer::Parse,
                    delay: self.variables.parsing_time(),
                });
            }
            _ if self.embedded_objects_left > 0 => {
                self.request_object(now, ContentType::EmbeddedObject, fx);
            }
            _ => self.enter_reading_time(fx),
        }
    }

    fn enter_reading_time(&mut self, fx: &mut Vec<HttpClientEffect>) {
        let duration = self.variables.reading_time();
        fx.push(HttpClientEffect::ScheduleTimer {
            timer: HttpClientTimer::Reading,
            delay: duration,
        });
        self.transition(HttpClientState::Reading, fx);
        fx.push(HttpClientEffect::Notify(HttpClientNotification::ReadingStarted { duration }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::HttpVariablesConfig;
    use trafficgen_core::{ConstantInteger, RandomStreams};

    fn machine(embedded: u64) -> HttpClientMachine {
        let config = HttpVariablesConfig {
            reading_time_mean_ms: 1000.0,
            ..Default::default()
        };
        let mut vars = HttpVariables::new(config, &mut RandomStreams::new(1)).unwrap();
        vars.set_num_of_embedded_objects_sampler(Box::new(ConstantInteger(embedded)));
        HttpClientMachine::new(vars)
    }

    fn object(content_type: ContentType, size: u32) -> Bytes {
        let mut buf = BytesMut::new();
        HttpHeader::new(content_type, size, 0).encode(&mut buf);
        buf.put_bytes(0, size as usize);
        buf.freeze()
    }

    fn sent(fx: &[HttpClientEffect]) -> Option<Bytes> {
        fx.iter().find_map(|e| match e {
            HttpClientEffect::Send(b) => Some(b.clone()),
            _ => None,
        })
    }

    fn connected(m: &mut HttpClientMachine) {
        assert_eq!(m.handle(SimTime::zero(), HttpClientInput::Start), vec![
            HttpClientEffect::Connect,
            HttpClientEffect::Notify(HttpClientNotification::StateChanged {
                from: HttpClientState::NotStarted,
                to: HttpClientState::Connecting,
            }),
        ]);
        let fx = m.handle(SimTime::zero(), HttpClientInput::Connected);
        let request = sent(&fx).unwrap();
        assert_eq!(request.len(), 350);
        let header = HttpHeader::decode(&request).unwrap();
        assert_eq!(header.content_type, ContentType::MainObject);
        assert_eq!(header.content_length, 0);
    }

    #[test]
    fn test_request_then_expect_main_object() {
        let mut m = machine(0);
        connected(&mut m);
        assert_eq!(m.state(), HttpClientState::Connecting);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        assert_eq!(m.state(), HttpClientState::ExpectingMainObject);
    }

    #[test]
    fn test_short_request_send_is_resumed() {
        let mut m = machine(0);
        connected(&mut m);
        assert!(m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 100 }).is_empty());
        assert_eq!(m.state(), HttpClientState::Connecting);

        let fx = m.handle(SimTime::zero(), HttpClientInput::SendBufferAvailable);
        assert_eq!(sent(&fx).unwrap().len(), 250);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 250 });
        assert_eq!(m.state(), HttpClientState::ExpectingMainObject);
    }

    #[test]
    fn test_object_completes_only_at_declared_length() {
        let mut m = machine(0);
        connected(&mut m);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });

        let bytes = object(ContentType::MainObject, 2000);
        let fx = m.handle(SimTime::zero(), HttpClientInput::Data(bytes.slice(..1000)));
        assert!(fx.is_empty());
        let fx = m.handle(SimTime::from_millis(3), HttpClientInput::Data(bytes.slice(1000..)));
        assert!(fx.contains(&HttpClientEffect::Notify(HttpClientNotification::ObjectReceived {
            content_type: ContentType::MainObject,
            size: 2000,
            delay: Duration::from_millis(3),
        })));
        assert_eq!(m.state(), HttpClientState::ParsingMainObject);
        assert!(fx.iter().any(|e| matches!(
            e,
            HttpClientEffect::ScheduleTimer { timer: HttpClientTimer::Parse, .. }
        )));
    }

    #[test]
    fn test_no_embedded_objects_goes_to_reading() {
        let mut m = machine(0);
        connected(&mut m);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        m.handle(SimTime::zero(), HttpClientInput::Data(object(ContentType::MainObject, 100)));
        let fx = m.handle(SimTime::zero(), HttpClientInput::TimerExpired(HttpClientTimer::Parse));
        assert_eq!(m.state(), HttpClientState::Reading);
        assert!(sent(&fx).is_none());

        let fx = m.handle(SimTime::zero(), HttpClientInput::TimerExpired(HttpClientTimer::Reading));
        let header = HttpHeader::decode(&sent(&fx).unwrap()).unwrap();
        assert_eq!(header.content_type, ContentType::MainObject);
    }

    #[test]
    fn test_embedded_objects_requested_in_sequence() {
        let mut m = machine(2);
        connected(&mut m);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        m.handle(SimTime::zero(), HttpClientInput::Data(object(ContentType::MainObject, 100)));

        let fx = m.handle(SimTime::zero(), HttpClientInput::TimerExpired(HttpClientTimer::Parse));
        assert!(sent(&fx).is_some());
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        assert_eq!(m.state(), HttpClientState::ExpectingEmbeddedObject);
        assert_eq!(m.embedded_objects_left(), 1);

        let fx = m.handle(SimTime::zero(), HttpClientInput::Data(object(ContentType::EmbeddedObject, 10)));
        let header = HttpHeader::decode(&sent(&fx).unwrap()).unwrap();
        assert_eq!(header.content_type, ContentType::EmbeddedObject);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        assert_eq!(m.embedded_objects_left(), 0);

        m.handle(SimTime::zero(), HttpClientInput::Data(object(ContentType::EmbeddedObject, 10)));
        assert_eq!(m.state(), HttpClientState::Reading);
    }

    #[test]
    fn test_wrong_content_type_is_discarded() {
        let mut m = machine(0);
        connected(&mut m);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        let fx = m.handle(SimTime::zero(), HttpClientInput::Data(object(ContentType::EmbeddedObject, 10)));
        assert!(fx.is_empty());
        assert_eq!(m.state(), HttpClientState::ExpectingMainObject);
    }

    #[test]
    fn test_close_triggers_immediate_reconnect() {
        let mut m = machine(0);
        connected(&mut m);
        m.handle(SimTime::zero(), HttpClientInput::SendCompleted { accepted: 350 });
        let fx = m.handle(SimTime::zero(), HttpClientInput::Closed { error: true });
        assert_eq!(m.state(), HttpClientState::Connecting);
        assert_eq!(fx[0], HttpClientEffect::CancelAllTimers);
        assert!(fx.contains(&HttpClientEffect::ScheduleTimer {
            timer: HttpClientTimer::Retry,
            delay: Duration::ZERO,
        }));
        let fx = m.handle(SimTime::zero(), HttpClientInput::TimerExpired(HttpClientTimer::Retry));
        assert_eq!(fx, vec![HttpClientEffect::Connect]);
    }

    #[test]
    fn test_connect_failure_retries() {
        let mut m = machine(0);
        m.handle(SimTime::zero(), HttpClientInput::Start);
        let fx = m.handle(SimTime::zero(), HttpClientInput::ConnectFailed);
        assert_eq!(m.state(), HttpClientState::Connecting);
        assert!(fx.contains(&HttpClientEffect::ScheduleTimer {
            timer: HttpClientTimer::Retry,
            delay: Duration::ZERO,
        }));
    }

    #[test]
    fn test_stop_from_any_state() {
        let mut m = machine(0);
        connected(&mut m);
        let fx = m.handle(SimTime::zero(), HttpClientInput::Stop);
        assert_eq!(m.state(), HttpClientState::Stopped);
        assert_eq!(&fx[..2], &[HttpClientEffect::CancelAllTimers, HttpClientEffect::Close]);
        assert!(m.handle(SimTime::zero(), HttpClientInput::Data(Bytes::from_static(b"x"))).is_empty());
        assert!(m.handle(SimTime::zero(), HttpClientInput::Start).is_empty());
    }
}
