//! Video streaming server state machine
//!
//! The server owns one [`Worker`] per accepted connection and forwards timer and
//! transport callbacks to it. Workers report back through [`WorkerOutput`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use trafficgen_core::logging::events::component_state_changed;
use trafficgen_core::SimTime;

use super::worker::{Worker, WorkerOutput, WorkerTimer};
use crate::transport::ConnId;
use crate::variables::NrtvVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NrtvServerState {
    NotStarted,
    Started,
    Stopped,
}

impl fmt::Display for NrtvServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NrtvServerState::NotStarted => "NOT_STARTED",
            NrtvServerState::Started => "STARTED",
            NrtvServerState::Stopped => "STOPPED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvServerInput {
    Start,
    Stop,
    Accepted { conn: ConnId },
    SendCompleted { conn: ConnId, accepted: usize },
    SendBufferAvailable { conn: ConnId },
    Closed { conn: ConnId, error: bool },
    ListenerClosed,
    TimerExpired { conn: ConnId, timer: WorkerTimer },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvServerNotification {
    StateChanged {
        from: NrtvServerState,
        to: NrtvServerState,
    },
    ConnectionAccepted {
        conn: ConnId,
        num_frames: u32,
    },
    SliceServed {
        conn: ConnId,
        frame_number: u32,
        slice_number: u16,
        size: u32,
    },
    SlicesSkipped {
        conn: ConnId,
        frame_number: u32,
        count: u16,
    },
    VideoFinished {
        conn: ConnId,
        num_frames: u32,
    },
    ConnectionClosed {
        conn: ConnId,
        error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvServerEffect {
    Listen,
    CloseListener,
    CloseConnection(ConnId),
    Send { conn: ConnId, data: Bytes },
    ScheduleTimer {
        conn: ConnId,
        timer: WorkerTimer,
        delay: Duration,
    },
    CancelTimers { conn: ConnId },
    Notify(NrtvServerNotification),
}

#[derive(Debug)]
pub struct NrtvServerMachine {
    state: NrtvServerState,
    variables: NrtvVariables,
    workers: BTreeMap<ConnId, Worker>,
}

impl NrtvServerMachine {
    pub fn new(variables: NrtvVariables) -> Self {
        Self {
            state: NrtvServerState::NotStarted,
            variables,
            workers: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> NrtvServerState {
        self.state
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// # Panics
    ///
    /// If the listener closes while the server is started.
    pub fn handle(&mut self, now: SimTime, input: NrtvServerInput) -> Vec<NrtvServerEffect> {
        let mut fx = Vec::new();
        match (self.state, input) {
            (NrtvServerState::NotStarted, NrtvServerInput::Start) => {
                fx.push(NrtvServerEffect::Listen);
                self.transition(NrtvServerState::Started, &mut fx);
            }
            (NrtvServerState::Started, NrtvServerInput::ListenerClosed) => {
                panic!("video server listener closed while the server is started");
            }
            (NrtvServerState::Stopped, input) => {
                debug!(?input, "Server stopped, input ignored");
            }
            (_, NrtvServerInput::Stop) => {
                let workers = std::mem::take(&mut self.workers);
                for conn in workers.into_keys() {
                    fx.push(NrtvServerEffect::CancelTimers { conn });
                    fx.push(NrtvServerEffect::CloseConnection(conn));
                }
                fx.push(NrtvServerEffect::CloseListener);
                self.transition(NrtvServerState::Stopped, &mut fx);
            }
            (NrtvServerState::Started, NrtvServerInput::Accepted { conn }) => {
                let mut worker = Worker::new(conn, &mut self.variables);
                fx.push(NrtvServerEffect::Notify(NrtvServerNotification::ConnectionAccepted {
                    conn,
                    num_frames: worker.num_frames(),
                }));
                let out = worker.start(now, &mut self.variables);
                self.workers.insert(conn, worker);
                self.apply_worker(conn, out, &mut fx);
            }
            (NrtvServerState::Started, NrtvServerInput::TimerExpired { conn, timer }) => {
                let Some(worker) = self.workers.get_mut(&conn) else {
                    debug!(%conn, ?timer, "Timer for closed connection ignored");
                    return fx;
                };
                let out = match timer {
                    WorkerTimer::Frame => worker.on_frame_timer(now, &mut self.variables),
                    WorkerTimer::Slice => worker.on_slice_timer(now, &mut self.variables),
                };
                self.apply_worker(conn, out, &mut fx);
            }
            (NrtvServerState::Started, NrtvServerInput::SendCompleted { conn, accepted }) => {
                if let Some(worker) = self.workers.get_mut(&conn) {
                    let out = worker.on_send_completed(accepted);
                    self.apply_worker(conn, out, &mut fx);
                }
            }
            (NrtvServerState::Started, NrtvServerInput::SendBufferAvailable { conn }) => {
                if let Some(worker) = self.workers.get_mut(&conn) {
                    let out = worker.on_send_buffer_available();
                    self.apply_worker(conn, out, &mut fx);
                }
            }
            (NrtvServerState::Started, NrtvServerInput::Closed { conn, error }) => {
                if self.workers.remove(&conn).is_some() {
                    debug!(%conn, error, "Connection closed by client");
                    fx.push(NrtvServerEffect::CancelTimers { conn });
                    fx.push(NrtvServerEffect::Notify(NrtvServerNotification::ConnectionClosed { conn, error }));
                }
            }
            (state, input) => {
                warn!(%state, ?input, "Input not valid in current state, ignored");
            }
        }
        fx
    }

    fn transition(&mut self, to: NrtvServerState, fx: &mut Vec<NrtvServerEffect>) {
        let from = self.state;
        self.state = to;
        component_state_changed("nrtv-server", &from.to_string(), &to.to_string());
        fx.push(NrtvServerEffect::Notify(NrtvServerNotification::StateChanged { from, to }));
    }

    fn apply_worker(&mut self, conn: ConnId, out: Vec<WorkerOutput>, fx: &mut Vec<NrtvServerEffect>) {
        for output in out {
            match output {
                WorkerOutput::Send(data) => fx.push(NrtvServerEffect::Send { conn, data }),
                WorkerOutput::Schedule { timer, delay } => {
                    fx.push(NrtvServerEffect::ScheduleTimer { conn, timer, delay })
                }
                WorkerOutput::Notify(notification) => fx.push(NrtvServerEffect::Notify(notification)),
                WorkerOutput::Close => {
                    self.workers.remove(&conn);
                    fx.push(NrtvServerEffect::CancelTimers { conn });
                    fx.push(NrtvServerEffect::CloseConnection(conn));
                }
            }
        }
    }
}
