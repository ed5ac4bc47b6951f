//! Video streaming client state machine
//!
//! The client connects, receives slices until the server ends the video with a
//! normal close, pauses for an idle time and connects again. It never sends.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use trafficgen_core::logging::events::component_state_changed;

use super::reassembly::ReassemblyBuffer;
use crate::header::NrtvHeader;
use crate::variables::NrtvVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NrtvClientState {
    NotStarted,
    Connecting,
    Receiving,
    Idle,
    Stopped,
}

impl fmt::Display for NrtvClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NrtvClientState::NotStarted => "NOT_STARTED",
            NrtvClientState::Connecting => "CONNECTING",
            NrtvClientState::Receiving => "RECEIVING",
            NrtvClientState::Idle => "IDLE",
            NrtvClientState::Stopped => "STOPPED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NrtvClientTimer {
    Retry,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvClientInput {
    Start,
    Stop,
    Connected,
    ConnectFailed,
    Closed { error: bool },
    Data(Bytes),
    TimerExpired(NrtvClientTimer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvClientNotification {
    StateChanged {
        from: NrtvClientState,
        to: NrtvClientState,
    },
    SliceReceived {
        frame_number: u32,
        slice_number: u16,
        /// Payload bytes, header excluded.
        size: u32,
    },
    FrameReceived {
        frame_number: u32,
        num_frames: u32,
    },
    IdleStarted {
        duration: Duration,
    },
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NrtvClientEffect {
    Connect,
    Close,
    ScheduleTimer {
        timer: NrtvClientTimer,
        delay: Duration,
    },
    CancelTimer(NrtvClientTimer),
    CancelAllTimers,
    Notify(NrtvClientNotification),
}

#[derive(Debug)]
pub struct NrtvClientMachine {
    state: NrtvClientState,
    variables: NrtvVariables,
    reassembly: ReassemblyBuffer,
}

impl NrtvClientMachine {
    pub fn new(variables: NrtvVariables) -> Self {
        Self {
            state: NrtvClientState::NotStarted,
            variables,
            reassembly: ReassemblyBuffer::new(),
        }
    }

    pub fn state(&self) -> NrtvClientState {
        self.state
    }

    pub fn handle(&mut self, input: NrtvClientInput) -> Vec<NrtvClientEffect> {
        let mut fx = Vec::new();
        match (self.state, input) {
            (NrtvClientState::Stopped, input) => {
                debug!(?input, "Client stopped, input ignored");
            }
            (_, NrtvClientInput::Stop) => {
                fx.push(NrtvClientEffect::CancelAllTimers);
                fx.push(NrtvClientEffect::Close);
                self.reassembly.clear();
                self.transition(NrtvClientState::Stopped, &mut fx);
            }
            (NrtvClientState::NotStarted, NrtvClientInput::Start)
            | (NrtvClientState::Idle, NrtvClientInput::TimerExpired(NrtvClientTimer::Idle)) => {
                fx.push(NrtvClientEffect::Connect);
                self.transition(NrtvClientState::Connecting, &mut fx);
            }
            (NrtvClientState::Connecting, NrtvClientInput::Connected) => {
                self.transition(NrtvClientState::Receiving, &mut fx);
            }
            (NrtvClientState::Connecting, NrtvClientInput::ConnectFailed) => {
                debug!("Connection attempt failed, retrying");
                self.schedule_retry(&mut fx);
            }
            (NrtvClientState::Connecting, NrtvClientInput::TimerExpired(NrtvClientTimer::Retry)) => {
                fx.push(NrtvClientEffect::Connect);
            }
            (NrtvClientState::Receiving, NrtvClientInput::Data(data)) => {
                self.receive(data, &mut fx);
            }
            (NrtvClientState::Connecting | NrtvClientState::Receiving, NrtvClientInput::Closed { error: false }) => {
                fx.push(NrtvClientEffect::CancelTimer(NrtvClientTimer::Retry));
                if self.reassembly.buffered() > 0 {
                    warn!(bytes = self.reassembly.buffered(), "Partial slice dropped at end of video");
                }
                self.reassembly.clear();
                let duration = self.variables.idle_time();
                fx.push(NrtvClientEffect::ScheduleTimer {
                    timer: NrtvClientTimer::Idle,
                    delay: duration,
                });
                self.transition(NrtvClientState::Idle, &mut fx);
                fx.push(NrtvClientEffect::Notify(NrtvClientNotification::IdleStarted { duration }));
            }
            (NrtvClientState::Connecting | NrtvClientState::Receiving, NrtvClientInput::Closed { error: true }) => {
                debug!(state = %self.state, "Connection reset, reconnecting");
                self.reassembly.clear();
                self.transition(NrtvClientState::Connecting, &mut fx);
                self.schedule_retry(&mut fx);
            }
            (state, input) => {
                warn!(%state, ?input, "Input not valid in current state, ignored");
            }
        }
        fx
    }

    fn transition(&mut self, to: NrtvClientState, fx: &mut Vec<NrtvClientEffect>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        component_state_changed("nrtv-client", &from.to_string(), &to.to_string());
        fx.push(NrtvClientEffect::Notify(NrtvClientNotification::StateChanged { from, to }));
    }

    fn schedule_retry(&mut self, fx: &mut Vec<NrtvClientEffect>) {
        fx.push(NrtvClientEffect::Notify(NrtvClientNotification::Reconnecting));
        fx.push(NrtvClientEffect::ScheduleTimer {
            timer: NrtvClientTimer::Retry,
            delay: Duration::ZERO,
        });
    }

    fn receive(&mut self, data: Bytes, fx: &mut Vec<NrtvClientEffect>) {
        if let Err(e) = self.reassembly.push(data) {
            warn!(error = %e, "Undecodable video data discarded");
            return;
        }
        while self.reassembly.has_complete_slice() {
            let slice = match self.reassembly.pop_slice() {
                Ok(slice) => slice,
                Err(e) => {
                    warn!(error = %e, "Slice reassembly failed");
                    return;
                }
            };
            let header = match NrtvHeader::decode(&slice) {
                Ok(header) => header,
                Err(e) => {
                    warn!(error = %e, "Reassembled slice has an invalid header");
                    continue;
                }
            };
            fx.push(NrtvClientEffect::Notify(NrtvClientNotification::SliceReceived {
                frame_number: header.frame_number,
                slice_number: header.slice_number,
                size: header.slice_size,
            }));
            if header.is_last_slice_of_frame() {
                fx.push(NrtvClientEffect::Notify(NrtvClientNotification::FrameReceived {
                    frame_number: header.frame_number,
                    num_frames: header.num_frames,
                }));
            }
        }
    }
}
