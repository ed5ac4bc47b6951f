//! Per-connection video encoder
//!
//! A worker streams one video of a sampled number of frames. A frame timer ticks
//! every frame interval; within a frame, slices are produced one after another,
//! each after a sampled encoding delay. A slice whose encoding would not finish
//! before the next frame tick is not produced, and neither are the remaining
//! slices of that frame.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};
use trafficgen_core::SimTime;

use super::server::NrtvServerNotification;
use crate::header::NrtvHeader;
use crate::transport::ConnId;
use crate::variables::NrtvVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerTimer {
    Frame,
    Slice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutput {
    Send(Bytes),
    Schedule { timer: WorkerTimer, delay: Duration },
    /// The video is over and fully handed to the transport.
    Close,
    Notify(NrtvServerNotification),
}

#[derive(Debug)]
pub struct Worker {
    conn: ConnId,
    frame_interval: Duration,
    slices_per_frame: u16,
    num_frames: u32,
    frame_number: u32,
    slices_served: u16,
    /// No more slices this frame, either all served or the rest skipped.
    frame_done: bool,
    next_frame_at: SimTime,
    tx: BytesMut,
    in_send: Option<Bytes>,
    blocked: bool,
    finished: bool,
    closed: bool,
}

impl Worker {
    /// Prepare a worker for `conn`, sampling the length of its video.
    pub fn new(conn: ConnId, variables: &mut NrtvVariables) -> Self {
        Self {
            conn,
            frame_interval: variables.frame_interval(),
            slices_per_frame: variables.num_of_slices(),
            num_frames: variables.num_of_frames(),
            frame_number: 0,
            slices_served: 0,
            frame_done: false,
            next_frame_at: SimTime::zero(),
            tx: BytesMut::new(),
            in_send: None,
            blocked: false,
            finished: false,
            closed: false,
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Bytes produced but not yet accepted by the transport.
    pub fn buffered(&self) -> usize {
        self.tx.len() + self.in_send.as_ref().map_or(0, Bytes::len)
    }

    /// Begin the first frame.
    pub fn start(&mut self, now: SimTime, variables: &mut NrtvVariables) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        debug!(conn = %self.conn, frames = self.num_frames, "Video started");
        self.begin_frame(now, variables, &mut out);
        out
    }

    pub fn on_frame_timer(&mut self, now: SimTime, variables: &mut NrtvVariables) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        if self.closed {
            return out;
        }
        if self.frame_number + 1 >= self.num_frames {
            debug!(conn = %self.conn, frames = self.num_frames, "Last frame produced");
            self.finished = true;
            self.drain(&mut out);
            return out;
        }
        self.frame_number += 1;
        self.begin_frame(now, variables, &mut out);
        out
    }

    pub fn on_slice_timer(&mut self, now: SimTime, variables: &mut NrtvVariables) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        if self.closed {
            return out;
        }
        let size = variables.slice_size();
        let header = NrtvHeader {
            frame_number: self.frame_number,
            num_frames: self.num_frames,
            slice_number: self.slices_served,
            num_slices: self.slices_per_frame,
            slice_size: size,
        };
        header.encode(&mut self.tx);
        self.tx.put_bytes(0, size as usize);
        trace!(conn = %self.conn, frame = self.frame_number, slice = self.slices_served, size, "Slice produced");
        out.push(WorkerOutput::Notify(NrtvServerNotification::SliceServed {
            conn: self.conn,
            frame_number: self.frame_number,
            slice_number: self.slices_served,
            size,
        }));
        self.slices_served += 1;
        self.drain(&mut out);
        self.schedule_slice(now, variables, &mut out);
        out
    }

    /// Outcome of the last [`WorkerOutput::Send`].
    pub fn on_send_completed(&mut self, accepted: usize) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        let Some(chunk) = self.in_send.take() else {
            return out;
        };
        if accepted < chunk.len() {
            trace!(conn = %self.conn, accepted, offered = chunk.len(), "Short send, waiting for buffer space");
            let mut rest = BytesMut::from(&chunk[accepted..]);
            rest.extend_from_slice(&self.tx);
            self.tx = rest;
            self.blocked = true;
            return out;
        }
        self.drain(&mut out);
        out
    }

    pub fn on_send_buffer_available(&mut self) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        if self.blocked {
            self.blocked = false;
            self.drain(&mut out);
        }
        out
    }

    fn begin_frame(&mut self, now: SimTime, variables: &mut NrtvVariables, out: &mut Vec<WorkerOutput>) {
        self.slices_served = 0;
        self.frame_done = false;
        self.next_frame_at = now + self.frame_interval;
        out.push(WorkerOutput::Schedule {
            timer: WorkerTimer::Frame,
            delay: self.frame_interval,
        });
        self.schedule_slice(now, variables, out);
    }

    fn schedule_slice(&mut self, now: SimTime, variables: &mut NrtvVariables, out: &mut Vec<WorkerOutput>) {
        if self.frame_done {
            return;
        }
        if self.slices_served >= self.slices_per_frame {
            self.frame_done = true;
            return;
        }
        let delay = variables.slice_encoding_delay();
        if now + delay < self.next_frame_at {
            out.push(WorkerOutput::Schedule {
                timer: WorkerTimer::Slice,
                delay,
            });
        } else {
            let count = self.slices_per_frame - self.slices_served;
            debug!(conn = %self.conn, frame = self.frame_number, count, ?delay, "Slices skipped");
            self.frame_done = true;
            out.push(WorkerOutput::Notify(NrtvServerNotification::SlicesSkipped {
                conn: self.conn,
                frame_number: self.frame_number,
                count,
            }));
        }
    }

    fn drain(&mut self, out: &mut Vec<WorkerOutput>) {
        if self.blocked || self.in_send.is_some() || self.closed {
            return;
        }
        if !self.tx.is_empty() {
            let chunk = self.tx.split().freeze();
            self.in_send = Some(chunk.clone());
            out.push(WorkerOutput::Send(chunk));
            return;
        }
        if self.finished {
            self.closed = true;
            out.push(WorkerOutput::Notify(NrtvServerNotification::VideoFinished {
                conn: self.conn,
                num_frames: self.num_frames,
            }));
            out.push(WorkerOutput::Close);
        }
    }
}
