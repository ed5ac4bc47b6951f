//! Near-real-time video traffic
//!
//! The server streams videos frame by frame, each frame a fixed number of slices
//! produced by a simulated encoder that drops slices it cannot finish before the
//! next frame. The client only receives, reassembles slices from the byte stream
//! and waits an idle time between videos.

pub mod client;
pub mod client_app;
pub mod reassembly;
pub mod server;
pub mod server_app;
pub mod worker;

pub use client::{
    NrtvClientEffect, NrtvClientInput, NrtvClientMachine, NrtvClientNotification, NrtvClientState,
    NrtvClientTimer,
};
pub use client_app::{NrtvClient, NrtvClientEvent, NrtvClientStats};
pub use reassembly::ReassemblyBuffer;
pub use server::{
    NrtvServerEffect, NrtvServerInput, NrtvServerMachine, NrtvServerNotification, NrtvServerState,
};
pub use server_app::{NrtvServer, NrtvServerEvent, NrtvServerStats};
pub use worker::{Worker, WorkerOutput, WorkerTimer};
