//! Web browsing traffic
//!
//! The client fetches pages: a main object, then a sampled number of embedded
//! objects, then a reading pause. The server answers each request with an object
//! of sampled size, framed as one [`HttpHeader`](crate::header::HttpHeader)
//! followed by the payload and cut into MTU sized chunks.
//!
//! Both sides are split in two: a pure state machine (`*Machine`) mapping inputs
//! to effects, and a simulation component (`HttpClient`, `HttpServer`) applying
//! those effects to a transport and the scheduler.

pub mod accumulator;
pub mod client;
pub mod client_app;
pub mod server;
pub mod server_app;
pub mod tx_buffer;

pub use accumulator::{ObjectAccumulator, ReceivedObject};
pub use client::{
    HttpClientEffect, HttpClientInput, HttpClientMachine, HttpClientNotification, HttpClientState,
    HttpClientTimer,
};
pub use client_app::{HttpClient, HttpClientEvent, HttpClientStats};
pub use server::{
    HttpServerEffect, HttpServerInput, HttpServerMachine, HttpServerNotification, HttpServerState,
    RequestParser, ServeToken,
};
pub use server_app::{HttpServer, HttpServerEvent, HttpServerStats};
pub use tx_buffer::TransmissionBuffer;
