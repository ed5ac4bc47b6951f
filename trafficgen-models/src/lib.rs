//! Synthetic application traffic on top of the trafficgen simulation core
//!
//! Two traffic models, each with a client and a server:
//!
//! - [`http`]: web browsing. Pages made of a main object and a sampled number of
//!   embedded objects, separated by reading times.
//! - [`nrtv`]: near-real-time video. Fixed rate frames cut into slices, sent as
//!   fast as a simulated encoder produces them.
//!
//! The models exchange real bytes framed by the entity headers in [`header`] over
//! any [`transport::StreamTransport`]; [`transport::SimNetwork`] provides one
//! inside the simulation. Random variables and their configuration live in
//! [`variables`].
//!
//! # Example
//!
//! ```rust,no_run
//! use trafficgen_core::{Executor, RandomStreams, SimTime, Simulation};
//! use trafficgen_models::http::{HttpClient, HttpClientEvent, HttpServer, HttpServerEvent};
//! use trafficgen_models::transport::{NetworkConfig, SimNetwork};
//! use trafficgen_models::variables::{HttpVariables, HttpVariablesConfig};
//!
//! let mut sim = Simulation::default();
//! let mut streams = RandomStreams::new(1);
//! let network = SimNetwork::install(&mut sim, NetworkConfig::default()).unwrap();
//! let address = "10.0.0.1:80".parse().unwrap();
//!
//! let vars = HttpVariables::new(HttpVariablesConfig::default(), &mut streams).unwrap();
//! let server = sim.add_component(HttpServer::new("server", network.clone(), address, vars));
//! let vars = HttpVariables::new(HttpVariablesConfig::default(), &mut streams).unwrap();
//! let client = sim.add_component(HttpClient::new("client", network, address, vars));
//!
//! sim.schedule(SimTime::zero(), server, HttpServerEvent::Start);
//! sim.schedule(SimTime::from_millis(1), client, HttpClientEvent::Start);
//! sim.execute(Executor::timed(SimTime::from_secs(120)));
//! ```

pub mod error;
pub mod header;
pub mod http;
pub mod nrtv;
pub mod transport;
pub mod variables;

pub use error::{
    FramingError, HeaderError, ModelError, ReassemblyError, TransportError, TxBufferError,
};
pub use header::{ContentType, HttpHeader, NrtvHeader};
pub use transport::{
    ConnId, ListenerId, NetworkConfig, SimNetwork, SimNetworkHandle, SocketEvent, SocketSink,
    StreamTransport,
};
pub use variables::{HttpVariables, HttpVariablesConfig, NrtvVariables, NrtvVariablesConfig};
