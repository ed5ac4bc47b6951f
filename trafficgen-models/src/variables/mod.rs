//! Variable configuration containers
//!
//! One container per traffic type. A container is built from a serde config,
//! validated up front, and owns every random variable of one application
//! instance, each on its own random stream.

pub mod http;
pub mod nrtv;

pub use http::{HttpVariables, HttpVariablesConfig};
pub use nrtv::{NrtvVariables, NrtvVariablesConfig};
