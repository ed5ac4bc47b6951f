//! Entity headers prefixed to application payloads.
//!
//! Both headers have a fixed big-endian layout so a receiver can find object or
//! slice boundaries in a byte stream without any out-of-band signalling.

pub mod http;
pub mod nrtv;

pub use http::{ContentType, HttpHeader};
pub use nrtv::NrtvHeader;
