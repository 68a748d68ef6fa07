//! DNS protocol implementation
//!
//! The modules compose bottom-up:
//!
//! * `buffer` - packet buffers and the domain name codec, including
//!   compression pointers
//! * `protocol` - message, header, question and record structures
//! * `records` - typed views over record payloads (RDATA)
//! * `authority` - the in-memory zone store
//! * `cache` - response caching keyed by question
//! * `client` - the transport seam and the outgoing query client
//! * `resolve` - recursive and forwarding resolution strategies
//! * `server` - the authoritative responder and the UDP/TCP servers
//! * `context` - shared server state and configuration

/// In-memory authoritative zone store
pub mod authority;

/// Low-level buffer operations and the domain name codec
pub mod buffer;

/// TTL-aware response cache
pub mod cache;

/// Transport contract and client for outgoing queries
pub mod client;

/// Shared server state and configuration
pub mod context;

/// Message, header, question and record structures
pub mod protocol;

/// Typed record payloads
pub mod records;

/// Resolution strategies
pub mod resolve;

/// Authoritative responder and UDP/TCP servers
pub mod server;

/// Length framing for DNS over TCP
mod netutil;
