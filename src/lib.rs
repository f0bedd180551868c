//! Account, group and ticket tracker.
//!
//! One TCP port serves two surfaces: the `tracker.v1.Api` gRPC service and an
//! HTTP/JSON gateway in front of it. The [`mux`] module classifies every
//! connection by its first bytes and hands it to the matching stack. Both
//! stacks require the caller identity header ([`auth`]) and call the same
//! PostgreSQL-backed service ([`server`]).

/// Caller identity for both transports.
pub mod auth;
/// Error types.
pub mod error;
/// HTTP/JSON gateway.
pub mod gateway;
/// Single-port connection multiplexer.
pub mod mux;
/// Credential utilities.
pub mod primitives;
/// Service, storage and configuration.
pub mod server;

/// Generated protobuf types and gRPC stubs.
#[allow(clippy::all, missing_docs)]
pub mod proto {
    tonic::include_proto!("tracker.v1");
}

pub use error::{Error, Result};
