/// Server configuration.
pub mod config;

/// Storage records to wire messages.
pub mod convert;

/// Transport stacks fed by the multiplexer.
pub mod serve;

/// gRPC service implementation.
pub mod service;

/// Storage access.
pub mod state;

pub use config::ServerConfig;
pub use serve::{serve_http, serve_rpc};
pub use service::ApiService;
pub use state::ServerState;
