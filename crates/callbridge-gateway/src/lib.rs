//! HTTP/WebSocket gateway: telephony webhook, per-call media-stream sessions,
//! and the session registry.

pub mod connection;
pub mod engine_rest;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use registry::SessionRegistry;
pub use server::start_server;
pub use state::GatewayState;
