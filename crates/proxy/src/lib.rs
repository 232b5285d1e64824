//! Tokio host for the upload relay
//!
//! Listens for client connections, parses each request head, runs the
//! [`upload_relay::intercept::Interceptor`] and either drives a buffering relay session
//! or pipes the request straight through to the origin.

mod error;
mod host;
mod server;
mod session;

pub use error::ProxyError;
pub use host::TokioHost;
pub use server::Server;
pub use session::run_session;
