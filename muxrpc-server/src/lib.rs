//! # muxrpc-server
//!
//! Server side of muxrpc.
//!
//! This crate provides:
//! - The stream server: accept loop, per-connection handshake and codec
//!   negotiation, concurrent request dispatch with bounded-time handlers
//! - The HTTP transport: a single `POST /call` endpoint dispatching through
//!   the same registry
//! - Server configuration with file and environment overrides

pub mod config;
pub mod error;
pub mod http;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig};
pub use error::ServerError;
pub use http::run_http_server;
pub use server::{Server, ServerConfig, ServerStats};
