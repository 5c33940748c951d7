//! # muxrpc-client
//!
//! Stream client for muxrpc.
//!
//! This crate provides:
//! - [`Client`]: dial with timeout, handshake, and multiplexed calls over one
//!   TCP connection (`go` for asynchronous calls, `call` for bounded awaits)
//! - A background reader that matches responses to pending calls by sequence
//!   number
//! - [`ConnectionPool`]: a channel-backed free list of idle clients

pub mod client;
pub mod error;
pub mod pool;

pub use client::{Call, Client};
pub use error::ClientError;
pub use pool::ConnectionPool;
