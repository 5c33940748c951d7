//! # muxrpc-protocol
//!
//! Wire protocol implementation for muxrpc.
//!
//! This crate provides:
//! - The framed stream protocol: a JSON handshake followed by codec-specific
//!   `(Header, Body)` message pairs
//! - Two codec kinds: a checksummed binary framing with msgpack payloads and a
//!   newline-delimited JSON stream
//! - Request/response envelope types for the HTTP transport
//! - Protocol constants and error types

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{read_options, CodecKind, FrameReader, FrameWriter, FRAME_HEADER_SIZE};
pub use error::{ProtocolError, WireErrorKind};
pub use message::{CallRequest, ConnectOptions, Header, DEFAULT_CALL_TIMEOUT};

/// Magic number opening every stream handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default port for the stream transport.
pub const DEFAULT_PORT: u16 = 9999;

/// Maximum framed payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Wire name of the binary codec.
pub const CODEC_GOB: &str = "application/gob";

/// Wire name of the JSON stream codec.
pub const CODEC_JSON: &str = "application/json";
