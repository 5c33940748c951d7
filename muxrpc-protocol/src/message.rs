//! Wire message types: the per-message header, the connection handshake, and
//! the HTTP call envelope.

use crate::{CODEC_GOB, MAGIC_NUMBER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default client-side bound on one synchronous call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-message metadata carried in front of every body.
///
/// `seq` is assigned by the client and echoed verbatim by the server. A
/// non-empty `error` marks the body as the empty sentinel value; it must not
/// be decoded into a reply target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "ServiceMethod")]
    pub service_method: String,

    #[serde(rename = "Seq")]
    pub seq: u64,

    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Header {
    /// Builds a request header. Sequence numbers start at 1; 0 is reserved
    /// for "unassigned".
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Handshake descriptor sent by the client as one JSON value on the raw
/// connection, before any frame.
///
/// The server validates the magic number and codec name and drops the
/// connection silently on mismatch. Timeouts travel as nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,

    #[serde(rename = "CodecType")]
    pub codec_type: String,

    /// Bound on dial + handshake; zero disables the bound.
    #[serde(rename = "ConnectTimeout", with = "duration_nanos", default)]
    pub connect_timeout: Duration,

    /// Server-side bound on one invocation; zero disables the bound.
    #[serde(rename = "HandleTimeout", with = "duration_nanos", default)]
    pub handle_timeout: Duration,

    /// Client-side bound on one synchronous call; zero disables the bound.
    /// Local to the caller, never sent on the wire.
    #[serde(skip)]
    pub call_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CODEC_GOB.to_string(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    pub fn with_codec(mut self, name: impl Into<String>) -> Self {
        self.codec_type = name.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Request envelope accepted by `POST /call`.
///
/// `args` is an untyped JSON object; the server coerces it to the method's
/// declared argument type. Timeouts travel as whole seconds; only
/// `handle_timeout` is consulted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(rename = "ConnectTimeout", default)]
    pub connect_timeout: u64,

    #[serde(rename = "HandleTimeout", default)]
    pub handle_timeout: u64,

    #[serde(rename = "ServiceMethod")]
    pub service_method: String,

    #[serde(rename = "Args", default)]
    pub args: Value,
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }
}
