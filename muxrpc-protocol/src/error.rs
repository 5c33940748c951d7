//! Protocol error types and wire-error classification.

use thiserror::Error;

/// Protocol-level errors raised while framing or parsing messages. Any of
/// these is fatal for the connection it occurred on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("connection closed mid-message")]
    UnexpectedEof,

    #[error("unknown codec type: {0}")]
    UnknownCodec(String),
}

/// Classification of the free-form error string carried in `Header.error`.
///
/// The wire format keeps errors stringly-typed; peers recognise the canonical
/// message prefixes emitted by the registry and the server timeout path so
/// callers can handle them programmatically. Anything unrecognised is a plain
/// remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    /// No dot in the requested `"Service.Method"` name.
    IllFormed,
    UnknownService,
    UnknownMethod,
    /// The server gave up waiting for the invocation.
    HandleTimeout,
    /// Any other server-reported error, including user method failures.
    Remote,
}

impl WireErrorKind {
    pub fn classify(message: &str) -> Self {
        if message.starts_with("service/method request ill-formed") {
            WireErrorKind::IllFormed
        } else if message.starts_with("can't find service") {
            WireErrorKind::UnknownService
        } else if message.starts_with("can't find method") {
            WireErrorKind::UnknownMethod
        } else if message.starts_with("request handle timeout") {
            WireErrorKind::HandleTimeout
        } else {
            WireErrorKind::Remote
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_registry_errors() {
        assert_eq!(
            WireErrorKind::classify("service/method request ill-formed: Add"),
            WireErrorKind::IllFormed
        );
        assert_eq!(
            WireErrorKind::classify("can't find service Nope"),
            WireErrorKind::UnknownService
        );
        assert_eq!(
            WireErrorKind::classify("can't find method Sub"),
            WireErrorKind::UnknownMethod
        );
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(
            WireErrorKind::classify("request handle timeout: expect within 100ms"),
            WireErrorKind::HandleTimeout
        );
    }

    #[test]
    fn test_classify_fallback() {
        assert_eq!(
            WireErrorKind::classify("division by zero"),
            WireErrorKind::Remote
        );
        assert_eq!(WireErrorKind::classify(""), WireErrorKind::Remote);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::CrcMismatch {
            expected: 0xABC,
            actual: 0xDEF,
        };
        assert!(err.to_string().contains("0xabc"));

        let err = ProtocolError::UnknownCodec("application/xml".to_string());
        assert!(err.to_string().contains("application/xml"));
    }
}
