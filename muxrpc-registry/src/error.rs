//! Registry and dispatch error types.

use thiserror::Error;

/// Errors from service registration and lookup.
///
/// The `Display` forms of the lookup variants travel on the wire in
/// `Header.error` and are recognised by the peer's error classification, so
/// their wording is part of the protocol contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("{0} is not a valid method name")]
    InvalidMethodName(String),

    #[error("service already defined: {0}")]
    AlreadyRegistered(String),

    #[error("service/method request ill-formed: {0}")]
    IllFormed(String),

    #[error("can't find service {0}")]
    UnknownService(String),

    #[error("can't find method {0}")]
    UnknownMethod(String),
}

/// Errors from one method invocation.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The argument payload did not decode into the declared argument type.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The user method returned an error; its message becomes `Header.error`.
    #[error("{0}")]
    Method(String),

    #[error("reply encoding failed: {0}")]
    EncodeReply(String),
}
