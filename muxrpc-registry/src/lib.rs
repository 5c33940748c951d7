//! # muxrpc-registry
//!
//! Service registry and method invoker for muxrpc.
//!
//! This crate provides:
//! - [`Service`]: a named collection of remotely callable methods
//! - [`MethodEntry`]: the erased invocation closure plus a call counter
//! - [`Registry`]: the name → service map and `"Service.Method"` resolution
//!
//! Methods are registered explicitly as typed closures of shape
//! `Fn(Args, &mut Reply) -> Result<(), E>`; the registration wrapper handles
//! argument materialisation and reply encoding for whichever codec a
//! connection negotiated.

pub mod error;
pub mod registry;
pub mod service;

pub use error::{DispatchError, RegistryError};
pub use registry::Registry;
pub use service::{MethodEntry, Service};
