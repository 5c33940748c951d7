//! Service descriptors and typed method registration.

use crate::error::DispatchError;
use muxrpc_protocol::CodecKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type MethodFn = dyn Fn(CodecKind, &[u8]) -> Result<Vec<u8>, DispatchError> + Send + Sync;

/// One dispatchable method: the erased invocation closure plus an atomic call
/// counter.
pub struct MethodEntry {
    name: String,
    handler: Box<MethodFn>,
    calls: AtomicU64,
}

impl MethodEntry {
    fn new<A, R, E, F>(name: String, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        E: Display,
        F: Fn(A, &mut R) -> Result<(), E> + Send + Sync + 'static,
    {
        let handler = move |kind: CodecKind, raw: &[u8]| -> Result<Vec<u8>, DispatchError> {
            let args: A = kind
                .decode(raw)
                .map_err(|e| DispatchError::InvalidArgs(e.to_string()))?;
            // The reply container starts out zeroed; maps and vectors are
            // empty rather than absent, so methods may assign into them.
            let mut reply = R::default();
            f(args, &mut reply).map_err(|e| DispatchError::Method(e.to_string()))?;
            kind.encode(&reply)
                .map_err(|e| DispatchError::EncodeReply(e.to_string()))
        };
        Self {
            name,
            handler: Box::new(handler),
            calls: AtomicU64::new(0),
        }
    }

    /// Invokes the method: materialise the argument from `raw_args`, run the
    /// user closure against a fresh reply container, encode the reply.
    /// Panics in the user closure are not caught.
    pub fn call(&self, kind: CodecKind, raw_args: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(kind, raw_args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("calls", &self.num_calls())
            .finish()
    }
}

/// A user-registered object whose methods are exposed for remote invocation.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodEntry>>,
}

impl Service {
    /// Starts a service under `name`. Name validity is checked at
    /// registration time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a method. The closure shape (one argument value, one
    /// mutable reply target, one error-or-unit result) is the dispatch
    /// contract; anything else does not compile. A later registration under
    /// the same name replaces the earlier one.
    pub fn method<A, R, E, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        E: Display,
        F: Fn(A, &mut R) -> Result<(), E> + Send + Sync + 'static,
    {
        tracing::debug!("registered {}.{}", self.name, name);
        self.methods.insert(
            name.to_string(),
            Arc::new(MethodEntry::new(name.to_string(), f)),
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, method: &str) -> Option<&Arc<MethodEntry>> {
        self.methods.get(method)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Serialize, Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn math() -> Service {
        Service::new("Math").method("Add", |args: AddArgs, reply: &mut i64| -> Result<(), String> {
            *reply = args.a + args.b;
            Ok(())
        })
    }

    #[test]
    fn test_invoke_both_kinds() {
        let service = math();
        let entry = service.get("Add").unwrap();
        for kind in [CodecKind::Gob, CodecKind::Json] {
            let raw = kind.encode(&AddArgs { a: 2, b: 3 }).unwrap();
            let reply = entry.call(kind, &raw).unwrap();
            let sum: i64 = kind.decode(&reply).unwrap();
            assert_eq!(sum, 5);
        }
    }

    #[test]
    fn test_call_counter() {
        let service = math();
        let entry = service.get("Add").unwrap();
        assert_eq!(entry.num_calls(), 0);
        let raw = CodecKind::Json.encode(&AddArgs { a: 1, b: 1 }).unwrap();
        entry.call(CodecKind::Json, &raw).unwrap();
        entry.call(CodecKind::Json, &raw).unwrap();
        assert_eq!(entry.num_calls(), 2);
    }

    #[test]
    fn test_method_error_surfaces() {
        let service = Service::new("Math").method(
            "Div",
            |args: AddArgs, reply: &mut i64| -> Result<(), String> {
                if args.b == 0 {
                    return Err("division by zero".to_string());
                }
                *reply = args.a / args.b;
                Ok(())
            },
        );
        let entry = service.get("Div").unwrap();
        let raw = CodecKind::Json.encode(&AddArgs { a: 1, b: 0 }).unwrap();
        let err = entry.call(CodecKind::Json, &raw).unwrap_err();
        assert!(matches!(err, DispatchError::Method(ref m) if m == "division by zero"));
    }

    #[test]
    fn test_bad_args_rejected() {
        let service = math();
        let entry = service.get("Add").unwrap();
        let err = entry.call(CodecKind::Json, b"not json").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgs(_)));
    }

    #[test]
    fn test_map_reply_starts_empty() {
        let service = Service::new("Dict").method(
            "Put",
            |args: AddArgs, reply: &mut HashMap<String, i64>| -> Result<(), String> {
                reply.insert("sum".to_string(), args.a + args.b);
                Ok(())
            },
        );
        let entry = service.get("Put").unwrap();
        let raw = CodecKind::Json.encode(&AddArgs { a: 4, b: 6 }).unwrap();
        let reply = entry.call(CodecKind::Json, &raw).unwrap();
        let map: HashMap<String, i64> = CodecKind::Json.decode(&reply).unwrap();
        assert_eq!(map.get("sum"), Some(&10));
    }

    #[test]
    fn test_reregistration_replaces() {
        let service = Service::new("Math")
            .method("Add", |_: AddArgs, reply: &mut i64| -> Result<(), String> {
                *reply = 0;
                Ok(())
            })
            .method("Add", |args: AddArgs, reply: &mut i64| -> Result<(), String> {
                *reply = args.a + args.b;
                Ok(())
            });
        let entry = service.get("Add").unwrap();
        let raw = CodecKind::Json.encode(&AddArgs { a: 2, b: 2 }).unwrap();
        let sum: i64 = CodecKind::Json.decode(&entry.call(CodecKind::Json, &raw).unwrap()).unwrap();
        assert_eq!(sum, 4);
    }
}
