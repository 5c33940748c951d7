//! Name → service map and `"Service.Method"` resolution.

use crate::error::RegistryError;
use crate::service::{MethodEntry, Service};
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from service name to [`Service`].
///
/// Registration takes `&mut self` and is expected to run at startup; once the
/// registry is shared (typically behind an `Arc`) it is read-only, so lookups
/// need no locking.
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, Arc<Service>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service. The name must be exported (first character
    /// `A`–`Z`); a duplicate name is rejected. Method names must not contain
    /// a dot, because resolution splits at the last one.
    pub fn register(&mut self, service: Service) -> Result<(), RegistryError> {
        let name = service.name().to_string();
        if !name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            return Err(RegistryError::InvalidServiceName(name));
        }
        if let Some(method) = service.method_names().find(|m| m.contains('.')) {
            return Err(RegistryError::InvalidMethodName(method.to_string()));
        }
        if self.services.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tracing::info!("registered service {}", name);
        self.services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Resolves `"Service.Method"`, splitting at the **last** dot (service
    /// names may themselves contain dots; method names may not).
    pub fn resolve(
        &self,
        service_method: &str,
    ) -> Result<(Arc<Service>, Arc<MethodEntry>), RegistryError> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RegistryError::IllFormed(service_method.to_string()))?;
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::UnknownService(service_name.to_string()))?;
        let entry = service
            .get(method_name)
            .ok_or_else(|| RegistryError::UnknownMethod(method_name.to_string()))?;
        Ok((service.clone(), entry.clone()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

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
    fn test_resolution() {
        let mut registry = Registry::new();
        registry.register(math()).unwrap();

        let (service, entry) = registry.resolve("Math.Add").unwrap();
        assert_eq!(service.name(), "Math");
        assert_eq!(entry.name(), "Add");

        assert_eq!(
            registry.resolve("Math.Sub").unwrap_err(),
            RegistryError::UnknownMethod("Sub".to_string())
        );
        assert_eq!(
            registry.resolve("add.Add").unwrap_err(),
            RegistryError::UnknownService("add".to_string())
        );
        assert_eq!(
            registry.resolve("Add").unwrap_err(),
            RegistryError::IllFormed("Add".to_string())
        );
    }

    #[test]
    fn test_split_at_last_dot() {
        let mut registry = Registry::new();
        let service = Service::new("Cluster.Math").method(
            "Add",
            |args: AddArgs, reply: &mut i64| -> Result<(), String> {
                *reply = args.a + args.b;
                Ok(())
            },
        );
        registry.register(service).unwrap();

        let (service, entry) = registry.resolve("Cluster.Math.Add").unwrap();
        assert_eq!(service.name(), "Cluster.Math");
        assert_eq!(entry.name(), "Add");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.register(math()).unwrap();
        assert_eq!(
            registry.register(math()).unwrap_err(),
            RegistryError::AlreadyRegistered("Math".to_string())
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unexported_name_rejected() {
        let mut registry = Registry::new();
        let service = Service::new("math");
        assert_eq!(
            registry.register(service).unwrap_err(),
            RegistryError::InvalidServiceName("math".to_string())
        );

        let service = Service::new("");
        assert!(matches!(
            registry.register(service).unwrap_err(),
            RegistryError::InvalidServiceName(_)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dotted_method_name_rejected() {
        let mut registry = Registry::new();
        let service = Service::new("Math").method(
            "Add.Sub",
            |args: AddArgs, reply: &mut i64| -> Result<(), String> {
                *reply = args.a - args.b;
                Ok(())
            },
        );
        assert_eq!(
            registry.register(service).unwrap_err(),
            RegistryError::InvalidMethodName("Add.Sub".to_string())
        );
    }
}
