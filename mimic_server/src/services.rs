//! Registry of fake-service handlers keyed by the `{service}` path segment.

use mimic_core::{Error, Resource, Result, ServiceHandler};
use std::collections::HashMap;
use std::sync::Arc;

/// Built once at startup; request handlers only read it.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ServiceHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(Resource::Service, name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mimic_core::{EnvSession, ServiceRequest, ServiceResponse};

    struct Probe;

    #[async_trait]
    impl ServiceHandler for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn handle(
            &self,
            _session: &mut EnvSession,
            _request: ServiceRequest,
        ) -> mimic_core::Result<ServiceResponse> {
            Ok(ServiceResponse::json(200, &serde_json::json!({"ok": true})))
        }
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(Probe));
        assert!(registry.get("probe").is_ok());
        assert!(matches!(
            registry.get("slack"),
            Err(Error::NotFound(Resource::Service, _))
        ));
        assert_eq!(registry.names(), vec!["probe"]);
    }
}
