//! The resource descriptor shared by all three pipelines of a process.

use std::sync::Arc;

use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT, SERVICE_NAME, SERVICE_NAMESPACE, SERVICE_VERSION,
};

use crate::value::{AttributeValue, KeyValue};

/// Immutable set of tags identifying the emitting service.
///
/// Cloning is cheap; all pipelines of a process hold the same `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    attributes: Arc<[KeyValue]>,
}

impl Resource {
    /// Build a resource from arbitrary key/values. Later duplicates win.
    pub fn new(attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        let mut deduped: Vec<KeyValue> = Vec::new();
        for kv in attributes {
            match deduped.iter_mut().find(|existing| existing.key == kv.key) {
                Some(existing) => existing.value = kv.value,
                None => deduped.push(kv),
            }
        }
        Self {
            attributes: deduped.into(),
        }
    }

    /// The standard service resource: name, namespace, version and environment.
    pub fn for_service(service_name: &str, namespace: &str, environment: &str) -> Self {
        Self::new([
            KeyValue::new(SERVICE_NAME, service_name),
            KeyValue::new(SERVICE_NAMESPACE, namespace),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, environment),
        ])
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value)
    }

    /// `service.name`, if present.
    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME).and_then(AttributeValue::as_str)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::for_service("unknown-service", "demo", "development")
    }
}
