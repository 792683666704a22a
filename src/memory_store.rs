use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::{MethodAuthOption, PolicySource, ServiceAuthOption};
use crate::types::MethodId;

/// In-memory policy source for tests and static deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryPolicySource {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    methods: RwLock<HashMap<MethodId, MethodAuthOption>>,
    services: RwLock<HashMap<String, ServiceAuthOption>>,
}

impl MemoryPolicySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the option for a method, replacing any previous one.
    pub fn set_method_option(&self, method: MethodId, option: MethodAuthOption) {
        let mut guard = self.inner.methods.write().expect("poisoned lock");
        guard.insert(method, option);
    }

    /// Declares the option for a service, replacing any previous one.
    pub fn set_service_option(&self, service: impl Into<String>, option: ServiceAuthOption) {
        let mut guard = self.inner.services.write().expect("poisoned lock");
        guard.insert(service.into(), option);
    }

    /// Every method that has an explicit option.
    pub fn methods(&self) -> Vec<MethodId> {
        let guard = self.inner.methods.read().expect("poisoned lock");
        guard.keys().cloned().collect()
    }
}

impl PolicySource for MemoryPolicySource {
    fn method_option(&self, method: &MethodId) -> Option<MethodAuthOption> {
        let guard = self.inner.methods.read().expect("poisoned lock");
        guard.get(method).cloned()
    }

    fn service_option(&self, service: &str) -> Option<ServiceAuthOption> {
        let guard = self.inner.services.read().expect("poisoned lock");
        guard.get(service).cloned()
    }
}
