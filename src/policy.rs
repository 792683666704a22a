//! Merges service-level and method-level declarative options.
//!
//! Method options override service options, which override the hard default
//! (not public, no policy, no requirement). Results are memoized per method
//! for the lifetime of the resolver because the underlying schema is fixed
//! once loaded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::identity::Requirement;
use crate::store::{MethodAuthOption, PolicySource, ServiceAuthOption};
use crate::types::{Effect, MethodId};

/// Effective auth configuration for one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMethodPolicy {
    pub is_public: bool,
    pub policy: Option<Effect>,
    pub requires: Option<Requirement>,
}

impl ResolvedMethodPolicy {
    /// Merges the options declared on a method and on its service.
    pub fn merge(method: Option<&MethodAuthOption>, service: Option<&ServiceAuthOption>) -> Self {
        let is_public = method
            .and_then(|option| option.public)
            .or_else(|| service.and_then(|option| option.public))
            .unwrap_or(false);

        // The method requirement wins outright; fields are never merged.
        let requires = method
            .and_then(|option| option.requires.clone())
            .or_else(|| service.and_then(|option| option.default_requires.clone()));

        let policy = method
            .and_then(|option| option.policy.as_deref())
            .and_then(Effect::parse)
            .or_else(|| {
                service
                    .and_then(|option| option.default_policy.as_deref())
                    .and_then(Effect::parse)
            });

        Self {
            is_public,
            policy,
            requires,
        }
    }
}

/// Memoizing resolver over a [`PolicySource`].
pub struct PolicyResolver {
    source: Arc<dyn PolicySource>,
    resolved: RwLock<HashMap<MethodId, Arc<ResolvedMethodPolicy>>>,
}

impl std::fmt::Debug for PolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.resolved.read().map(|guard| guard.len()).unwrap_or(0);
        f.debug_struct("PolicyResolver")
            .field("cached", &cached)
            .finish_non_exhaustive()
    }
}

impl PolicyResolver {
    pub fn new(source: impl PolicySource + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves every method up front, typically right after the schema loads.
    pub fn preload<'a, I>(&self, methods: I)
    where
        I: IntoIterator<Item = &'a MethodId>,
    {
        for method in methods {
            self.resolve(method);
        }
    }

    /// Returns the effective policy for `method`, computing it on first use.
    pub fn resolve(&self, method: &MethodId) -> Arc<ResolvedMethodPolicy> {
        if let Some(hit) = self
            .resolved
            .read()
            .expect("poisoned lock")
            .get(method)
            .cloned()
        {
            return hit;
        }

        let method_option = self.source.method_option(method);
        let service_option = self.source.service_option(method.service());
        let resolved = Arc::new(ResolvedMethodPolicy::merge(
            method_option.as_ref(),
            service_option.as_ref(),
        ));

        let mut guard = self.resolved.write().expect("poisoned lock");
        guard.entry(method.clone()).or_insert(resolved).clone()
    }

    /// Number of memoized methods.
    pub fn resolved_len(&self) -> usize {
        self.resolved.read().expect("poisoned lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn method_option(
        public: Option<bool>,
        policy: Option<&str>,
        requires: Option<Requirement>,
    ) -> MethodAuthOption {
        MethodAuthOption {
            public,
            policy: policy.map(str::to_string),
            requires,
        }
    }

    fn service_option(
        public: Option<bool>,
        policy: Option<&str>,
        requires: Option<Requirement>,
    ) -> ServiceAuthOption {
        ServiceAuthOption {
            public,
            default_policy: policy.map(str::to_string),
            default_requires: requires,
        }
    }

    #[test]
    fn defaults_when_nothing_declared() {
        assert_eq!(ResolvedMethodPolicy::merge(None, None), ResolvedMethodPolicy::default());
    }

    #[test]
    fn explicit_method_false_should_override_service_public() {
        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(Some(false), None, None)),
            Some(&service_option(Some(true), None, None)),
        );
        assert!(!resolved.is_public);
    }

    #[test]
    fn unset_method_public_should_inherit_service() {
        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(None, None, None)),
            Some(&service_option(Some(true), None, None)),
        );
        assert!(resolved.is_public);
    }

    #[test]
    fn method_requires_should_replace_service_requires() {
        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(None, None, Some(Requirement::roles(["admin"])))),
            Some(&service_option(
                Some(true),
                None,
                Some(Requirement::roles(["viewer"]).with_scopes(["read"])),
            )),
        );
        assert_eq!(resolved.requires, Some(Requirement::roles(["admin"])));
        assert!(resolved.is_public);
    }

    #[test]
    fn service_requires_should_apply_when_method_has_none() {
        let resolved = ResolvedMethodPolicy::merge(
            None,
            Some(&service_option(None, None, Some(Requirement::scopes(["read"])))),
        );
        assert_eq!(resolved.requires, Some(Requirement::scopes(["read"])));
    }

    #[test]
    fn unrecognized_method_policy_should_fall_back_to_service() {
        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(None, Some("sometimes"), None)),
            Some(&service_option(None, Some("deny"), None)),
        );
        assert_eq!(resolved.policy, Some(Effect::Deny));

        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(None, Some(""), None)),
            Some(&service_option(None, Some("bogus"), None)),
        );
        assert_eq!(resolved.policy, None);
    }

    #[test]
    fn method_policy_should_win_over_service_policy() {
        let resolved = ResolvedMethodPolicy::merge(
            Some(&method_option(None, Some("allow"), None)),
            Some(&service_option(None, Some("deny"), None)),
        );
        assert_eq!(resolved.policy, Some(Effect::Allow));
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl PolicySource for CountingSource {
        fn method_option(&self, _method: &MethodId) -> Option<MethodAuthOption> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(method_option(Some(true), None, None))
        }

        fn service_option(&self, _service: &str) -> Option<ServiceAuthOption> {
            None
        }
    }

    #[test]
    fn concurrent_resolve_should_share_one_result() {
        let resolver = PolicyResolver::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let method = MethodId::new("svc.Users", "Get").unwrap();

        let results: Vec<Arc<ResolvedMethodPolicy>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| resolver.resolve(&method)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect()
        });

        let first = resolver.resolve(&method);
        assert!(results.iter().all(|resolved| Arc::ptr_eq(resolved, &first)));
        assert_eq!(resolver.resolved_len(), 1);
    }

    #[test]
    fn resolve_should_memoize_per_method() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let resolver = PolicyResolver::from_shared(source.clone());
        let get = MethodId::new("svc.Users", "Get").unwrap();
        let list = MethodId::new("svc.Users", "List").unwrap();

        resolver.preload([&get]);
        assert!(resolver.resolve(&get).is_public);
        assert!(resolver.resolve(&get).is_public);
        resolver.resolve(&list);

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.resolved_len(), 2);
    }
}
