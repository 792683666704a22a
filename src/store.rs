use crate::identity::Requirement;
use crate::types::MethodId;

/// Declarative auth option attached to a single method.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodAuthOption {
    /// `Some(false)` is an explicit override, distinct from `None`.
    #[serde(default)]
    pub public: Option<bool>,
    /// `"allow"` or `"deny"`; other values are ignored.
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub requires: Option<Requirement>,
}

/// Declarative auth option attached to a service, applying to all its methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAuthOption {
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub default_policy: Option<String>,
    #[serde(default)]
    pub default_requires: Option<Requirement>,
}

/// Read-only source of declarative auth options, typically backed by a schema registry.
pub trait PolicySource: Send + Sync {
    /// Returns the option declared on `method`, if any.
    fn method_option(&self, method: &MethodId) -> Option<MethodAuthOption>;

    /// Returns the option declared on `service`, if any.
    fn service_option(&self, service: &str) -> Option<ServiceAuthOption>;
}
