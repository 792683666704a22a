use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::identity::{AuthContext, Requirement};
use crate::pattern::{MethodPattern, matches_method};
use crate::policy::PolicyResolver;
use crate::types::{Effect, MethodId};

const METHOD_REQUIRES_RULE: &str = "method-requires";
const METHOD_POLICY_RULE: &str = "method-policy";
const HOOK_RULE: &str = "authorize-hook";
const DEFAULT_POLICY_RULE: &str = "default-policy";

/// Authorization decision for an authenticated or anonymous caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed.
    Allow,
    /// The call is rejected by `rule`.
    Deny {
        rule: String,
        requirement: Option<Requirement>,
    },
}

impl Decision {
    fn deny(rule: impl Into<String>, requirement: Option<Requirement>) -> Self {
        Self::Deny {
            rule: rule.into(),
            requirement,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Declarative authorization rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AuthorizationRule {
    /// Unique name, reported on denial.
    pub name: String,
    pub methods: Vec<MethodPattern>,
    pub effect: Effect,
    #[serde(default)]
    pub requires: Option<Requirement>,
}

impl AuthorizationRule {
    /// Creates a rule with no requirement.
    pub fn new<I, P>(name: impl Into<String>, methods: I, effect: Effect) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        Ok(Self {
            name: name.into(),
            methods: crate::pattern::parse_patterns(methods)?,
            effect,
            requires: None,
        })
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requires = Some(requirement);
        self
    }

    pub fn matches(&self, method: &MethodId) -> bool {
        matches_method(method, &self.methods)
    }
}

/// Programmatic authorization callback consulted after the rule list.
#[async_trait]
pub trait AuthorizeHook: Send + Sync {
    /// Returns `false` to deny.
    async fn authorize(&self, identity: &AuthContext, method: &MethodId) -> bool;
}

#[async_trait]
impl<F> AuthorizeHook for F
where
    F: Fn(&AuthContext, &MethodId) -> bool + Send + Sync,
{
    async fn authorize(&self, identity: &AuthContext, method: &MethodId) -> bool {
        self(identity, method)
    }
}

/// Rule evaluator combining declarative options, rules, a hook and a default policy.
pub struct Engine {
    resolver: Option<Arc<PolicyResolver>>,
    rules: Vec<AuthorizationRule>,
    hook: Option<Arc<dyn AuthorizeHook>>,
    default_policy: Effect,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("resolver", &self.resolver)
            .field("rules", &self.rules)
            .field("hook", &self.hook.as_ref().map(|_| "<hook>"))
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    resolver: Option<Arc<PolicyResolver>>,
    rules: Vec<AuthorizationRule>,
    hook: Option<Arc<dyn AuthorizeHook>>,
    default_policy: Effect,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a new builder with deny-by-default configuration.
    pub fn new() -> Self {
        Self {
            resolver: None,
            rules: Vec::new(),
            hook: None,
            default_policy: Effect::Deny,
        }
    }

    /// Sets the resolver for declarative per-method options.
    pub fn resolver(mut self, resolver: Arc<PolicyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Appends a rule; rules are evaluated in insertion order.
    pub fn rule(mut self, rule: AuthorizationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = AuthorizationRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn hook(mut self, hook: impl AuthorizeHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Sets the policy applied when nothing else decides.
    pub fn default_policy(mut self, policy: Effect) -> Self {
        self.default_policy = policy;
        self
    }

    /// Builds the engine, rejecting duplicate rule names.
    pub fn build(self) -> Result<Engine> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(Error::configuration("rule name must not be empty"));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(Error::configuration(format!(
                    "duplicate rule name: {}",
                    rule.name
                )));
            }
        }

        Ok(Engine {
            resolver: self.resolver,
            rules: self.rules,
            hook: self.hook,
            default_policy: self.default_policy,
        })
    }
}

impl Engine {
    /// Authorizes a call, mapping a denial to [`Error::PermissionDenied`].
    pub async fn authorize(&self, identity: Option<&AuthContext>, method: &MethodId) -> Result<()> {
        match self.decide(identity, method).await? {
            Decision::Allow => Ok(()),
            Decision::Deny { rule, requirement } => {
                tracing::debug!(
                    %method,
                    subject = identity.map(AuthContext::subject),
                    %rule,
                    ?requirement,
                    "authorization denied"
                );
                Err(Error::PermissionDenied { rule, requirement })
            }
        }
    }

    /// Evaluates the decision for a call.
    ///
    /// Fails with [`Error::Unauthenticated`] when an identity is needed but absent.
    pub async fn decide(&self, identity: Option<&AuthContext>, method: &MethodId) -> Result<Decision> {
        let resolved = self.resolver.as_ref().map(|resolver| resolver.resolve(method));

        if let Some(resolved) = resolved.as_deref() {
            if resolved.is_public {
                return Ok(Decision::Allow);
            }
            if let Some(requirement) = &resolved.requires {
                let identity = require_identity(identity)?;
                return Ok(if requirement.is_satisfied_by(identity) {
                    Decision::Allow
                } else {
                    Decision::deny(METHOD_REQUIRES_RULE, Some(requirement.clone()))
                });
            }
            if let Some(policy) = resolved.policy {
                require_identity(identity)?;
                return Ok(match policy {
                    Effect::Allow => Decision::Allow,
                    Effect::Deny => Decision::deny(METHOD_POLICY_RULE, None),
                });
            }
        }

        let mut skipped: Option<&Requirement> = None;
        for rule in &self.rules {
            if !rule.matches(method) {
                continue;
            }
            if let Some(requirement) = &rule.requires {
                // Without an identity, only unconditional rules can match.
                let Some(identity) = identity else {
                    continue;
                };
                if !requirement.is_satisfied_by(identity) {
                    tracing::trace!(%method, rule = %rule.name, "rule requirement unmet, skipping");
                    skipped = Some(requirement);
                    continue;
                }
            }
            return Ok(match rule.effect {
                Effect::Allow => Decision::Allow,
                Effect::Deny => Decision::deny(rule.name.clone(), None),
            });
        }

        if let (Some(hook), Some(identity)) = (&self.hook, identity) {
            return Ok(if hook.authorize(identity, method).await {
                Decision::Allow
            } else {
                Decision::deny(HOOK_RULE, None)
            });
        }

        match self.default_policy {
            Effect::Allow => Ok(Decision::Allow),
            Effect::Deny => {
                require_identity(identity)?;
                Ok(Decision::deny(DEFAULT_POLICY_RULE, skipped.cloned()))
            }
        }
    }
}

fn require_identity(identity: Option<&AuthContext>) -> Result<&AuthContext> {
    identity.ok_or_else(|| Error::unauthenticated("authentication required"))
}
