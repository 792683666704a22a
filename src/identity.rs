use serde_json::{Map, Value};
use std::time::SystemTime;

/// Verified identity of the caller.
///
/// Built once per call by a credential pipeline and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    subject: String,
    display_name: Option<String>,
    roles: Vec<String>,
    scopes: Vec<String>,
    claims: Map<String, Value>,
    credential_type: String,
    expires_at: Option<SystemTime>,
}

impl AuthContext {
    /// Starts building an identity for `subject`.
    pub fn builder(subject: impl Into<String>) -> AuthContextBuilder {
        AuthContextBuilder {
            subject: subject.into(),
            display_name: None,
            roles: Vec::new(),
            scopes: Vec::new(),
            claims: Map::new(),
            credential_type: "unknown".to_string(),
            expires_at: None,
        }
    }

    /// Unique caller identifier.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Roles in first-seen order, without duplicates.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Scopes in first-seen order, without duplicates.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Raw claims as reported by the verifier.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Credential kind, e.g. `jwt`, `api-key`, `gateway` or `session`.
    pub fn credential_type(&self) -> &str {
        &self.credential_type
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|existing| existing == role)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|existing| existing == scope)
    }

    /// Returns the identity with its credential kind replaced.
    pub fn with_credential_type(mut self, kind: impl Into<String>) -> Self {
        self.credential_type = kind.into();
        self
    }

    /// Returns whether the identity carries an expiry at or before `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Builder for [`AuthContext`].
#[derive(Debug, Clone)]
pub struct AuthContextBuilder {
    subject: String,
    display_name: Option<String>,
    roles: Vec<String>,
    scopes: Vec<String>,
    claims: Map<String, Value>,
    credential_type: String,
    expires_at: Option<SystemTime>,
}

impl AuthContextBuilder {
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Adds roles; duplicates are ignored.
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.roles, roles);
        self
    }

    /// Adds scopes; duplicates are ignored.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.scopes, scopes);
        self
    }

    pub fn claims(mut self, claims: Map<String, Value>) -> Self {
        self.claims = claims;
        self
    }

    pub fn claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    pub fn credential_type(mut self, kind: impl Into<String>) -> Self {
        self.credential_type = kind.into();
        self
    }

    pub fn expires_at(mut self, at: SystemTime) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn build(self) -> AuthContext {
        AuthContext {
            subject: self.subject,
            display_name: self.display_name,
            roles: self.roles,
            scopes: self.scopes,
            claims: self.claims,
            credential_type: self.credential_type,
            expires_at: self.expires_at,
        }
    }
}

fn extend_unique<I, S>(target: &mut Vec<String>, values: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for value in values {
        let value = value.into();
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

/// Role and scope requirement attached to a method or rule.
///
/// Roles are satisfied by any one of the listed roles; scopes require every
/// listed scope. Empty lists are always satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct Requirement {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Requirement {
    /// Requirement on roles only.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            scopes: Vec::new(),
        }
    }

    /// Requirement on scopes only.
    pub fn scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: Vec::new(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds scopes to an existing requirement.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.scopes.is_empty()
    }

    pub fn is_satisfied_by(&self, identity: &AuthContext) -> bool {
        let roles_ok =
            self.roles.is_empty() || self.roles.iter().any(|role| identity.has_role(role));
        let scopes_ok = self.scopes.iter().all(|scope| identity.has_scope(scope));
        roles_ok && scopes_ok
    }
}
