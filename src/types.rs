use crate::error::{Error, Result};
use std::fmt;

const MAX_NAME_LEN: usize = 256;

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::configuration(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::configuration(format!(
            "{kind} length must be <= {MAX_NAME_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(Error::configuration(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

/// Fully-qualified RPC method identifier.
///
/// Displays as `service/method`, which is also the memoization key used by
/// [`PolicyResolver`](crate::PolicyResolver).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    service: String,
    method: String,
}

impl MethodId {
    /// Creates a validated method identifier.
    pub fn new(service: impl AsRef<str>, method: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            service: validate_simple_name(service.as_ref(), "service name")?,
            method: validate_simple_name(method.as_ref(), "method name")?,
        })
    }

    /// Parses a gRPC request path such as `/pkg.UserService/GetUser`.
    pub fn from_path(path: &str) -> Result<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (service, method) = trimmed
            .split_once('/')
            .ok_or_else(|| Error::configuration(format!("invalid rpc path: {path}")))?;
        Self::new(service, method)
    }

    /// Creates an identifier from trusted strings without validation.
    pub fn from_parts(service: String, method: String) -> Self {
        Self { service, method }
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the method name.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

impl TryFrom<&str> for MethodId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::from_path(value)
    }
}

/// Outcome carried by a rule or a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    /// Parses `allow` or `deny`; anything else, including an empty string, is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        })
    }
}
