use crate::error::{Error, Result};
use crate::types::MethodId;
use std::borrow::Borrow;
use std::fmt;

/// Method pattern: `*`, `Service/*` or `Service/Method`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[derive(serde::Deserialize)]
#[serde(try_from = "String")]
pub struct MethodPattern(String);

impl MethodPattern {
    /// Parses and validates a pattern.
    ///
    /// Surrounding whitespace is trimmed. Patterns are case-sensitive.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPattern("pattern must not be empty".to_string()));
        }
        if trimmed == "*" {
            return Ok(Self(trimmed.to_string()));
        }
        let (service, method) = trimmed.split_once('/').ok_or_else(|| {
            Error::InvalidPattern(format!("{trimmed}: expected `*`, `Service/*` or `Service/Method`"))
        })?;
        if service.is_empty() || method.is_empty() {
            return Err(Error::InvalidPattern(format!(
                "{trimmed}: pattern must not have empty segments"
            )));
        }
        if service.contains('*') || method.contains('/') || (method != "*" && method.contains('*')) {
            return Err(Error::InvalidPattern(format!(
                "{trimmed}: wildcard is only allowed as the whole method segment"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this pattern matches `method`.
    pub fn matches(&self, method: &MethodId) -> bool {
        pattern_matches(&self.0, method.service(), method.method())
    }
}

impl fmt::Display for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MethodPattern {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MethodPattern {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for MethodPattern {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for MethodPattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// Parses a list of patterns, failing on the first invalid entry.
pub fn parse_patterns<I, P>(patterns: I) -> Result<Vec<MethodPattern>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    patterns.into_iter().map(MethodPattern::new).collect()
}

/// Returns whether any of `patterns` matches `service`/`method`.
///
/// An empty list matches nothing. `Service/*` never matches a service whose
/// name merely starts with `Service`.
pub fn matches<P: AsRef<str>>(service: &str, method: &str, patterns: &[P]) -> bool {
    patterns
        .iter()
        .any(|pattern| pattern_matches(pattern.as_ref(), service, method))
}

/// Returns whether any of `patterns` matches `method`.
pub fn matches_method(method: &MethodId, patterns: &[MethodPattern]) -> bool {
    patterns.iter().any(|pattern| pattern.matches(method))
}

fn pattern_matches(pattern: &str, service: &str, method: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let Some((p_service, p_method)) = pattern.split_once('/') else {
        return false;
    };
    if p_service != service {
        return false;
    }
    p_method == "*" || p_method == method
}
