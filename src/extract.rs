use http::header::{AUTHORIZATION, COOKIE, HeaderName};

use crate::error::{Error, Result};
use crate::propagation::header_str;
use crate::request::CallInfo;

/// Pulls the raw credential out of a call.
///
/// Returning `None` means no credential was presented.
pub trait CredentialExtractor: Send + Sync {
    fn extract(&self, call: &CallInfo<'_>) -> Option<String>;
}

impl<F> CredentialExtractor for F
where
    F: Fn(&CallInfo<'_>) -> Option<String> + Send + Sync,
{
    fn extract(&self, call: &CallInfo<'_>) -> Option<String> {
        self(call)
    }
}

/// Extracts `<token>` from `authorization: Bearer <token>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerExtractor;

impl CredentialExtractor for BearerExtractor {
    fn extract(&self, call: &CallInfo<'_>) -> Option<String> {
        bearer_token(call)
    }
}

/// Extracts the raw value of a header, e.g. `x-api-key`.
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    name: HeaderName,
}

impl HeaderExtractor {
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            name: parse_header_name(name)?,
        })
    }
}

impl CredentialExtractor for HeaderExtractor {
    fn extract(&self, call: &CallInfo<'_>) -> Option<String> {
        header_str(call.headers, &self.name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Extracts a session id from a named cookie, optionally falling back to a bearer token.
#[derive(Debug, Clone)]
pub struct CookieExtractor {
    cookie: String,
    bearer_fallback: bool,
}

impl CookieExtractor {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            bearer_fallback: false,
        }
    }

    /// Accepts `authorization: Bearer <id>` when the cookie is absent.
    pub fn bearer_fallback(mut self, on: bool) -> Self {
        self.bearer_fallback = on;
        self
    }
}

impl CredentialExtractor for CookieExtractor {
    fn extract(&self, call: &CallInfo<'_>) -> Option<String> {
        let from_cookie = call
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| std::str::from_utf8(value.as_bytes()).ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie && !value.is_empty())
            .map(|(_, value)| value.to_string());
        match from_cookie {
            Some(value) => Some(value),
            None if self.bearer_fallback => bearer_token(call),
            None => None,
        }
    }
}

fn bearer_token(call: &CallInfo<'_>) -> Option<String> {
    let value = header_str(call.headers, &AUTHORIZATION)?;
    let (scheme, token) = value.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
        .map_err(|_| Error::configuration(format!("invalid header name: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RpcRequest;
    use crate::types::MethodId;
    use http::HeaderValue;

    fn request(name: HeaderName, value: &'static str) -> RpcRequest {
        RpcRequest::new(MethodId::new("svc.Foo", "Bar").unwrap())
            .with_header(name, HeaderValue::from_static(value))
    }

    #[test]
    fn bearer_should_strip_prefix() {
        let req = request(AUTHORIZATION, "Bearer abc.def");
        assert_eq!(BearerExtractor.extract(&req.info()).as_deref(), Some("abc.def"));
    }

    #[test]
    fn bearer_should_reject_other_schemes_and_empty_tokens() {
        assert!(BearerExtractor.extract(&request(AUTHORIZATION, "Basic Zm9v").info()).is_none());
        assert!(BearerExtractor.extract(&request(AUTHORIZATION, "Bearer ").info()).is_none());
        assert!(BearerExtractor.extract(&request(AUTHORIZATION, "Bear").info()).is_none());
    }

    #[test]
    fn header_extractor_should_read_named_header() {
        let extractor = HeaderExtractor::new("X-Api-Key").unwrap();
        let req = request(HeaderName::from_static("x-api-key"), " key-123 ");
        assert_eq!(extractor.extract(&req.info()).as_deref(), Some("key-123"));
    }

    #[test]
    fn cookie_extractor_should_find_named_cookie() {
        let extractor = CookieExtractor::new("sid");
        let req = request(COOKIE, "theme=dark; sid=sess-9; lang=en");
        assert_eq!(extractor.extract(&req.info()).as_deref(), Some("sess-9"));
    }

    #[test]
    fn cookie_extractor_should_fall_back_to_bearer_when_enabled() {
        let req = request(AUTHORIZATION, "Bearer sess-1");
        assert!(CookieExtractor::new("sid").extract(&req.info()).is_none());
        let extractor = CookieExtractor::new("sid").bearer_fallback(true);
        assert_eq!(extractor.extract(&req.info()).as_deref(), Some("sess-1"));
    }

    #[test]
    fn invalid_header_name_should_fail_construction() {
        assert!(matches!(HeaderExtractor::new("bad header"), Err(Error::Configuration(_))));
    }
}
