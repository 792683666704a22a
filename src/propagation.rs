//! Identity propagation headers for forwarding to a downstream hop.
//!
//! Every value is capped at [`MAX_HEADER_BYTES`]. Oversized values are omitted
//! on write and read back as empty collections.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

use crate::identity::AuthContext;

pub const SUBJECT_HEADER: HeaderName = HeaderName::from_static("x-auth-subject");
pub const TYPE_HEADER: HeaderName = HeaderName::from_static("x-auth-type");
pub const NAME_HEADER: HeaderName = HeaderName::from_static("x-auth-name");
pub const ROLES_HEADER: HeaderName = HeaderName::from_static("x-auth-roles");
pub const SCOPES_HEADER: HeaderName = HeaderName::from_static("x-auth-scopes");
pub const CLAIMS_HEADER: HeaderName = HeaderName::from_static("x-auth-claims");

/// Upper bound for any single propagated value.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const UNKNOWN_TYPE: &str = "unknown";

/// Options controlling what gets propagated.
#[derive(Debug, Clone, Default)]
pub struct PropagationOptions {
    claim_allow_list: Option<Vec<String>>,
}

impl PropagationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only propagate claims whose key is listed.
    pub fn allow_claims<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.claim_allow_list = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    fn claim_allowed(&self, key: &str) -> bool {
        self.claim_allow_list
            .as_ref()
            .is_none_or(|keys| keys.iter().any(|allowed| allowed == key))
    }
}

/// All header names used for propagation.
pub fn identity_headers() -> [HeaderName; 6] {
    [
        SUBJECT_HEADER,
        TYPE_HEADER,
        NAME_HEADER,
        ROLES_HEADER,
        SCOPES_HEADER,
        CLAIMS_HEADER,
    ]
}

/// Removes every propagation header.
pub fn strip_identity(headers: &mut HeaderMap) {
    for name in identity_headers() {
        headers.remove(name);
    }
}

/// Writes `identity` into `headers`, replacing any previous propagation headers.
pub fn write_identity(headers: &mut HeaderMap, identity: &AuthContext, options: &PropagationOptions) {
    strip_identity(headers);

    insert_capped(headers, SUBJECT_HEADER, sanitize(identity.subject()));
    insert_capped(headers, TYPE_HEADER, sanitize(identity.credential_type()));
    if let Some(name) = identity.display_name() {
        insert_capped(headers, NAME_HEADER, sanitize(name));
    }
    if !identity.roles().is_empty() {
        match serde_json::to_string(identity.roles()) {
            Ok(json) => insert_capped(headers, ROLES_HEADER, json),
            Err(err) => tracing::warn!("failed to encode roles for propagation: {err}"),
        }
    }
    if !identity.scopes().is_empty() {
        insert_capped(headers, SCOPES_HEADER, identity.scopes().join(" "));
    }

    let claims: Map<String, Value> = identity
        .claims()
        .iter()
        .filter(|(key, _)| options.claim_allowed(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !claims.is_empty() {
        match serde_json::to_string(&claims) {
            Ok(json) => insert_capped(headers, CLAIMS_HEADER, json),
            Err(err) => tracing::warn!("failed to encode claims for propagation: {err}"),
        }
    }
}

/// Reads an identity previously written by [`write_identity`].
///
/// Returns `None` when the subject header is missing or empty. Malformed or
/// oversized collections read back as empty.
pub fn read_identity(headers: &HeaderMap) -> Option<AuthContext> {
    let subject = header_str(headers, &SUBJECT_HEADER).filter(|value| !value.is_empty())?;
    let kind = header_str(headers, &TYPE_HEADER)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_TYPE);

    let mut builder = AuthContext::builder(subject)
        .credential_type(kind)
        .roles(parse_json_list(bounded(headers, &ROLES_HEADER)))
        .scopes(
            bounded(headers, &SCOPES_HEADER)
                .map(|value| value.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                .unwrap_or_default(),
        )
        .claims(parse_json_object(bounded(headers, &CLAIMS_HEADER)));
    if let Some(name) = header_str(headers, &NAME_HEADER) {
        builder = builder.display_name(name);
    }
    Some(builder.build())
}

/// Header value as UTF-8, if present and decodable.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
}

fn bounded<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    header_str(headers, name).filter(|value| value.len() <= MAX_HEADER_BYTES)
}

/// Parses a JSON array of strings; anything else yields an empty list.
pub(crate) fn parse_json_list(value: Option<&str>) -> Vec<String> {
    value
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default()
}

/// Parses a JSON object; arrays, scalars and invalid JSON yield an empty map.
pub(crate) fn parse_json_object(value: Option<&str>) -> Map<String, Value> {
    match value.and_then(|raw| serde_json::from_str::<Value>(raw).ok()) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn sanitize(value: &str) -> String {
    // CR and LF are not representable in a header value, so only tab survives.
    value
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\t')
        .collect()
}

fn insert_capped(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if value.len() > MAX_HEADER_BYTES {
        tracing::warn!(header = %name, len = value.len(), "dropping oversized propagation header");
        return;
    }
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "dropping unencodable propagation header"),
    }
}
