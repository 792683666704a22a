//! Identity injected by a trusted gateway.
//!
//! The gateway authenticates the caller and forwards the result in headers.
//! Those headers are only believed when the request carries a trust signal
//! (shared secret header or peer address) accepted by a [`TrustVerifier`].
//! Every mapped header is stripped afterwards, including on skip-listed
//! methods, so no later hop can be fooled by a spoofed value.

use async_trait::async_trait;
use http::HeaderName;
use serde_json::{Map, Value};

use crate::error::{Error, Result, VerifyError};
use crate::extract::{CredentialExtractor, parse_header_name};
use crate::identity::AuthContext;
use crate::pipeline::{Pipeline, Verifier};
use crate::propagation::{MAX_HEADER_BYTES, PropagationOptions, header_str};
use crate::request::CallInfo;
use crate::trust::TrustVerifier;

const GATEWAY_TYPE: &str = "gateway";

/// Where the trust signal comes from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustSignal {
    /// A header holding a shared secret or forwarded address.
    Header(String),
    /// The transport-level peer address.
    PeerAddress,
}

/// Declarative gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub subject_header: String,
    #[serde(default)]
    pub name_header: Option<String>,
    #[serde(default)]
    pub roles_header: Option<String>,
    #[serde(default)]
    pub scopes_header: Option<String>,
    #[serde(default)]
    pub type_header: Option<String>,
    #[serde(default)]
    pub claims_header: Option<String>,
    pub trust_signal: TrustSignal,
    /// Exact tokens or IPv4 CIDR ranges.
    pub trusted_values: Vec<String>,
    /// Extra headers removed alongside the mapped ones.
    #[serde(default)]
    pub strip_headers: Vec<String>,
    #[serde(default)]
    pub skip_methods: Vec<String>,
    /// Re-emit the identity as standard propagation headers.
    #[serde(default)]
    pub propagate: bool,
    #[serde(default)]
    pub propagate_claims: Option<Vec<String>>,
}

impl GatewayConfig {
    /// Minimal configuration: subject header plus trust signal and accepted values.
    pub fn new<I, S>(subject_header: impl Into<String>, trust_signal: TrustSignal, trusted_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject_header: subject_header.into(),
            name_header: None,
            roles_header: None,
            scopes_header: None,
            type_header: None,
            claims_header: None,
            trust_signal,
            trusted_values: trusted_values.into_iter().map(Into::into).collect(),
            strip_headers: Vec::new(),
            skip_methods: Vec::new(),
            propagate: false,
            propagate_claims: None,
        }
    }

    pub fn name_header(mut self, name: impl Into<String>) -> Self {
        self.name_header = Some(name.into());
        self
    }

    pub fn roles_header(mut self, name: impl Into<String>) -> Self {
        self.roles_header = Some(name.into());
        self
    }

    pub fn scopes_header(mut self, name: impl Into<String>) -> Self {
        self.scopes_header = Some(name.into());
        self
    }

    pub fn type_header(mut self, name: impl Into<String>) -> Self {
        self.type_header = Some(name.into());
        self
    }

    pub fn claims_header(mut self, name: impl Into<String>) -> Self {
        self.claims_header = Some(name.into());
        self
    }

    pub fn strip_header(mut self, name: impl Into<String>) -> Self {
        self.strip_headers.push(name.into());
        self
    }

    pub fn skip_method(mut self, pattern: impl Into<String>) -> Self {
        self.skip_methods.push(pattern.into());
        self
    }

    pub fn propagate(mut self, on: bool) -> Self {
        self.propagate = on;
        self
    }

    /// Builds the gateway pipeline, failing closed on incomplete trust configuration.
    pub fn build(self) -> Result<Pipeline> {
        if self.subject_header.trim().is_empty() {
            return Err(Error::configuration("gateway subject header is required"));
        }
        if self.trusted_values.is_empty() {
            return Err(Error::configuration(
                "gateway requires at least one trusted value",
            ));
        }

        let headers = GatewayHeaders {
            subject: parse_header_name(&self.subject_header)?,
            name: optional_header(self.name_header.as_deref())?,
            roles: optional_header(self.roles_header.as_deref())?,
            scopes: optional_header(self.scopes_header.as_deref())?,
            kind: optional_header(self.type_header.as_deref())?,
            claims: optional_header(self.claims_header.as_deref())?,
        };
        let extractor = match &self.trust_signal {
            TrustSignal::Header(name) => TrustSignalExtractor::Header(parse_header_name(name)?),
            TrustSignal::PeerAddress => TrustSignalExtractor::PeerAddress,
        };

        let mut strip: Vec<String> = headers.mapped().map(|name| name.as_str().to_string()).collect();
        if let TrustSignalExtractor::Header(name) = &extractor {
            strip.push(name.as_str().to_string());
        }
        strip.extend(self.strip_headers);

        let mut builder = Pipeline::builder(GatewayVerifier {
            trust: TrustVerifier::new(self.trusted_values),
            headers,
        })
        .extractor(extractor)
        .skip_methods(self.skip_methods)
        .strip_headers(strip);

        if self.propagate {
            let options = match self.propagate_claims {
                Some(keys) => PropagationOptions::new().allow_claims(keys),
                None => PropagationOptions::new(),
            };
            builder = builder.propagate(options);
        }
        builder.build()
    }
}

fn optional_header(name: Option<&str>) -> Result<Option<HeaderName>> {
    name.map(parse_header_name).transpose()
}

#[derive(Debug, Clone)]
struct GatewayHeaders {
    subject: HeaderName,
    name: Option<HeaderName>,
    roles: Option<HeaderName>,
    scopes: Option<HeaderName>,
    kind: Option<HeaderName>,
    claims: Option<HeaderName>,
}

impl GatewayHeaders {
    fn mapped(&self) -> impl Iterator<Item = &HeaderName> {
        std::iter::once(&self.subject).chain(
            [&self.name, &self.roles, &self.scopes, &self.kind, &self.claims]
                .into_iter()
                .flatten(),
        )
    }
}

/// Reads the gateway trust signal as the pipeline credential.
#[derive(Debug, Clone)]
pub enum TrustSignalExtractor {
    Header(HeaderName),
    PeerAddress,
}

impl CredentialExtractor for TrustSignalExtractor {
    fn extract(&self, call: &CallInfo<'_>) -> Option<String> {
        match self {
            Self::Header(name) => header_str(call.headers, name)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            Self::PeerAddress => call.peer_addr.map(|addr| addr.to_canonical().to_string()),
        }
    }
}

struct GatewayVerifier {
    trust: TrustVerifier,
    headers: GatewayHeaders,
}

#[async_trait]
impl Verifier for GatewayVerifier {
    async fn verify(&self, signal: &str, call: &CallInfo<'_>) -> std::result::Result<AuthContext, VerifyError> {
        if !self.trust.is_trusted(signal) {
            tracing::warn!(method = %call.method, "rejected identity headers from untrusted source");
            return Err(Box::new(Error::unauthenticated("untrusted gateway")));
        }
        Ok(self.read_identity(call)?)
    }
}

impl GatewayVerifier {
    fn read_identity(&self, call: &CallInfo<'_>) -> Result<AuthContext> {
        let headers = call.headers;
        let subject = header_str(headers, &self.headers.subject)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::unauthenticated("missing subject"))?;

        let read = |name: &Option<HeaderName>| {
            name.as_ref()
                .and_then(|name| header_str(headers, name))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let mut builder = AuthContext::builder(subject)
            .credential_type(read(&self.headers.kind).unwrap_or(GATEWAY_TYPE))
            .roles(read(&self.headers.roles).map(parse_roles).unwrap_or_default())
            .scopes(
                read(&self.headers.scopes)
                    .map(|value| value.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_else(Vec::new),
            );
        if let Some(name) = read(&self.headers.name) {
            builder = builder.display_name(name);
        }
        if let Some(raw) = read(&self.headers.claims) {
            builder = builder.claims(parse_claims(raw));
        }
        Ok(builder.build())
    }
}

/// Claims must be a JSON object within the header size cap; anything else is dropped.
fn parse_claims(raw: &str) -> Map<String, Value> {
    if raw.len() > MAX_HEADER_BYTES {
        tracing::debug!(len = raw.len(), "ignoring oversized gateway claims header");
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(claims)) => claims,
        _ => {
            tracing::debug!("ignoring malformed gateway claims header");
            Map::new()
        }
    }
}

/// Roles arrive as a JSON array or, failing that, comma-separated text.
fn parse_roles(value: &str) -> Vec<String> {
    if let Ok(roles) = serde_json::from_str::<Vec<String>>(value) {
        return roles;
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RpcRequest;
    use crate::types::MethodId;
    use futures::executor::block_on;
    use http::HeaderValue;

    const SECRET: &str = "gw-shared-secret";

    fn config() -> GatewayConfig {
        GatewayConfig::new(
            "x-user-id",
            TrustSignal::Header("x-gateway-secret".to_string()),
            [SECRET],
        )
        .name_header("x-user-name")
        .roles_header("x-user-roles")
        .scopes_header("x-user-scopes")
        .claims_header("x-user-claims")
        .strip_header("x-internal-debug")
    }

    fn request(pairs: &[(&'static str, &str)]) -> RpcRequest {
        let mut request = RpcRequest::new(MethodId::new("svc.Orders", "List").unwrap());
        for (name, value) in pairs {
            request.headers_mut().insert(
                HeaderName::from_static(*name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        request
    }

    #[test]
    fn build_should_fail_closed_without_trusted_values() {
        let empty: [&str; 0] = [];
        let result = GatewayConfig::new("x-user-id", TrustSignal::PeerAddress, empty).build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn build_should_require_subject_header() {
        let result = GatewayConfig::new(" ", TrustSignal::PeerAddress, ["10.0.0.0/8"]).build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn trusted_request_should_yield_identity_and_strip_headers() {
        let pipeline = config().build().unwrap();
        let mut req = request(&[
            ("x-gateway-secret", SECRET),
            ("x-user-id", "u-7"),
            ("x-user-name", "Grace"),
            ("x-user-roles", r#"["admin","ops"]"#),
            ("x-user-scopes", "orders:read orders:write"),
            ("x-user-claims", r#"{"tenant":"acme"}"#),
            ("x-internal-debug", "1"),
        ]);

        let identity = block_on(pipeline.authenticate(&mut req)).unwrap().unwrap();

        assert_eq!(identity.subject(), "u-7");
        assert_eq!(identity.display_name(), Some("Grace"));
        assert_eq!(identity.roles(), ["admin", "ops"]);
        assert_eq!(identity.scopes(), ["orders:read", "orders:write"]);
        assert_eq!(identity.credential_type(), "gateway");
        assert_eq!(identity.claims().get("tenant"), Some(&serde_json::json!("acme")));
        for name in [
            "x-gateway-secret",
            "x-user-id",
            "x-user-name",
            "x-user-roles",
            "x-user-claims",
            "x-internal-debug",
        ] {
            assert!(!req.headers().contains_key(name), "{name} should be stripped");
        }
    }

    #[test]
    fn roles_should_fall_back_to_comma_separated() {
        assert_eq!(parse_roles("admin, ops ,,viewer"), ["admin", "ops", "viewer"]);
        assert_eq!(parse_roles(r#"["a"]"#), ["a"]);
    }

    #[test]
    fn invalid_claims_should_yield_empty_map() {
        let pipeline = config().build().unwrap();
        let oversized = format!(r#"{{"blob":"{}"}}"#, "x".repeat(MAX_HEADER_BYTES));
        for claims in ["[1,2,3]", "{not json", "\"text\"", oversized.as_str()] {
            let mut req = request(&[
                ("x-gateway-secret", SECRET),
                ("x-user-id", "u-7"),
                ("x-user-claims", claims),
            ]);
            let identity = block_on(pipeline.authenticate(&mut req)).unwrap().unwrap();
            assert!(identity.claims().is_empty());
        }
    }

    #[test]
    fn wrong_secret_should_be_unauthenticated() {
        let pipeline = config().build().unwrap();
        let mut req = request(&[("x-gateway-secret", "guess"), ("x-user-id", "root")]);
        let err = block_on(pipeline.authenticate(&mut req)).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(ref msg) if msg == "untrusted gateway"));
    }

    #[test]
    fn missing_signal_or_subject_should_be_unauthenticated() {
        let pipeline = config().build().unwrap();

        let mut no_signal = request(&[("x-user-id", "root")]);
        assert!(matches!(
            block_on(pipeline.authenticate(&mut no_signal)),
            Err(Error::Unauthenticated(_))
        ));

        let mut no_subject = request(&[("x-gateway-secret", SECRET)]);
        let err = block_on(pipeline.authenticate(&mut no_subject)).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(ref msg) if msg == "missing subject"));
    }

    #[test]
    fn skipped_method_should_still_strip_identity_headers() {
        let pipeline = config().skip_method("svc.Orders/*").build().unwrap();
        let mut req = request(&[("x-user-id", "spoofed"), ("x-user-roles", "admin")]);

        let result = block_on(pipeline.authenticate(&mut req)).unwrap();

        assert!(result.is_none());
        assert!(!req.headers().contains_key("x-user-id"));
        assert!(!req.headers().contains_key("x-user-roles"));
    }

    #[test]
    fn skipped_method_should_drop_spoofed_propagation_headers() {
        let pipeline = config().skip_method("svc.Orders/*").propagate(true).build().unwrap();
        let mut req = request(&[
            ("x-gateway-secret", SECRET),
            ("x-auth-subject", "root"),
            ("x-auth-roles", r#"["admin"]"#),
        ]);

        assert!(block_on(pipeline.authenticate(&mut req)).unwrap().is_none());
        assert!(crate::propagation::read_identity(req.headers()).is_none());
        assert!(!req.headers().contains_key("x-gateway-secret"));
    }

    #[test]
    fn peer_address_should_be_checked_against_cidr() {
        let pipeline = GatewayConfig::new("x-user-id", TrustSignal::PeerAddress, ["10.0.0.0/8"])
            .build()
            .unwrap();

        let mut trusted = request(&[("x-user-id", "svc-a")]).with_peer_addr("10.1.2.3".parse().unwrap());
        assert!(block_on(pipeline.authenticate(&mut trusted)).unwrap().is_some());

        let mut untrusted =
            request(&[("x-user-id", "svc-a")]).with_peer_addr("203.0.113.9".parse().unwrap());
        assert!(block_on(pipeline.authenticate(&mut untrusted)).is_err());

        let mut mapped =
            request(&[("x-user-id", "svc-a")]).with_peer_addr("::ffff:10.1.2.3".parse().unwrap());
        assert!(block_on(pipeline.authenticate(&mut mapped)).unwrap().is_some());
    }

    #[test]
    fn config_should_deserialize_from_json() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "subjectHeader": "x-user-id",
                "rolesHeader": "x-user-roles",
                "trustSignal": {"header": "x-gateway-secret"},
                "trustedValues": ["s3cr3t"],
                "propagate": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.trust_signal, TrustSignal::Header("x-gateway-secret".to_string()));
        assert!(config.build().is_ok());
    }
}
