//! Signed-token credential variant.
//!
//! Signature, expiry, issuer and audience checks are done by `jsonwebtoken`.
//! This module picks the key, enforces the allowed algorithms and maps claims
//! into an [`AuthContext`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
pub use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};

use crate::error::{Error, Result, VerifyError};
use crate::identity::AuthContext;
use crate::pipeline::{Pipeline, PipelineBuilder, Verifier};
use crate::request::CallInfo;

const JWT_TYPE: &str = "jwt";

/// Supplies the current key set, e.g. from a cached JWKS endpoint.
#[async_trait]
pub trait JwkSetSource: Send + Sync {
    async fn jwk_set(&self) -> std::result::Result<JwkSet, VerifyError>;
}

/// Fixed key set.
#[derive(Debug, Clone)]
pub struct StaticJwkSet(JwkSet);

impl StaticJwkSet {
    pub fn new(set: JwkSet) -> Self {
        Self(set)
    }

    /// Parses a JWKS document.
    pub fn from_json(document: &str) -> Result<Self> {
        serde_json::from_str(document)
            .map(Self)
            .map_err(|err| Error::configuration(format!("invalid JWKS document: {err}")))
    }
}

#[async_trait]
impl JwkSetSource for StaticJwkSet {
    async fn jwk_set(&self) -> std::result::Result<JwkSet, VerifyError> {
        Ok(self.0.clone())
    }
}

/// Where verification keys come from. Exactly one must be configured.
#[derive(Clone)]
pub enum KeySource {
    Secret(Vec<u8>),
    PublicKeyPem(Vec<u8>),
    KeySet(Arc<dyn JwkSetSource>),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::PublicKeyPem(_) => f.write_str("PublicKeyPem(..)"),
            Self::KeySet(_) => f.write_str("KeySet(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

fn family(alg: Algorithm) -> Family {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Family::Hmac,
        Algorithm::ES256 | Algorithm::ES384 => Family::Ec,
        Algorithm::EdDSA => Family::Ed,
        _ => Family::Rsa,
    }
}

fn hmac_min_len(alg: Algorithm) -> Option<usize> {
    match alg {
        Algorithm::HS256 => Some(32),
        Algorithm::HS384 => Some(48),
        Algorithm::HS512 => Some(64),
        _ => None,
    }
}

/// Builder for [`JwtVerifier`].
#[derive(Debug, Clone)]
pub struct JwtConfig {
    sources: Vec<KeySource>,
    algorithms: Vec<Algorithm>,
    issuers: Vec<String>,
    audiences: Vec<String>,
    max_age: Option<Duration>,
    leeway: Duration,
    subject_claim: String,
    roles_claim: String,
    scopes_claim: String,
    name_claim: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            algorithms: Vec::new(),
            issuers: Vec::new(),
            audiences: Vec::new(),
            max_age: None,
            leeway: Duration::from_secs(60),
            subject_claim: "sub".to_string(),
            roles_claim: "roles".to_string(),
            scopes_claim: "scope".to_string(),
            name_claim: "name".to_string(),
        }
    }
}

impl JwtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies HMAC signatures with a shared secret.
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.sources.push(KeySource::Secret(secret.into()));
        self
    }

    /// Verifies asymmetric signatures with a PEM-encoded public key.
    pub fn public_key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.sources.push(KeySource::PublicKeyPem(pem.into()));
        self
    }

    /// Selects the key by `kid` from a key set.
    pub fn key_set(mut self, source: impl JwkSetSource + 'static) -> Self {
        self.sources.push(KeySource::KeySet(Arc::new(source)));
        self
    }

    /// Allowed signature algorithms. Defaults to HS256 for secrets and RS256 otherwise.
    pub fn algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.algorithms = algorithms.into_iter().collect();
        self
    }

    pub fn issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    pub fn audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Rejects tokens whose `iat` is older than `max_age`.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Clock skew tolerated on `exp`, `nbf` and `iat`.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Dotted path of the subject claim, `sub` by default.
    pub fn subject_claim(mut self, path: impl Into<String>) -> Self {
        self.subject_claim = path.into();
        self
    }

    /// Dotted path of the roles claim, e.g. `realm_access.roles`.
    pub fn roles_claim(mut self, path: impl Into<String>) -> Self {
        self.roles_claim = path.into();
        self
    }

    pub fn scopes_claim(mut self, path: impl Into<String>) -> Self {
        self.scopes_claim = path.into();
        self
    }

    pub fn name_claim(mut self, path: impl Into<String>) -> Self {
        self.name_claim = path.into();
        self
    }

    /// Validates the key configuration and builds the verifier.
    pub fn build(mut self) -> Result<JwtVerifier> {
        let source = match self.sources.len() {
            0 => return Err(Error::configuration("no JWT key source configured")),
            1 => self.sources.remove(0),
            _ => {
                return Err(Error::configuration(
                    "exactly one JWT key source may be configured",
                ));
            }
        };

        let algorithms = if self.algorithms.is_empty() {
            match source {
                KeySource::Secret(_) => vec![Algorithm::HS256],
                _ => vec![Algorithm::RS256],
            }
        } else {
            self.algorithms
        };

        let keys = match source {
            KeySource::Secret(secret) => {
                for alg in &algorithms {
                    let min = hmac_min_len(*alg).ok_or_else(|| {
                        Error::configuration(format!("{alg:?} cannot be used with a shared secret"))
                    })?;
                    if secret.len() < min {
                        return Err(Error::configuration(format!(
                            "{alg:?} requires a secret of at least {min} bytes"
                        )));
                    }
                }
                Keys::Static(DecodingKey::from_secret(&secret))
            }
            KeySource::PublicKeyPem(pem) => {
                let first = family(algorithms[0]);
                if algorithms.iter().any(|alg| family(*alg) != first) {
                    return Err(Error::configuration(
                        "algorithms for a public key must share one key type",
                    ));
                }
                let key = match first {
                    Family::Rsa => DecodingKey::from_rsa_pem(&pem),
                    Family::Ec => DecodingKey::from_ec_pem(&pem),
                    Family::Ed => DecodingKey::from_ed_pem(&pem),
                    Family::Hmac => {
                        return Err(Error::configuration(
                            "HMAC algorithms require a shared secret",
                        ));
                    }
                }
                .map_err(|err| Error::configuration(format!("invalid public key: {err}")))?;
                Keys::Static(key)
            }
            KeySource::KeySet(source) => Keys::KeySet(source),
        };

        Ok(JwtVerifier {
            keys,
            algorithms,
            issuers: self.issuers,
            audiences: self.audiences,
            max_age: self.max_age,
            leeway: self.leeway,
            subject_claim: self.subject_claim,
            roles_claim: self.roles_claim,
            scopes_claim: self.scopes_claim,
            name_claim: self.name_claim,
        })
    }

    /// Builds the verifier and starts a bearer-token pipeline around it.
    pub fn pipeline(self) -> Result<PipelineBuilder> {
        Ok(Pipeline::builder(self.build()?))
    }
}

enum Keys {
    Static(DecodingKey),
    KeySet(Arc<dyn JwkSetSource>),
}

/// [`Verifier`] for signed tokens.
pub struct JwtVerifier {
    keys: Keys,
    algorithms: Vec<Algorithm>,
    issuers: Vec<String>,
    audiences: Vec<String>,
    max_age: Option<Duration>,
    leeway: Duration,
    subject_claim: String,
    roles_claim: String,
    scopes_claim: String,
    name_claim: String,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.algorithms)
            .field("issuers", &self.issuers)
            .field("audiences", &self.audiences)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Verifier for JwtVerifier {
    async fn verify(&self, token: &str, _call: &CallInfo<'_>) -> std::result::Result<AuthContext, VerifyError> {
        let header = decode_header(token)?;
        if !self.algorithms.contains(&header.alg) {
            return Err(Box::new(Error::unauthenticated("token algorithm not allowed")));
        }

        let selected;
        let key = match &self.keys {
            Keys::Static(key) => key,
            Keys::KeySet(source) => {
                let set = source.jwk_set().await?;
                selected = select_key(&set, header.kid.as_deref())?;
                &selected
            }
        };

        let data = decode::<Map<String, Value>>(token, key, &self.validation(header.alg))?;
        self.check_age(&data.claims)?;
        Ok(self.identity(data.claims)?)
    }
}

impl JwtVerifier {
    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        if !self.issuers.is_empty() {
            validation.set_issuer(self.issuers.as_slice());
        }
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.audiences.as_slice());
        }
        validation
    }

    fn check_age(&self, claims: &Map<String, Value>) -> Result<()> {
        let Some(max_age) = self.max_age else {
            return Ok(());
        };
        let issued_at = claims
            .get("iat")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::unauthenticated("token missing iat"))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        if now.saturating_sub(issued_at) > max_age.as_secs().saturating_add(self.leeway.as_secs()) {
            return Err(Error::unauthenticated("token too old"));
        }
        Ok(())
    }

    fn identity(&self, claims: Map<String, Value>) -> Result<AuthContext> {
        let subject = claim_path(&claims, &self.subject_claim)
            .and_then(Value::as_str)
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| Error::unauthenticated("missing subject"))?
            .to_string();
        let roles = string_list(claim_path(&claims, &self.roles_claim));
        let scopes = string_list(claim_path(&claims, &self.scopes_claim));
        let name = claim_path(&claims, &self.name_claim)
            .and_then(Value::as_str)
            .map(str::to_string);
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_u64)
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));

        let mut builder = AuthContext::builder(subject)
            .credential_type(JWT_TYPE)
            .roles(roles)
            .scopes(scopes);
        if let Some(name) = name {
            builder = builder.display_name(name);
        }
        if let Some(at) = expires_at {
            builder = builder.expires_at(at);
        }
        Ok(builder.claims(claims).build())
    }
}

fn select_key(set: &JwkSet, kid: Option<&str>) -> std::result::Result<DecodingKey, VerifyError> {
    let jwk = match kid {
        Some(kid) => set.find(kid),
        None if set.keys.len() == 1 => set.keys.first(),
        None => None,
    }
    .ok_or_else(|| Error::unauthenticated("no matching signing key"))?;
    Ok(DecodingKey::from_jwk(jwk)?)
}

fn claim_path<'a>(claims: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = claims.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Accepts a list of strings or a space-delimited string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(text)) => text.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
