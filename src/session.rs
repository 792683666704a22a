//! Session-lookup credential variant.

use async_trait::async_trait;
use http::HeaderMap;

use crate::error::{Error, VerifyError};
use crate::extract::CookieExtractor;
use crate::identity::AuthContext;
use crate::pipeline::{Pipeline, PipelineBuilder, Verifier};
use crate::request::CallInfo;

const SESSION_TYPE: &str = "session";

/// Looks up the identity behind a session id.
///
/// The full request headers are passed along so stores can read secondary
/// cookies or CSRF tokens.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str, headers: &HeaderMap) -> Result<Option<AuthContext>, VerifyError>;
}

/// [`Verifier`] backed by a [`SessionStore`].
pub struct SessionVerifier<S> {
    store: S,
}

impl<S> SessionVerifier<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SessionStore> Verifier for SessionVerifier<S> {
    async fn verify(&self, credential: &str, call: &CallInfo<'_>) -> Result<AuthContext, VerifyError> {
        let identity = self
            .store
            .load(credential, call.headers)
            .await?
            .ok_or_else(|| Error::unauthenticated("session not found"))?;
        // Stores that did not label the identity get the session kind.
        if identity.credential_type() == "unknown" {
            return Ok(identity.with_credential_type(SESSION_TYPE));
        }
        Ok(identity)
    }
}

/// Starts a pipeline reading the session id from `cookie`, falling back to a bearer token.
pub fn session_pipeline<S>(store: S, cookie: &str) -> PipelineBuilder
where
    S: SessionStore + 'static,
{
    Pipeline::builder(SessionVerifier::new(store))
        .extractor(CookieExtractor::new(cookie).bearer_fallback(true))
}
