//! Credential pipeline: extract, consult cache, verify, bind, propagate.
//!
//! Every credential variant (custom, token, gateway, session) is a
//! [`Pipeline`] assembled from an extractor and a verifier, so caching,
//! header stripping and propagation behave the same everywhere.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use http::HeaderName;

use crate::cache::{CredentialCache, NoCache};
use crate::context;
use crate::error::{Error, Result, VerifyError};
use crate::extract::{BearerExtractor, CredentialExtractor, parse_header_name};
use crate::identity::AuthContext;
use crate::pattern::{MethodPattern, matches_method, parse_patterns};
use crate::propagation::{PropagationOptions, strip_identity, write_identity};
use crate::request::{CallInfo, RpcRequest};

/// Turns a raw credential into an identity.
///
/// Returning a boxed crate [`Error`] propagates it unchanged; any other error
/// is reported to the caller as a generic authentication failure.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, credential: &str, call: &CallInfo<'_>) -> std::result::Result<AuthContext, VerifyError>;
}

/// Adapts an async closure taking the credential into a [`Verifier`].
pub struct FnVerifier<F>(F);

/// Wraps `f` as a [`Verifier`].
pub fn verify_fn<F, Fut>(f: F) -> FnVerifier<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<AuthContext, VerifyError>> + Send + 'static,
{
    FnVerifier(f)
}

#[async_trait]
impl<F, Fut> Verifier for FnVerifier<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<AuthContext, VerifyError>> + Send + 'static,
{
    async fn verify(&self, credential: &str, _call: &CallInfo<'_>) -> std::result::Result<AuthContext, VerifyError> {
        (self.0)(credential.to_string()).await
    }
}

/// Authentication pipeline shared by all credential variants.
pub struct Pipeline {
    extractor: Arc<dyn CredentialExtractor>,
    verifier: Arc<dyn Verifier>,
    cache: Arc<dyn CredentialCache>,
    skip: Vec<MethodPattern>,
    strip_headers: Vec<HeaderName>,
    propagation: Option<PropagationOptions>,
    expose_verifier_errors: bool,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("skip", &self.skip)
            .field("strip_headers", &self.strip_headers)
            .field("propagation", &self.propagation)
            .field("expose_verifier_errors", &self.expose_verifier_errors)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    extractor: Arc<dyn CredentialExtractor>,
    verifier: Arc<dyn Verifier>,
    cache: Arc<dyn CredentialCache>,
    skip: Vec<String>,
    strip_headers: Vec<String>,
    propagation: Option<PropagationOptions>,
    expose_verifier_errors: bool,
}

impl PipelineBuilder {
    /// Replaces the credential extractor.
    pub fn extractor(mut self, extractor: impl CredentialExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Caches verified identities keyed by the raw credential.
    pub fn cache(mut self, cache: impl CredentialCache + 'static) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    /// Methods matching any of these patterns bypass verification.
    pub fn skip_methods<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.skip
            .extend(patterns.into_iter().map(|pattern| pattern.as_ref().to_string()));
        self
    }

    /// Headers removed from every request before it moves on, including skipped ones.
    pub fn strip_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.strip_headers
            .extend(names.into_iter().map(|name| name.as_ref().to_string()));
        self
    }

    /// Writes the verified identity into propagation headers.
    pub fn propagate(mut self, options: PropagationOptions) -> Self {
        self.propagation = Some(options);
        self
    }

    /// Returns verifier error text to the caller instead of a generic message.
    pub fn expose_verifier_errors(mut self, on: bool) -> Self {
        self.expose_verifier_errors = on;
        self
    }

    /// Validates patterns and header names and builds the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        let strip_headers = self
            .strip_headers
            .iter()
            .map(|name| parse_header_name(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline {
            extractor: self.extractor,
            verifier: self.verifier,
            cache: self.cache,
            skip: parse_patterns(&self.skip)?,
            strip_headers,
            propagation: self.propagation,
            expose_verifier_errors: self.expose_verifier_errors,
        })
    }
}

impl Pipeline {
    /// Starts a pipeline reading bearer tokens and verifying them with `verifier`.
    pub fn builder(verifier: impl Verifier + 'static) -> PipelineBuilder {
        PipelineBuilder {
            extractor: Arc::new(BearerExtractor),
            verifier: Arc::new(verifier),
            cache: Arc::new(NoCache),
            skip: Vec::new(),
            strip_headers: Vec::new(),
            propagation: None,
            expose_verifier_errors: false,
        }
    }

    /// Authenticates `request`.
    ///
    /// Returns `None` for skip-listed methods. On success, configured headers
    /// are stripped and the identity is propagated into the request headers.
    pub async fn authenticate<B>(&self, request: &mut RpcRequest<B>) -> Result<Option<AuthContext>> {
        if matches_method(request.method(), &self.skip) {
            tracing::debug!(method = %request.method(), "authentication skipped");
            self.strip(request);
            return Ok(None);
        }

        let identity = {
            let call = request.info();
            let credential = self
                .extractor
                .extract(&call)
                .ok_or_else(|| Error::unauthenticated("missing credential"))?;

            match self.cached(&credential).await {
                Some(identity) => {
                    tracing::trace!(subject = identity.subject(), "credential cache hit");
                    identity
                }
                None => {
                    let identity = self.verifier.verify(&credential, &call).await.map_err(|err| {
                        tracing::debug!(method = %call.method, error = %err, "credential verification failed");
                        Error::from_verify(err, self.expose_verifier_errors)
                    })?;
                    self.cache.set(&credential, identity.clone()).await;
                    identity
                }
            }
        };

        self.strip(request);
        if let Some(options) = &self.propagation {
            write_identity(request.headers_mut(), &identity, options);
        }
        Ok(Some(identity))
    }

    /// Authenticates `request` and runs `next` with the identity bound to the call scope.
    pub async fn intercept<B, F, Fut, T>(&self, mut request: RpcRequest<B>, next: F) -> Result<T>
    where
        F: FnOnce(RpcRequest<B>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.authenticate(&mut request).await? {
            Some(identity) => context::run(identity, next(request)).await,
            None => next(request).await,
        }
    }

    async fn cached(&self, credential: &str) -> Option<AuthContext> {
        let identity = self.cache.get(credential).await?;
        if identity.is_expired(SystemTime::now()) {
            self.cache.invalidate(credential).await;
            return None;
        }
        Some(identity)
    }

    /// Removes configured headers, plus inbound propagation headers when this
    /// pipeline is the one that writes them.
    fn strip<B>(&self, request: &mut RpcRequest<B>) {
        let headers = request.headers_mut();
        for name in &self.strip_headers {
            headers.remove(name);
        }
        if self.propagation.is_some() {
            strip_identity(headers);
        }
    }
}
