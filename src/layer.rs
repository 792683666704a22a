//! Tower integration.
//!
//! [`AuthenticateLayer`] runs a [`Pipeline`] and binds the resulting identity
//! for the whole inner call. [`AuthorizeLayer`] reads that binding and asks
//! the [`Engine`] for a decision. Both wrap the next stage and expose the same
//! `Service<RpcRequest<B>>` signature, with any auth failure converted into
//! the inner error type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::context;
use crate::engine::Engine;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::request::RpcRequest;

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Middleware layer that authenticates calls using a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct AuthenticateLayer {
    pipeline: Arc<Pipeline>,
}

impl AuthenticateLayer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn from_shared(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

impl<Inner> Layer<Inner> for AuthenticateLayer {
    type Service = AuthenticateService<Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        AuthenticateService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Middleware service that authenticates calls and binds the identity.
#[derive(Debug, Clone)]
pub struct AuthenticateService<Inner> {
    inner: Inner,
    pipeline: Arc<Pipeline>,
}

impl<Inner, B> Service<RpcRequest<B>> for AuthenticateService<Inner>
where
    Inner: Service<RpcRequest<B>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: From<Error>,
    B: Send + 'static,
{
    type Response = Inner::Response;
    type Error = Inner::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: RpcRequest<B>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let not_ready = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, not_ready);

        Box::pin(async move {
            match pipeline.authenticate(&mut request).await? {
                Some(identity) => context::run(identity, async move { ready.call(request).await }).await,
                None => ready.call(request).await,
            }
        })
    }
}

/// Middleware layer that authorizes calls using an [`Engine`].
#[derive(Debug, Clone)]
pub struct AuthorizeLayer {
    engine: Arc<Engine>,
}

impl AuthorizeLayer {
    /// Creates a new authorization layer.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl<Inner> Layer<Inner> for AuthorizeLayer {
    type Service = AuthorizeService<Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        AuthorizeService {
            inner,
            engine: self.engine.clone(),
        }
    }
}

/// Middleware service that enforces authorization decisions.
#[derive(Debug, Clone)]
pub struct AuthorizeService<Inner> {
    inner: Inner,
    engine: Arc<Engine>,
}

impl<Inner, B> Service<RpcRequest<B>> for AuthorizeService<Inner>
where
    Inner: Service<RpcRequest<B>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: From<Error>,
    B: Send + 'static,
{
    type Response = Inner::Response;
    type Error = Inner::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RpcRequest<B>) -> Self::Future {
        let engine = self.engine.clone();
        let not_ready = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, not_ready);

        Box::pin(async move {
            let identity = context::current();
            let method = request.method().clone();
            engine.authorize(identity.as_deref(), &method).await?;
            ready.call(request).await
        })
    }
}
