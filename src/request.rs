use std::net::IpAddr;

use http::{Extensions, HeaderMap};

use crate::error::Result;
use crate::types::MethodId;

/// Inbound RPC call as seen by the auth layers.
#[derive(Debug)]
pub struct RpcRequest<B = ()> {
    method: MethodId,
    headers: HeaderMap,
    peer_addr: Option<IpAddr>,
    extensions: Extensions,
    body: B,
}

/// Borrowed view of a call handed to extractors and verifiers.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    pub method: &'a MethodId,
    pub headers: &'a HeaderMap,
    pub peer_addr: Option<IpAddr>,
}

impl RpcRequest<()> {
    /// Creates a body-less request for `method`.
    pub fn new(method: MethodId) -> Self {
        Self::with_body(method, ())
    }
}

impl<B> RpcRequest<B> {
    pub fn with_body(method: MethodId, body: B) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            peer_addr: None,
            extensions: Extensions::new(),
            body,
        }
    }

    /// Builds a request from an HTTP request carrying a gRPC path.
    pub fn from_http(request: http::Request<B>) -> Result<Self> {
        let (parts, body) = request.into_parts();
        let method = MethodId::from_path(parts.uri.path())?;
        Ok(Self {
            method,
            headers: parts.headers,
            peer_addr: None,
            extensions: parts.extensions,
            body,
        })
    }

    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn info(&self) -> CallInfo<'_> {
        CallInfo {
            method: &self.method,
            headers: &self.headers,
            peer_addr: self.peer_addr,
        }
    }

    pub fn service_name(&self) -> &str {
        self.method().service()
    }

    pub fn method_name(&self) -> &str {
        self.method().method()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn peer_addr(&self) -> Option<IpAddr> {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, addr: IpAddr) {
        self.peer_addr = Some(addr);
    }

    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_body(self) -> B {
        self.body
    }
}
