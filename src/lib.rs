//! Authentication and authorization middleware for RPC services.
//!
//! A credential [`Pipeline`] turns whatever the caller presented (bearer token,
//! API key, session cookie, or headers injected by a trusted gateway) into an
//! [`AuthContext`]. The identity is bound to the call through [`context`] and
//! the [`Engine`] decides whether the call may proceed, combining declarative
//! per-method options with an ordered rule list, an optional hook, and a
//! default policy. The default policy is deny.
//!
//! Both stages are `tower` layers over [`RpcRequest`].
//!
//! # Examples
//!
//! Rule-based authorization:
//! ```no_run
//! use rs_gatekeeper::{AuthContext, AuthorizationRule, Effect, EngineBuilder, MethodId, Requirement};
//! # async fn demo() -> rs_gatekeeper::Result<()> {
//! let engine = EngineBuilder::new()
//!     .rule(AuthorizationRule::new("health", ["grpc.health.v1.Health/*"], Effect::Allow)?)
//!     .rule(
//!         AuthorizationRule::new("admins", ["admin.Console/*"], Effect::Allow)?
//!             .requires(Requirement::roles(["admin"])),
//!     )
//!     .build()?;
//! let caller = AuthContext::builder("user-1").roles(["admin"]).build();
//! let method = MethodId::new("admin.Console", "Reboot")?;
//! engine.authorize(Some(&caller), &method).await?;
//! # Ok(())
//! # }
//! ```
//!
//! A bearer-token pipeline with an in-process cache (enable `memory-cache`):
//! ```no_run
//! # #[cfg(feature = "memory-cache")]
//! # {
//! use rs_gatekeeper::{AuthContext, AuthenticateLayer, MemoryCache, Pipeline, VerifyError, verify_fn};
//! use std::time::Duration;
//! let pipeline = Pipeline::builder(verify_fn(|token: String| async move {
//!     Ok::<_, VerifyError>(AuthContext::builder(token).credential_type("api-key").build())
//! }))
//! .cache(MemoryCache::new(1024, Duration::from_secs(30)).unwrap())
//! .skip_methods(["grpc.health.v1.Health/*"])
//! .build()
//! .unwrap();
//! let _layer = AuthenticateLayer::new(pipeline);
//! # }
//! ```
#![forbid(unsafe_code)]

mod cache;
pub mod context;
mod engine;
mod error;
mod extract;
mod gateway;
mod identity;
mod layer;
mod pattern;
mod pipeline;
mod policy;
pub mod propagation;
mod request;
mod session;
mod store;
mod trust;
mod types;
#[cfg(feature = "memory-cache")]
mod memory_cache;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "jwt")]
pub mod token;

pub use crate::cache::{CredentialCache, NoCache};
pub use crate::engine::{AuthorizationRule, AuthorizeHook, Decision, Engine, EngineBuilder};
pub use crate::error::{Code, Error, Result, VerifyError};
pub use crate::extract::{BearerExtractor, CookieExtractor, CredentialExtractor, HeaderExtractor};
pub use crate::gateway::{GatewayConfig, TrustSignal, TrustSignalExtractor};
pub use crate::identity::{AuthContext, AuthContextBuilder, Requirement};
pub use crate::layer::{AuthenticateLayer, AuthenticateService, AuthorizeLayer, AuthorizeService};
pub use crate::pattern::{MethodPattern, matches, matches_method};
pub use crate::pipeline::{FnVerifier, Pipeline, PipelineBuilder, Verifier, verify_fn};
pub use crate::policy::{PolicyResolver, ResolvedMethodPolicy};
pub use crate::propagation::PropagationOptions;
pub use crate::request::{CallInfo, RpcRequest};
pub use crate::session::{SessionStore, SessionVerifier, session_pipeline};
pub use crate::store::{MethodAuthOption, PolicySource, ServiceAuthOption};
pub use crate::trust::{TrustVerifier, is_trusted};
pub use crate::types::{Effect, MethodId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryPolicySource;

#[cfg(feature = "memory-cache")]
pub use crate::memory_cache::MemoryCache;

#[cfg(feature = "jwt")]
pub use crate::token::{JwtConfig, JwtVerifier};
