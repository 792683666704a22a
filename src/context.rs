//! Call-scoped identity storage.
//!
//! The identity is bound to a task-local slot for the dynamic extent of a
//! future, so anything awaited inside that future can read it without
//! parameter threading. Concurrent calls each run in their own scope and never
//! see each other's binding.

use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::AuthContext;

tokio::task_local! {
    static CURRENT_IDENTITY: Option<Arc<AuthContext>>;
}

/// Runs `f` with `identity` bound as the current identity.
///
/// The previous binding (usually none) is restored once `f` completes, panics,
/// or is dropped mid-flight.
pub async fn run<F>(identity: AuthContext, f: F) -> F::Output
where
    F: Future,
{
    run_with(Some(Arc::new(identity)), f).await
}

/// Runs `f` with an explicit, possibly absent, binding.
///
/// Passing `None` masks any outer binding for the extent of `f`.
pub async fn run_with<F>(identity: Option<Arc<AuthContext>>, f: F) -> F::Output
where
    F: Future,
{
    CURRENT_IDENTITY.scope(identity, f).await
}

/// Synchronous counterpart of [`run`].
pub fn run_sync<R>(identity: AuthContext, f: impl FnOnce() -> R) -> R {
    CURRENT_IDENTITY.sync_scope(Some(Arc::new(identity)), f)
}

/// Returns the identity bound to the current scope, if any.
pub fn current() -> Option<Arc<AuthContext>> {
    CURRENT_IDENTITY
        .try_with(|identity| identity.clone())
        .ok()
        .flatten()
}

/// Returns the bound identity or fails with [`Error::Unauthenticated`].
pub fn require() -> Result<Arc<AuthContext>> {
    current().ok_or_else(|| Error::unauthenticated("authentication required"))
}
