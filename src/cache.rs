use crate::identity::AuthContext;
use async_trait::async_trait;

/// Cache interface mapping a raw credential to a verified identity.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Gets the identity previously verified for `credential`.
    async fn get(&self, credential: &str) -> Option<AuthContext>;

    /// Stores the identity verified for `credential`.
    async fn set(&self, credential: &str, identity: AuthContext);

    /// Removes the entry for `credential`.
    async fn invalidate(&self, credential: &str);

    /// Removes every entry.
    async fn clear(&self);
}

/// No-op cache implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl CredentialCache for NoCache {
    async fn get(&self, _credential: &str) -> Option<AuthContext> {
        None
    }

    async fn set(&self, _credential: &str, _identity: AuthContext) {}

    async fn invalidate(&self, _credential: &str) {}

    async fn clear(&self) {}
}
