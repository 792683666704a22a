use crate::identity::Requirement;
use thiserror::Error;

/// Error type returned by pluggable verifiers, session stores and hooks.
pub type VerifyError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

const INVALID_CREDENTIAL: &str = "invalid credential";
const ACCESS_DENIED: &str = "access denied";

/// Errors returned by this crate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Missing, invalid or expired credential, or no identity where one is required.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Authenticated caller lacks the rights demanded by `rule`.
    #[error("permission denied by {rule}")]
    PermissionDenied {
        rule: String,
        requirement: Option<Requirement>,
    },
    /// Invalid construction-time configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Invalid method pattern input.
    #[error("invalid method pattern: {0}")]
    InvalidPattern(String),
}

/// Transport-neutral status code for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// The caller could not be authenticated.
    Unauthenticated,
    /// The caller is authenticated but not allowed.
    PermissionDenied,
    /// Misconfiguration; never caused by the caller.
    Internal,
}

impl Error {
    /// Shorthand for [`Error::Unauthenticated`].
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    /// Shorthand for [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Normalizes a verifier failure.
    ///
    /// A boxed crate [`Error`] is propagated unchanged. Anything else becomes
    /// [`Error::Unauthenticated`] with a generic message unless `expose` is set.
    pub fn from_verify(error: VerifyError, expose: bool) -> Self {
        match error.downcast::<Error>() {
            Ok(typed) => *typed,
            Err(other) if expose => Self::Unauthenticated(other.to_string()),
            Err(_) => Self::Unauthenticated(INVALID_CREDENTIAL.to_string()),
        }
    }

    /// Returns the status code for this error.
    pub fn code(&self) -> Code {
        match self {
            Self::Unauthenticated(_) => Code::Unauthenticated,
            Self::PermissionDenied { .. } => Code::PermissionDenied,
            Self::Configuration(_) | Self::InvalidPattern(_) => Code::Internal,
        }
    }

    /// Message that is safe to return to the caller.
    ///
    /// Denials never reveal the rule or the unmet requirement.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated(message) => message.clone(),
            Self::PermissionDenied { .. } => ACCESS_DENIED.to_string(),
            Self::Configuration(_) | Self::InvalidPattern(_) => "internal error".to_string(),
        }
    }
}
