//! Error types for the identity module.

use thiserror::Error;

/// Errors surfaced by identity resolution and authorization.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The named identity or rendezvous entry does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Authenticated but forbidden, or bad administrator credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request carries no administrator credentials; callers fall back
    /// to the next authentication method.
    #[error("no admin credentials provided")]
    NoAdminCredsProvided,

    /// A first-party caveat is malformed or not satisfied.
    #[error("{0}")]
    InvalidCaveat(String),

    /// The request itself is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The rendezvous failed; see [`MeetingError`].
    #[error(transparent)]
    Meeting(#[from] MeetingError),

    /// An unexpected backend failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors returned by [`crate::store::IdentityStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity \"{0}\" not found")]
    NotFound(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for IdentityError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(username) => Self::NotFound(format!("identity \"{username}\"")),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

/// Errors from the interactive-login rendezvous.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeetingError {
    #[error("rendezvous \"{0}\" not found")]
    NotFound(String),

    /// A second completion of an already completed rendezvous.
    #[error("rendezvous \"{0}\" already completed")]
    AlreadyCompleted(String),

    /// The waiter gave up before the login completed.
    #[error("login never completed for rendezvous \"{0}\"")]
    Timeout(String),

    /// The rendezvous outlived the wait timeout without completing.
    #[error("rendezvous \"{0}\" expired")]
    Expired(String),

    /// The waiting request was cancelled.
    #[error("wait cancelled")]
    Cancelled,

    #[error("rendezvous store failure: {0}")]
    Store(String),
}

/// Errors raised by identity providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider's upstream could not be reached or answered badly.
    #[error("identity provider request failed: {0}")]
    Upstream(String),

    /// The identity does not belong to this provider.
    #[error("identity \"{0}\" is not managed by this provider")]
    UnknownIdentity(String),
}
