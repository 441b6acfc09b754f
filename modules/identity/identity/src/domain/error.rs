use identity_sdk::IdentityError;

use crate::domain::minter::{DischargeRequiredResponse, MintError};

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    /// Not a failure as such: the client must obtain discharges for the
    /// enclosed macaroon and retry.
    #[error("discharge required")]
    DischargeRequired(Box<DischargeRequiredResponse>),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Mint(#[from] MintError),
}

impl AuthorizeError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<IdentityError> for AuthorizeError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Unauthorized(msg) => Self::Unauthorized(msg),
            other => {
                tracing::error!(error = %other, "authorization failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

/// Any failure of an [`crate::domain::service::IdentityService`] call.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error(transparent)]
    Authorize(#[from] AuthorizeError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}
