//! Error type for the bakery.

use thiserror::Error;

/// Errors produced while minting, decoding or verifying macaroons.
#[derive(Debug, Error)]
pub enum BakeryError {
    /// A signature in the bundle does not match its caveat chain.
    #[error("macaroon signature mismatch")]
    InvalidSignature,

    /// The macaroon or one of its encoded fields could not be decoded.
    #[error("malformed macaroon: {0}")]
    Malformed(String),

    /// A third-party caveat has no discharge in the bundle.
    #[error("no discharge macaroon found for caveat \"{0}\"")]
    DischargeMissing(String),

    /// A first-party condition evaluated to false.
    #[error("caveat \"{condition}\" not satisfied: {reason}")]
    CaveatFailed { condition: String, reason: String },

    /// The HMAC primitive rejected its input.
    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

impl BakeryError {
    pub(crate) fn caveat_failed(condition: &str, reason: impl Into<String>) -> Self {
        Self::CaveatFailed {
            condition: condition.to_owned(),
            reason: reason.into(),
        }
    }
}
