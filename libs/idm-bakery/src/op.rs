//! Operations authorized by a macaroon.

use serde::{Deserialize, Serialize};

/// Entity of the operation carried by identity-bearing macaroons.
pub const LOGIN_OP_ENTITY: &str = "login";
/// Action of the operation carried by identity-bearing macaroons.
pub const LOGIN_OP_ACTION: &str = "login";

/// An (entity, action) pair. The bakery treats both halves as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Op {
    pub entity: String,
    pub action: String,
}

impl Op {
    #[must_use]
    pub fn new(entity: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            action: action.into(),
        }
    }

    /// The operation a macaroon must authorize to carry an identity.
    #[must_use]
    pub fn login() -> Self {
        Self::new(LOGIN_OP_ENTITY, LOGIN_OP_ACTION)
    }

    #[must_use]
    pub fn is_login(&self) -> bool {
        self.entity == LOGIN_OP_ENTITY && self.action == LOGIN_OP_ACTION
    }
}
