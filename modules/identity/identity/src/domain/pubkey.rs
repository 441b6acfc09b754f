//! First-party caveat binding a credential to one of a user's public keys.

use std::sync::Arc;

use async_trait::async_trait;
use identity_sdk::{ADMIN_USERNAME, IdentityError, IdentityStore, PublicKey, StoreError};
use idm_bakery::{Caveat, ConditionChecker};
use tracing::error;

use crate::domain::request::AuthRequest;

/// Condition name of the public-key caveat.
pub const USER_HAS_PUBLIC_KEY: &str = "user-has-public-key";

const KEY_NOT_VALID: &str = "public key not valid for user";

/// Caveat satisfied only while `username` holds `key`.
#[must_use]
pub fn user_has_public_key_caveat(username: &str, key: &PublicKey) -> Caveat {
    Caveat::first_party(format!("{USER_HAS_PUBLIC_KEY} {username} {key}"))
}

pub struct PublicKeyChecker {
    store: Arc<dyn IdentityStore>,
    admin_key: Option<PublicKey>,
}

impl PublicKeyChecker {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, admin_key: Option<PublicKey>) -> Self {
        Self { store, admin_key }
    }

    /// Checks a `"<username> <public-key>"` caveat argument.
    ///
    /// An unknown user and a key the user does not hold fail identically.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::InvalidCaveat`] if the argument is malformed or the key does not match
    /// - [`IdentityError::Internal`] if the store fails
    pub async fn check_user_public_key(&self, arg: &str) -> Result<(), IdentityError> {
        let fields: Vec<&str> = arg.split_whitespace().collect();
        let [username, key] = fields.as_slice() else {
            return Err(IdentityError::InvalidCaveat("caveat badly formatted".to_owned()));
        };
        let key: PublicKey = key.parse()?;

        if *username == ADMIN_USERNAME && self.admin_key == Some(key) {
            return Ok(());
        }
        let record = match self.store.identity(username).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                return Err(IdentityError::InvalidCaveat(KEY_NOT_VALID.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        if record.public_keys.contains(&key) {
            Ok(())
        } else {
            Err(IdentityError::InvalidCaveat(KEY_NOT_VALID.to_owned()))
        }
    }
}

#[async_trait]
impl ConditionChecker<AuthRequest> for PublicKeyChecker {
    async fn check(&self, _req: &AuthRequest, arg: &str) -> Result<(), String> {
        self.check_user_public_key(arg).await.map_err(|e| match e {
            IdentityError::InvalidCaveat(msg) => msg,
            other => {
                error!(error = %other, "public key check failed");
                "cannot check public key".to_owned()
            }
        })
    }
}
