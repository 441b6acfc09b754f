//! Completion of interactive logins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use identity_sdk::{
    DischargeToken, IdentityError, IdentityRecord, IdentityStore, LoginOutcome, LoginResult,
    StoreError, VisitCompleter,
};
use idm_bakery::{BakeryError, Checker, Op, Verified, declared, decode_bundle, encode_bundle};
use tracing::info;

use crate::domain::meeting::Place;
use crate::domain::request::AuthRequest;
use crate::domain::resolver::USERNAME_ATTR;

/// `kind` of the discharge tokens issued here.
pub const DISCHARGE_TOKEN_KIND: &str = "macaroon";

/// Instant `ttl` from now, saturating far in the future.
pub(crate) fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Issues and checks discharge tokens.
///
/// A token is a login macaroon declaring the username; it can be exchanged
/// for discharges until it expires.
pub struct DischargeTokenIssuer {
    checker: Arc<Checker<AuthRequest>>,
    ttl: Duration,
}

impl DischargeTokenIssuer {
    #[must_use]
    pub fn new(checker: Arc<Checker<AuthRequest>>, ttl: Duration) -> Self {
        Self { checker, ttl }
    }

    /// # Errors
    ///
    /// [`BakeryError`] if the macaroon cannot be minted or encoded.
    pub fn issue(&self, username: &str) -> Result<DischargeToken, BakeryError> {
        let expires = expiry_after(self.ttl);
        let m = self.checker.oven().new_macaroon(
            expires,
            &[declared(USERNAME_ATTR, username)],
            &[Op::login()],
        )?;
        Ok(DischargeToken {
            kind: DISCHARGE_TOKEN_KIND.to_owned(),
            value: encode_bundle(&[m])?,
            expires,
        })
    }

    /// Verifies `token`, returning what it declares.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Unauthorized`] if the token is of another kind,
    /// malformed, expired or not a login token.
    pub async fn verify(
        &self,
        req: &AuthRequest,
        token: &DischargeToken,
    ) -> Result<Verified, IdentityError> {
        if token.kind != DISCHARGE_TOKEN_KIND {
            return Err(IdentityError::Unauthorized(format!(
                "unsupported discharge token kind \"{}\"",
                token.kind
            )));
        }
        let invalid = |e: BakeryError| IdentityError::Unauthorized(format!("invalid discharge token: {e}"));
        let bundle = decode_bundle(&token.value).map_err(invalid)?;
        let verified = self.checker.verify(req, &bundle).await.map_err(invalid)?;
        if !verified.allows(&Op::login()) {
            return Err(IdentityError::Unauthorized(
                "discharge token does not authorize login".to_owned(),
            ));
        }
        Ok(verified)
    }
}

/// Records provider login outcomes and completes their rendezvous.
pub struct LoginCompleter {
    store: Arc<dyn IdentityStore>,
    place: Arc<Place>,
    tokens: Arc<DischargeTokenIssuer>,
}

impl LoginCompleter {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        place: Arc<Place>,
        tokens: Arc<DischargeTokenIssuer>,
    ) -> Self {
        Self {
            store,
            place,
            tokens,
        }
    }

    /// Folds a provider-resolved record into the stored one. Directly stored
    /// groups, ownership and keys survive; provider groups are added.
    async fn merge(&self, login: IdentityRecord) -> Result<IdentityRecord, IdentityError> {
        let mut record = match self.store.identity(&login.username).await {
            Ok(existing) => existing,
            Err(StoreError::NotFound(_)) => IdentityRecord::new(login.username.clone()),
            Err(e) => return Err(e.into()),
        };
        if login.external_id.is_some() {
            record.external_id = login.external_id;
        }
        if login.name.is_some() {
            record.name = login.name;
        }
        if login.email.is_some() {
            record.email = login.email;
        }
        for g in login.groups {
            if !record.groups.contains(&g) {
                record.groups.push(g);
            }
        }
        record.last_login = Some(Utc::now());
        Ok(record)
    }
}

#[async_trait]
impl VisitCompleter for LoginCompleter {
    #[tracing::instrument(skip_all, fields(wait_id = %wait_id))]
    async fn complete(&self, wait_id: &str, outcome: LoginOutcome) -> Result<(), IdentityError> {
        // A stale or replayed callback must not touch the stored identity.
        self.place.ensure_pending(wait_id).await?;
        let result = match outcome {
            LoginOutcome::Success(login) => {
                let record = self.merge(login).await?;
                let username = record.username.clone();
                self.store.upsert_identity(record).await?;
                let token = self
                    .tokens
                    .issue(&username)
                    .map_err(|e| IdentityError::Internal(format!("cannot issue discharge token: {e}")))?;
                info!(username = %username, "login succeeded");
                LoginResult::Success(token)
            }
            LoginOutcome::Failure(cause) => {
                info!(cause = %cause, "login failed");
                LoginResult::Failure(cause)
            }
        };
        self.place.complete(wait_id, result).await?;
        Ok(())
    }
}
