//! Discharging of third-party caveats addressed to this server.

use std::sync::Arc;
use std::time::Duration;

use identity_sdk::{DischargeToken, IdentityError, LoginResult};
use idm_bakery::{Macaroon, Oven, ThirdPartyCondition, declared, time_before};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::completer::{DischargeTokenIssuer, expiry_after};
use crate::domain::meeting::Place;
use crate::domain::request::AuthRequest;
use crate::domain::resolver::{IS_AUTHENTICATED_USER, IS_MEMBER_OF, IdentityResolver, USERNAME_ATTR};

/// Result of a discharge request.
#[derive(Debug, Clone)]
pub enum DischargeOutcome {
    Discharged(Macaroon),
    /// The user has to log in first; `visit_url` starts the login and
    /// `wait_url` yields the discharge token once it finishes.
    InteractionRequired {
        wait_id: String,
        visit_url: String,
        wait_url: String,
    },
}

pub struct Discharger {
    oven: Arc<Oven>,
    place: Arc<Place>,
    tokens: Arc<DischargeTokenIssuer>,
    resolver: Arc<IdentityResolver>,
    discharge_ttl: Duration,
}

impl Discharger {
    #[must_use]
    pub fn new(
        oven: Arc<Oven>,
        place: Arc<Place>,
        tokens: Arc<DischargeTokenIssuer>,
        resolver: Arc<IdentityResolver>,
        discharge_ttl: Duration,
    ) -> Self {
        Self {
            oven,
            place,
            tokens,
            resolver,
            discharge_ttl,
        }
    }

    /// Waits for the login behind `wait_id` and returns its discharge token.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Meeting`] if the rendezvous fails, times out or is cancelled
    /// - [`IdentityError::Unauthorized`] if the login itself failed
    #[tracing::instrument(skip_all, fields(wait_id = %wait_id))]
    pub async fn wait(
        &self,
        wait_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DischargeToken, IdentityError> {
        match self
            .place
            .wait(wait_id, self.place.wait_timeout(), cancel)
            .await?
        {
            LoginResult::Success(token) => Ok(token),
            LoginResult::Failure(cause) => Err(IdentityError::Unauthorized(format!(
                "login failed: {cause}"
            ))),
        }
    }

    /// Discharges third-party caveat `caveat_id` for the holder of `token`.
    ///
    /// Without a token the caller is told where to log in.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::BadRequest`] for an undecodable or unsupported caveat
    /// - [`IdentityError::Unauthorized`] if the token is invalid or the
    ///   identity does not satisfy the condition
    #[tracing::instrument(skip_all)]
    pub async fn discharge(
        &self,
        req: &AuthRequest,
        caveat_id: &str,
        token: Option<&DischargeToken>,
    ) -> Result<DischargeOutcome, IdentityError> {
        let info = self
            .oven
            .decode_caveat_id(caveat_id)
            .map_err(|e| IdentityError::BadRequest(format!("cannot decode caveat id: {e}")))?;
        let condition = ThirdPartyCondition::parse(&info.condition)
            .map_err(|e| IdentityError::BadRequest(e.to_string()))?;
        if let Some(key) = condition.declared_keys.iter().find(|k| **k != USERNAME_ATTR) {
            return Err(IdentityError::BadRequest(format!(
                "cannot declare \"{key}\""
            )));
        }
        if condition.name != IS_AUTHENTICATED_USER && condition.name != IS_MEMBER_OF {
            return Err(IdentityError::BadRequest(format!(
                "caveat not recognized: \"{}\"",
                condition.name
            )));
        }

        let Some(token) = token else {
            let wait_id = info.ticket.ok_or_else(|| {
                IdentityError::BadRequest("caveat does not reference a login rendezvous".to_owned())
            })?;
            let location = self.oven.location();
            debug!(wait_id = %wait_id, "interaction required");
            return Ok(DischargeOutcome::InteractionRequired {
                visit_url: format!("{location}/login?id={wait_id}"),
                wait_url: format!("{location}/wait?id={wait_id}"),
                wait_id,
            });
        };

        let verified = self.tokens.verify(req, token).await?;
        let identity = self.resolver.declared_identity(req, &verified.declared)?;
        if condition.name == IS_MEMBER_OF {
            let groups: Vec<String> = condition.arg.split_whitespace().map(str::to_owned).collect();
            if !self.resolver.allow(req, &identity, &groups).await? {
                return Err(IdentityError::Unauthorized(format!(
                    "\"{}\" is not a member of any of {}",
                    identity.name(),
                    groups.join(", ")
                )));
            }
        }

        let discharge = self
            .oven
            .discharge(
                caveat_id,
                &[
                    declared(USERNAME_ATTR, identity.name()),
                    time_before(expiry_after(self.discharge_ttl)),
                ],
            )
            .map_err(|e| IdentityError::Internal(format!("cannot mint discharge: {e}")))?;
        info!(username = %identity.name(), condition = %condition.name, "caveat discharged");
        Ok(DischargeOutcome::Discharged(discharge))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use chrono::Utc;
    use identity_sdk::{IdentityRecord, IdentityStore, LoginOutcome, MeetingError, VisitCompleter};
    use idm_bakery::{Caveat, Checker, Op, need_declared};
    use secrecy::SecretSlice;

    use super::*;
    use crate::domain::completer::LoginCompleter;
    use crate::domain::meeting::PlaceConfig;
    use crate::domain::resolver::AdminCredentials;
    use crate::infra::memstore::{MemIdentityStore, MemMeetingStore};

    const LOCATION: &str = "https://idm.test";

    struct Fixture {
        oven: Arc<Oven>,
        checker: Arc<Checker<AuthRequest>>,
        place: Arc<Place>,
        completer: LoginCompleter,
        discharger: Discharger,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn IdentityStore> = Arc::new(MemIdentityStore::with_identities([
            IdentityRecord::new("bob@static").with_groups(["devs"]),
        ]));
        let oven = Arc::new(Oven::new(LOCATION, SecretSlice::from(vec![2u8; 32])));
        let checker = Arc::new(Checker::new(oven.clone()));
        let place = Arc::new(Place::new(
            Arc::new(MemMeetingStore::new()),
            PlaceConfig {
                wait_timeout: Duration::from_secs(600),
                poll_interval: Duration::from_secs(1),
            },
        ));
        let tokens = Arc::new(DischargeTokenIssuer::new(
            checker.clone(),
            Duration::from_secs(3600),
        ));
        let resolver = Arc::new(IdentityResolver::new(
            store.clone(),
            None,
            AdminCredentials {
                username: "admin".to_owned(),
                password: None,
            },
            LOCATION,
        ));
        Fixture {
            completer: LoginCompleter::new(store, place.clone(), tokens.clone()),
            discharger: Discharger::new(
                oven.clone(),
                place.clone(),
                tokens,
                resolver,
                Duration::from_secs(3600),
            ),
            oven,
            checker,
            place,
        }
    }

    fn primary(oven: &Oven, condition: &str, wait_id: &str) -> (Macaroon, String) {
        let m = oven
            .new_macaroon(
                Utc::now() + chrono::Duration::hours(1),
                &[need_declared(Caveat::third_party(LOCATION, condition), &["username"])
                    .with_ticket(wait_id)],
                &[Op::login()],
            )
            .unwrap();
        let cid = m.caveats().iter().find(|c| c.is_third_party()).unwrap().id.clone();
        (m, cid)
    }

    async fn login(f: &Fixture, wait_id: &str, username: &str) -> DischargeToken {
        f.completer
            .complete(wait_id, LoginOutcome::Success(IdentityRecord::new(username)))
            .await
            .unwrap();
        f.discharger
            .wait(wait_id, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_login_flow_produces_a_verifiable_bundle() {
        let f = fixture();
        let wait_id = f.place.new_wait_id().await.unwrap();
        let (m, cid) = primary(&f.oven, IS_AUTHENTICATED_USER, &wait_id);
        let req = AuthRequest::new("/discharge");

        let DischargeOutcome::InteractionRequired {
            wait_id: got_wait_id,
            visit_url,
            ..
        } = f.discharger.discharge(&req, &cid, None).await.unwrap()
        else {
            panic!("expected interaction required");
        };
        assert_eq!(got_wait_id, wait_id);
        assert_eq!(visit_url, format!("{LOCATION}/login?id={wait_id}"));

        let token = login(&f, &wait_id, "bob@static").await;
        let DischargeOutcome::Discharged(mut d) =
            f.discharger.discharge(&req, &cid, Some(&token)).await.unwrap()
        else {
            panic!("expected a discharge");
        };
        d.bind_for_request(&m);
        let verified = f.checker.verify(&req, &[m, d]).await.unwrap();
        assert_eq!(
            verified.declared.get("username").map(String::as_str),
            Some("bob@static")
        );
    }

    #[tokio::test]
    async fn failed_login_is_reported_by_wait() {
        let f = fixture();
        let wait_id = f.place.new_wait_id().await.unwrap();
        f.completer
            .complete(&wait_id, LoginOutcome::Failure("invalid password".to_owned()))
            .await
            .unwrap();
        let err = f
            .discharger
            .wait(&wait_id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unauthorized: login failed: invalid password");
    }

    #[tokio::test]
    async fn cancelled_wait_is_reported_as_cancelled() {
        let f = fixture();
        let wait_id = f.place.new_wait_id().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f.discharger.wait(&wait_id, &cancel).await.unwrap_err();
        assert!(matches!(err, IdentityError::Meeting(MeetingError::Cancelled)));
    }

    #[tokio::test]
    async fn membership_condition_checks_groups() {
        let f = fixture();
        let req = AuthRequest::new("/discharge");

        let wait_id = f.place.new_wait_id().await.unwrap();
        let token = login(&f, &wait_id, "bob@static").await;

        let (_, devs) = primary(&f.oven, "is-member-of devs ops", &wait_id);
        assert!(matches!(
            f.discharger.discharge(&req, &devs, Some(&token)).await,
            Ok(DischargeOutcome::Discharged(_))
        ));

        let (_, finance) = primary(&f.oven, "is-member-of finance", &wait_id);
        assert!(matches!(
            f.discharger.discharge(&req, &finance, Some(&token)).await,
            Err(IdentityError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_caveats_are_bad_requests() {
        let f = fixture();
        let req = AuthRequest::new("/discharge");
        let (_, cid) = primary(&f.oven, "is-admin", "w");
        assert!(matches!(
            f.discharger.discharge(&req, &cid, None).await,
            Err(IdentityError::BadRequest(_))
        ));
        assert!(matches!(
            f.discharger.discharge(&req, "garbage", None).await,
            Err(IdentityError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn required_domain_applies_to_discharges() {
        let f = fixture();
        let wait_id = f.place.new_wait_id().await.unwrap();
        let token = login(&f, &wait_id, "bob@static").await;
        let (_, cid) = primary(&f.oven, IS_AUTHENTICATED_USER, &wait_id);
        let req = AuthRequest::new("/discharge").with_required_domain("corp");
        assert!(matches!(
            f.discharger.discharge(&req, &cid, Some(&token)).await,
            Err(IdentityError::Unauthorized(_))
        ));
    }
}
