//! ACL authorization of requested operations.

use std::sync::Arc;

use identity_sdk::{AuthInfo, AuthorizedBy, AuthorizedOp, EVERYONE};
use idm_bakery::{Checker, Op, Verified};
use tracing::{debug, info, warn};

use crate::domain::acl::AclTable;
use crate::domain::error::AuthorizeError;
use crate::domain::minter::{DischargeRequired, Minter};
use crate::domain::request::AuthRequest;
use crate::domain::resolver::{Identity, IdentityResolver, RequestIdentity};

pub struct Authorizer {
    checker: Arc<Checker<AuthRequest>>,
    acl: AclTable,
    resolver: Arc<IdentityResolver>,
    minter: Minter,
}

impl Authorizer {
    #[must_use]
    pub fn new(
        checker: Arc<Checker<AuthRequest>>,
        acl: AclTable,
        resolver: Arc<IdentityResolver>,
        minter: Minter,
    ) -> Self {
        Self {
            checker,
            acl,
            resolver,
            minter,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Authorizes every operation in `ops` for the request.
    ///
    /// Each operation is satisfied by a presented macaroon naming it, by an
    /// ACL admitting everyone, or by the resolved identity's membership of
    /// the ACL. When an operation needs an identity and none is available,
    /// the result is a discharge-required response for a login macaroon.
    ///
    /// # Errors
    ///
    /// - [`AuthorizeError::DischargeRequired`] if the caller must log in first
    /// - [`AuthorizeError::Unauthorized`] for wrong administrator credentials or
    ///   when the resolved identity is not in an operation's ACL
    /// - [`AuthorizeError::Internal`] for any other failure; the cause is logged
    #[tracing::instrument(skip_all, fields(path = %req.path, ops = ops.len()))]
    pub async fn authorize(&self, req: &AuthRequest, ops: &[Op]) -> Result<AuthInfo, AuthorizeError> {
        let verified = self.verify_credentials(req).await;

        let mut identity = self.declared_identity(req, &verified);
        let mut need_caveats = Vec::new();
        if identity.is_none() {
            match self.resolver.identity_from_request(req)? {
                RequestIdentity::Identity(id) => identity = Some(id),
                RequestIdentity::NeedCaveats(caveats) => need_caveats = caveats,
            }
        }

        let mut authorized = Vec::with_capacity(ops.len());
        let mut need_login = false;
        let mut denied: Option<&Op> = None;
        for op in ops {
            let by = if let Some((idx, _)) = verified.iter().find(|(_, v)| v.allows(op)) {
                AuthorizedBy::Credential(*idx)
            } else {
                let acl = self.acl.acl_for(op);
                if acl.iter().any(|m| m == EVERYONE) {
                    AuthorizedBy::Public
                } else if let Some(id) = &identity {
                    let allowed = self.resolver.allow(req, id, &acl).await.map_err(|e| {
                        warn!(username = %id.name(), entity = %op.entity, action = %op.action, error = %e, "cannot check ACL membership");
                        AuthorizeError::internal(e.to_string())
                    })?;
                    if !allowed {
                        denied = denied.or(Some(op));
                        continue;
                    }
                    AuthorizedBy::Identity
                } else {
                    need_login = true;
                    continue;
                }
            };
            authorized.push(AuthorizedOp {
                entity: op.entity.clone(),
                action: op.action.clone(),
                authorized_by: by,
            });
        }

        if let Some(op) = denied {
            info!(
                username = identity.as_ref().map(Identity::name),
                entity = %op.entity,
                action = %op.action,
                "permission denied"
            );
            return Err(AuthorizeError::unauthorized("permission denied"));
        }
        if need_login {
            debug!(caveats = need_caveats.len(), "login required");
            let resp = self
                .minter
                .discharge_required(
                    req,
                    DischargeRequired {
                        caveats: need_caveats,
                        ops: vec![Op::login()],
                    },
                )
                .await?;
            return Err(AuthorizeError::DischargeRequired(Box::new(resp)));
        }

        Ok(AuthInfo {
            identity: identity.map(|id| id.name().to_owned()),
            authorized,
        })
    }

    async fn verify_credentials(&self, req: &AuthRequest) -> Vec<(usize, Verified)> {
        let mut verified = Vec::with_capacity(req.credentials.len());
        for (idx, bundle) in req.credentials.iter().enumerate() {
            match self.checker.verify(req, bundle).await {
                Ok(v) => verified.push((idx, v)),
                Err(e) => debug!(credential = idx, error = %e, "ignoring credential that failed verification"),
            }
        }
        verified
    }

    fn declared_identity(&self, req: &AuthRequest, verified: &[(usize, Verified)]) -> Option<Identity> {
        let login = Op::login();
        verified
            .iter()
            .filter(|(_, v)| v.allows(&login))
            .find_map(|(idx, v)| match self.resolver.declared_identity(req, &v.declared) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(credential = idx, error = %e, "login credential does not declare a usable identity");
                    None
                }
            })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use identity_sdk::{
        ADMIN_USERNAME, Action, IdentityRecord, IdentityStore, Operation, PublicKey,
    };
    use idm_bakery::{Macaroon, Oven, declared};
    use secrecy::{SecretSlice, SecretString};

    use super::*;
    use crate::domain::meeting::{Place, PlaceConfig};
    use crate::domain::pubkey::{PublicKeyChecker, USER_HAS_PUBLIC_KEY, user_has_public_key_caveat};
    use crate::domain::resolver::AdminCredentials;
    use crate::infra::memstore::{MemIdentityStore, MemMeetingStore};

    const LOCATION: &str = "https://idm.test";

    struct Harness {
        oven: Arc<Oven>,
        authorizer: Authorizer,
    }

    fn harness(records: Vec<IdentityRecord>) -> Harness {
        let store: Arc<dyn IdentityStore> = Arc::new(MemIdentityStore::with_identities(records));
        let oven = Arc::new(Oven::new(LOCATION, SecretSlice::from(vec![5u8; 32])));
        let checker = Arc::new(Checker::new(oven.clone()).with_condition(
            USER_HAS_PUBLIC_KEY,
            Arc::new(PublicKeyChecker::new(store.clone(), None)),
        ));
        let resolver = Arc::new(IdentityResolver::new(
            store,
            None,
            AdminCredentials {
                username: "admin".to_owned(),
                password: Some(SecretString::from("pw".to_owned())),
            },
            LOCATION,
        ));
        let place = Arc::new(Place::new(
            Arc::new(MemMeetingStore::new()),
            PlaceConfig {
                wait_timeout: Duration::from_secs(600),
                poll_interval: Duration::from_secs(1),
            },
        ));
        let minter = Minter::new(oven.clone(), place);
        Harness {
            oven: oven.clone(),
            authorizer: Authorizer::new(checker, AclTable::default(), resolver, minter),
        }
    }

    fn op(operation: Operation) -> Op {
        operation.into()
    }

    /// A login macaroon with its discharge declaring `username`.
    fn login_bundle(oven: &Oven, username: &str) -> Vec<Macaroon> {
        let primary = oven
            .new_macaroon(
                Utc::now() + chrono::Duration::hours(1),
                &[idm_bakery::Caveat::third_party(LOCATION, "is-authenticated-user")],
                &[Op::login()],
            )
            .unwrap();
        let cid = primary.caveats()[1].id.clone();
        let mut discharge = oven.discharge(&cid, &[declared("username", username)]).unwrap();
        discharge.bind_for_request(&primary);
        vec![primary, discharge]
    }

    #[tokio::test]
    async fn public_ops_need_no_identity() {
        let h = harness(Vec::new());
        let info = h
            .authorizer
            .authorize(&AuthRequest::new("/v1/authorize"), &[op(Operation::global(Action::Login))])
            .await
            .unwrap();
        assert_eq!(info.identity, None);
        assert_eq!(info.authorized[0].authorized_by, AuthorizedBy::Public);
    }

    #[tokio::test]
    async fn missing_identity_yields_discharge_required() {
        let h = harness(Vec::new());
        let err = h
            .authorizer
            .authorize(
                &AuthRequest::new("/v1/u/bob"),
                &[op(Operation::user("bob", Action::Read))],
            )
            .await
            .unwrap_err();
        let AuthorizeError::DischargeRequired(resp) = err else {
            panic!("expected discharge required, got {err:?}");
        };
        assert_eq!(resp.macaroon_path, "../../");
        let third_party = resp
            .macaroon
            .caveats()
            .iter()
            .find(|c| c.is_third_party())
            .unwrap();
        assert_eq!(third_party.location.as_deref(), Some(LOCATION));
        let info = h.oven.decode_caveat_id(&third_party.id).unwrap();
        assert_eq!(info.condition, "need-declared username is-authenticated-user");
        assert_eq!(info.ticket.as_deref(), Some(resp.wait_id.as_str()));
    }

    #[tokio::test]
    async fn declared_identity_is_checked_against_the_acl() {
        let h = harness(vec![IdentityRecord::new("bob"), IdentityRecord::new("eve")]);
        let read_bob = [op(Operation::user("bob", Action::Read))];

        let as_bob = AuthRequest::new("/v1/u/bob").with_credentials(login_bundle(&h.oven, "bob"));
        let info = h.authorizer.authorize(&as_bob, &read_bob).await.unwrap();
        assert_eq!(info.identity.as_deref(), Some("bob"));
        assert_eq!(info.authorized[0].authorized_by, AuthorizedBy::Identity);

        let as_eve = AuthRequest::new("/v1/u/bob").with_credentials(login_bundle(&h.oven, "eve"));
        let err = h.authorizer.authorize(&as_eve, &read_bob).await.unwrap_err();
        assert!(matches!(err, AuthorizeError::Unauthorized(ref m) if m == "permission denied"));
    }

    #[tokio::test]
    async fn group_membership_grants_access() {
        let h = harness(vec![
            IdentityRecord::new("lister").with_groups([identity_sdk::GROUP_LIST_GROUP]),
        ]);
        let req = AuthRequest::new("/v1/u/bob/groups")
            .with_credentials(login_bundle(&h.oven, "lister"));
        let info = h
            .authorizer
            .authorize(&req, &[op(Operation::user("bob", Action::ReadGroups))])
            .await
            .unwrap();
        assert_eq!(info.authorized[0].authorized_by, AuthorizedBy::Identity);
    }

    #[tokio::test]
    async fn admin_basic_auth_authorizes_admin_ops() {
        let h = harness(Vec::new());
        let req = AuthRequest::new("/v1/u/bob").with_basic_auth("admin", "pw");
        let info = h
            .authorizer
            .authorize(&req, &[op(Operation::user("bob", Action::WriteGroups))])
            .await
            .unwrap();
        assert_eq!(info.identity.as_deref(), Some(ADMIN_USERNAME));
    }

    #[tokio::test]
    async fn wrong_admin_password_is_unauthorized_even_for_public_ops() {
        let h = harness(Vec::new());
        let req = AuthRequest::new("/").with_basic_auth("admin", "nope");
        let err = h
            .authorizer
            .authorize(&req, &[op(Operation::global(Action::Verify))])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorizeError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn operation_macaroon_authorizes_directly() {
        let h = harness(Vec::new());
        let target = op(Operation::user("bob", Action::ReadSshKeys));
        let m = h
            .oven
            .new_macaroon(Utc::now() + chrono::Duration::hours(1), &[], &[target.clone()])
            .unwrap();
        let req = AuthRequest::new("/")
            .with_credentials(vec![m])
            .with_credentials(Vec::new());
        let info = h.authorizer.authorize(&req, &[target]).await.unwrap();
        assert_eq!(info.authorized[0].authorized_by, AuthorizedBy::Credential(0));
    }

    #[tokio::test]
    async fn public_key_caveat_gates_agent_credentials() {
        let key = PublicKey::from_bytes([7; 32]);
        let mut agent = IdentityRecord::new("agent@bob").with_owner("bob");
        agent.public_keys = vec![key];
        let h = harness(vec![agent]);
        let target = op(Operation::user("agent@bob", Action::WriteSshKeys));

        let good = h
            .oven
            .new_macaroon(
                Utc::now() + chrono::Duration::hours(1),
                &[user_has_public_key_caveat("agent@bob", &key)],
                &[target.clone()],
            )
            .unwrap();
        let req = AuthRequest::new("/").with_credentials(vec![good]);
        assert!(h.authorizer.authorize(&req, &[target.clone()]).await.is_ok());

        let stale = h
            .oven
            .new_macaroon(
                Utc::now() + chrono::Duration::hours(1),
                &[user_has_public_key_caveat("agent@bob", &PublicKey::from_bytes([8; 32]))],
                &[target.clone()],
            )
            .unwrap();
        let req = AuthRequest::new("/").with_credentials(vec![stale]);
        assert!(matches!(
            h.authorizer.authorize(&req, &[target]).await,
            Err(AuthorizeError::DischargeRequired(_))
        ));
    }

    #[tokio::test]
    async fn unknown_ops_are_denied_for_identified_callers() {
        let h = harness(vec![IdentityRecord::new("bob")]);
        let req = AuthRequest::new("/").with_credentials(login_bundle(&h.oven, "bob"));
        let err = h
            .authorizer
            .authorize(&req, &[Op::new("group-admins", "delete")])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorizeError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn domain_constraint_rejects_foreign_login() {
        let h = harness(vec![IdentityRecord::new("bob@other")]);
        let req = AuthRequest::new("/v1/u/bob@other")
            .with_required_domain("corp")
            .with_credentials(login_bundle(&h.oven, "bob@other"));
        let err = h
            .authorizer
            .authorize(&req, &[op(Operation::user("bob@other", Action::Read))])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorizeError::DischargeRequired(_)));
    }
}
