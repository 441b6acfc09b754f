//! Identity resolution and group membership.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use identity_sdk::{
    ADMIN_USERNAME, EVERYONE, ExternalGroupSource, IdentityError, IdentityRecord, IdentityStore,
    StoreError,
};
use idm_bakery::{Caveat, need_declared};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, warn};

use crate::domain::request::{AdminAuthorization, AuthRequest};

/// Third-party condition satisfied by any successfully logged-in user.
pub const IS_AUTHENTICATED_USER: &str = "is-authenticated-user";

/// Third-party condition satisfied by members of any listed group.
pub const IS_MEMBER_OF: &str = "is-member-of";

/// Attribute a login discharge must declare.
pub const USERNAME_ATTR: &str = "username";

/// A resolved principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    #[must_use]
    pub fn admin() -> Self {
        Self(ADMIN_USERNAME.to_owned())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_USERNAME
    }
}

/// Outcome of [`IdentityResolver::identity_from_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    Identity(Identity),
    /// No identity yet; the caller must present a credential satisfying
    /// these caveats.
    NeedCaveats(Vec<Caveat>),
}

/// Administrator Basic-auth credentials.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    /// Basic authentication is disabled when unset.
    pub password: Option<SecretString>,
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    external_groups: Option<Arc<dyn ExternalGroupSource>>,
    admin: AdminCredentials,
    location: String,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        external_groups: Option<Arc<dyn ExternalGroupSource>>,
        admin: AdminCredentials,
        location: impl Into<String>,
    ) -> Self {
        Self {
            store,
            external_groups,
            admin,
            location: location.into(),
        }
    }

    /// Checks the request's Basic credentials against the administrator's.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NoAdminCredsProvided`] without an `Authorization` header
    /// - [`IdentityError::Unauthorized`] for a malformed header or wrong credentials
    pub fn check_admin_credentials(&self, req: &AuthRequest) -> Result<(), IdentityError> {
        match &req.authorization {
            AdminAuthorization::Absent => Err(IdentityError::NoAdminCredsProvided),
            AdminAuthorization::Malformed(reason) => Err(IdentityError::Unauthorized(reason.clone())),
            AdminAuthorization::Basic { username, password } => {
                let valid = self.admin.password.as_ref().is_some_and(|expected| {
                    *username == self.admin.username
                        && password.expose_secret() == expected.expose_secret()
                });
                if valid {
                    Ok(())
                } else {
                    Err(IdentityError::Unauthorized("invalid credentials".to_owned()))
                }
            }
        }
    }

    /// Identity implied by the request itself, before any macaroon.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Unauthorized`] if administrator credentials are
    /// present but wrong.
    pub fn identity_from_request(&self, req: &AuthRequest) -> Result<RequestIdentity, IdentityError> {
        match self.check_admin_credentials(req) {
            Ok(()) => Ok(RequestIdentity::Identity(Identity::admin())),
            Err(IdentityError::NoAdminCredsProvided) => Ok(RequestIdentity::NeedCaveats(vec![
                need_declared(
                    Caveat::third_party(self.location.clone(), IS_AUTHENTICATED_USER),
                    &[USERNAME_ATTR],
                ),
            ])),
            Err(e) => Err(e),
        }
    }

    /// Identity from the attributes declared by a verified login credential.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Unauthorized`] if no username is declared or it falls
    /// outside the request's required domain.
    pub fn declared_identity(
        &self,
        req: &AuthRequest,
        declared: &BTreeMap<String, String>,
    ) -> Result<Identity, IdentityError> {
        let username = declared
            .get(USERNAME_ATTR)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| IdentityError::Unauthorized("no declared user name".to_owned()))?;
        check_domain(req, username)?;
        Ok(Identity::new(username.clone()))
    }

    /// Whether `identity` is admitted by `acl`.
    ///
    /// # Errors
    ///
    /// Propagates [`IdentityError::NotFound`] if group resolution is needed
    /// and the identity does not exist.
    pub async fn allow(
        &self,
        req: &AuthRequest,
        identity: &Identity,
        acl: &[String],
    ) -> Result<bool, IdentityError> {
        if let Some(allowed) = trivial_allow(identity, acl) {
            return Ok(allowed);
        }
        let groups = self.groups(req, identity).await?;
        Ok(acl.iter().any(|member| groups.contains(member)))
    }

    /// Effective groups of `identity`.
    ///
    /// # Errors
    ///
    /// [`IdentityError::NotFound`] if the identity does not exist.
    pub async fn groups(
        &self,
        req: &AuthRequest,
        identity: &Identity,
    ) -> Result<Vec<String>, IdentityError> {
        if let Some(groups) = req.memoized_groups(identity.name()) {
            return Ok(groups);
        }
        let record = match self.store.identity(identity.name()).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) if identity.is_admin() => IdentityRecord::new(ADMIN_USERNAME),
            Err(e) => return Err(e.into()),
        };
        let groups = self.effective_groups(record).await;
        req.memoize_groups(identity.name(), &groups);
        Ok(groups)
    }

    /// Walks the ownership chain up to an unowned, admin-owned or external
    /// identity, then narrows that identity's groups down the chain.
    async fn effective_groups(&self, record: IdentityRecord) -> Vec<String> {
        let mut visited = HashSet::from([record.username.clone()]);
        let mut chain = vec![record];
        let mut groups = loop {
            let Some(top) = chain.last() else {
                return Vec::new();
            };
            if top.external_id.is_some() {
                break self.external_identity_groups(top).await;
            }
            match top.owner.as_deref() {
                None | Some(ADMIN_USERNAME) => break top.groups.clone(),
                Some(owner) => {
                    let owner = owner.to_owned();
                    if !visited.insert(owner.clone()) {
                        error!(username = %top.username, owner = %owner, "identity ownership cycle detected");
                        return Vec::new();
                    }
                    match self.store.identity(&owner).await {
                        Ok(owner_record) => chain.push(owner_record),
                        Err(e) => {
                            warn!(owner = %owner, error = %e, "cannot get owner group information");
                            return Vec::new();
                        }
                    }
                }
            }
        };
        for record in chain.iter().rev().skip(1) {
            groups = intersect(&record.groups, &groups);
        }
        groups
    }

    async fn external_identity_groups(&self, record: &IdentityRecord) -> Vec<String> {
        let mut groups = dedup(&record.groups);
        let Some(source) = &self.external_groups else {
            return groups;
        };
        match source.groups(record).await {
            Ok(live) => {
                for g in live {
                    if !groups.contains(&g) {
                        groups.push(g);
                    }
                }
            }
            Err(e) => {
                warn!(username = %record.username, error = %e, "cannot get external groups");
            }
        }
        debug!(username = %record.username, groups = groups.len(), "resolved external identity groups");
        groups
    }
}

/// Decides `allow` without touching storage where possible.
#[must_use]
pub fn trivial_allow(identity: &Identity, acl: &[String]) -> Option<bool> {
    if acl.is_empty() {
        return Some(false);
    }
    if acl.iter().any(|m| m == EVERYONE || m == identity.name()) {
        return Some(true);
    }
    None
}

pub(crate) fn check_domain(req: &AuthRequest, username: &str) -> Result<(), IdentityError> {
    match &req.required_domain {
        Some(domain) if !username.ends_with(&format!("@{domain}")) => Err(
            IdentityError::Unauthorized(format!("\"{username}\" not in required domain \"{domain}\"")),
        ),
        _ => Ok(()),
    }
}

fn dedup(groups: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(groups.len());
    for g in groups {
        if !out.contains(g) {
            out.push(g.clone());
        }
    }
    out
}

fn intersect(stored: &[String], bound: &[String]) -> Vec<String> {
    dedup(stored)
        .into_iter()
        .filter(|g| bound.contains(g))
        .collect()
}
