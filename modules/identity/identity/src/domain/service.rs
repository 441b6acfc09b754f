use std::sync::Arc;

use identity_sdk::{
    Action, AuthInfo, DischargeToken, IdentityError, IdentityProvider, IdentityRecord,
    IdentityStore, LoginRequest, LoginResponse, Operation,
};
use idm_bakery::Op;
use tokio_util::sync::CancellationToken;

use super::authorizer::Authorizer;
use super::discharger::{DischargeOutcome, Discharger};
use super::error::DomainError;
use super::providers::ProviderSet;
use super::request::AuthRequest;
use super::resolver::Identity;

/// A login method offered for a rendezvous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMethod {
    pub name: String,
    pub description: String,
    pub interactive: bool,
    pub url: String,
}

/// Entry points of the identity module.
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    authorizer: Arc<Authorizer>,
    discharger: Arc<Discharger>,
    providers: Arc<ProviderSet>,
    shutdown: CancellationToken,
}

impl IdentityService {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        authorizer: Arc<Authorizer>,
        discharger: Arc<Discharger>,
        providers: Arc<ProviderSet>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            authorizer,
            discharger,
            providers,
            shutdown,
        }
    }

    /// # Errors
    ///
    /// See [`Authorizer::authorize`].
    pub async fn authorize(&self, req: &AuthRequest, ops: &[Op]) -> Result<AuthInfo, DomainError> {
        Ok(self.authorizer.authorize(req, ops).await?)
    }

    /// # Errors
    ///
    /// Authorization failures, or [`IdentityError::NotFound`].
    pub async fn get_identity(
        &self,
        req: &AuthRequest,
        username: &str,
    ) -> Result<IdentityRecord, DomainError> {
        self.require(req, Operation::user(username, Action::Read)).await?;
        Ok(self
            .store
            .identity(username)
            .await
            .map_err(IdentityError::from)?)
    }

    /// Effective groups of `username`.
    ///
    /// # Errors
    ///
    /// Authorization failures, or [`IdentityError::NotFound`].
    pub async fn groups(&self, req: &AuthRequest, username: &str) -> Result<Vec<String>, DomainError> {
        self.require(req, Operation::user(username, Action::ReadGroups))
            .await?;
        Ok(self
            .authorizer
            .resolver()
            .groups(req, &Identity::new(username))
            .await?)
    }

    /// Adds then removes directly stored groups of `username`.
    ///
    /// # Errors
    ///
    /// Authorization failures, or [`IdentityError::NotFound`].
    pub async fn modify_groups(
        &self,
        req: &AuthRequest,
        username: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<IdentityRecord, DomainError> {
        self.require(req, Operation::user(username, Action::WriteGroups))
            .await?;
        let record = self
            .store
            .modify_groups(username, add, remove)
            .await
            .map_err(IdentityError::from)?;
        tracing::info!(username, added = add.len(), removed = remove.len(), "groups modified");
        Ok(record)
    }

    /// Login methods available for rendezvous `wait_id`.
    #[must_use]
    pub fn login_methods(&self, wait_id: &str) -> Vec<LoginMethod> {
        self.providers
            .iter()
            .map(|p| LoginMethod {
                name: p.name().to_owned(),
                description: p.description().to_owned(),
                interactive: p.interactive(),
                url: p.url(wait_id),
            })
            .collect()
    }

    /// Passes a login request to the named provider.
    ///
    /// # Errors
    ///
    /// [`IdentityError::NotFound`] if no such provider is configured.
    pub async fn login(&self, provider: &str, req: LoginRequest) -> Result<LoginResponse, DomainError> {
        let provider: &Arc<dyn IdentityProvider> = self
            .providers
            .get(provider)
            .ok_or_else(|| IdentityError::NotFound(format!("identity provider \"{provider}\"")))?;
        Ok(provider.handle(req).await)
    }

    /// # Errors
    ///
    /// See [`Discharger::wait`].
    pub async fn wait(&self, wait_id: &str) -> Result<DischargeToken, DomainError> {
        Ok(self.discharger.wait(wait_id, &self.shutdown).await?)
    }

    /// # Errors
    ///
    /// See [`Discharger::discharge`].
    pub async fn discharge(
        &self,
        req: &AuthRequest,
        caveat_id: &str,
        token: Option<&DischargeToken>,
    ) -> Result<DischargeOutcome, DomainError> {
        Ok(self.discharger.discharge(req, caveat_id, token).await?)
    }

    async fn require(&self, req: &AuthRequest, op: Operation) -> Result<AuthInfo, DomainError> {
        self.authorize(req, &[Op::from(op)]).await
    }
}
