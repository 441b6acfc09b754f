//! Assembly of the identity module from configuration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use identity_sdk::{
    IdentityProvider, IdentityStore, InitParams, MeetingStore, ProviderParams, VisitCompleter,
};
use idm_bakery::{Checker, Oven};
use secrecy::SecretSlice;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::rest;
use crate::config::{Config, ConfigError};
use crate::domain::acl::AclTable;
use crate::domain::authorizer::Authorizer;
use crate::domain::completer::{DischargeTokenIssuer, LoginCompleter};
use crate::domain::discharger::Discharger;
use crate::domain::meeting::{Place, PlaceConfig};
use crate::domain::minter::Minter;
use crate::domain::providers::{ProviderGroupSource, ProviderSet};
use crate::domain::pubkey::{PublicKeyChecker, USER_HAS_PUBLIC_KEY};
use crate::domain::resolver::{AdminCredentials, IdentityResolver};
use crate::domain::service::IdentityService;

/// Builds a provider from its validated declaration.
pub type ProviderFactory = fn(&ProviderParams) -> anyhow::Result<Arc<dyn IdentityProvider>>;

/// Provider implementations compiled into this binary, keyed by `type` tag.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<&'static str, ProviderFactory>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: &'static str, factory: ProviderFactory) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    fn build(&self, params: &ProviderParams) -> anyhow::Result<Arc<dyn IdentityProvider>> {
        let factory = self
            .factories
            .get(params.kind())
            .ok_or_else(|| ConfigError::ProviderUnavailable(params.kind().to_owned()))?;
        factory(params)
    }
}

/// Storage backends the module runs on.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub meetings: Arc<dyn MeetingStore>,
}

/// A fully wired identity module.
pub struct IdentityServer {
    service: Arc<IdentityService>,
    place: Arc<Place>,
    sweep_interval: Duration,
}

impl IdentityServer {
    /// Wires every component and initializes the declared providers in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ProviderUnavailable`] for a declared type with no registered factory
    /// - [`ConfigError::DuplicateProvider`] when two providers share a name
    /// - any provider construction or init failure
    pub async fn build(
        config: &Config,
        stores: Stores,
        registry: &ProviderRegistry,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let location = config.base_url().to_owned();
        let oven = Arc::new(match config.root_key_bytes()? {
            Some(key) => Oven::new(&location, SecretSlice::from(key)),
            None => {
                warn!("no root-key configured; macaroons will not survive a restart");
                Oven::with_random_key(&location)
            }
        });
        let checker = Arc::new(Checker::new(oven.clone()).with_condition(
            USER_HAS_PUBLIC_KEY,
            Arc::new(PublicKeyChecker::new(
                stores.identities.clone(),
                config.admin_agent_public_key,
            )),
        ));
        let place = Arc::new(Place::new(
            stores.meetings,
            PlaceConfig {
                wait_timeout: config.wait_timeout,
                poll_interval: config.rendezvous_poll_interval,
            },
        ));
        let tokens = Arc::new(DischargeTokenIssuer::new(
            checker.clone(),
            config.discharge_token_ttl,
        ));
        let completer: Arc<dyn VisitCompleter> = Arc::new(LoginCompleter::new(
            stores.identities.clone(),
            place.clone(),
            tokens.clone(),
        ));

        let providers = Arc::new(
            init_providers(config, &stores.identities, &completer, registry).await?,
        );
        let resolver = Arc::new(IdentityResolver::new(
            stores.identities.clone(),
            Some(Arc::new(ProviderGroupSource::new(providers.clone()))),
            AdminCredentials {
                username: config.auth_username.clone(),
                password: config.auth_password.clone(),
            },
            &location,
        ));
        let authorizer = Arc::new(Authorizer::new(
            checker,
            AclTable::default(),
            resolver.clone(),
            Minter::new(oven.clone(), place.clone()),
        ));
        let discharger = Arc::new(Discharger::new(
            oven,
            place.clone(),
            tokens,
            resolver,
            config.discharge_ttl,
        ));
        let service = Arc::new(IdentityService::new(
            stores.identities,
            authorizer,
            discharger,
            providers,
            shutdown,
        ));

        info!(%location, "identity module ready");
        Ok(Self {
            service,
            place,
            sweep_interval: config.rendezvous_sweep_interval,
        })
    }

    #[must_use]
    pub fn router(&self) -> Router {
        rest::router(self.service.clone())
    }

    #[must_use]
    pub fn service(&self) -> &Arc<IdentityService> {
        &self.service
    }

    /// Starts purging expired rendezvous entries until `cancel` fires.
    #[must_use]
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.place.clone().spawn_sweeper(self.sweep_interval, cancel)
    }
}

async fn init_providers(
    config: &Config,
    store: &Arc<dyn IdentityStore>,
    completer: &Arc<dyn VisitCompleter>,
    registry: &ProviderRegistry,
) -> anyhow::Result<ProviderSet> {
    let mut names = HashSet::new();
    let mut providers = Vec::with_capacity(config.identity_providers.len());
    for params in &config.identity_providers {
        let provider = registry.build(params)?;
        let name = provider.name().to_owned();
        if !names.insert(name.clone()) {
            return Err(ConfigError::DuplicateProvider(name).into());
        }
        provider
            .init(InitParams {
                store: store.clone(),
                completer: completer.clone(),
                url_prefix: format!("{}/login/{name}", config.base_url()),
            })
            .await
            .with_context(|| format!("cannot initialize identity provider \"{name}\""))?;
        info!(provider = %name, kind = params.kind(), "identity provider initialized");
        providers.push(provider);
    }
    Ok(ProviderSet::new(providers))
}
