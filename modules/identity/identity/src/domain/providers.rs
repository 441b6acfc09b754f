//! The configured identity providers.

use std::sync::Arc;

use async_trait::async_trait;
use identity_sdk::{ExternalGroupSource, IdentityProvider, IdentityRecord, ProviderError};

/// Providers in declaration order, addressable by name.
#[derive(Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderSet {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn IdentityProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn IdentityProvider>> {
        self.providers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Live group lookup dispatched on the provider prefix of an external id
/// (`<provider>:<id>`).
pub struct ProviderGroupSource {
    providers: Arc<ProviderSet>,
}

impl ProviderGroupSource {
    #[must_use]
    pub fn new(providers: Arc<ProviderSet>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl ExternalGroupSource for ProviderGroupSource {
    async fn groups(&self, identity: &IdentityRecord) -> Result<Vec<String>, ProviderError> {
        let Some(external_id) = identity.external_id.as_deref() else {
            return Ok(Vec::new());
        };
        let provider_name = external_id
            .split_once(':')
            .map_or(external_id, |(name, _)| name);
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ProviderError::UnknownIdentity(external_id.to_owned()))?;
        provider.get_groups(identity).await
    }
}
