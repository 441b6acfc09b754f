//! Typed configuration blocks for every identity provider type.
//!
//! The `type` tag of a provider declaration selects one variant of
//! [`ProviderParams`]. Validation of required fields happens when the
//! configuration is loaded; by the time a provider factory sees these values
//! every required field is present.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// A validated identity provider declaration.
#[derive(Debug, Clone)]
pub enum ProviderParams {
    Usso,
    Azure(OAuthParams),
    Google(OAuthParams),
    Keystone(KeystoneParams),
    KeystoneUserpass(KeystoneParams),
    KeystoneToken(KeystoneParams),
    Ldap(LdapParams),
    OpenIdConnect(OpenIdConnectParams),
    Static(StaticParams),
}

impl ProviderParams {
    /// The `type` tag this variant was declared with.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usso => "usso",
            Self::Azure(_) => "azure",
            Self::Google(_) => "google",
            Self::Keystone(_) => "keystone",
            Self::KeystoneUserpass(_) => "keystone_userpass",
            Self::KeystoneToken(_) => "keystone_token",
            Self::Ldap(_) => "ldap",
            Self::OpenIdConnect(_) => "openid-connect",
            Self::Static(_) => "static",
        }
    }
}

/// Parameters shared by OAuth-style providers (`azure`, `google`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OAuthParams {
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeystoneParams {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LdapParams {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub dn: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpenIdConnectParams {
    pub name: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Parameters of the in-tree static provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StaticParams {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    pub users: BTreeMap<String, StaticUser>,
}

/// A user known to the static provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StaticUser {
    pub password: SecretString,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}
