//! Server configuration.
//!
//! Loaded from a YAML file with `IDM_`-prefixed environment overrides
//! (`IDM_AUTH_PASSWORD`, `IDM_LOGGING__LEVEL`, ...). Keys are kebab-case.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use identity_sdk::{ProviderParams, PublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::domain::meeting::MIN_POLL_INTERVAL;
use crate::provider_decl::parse_provider;

/// Longest accepted `wait-timeout`.
pub const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot load configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("cannot unmarshal {kind} configuration: {field} not specified")]
    MissingField { kind: String, field: &'static str },

    #[error("cannot unmarshal {kind} configuration: {reason}")]
    InvalidProvider { kind: String, reason: String },

    #[error("identity provider type not specified")]
    MissingProviderType,

    #[error("unrecognised identity provider type \"{0}\"")]
    UnknownProviderType(String),

    #[error("identity provider type \"{0}\" is not available in this build")]
    ProviderUnavailable(String),

    #[error("duplicate identity provider name \"{0}\"")]
    DuplicateProvider(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `identity=debug,info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub listen_address: String,

    /// Public base URL of this server. Third-party caveats addressed here are
    /// discharged by this server.
    pub location: String,

    /// Username accepted for administrator Basic authentication.
    pub auth_username: String,

    /// Password for administrator Basic authentication. Admin Basic
    /// authentication is disabled when unset.
    pub auth_password: Option<SecretString>,

    /// Base64 macaroon root key shared by every instance. A random key is
    /// generated when unset.
    pub root_key: Option<SecretString>,

    /// How long a login rendezvous stays open.
    #[serde(deserialize_with = "deserialize_duration")]
    pub wait_timeout: Duration,

    /// How often a waiter re-reads the rendezvous store for completions
    /// recorded by other instances.
    #[serde(deserialize_with = "deserialize_duration")]
    pub rendezvous_poll_interval: Duration,

    /// How often expired rendezvous entries are purged.
    #[serde(deserialize_with = "deserialize_duration")]
    pub rendezvous_sweep_interval: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub discharge_token_ttl: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub discharge_ttl: Duration,

    /// Public key with which the administrator agent may authenticate.
    pub admin_agent_public_key: Option<PublicKey>,

    pub logging: LoggingConfig,

    #[serde(rename = "identity-providers")]
    provider_declarations: Vec<serde_json::Value>,

    /// Validated provider declarations, in declaration order.
    #[serde(skip)]
    pub identity_providers: Vec<ProviderParams>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8081".to_owned(),
            location: "http://localhost:8081".to_owned(),
            auth_username: "admin".to_owned(),
            auth_password: None,
            root_key: None,
            wait_timeout: Duration::from_secs(600),
            rendezvous_poll_interval: Duration::from_secs(1),
            rendezvous_sweep_interval: Duration::from_secs(60),
            discharge_token_ttl: Duration::from_secs(6 * 3600),
            discharge_ttl: Duration::from_secs(24 * 3600),
            admin_agent_public_key: None,
            logging: LoggingConfig::default(),
            provider_declarations: Vec::new(),
            identity_providers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads `path` (if given) and merges `IDM_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; provider declarations fail with the
    /// field-specific message.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file_exact(path));
        }
        figment = figment.merge(
            Env::prefixed("IDM_").map(|key| key.as_str().replace("__", ".").replace('_', "-").into()),
        );
        Self::from_figment(&figment)
    }

    /// Parses configuration from a YAML document.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(&Figment::from(Yaml::string(yaml)))
    }

    fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        config.identity_providers = config
            .provider_declarations
            .iter()
            .map(parse_provider)
            .collect::<Result<_, _>>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.location).map_err(|e| ConfigError::Invalid {
            field: "location",
            reason: e.to_string(),
        })?;
        if self.wait_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "wait-timeout",
                reason: "must be positive".to_owned(),
            });
        }
        if self.wait_timeout > MAX_WAIT_TIMEOUT {
            return Err(ConfigError::Invalid {
                field: "wait-timeout",
                reason: format!(
                    "must not exceed {}",
                    humantime::format_duration(MAX_WAIT_TIMEOUT)
                ),
            });
        }
        if self.rendezvous_poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::Invalid {
                field: "rendezvous-poll-interval",
                reason: format!(
                    "must be at least {}",
                    humantime::format_duration(MIN_POLL_INTERVAL)
                ),
            });
        }
        self.root_key_bytes()?;
        Ok(())
    }

    /// Decoded macaroon root key, if one is configured.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the key is not base64 or shorter than 32
    /// bytes.
    pub fn root_key_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(key) = &self.root_key else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|e| ConfigError::Invalid {
                field: "root-key",
                reason: e.to_string(),
            })?;
        if bytes.len() < 32 {
            return Err(ConfigError::Invalid {
                field: "root-key",
                reason: "must decode to at least 32 bytes".to_owned(),
            });
        }
        Ok(Some(bytes))
    }

    /// Location with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.location.trim_end_matches('/')
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(d)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
