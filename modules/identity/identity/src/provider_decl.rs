//! Lookup table from identity provider `type` tags to typed declarations.

use identity_sdk::ProviderParams;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ConfigError;

struct ProviderType {
    kind: &'static str,
    required: &'static [&'static str],
    build: fn(Value) -> serde_json::Result<ProviderParams>,
}

const PROVIDER_TYPES: &[ProviderType] = &[
    ProviderType {
        kind: "usso",
        required: &[],
        build: |_| Ok(ProviderParams::Usso),
    },
    ProviderType {
        kind: "azure",
        required: &["client-id", "client-secret"],
        build: |v| typed(v).map(ProviderParams::Azure),
    },
    ProviderType {
        kind: "google",
        required: &["client-id", "client-secret"],
        build: |v| typed(v).map(ProviderParams::Google),
    },
    ProviderType {
        kind: "keystone",
        required: &["name", "url"],
        build: |v| typed(v).map(ProviderParams::Keystone),
    },
    ProviderType {
        kind: "keystone_userpass",
        required: &["name", "url"],
        build: |v| typed(v).map(ProviderParams::KeystoneUserpass),
    },
    ProviderType {
        kind: "keystone_token",
        required: &["name", "url"],
        build: |v| typed(v).map(ProviderParams::KeystoneToken),
    },
    ProviderType {
        kind: "ldap",
        required: &["name", "url"],
        build: |v| typed(v).map(ProviderParams::Ldap),
    },
    ProviderType {
        kind: "openid-connect",
        required: &["name", "issuer", "client-id", "client-secret"],
        build: |v| typed(v).map(ProviderParams::OpenIdConnect),
    },
    ProviderType {
        kind: "static",
        required: &["name", "users"],
        build: |v| typed(v).map(ProviderParams::Static),
    },
];

fn typed<T: DeserializeOwned>(v: Value) -> serde_json::Result<T> {
    serde_json::from_value(v)
}

/// Parses one entry of `identity-providers`.
pub(crate) fn parse_provider(decl: &Value) -> Result<ProviderParams, ConfigError> {
    let Value::Object(fields) = decl else {
        return Err(ConfigError::MissingProviderType);
    };
    let kind = match fields.get("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind.as_str(),
        _ => return Err(ConfigError::MissingProviderType),
    };
    let provider_type = PROVIDER_TYPES
        .iter()
        .find(|t| t.kind == kind)
        .ok_or_else(|| ConfigError::UnknownProviderType(kind.to_owned()))?;

    for &field in provider_type.required {
        let present = match fields.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ConfigError::MissingField {
                kind: kind.to_owned(),
                field,
            });
        }
    }

    let mut params = fields.clone();
    params.remove("type");
    (provider_type.build)(Value::Object(params)).map_err(|e| ConfigError::InvalidProvider {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })
}
