#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Configuration loading and identity provider declarations.

use std::time::Duration;

use identity::{Config, ConfigError, LogFormat};
use identity_sdk::ProviderParams;
use secrecy::ExposeSecret;

fn load_err(yaml: &str) -> String {
    Config::from_yaml_str(yaml).unwrap_err().to_string()
}

#[test]
fn defaults_apply_to_empty_document() {
    let config = Config::from_yaml_str("{}").unwrap();

    assert_eq!(config.listen_address, "127.0.0.1:8081");
    assert_eq!(config.auth_username, "admin");
    assert!(config.auth_password.is_none());
    assert_eq!(config.wait_timeout, Duration::from_secs(600));
    assert_eq!(config.rendezvous_poll_interval, Duration::from_secs(1));
    assert_eq!(config.rendezvous_sweep_interval, Duration::from_secs(60));
    assert_eq!(config.discharge_token_ttl, Duration::from_secs(6 * 3600));
    assert_eq!(config.discharge_ttl, Duration::from_secs(24 * 3600));
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Text);
    assert!(config.identity_providers.is_empty());
    assert!(config.root_key_bytes().unwrap().is_none());
}

#[test]
fn durations_use_humantime() {
    let config = Config::from_yaml_str(
        r"
wait-timeout: 2m 30s
discharge-ttl: 1h
logging:
  level: identity=debug,info
  format: json
",
    )
    .unwrap();

    assert_eq!(config.wait_timeout, Duration::from_secs(150));
    assert_eq!(config.discharge_ttl, Duration::from_secs(3600));
    assert_eq!(config.logging.level, "identity=debug,info");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn zero_wait_timeout_is_rejected() {
    assert_eq!(
        load_err("wait-timeout: 0s"),
        "invalid wait-timeout: must be positive"
    );
}

#[test]
fn huge_wait_timeout_is_rejected() {
    assert_eq!(
        load_err("wait-timeout: 400000000000years"),
        "invalid wait-timeout: must not exceed 1day"
    );
    assert!(Config::from_yaml_str("wait-timeout: 24h").is_ok());
}

#[test]
fn poll_interval_has_a_floor() {
    assert_eq!(
        load_err("rendezvous-poll-interval: 0s"),
        "invalid rendezvous-poll-interval: must be at least 10ms"
    );
    let config = Config::from_yaml_str("rendezvous-poll-interval: 10ms").unwrap();
    assert_eq!(config.rendezvous_poll_interval, Duration::from_millis(10));
}

#[test]
fn location_must_be_a_url() {
    assert!(load_err("location: not a url").starts_with("invalid location:"));
}

#[test]
fn root_key_must_be_long_enough() {
    assert_eq!(
        load_err("root-key: c2hvcnQ="),
        "invalid root-key: must decode to at least 32 bytes"
    );

    let config =
        Config::from_yaml_str("root-key: AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
    assert_eq!(config.root_key_bytes().unwrap().unwrap().len(), 32);
}

#[test]
fn unknown_top_level_key_fails() {
    assert!(matches!(
        Config::from_yaml_str("listen-adress: 0.0.0.0:1"),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn admin_password_is_secret() {
    let config = Config::from_yaml_str("auth-password: hunter2").unwrap();
    assert_eq!(
        config.auth_password.as_ref().map(ExposeSecret::expose_secret),
        Some("hunter2")
    );
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn bare_azure_declaration_names_client_id() {
    assert_eq!(
        load_err("identity-providers: [{type: azure}]"),
        "cannot unmarshal azure configuration: client-id not specified"
    );
}

#[test]
fn azure_without_client_secret_names_the_field() {
    assert_eq!(
        load_err(
            r"
identity-providers:
  - type: azure
    client-id: abc
"
        ),
        "cannot unmarshal azure configuration: client-secret not specified"
    );
}

#[test]
fn keystone_without_url_names_the_field() {
    assert_eq!(
        load_err(
            r"
identity-providers:
  - type: keystone
    name: openstack
"
        ),
        "cannot unmarshal keystone configuration: url not specified"
    );
}

#[test]
fn openid_connect_requires_issuer() {
    assert_eq!(
        load_err(
            r"
identity-providers:
  - type: openid-connect
    name: oidc
    client-id: id
    client-secret: secret
"
        ),
        "cannot unmarshal openid-connect configuration: issuer not specified"
    );
}

#[test]
fn usso_needs_no_fields() {
    let config = Config::from_yaml_str("identity-providers: [{type: usso}]").unwrap();
    assert!(matches!(config.identity_providers[..], [ProviderParams::Usso]));
}

#[test]
fn missing_type_is_reported() {
    assert_eq!(
        load_err("identity-providers: [{name: x}]"),
        "identity provider type not specified"
    );
}

#[test]
fn unknown_type_is_reported() {
    assert_eq!(
        load_err("identity-providers: [{type: kerberos}]"),
        "unrecognised identity provider type \"kerberos\""
    );
}

#[test]
fn static_users_are_parsed_in_declaration_order() {
    let config = Config::from_yaml_str(
        r"
identity-providers:
  - type: google
    client-id: gid
    client-secret: gsecret
    domain: example.com
  - type: static
    name: dev
    domain: dev
    users:
      alice:
        password: alicepw
        groups: [devs]
      bob:
        password: bobpw
",
    )
    .unwrap();

    let kinds: Vec<_> = config.identity_providers.iter().map(ProviderParams::kind).collect();
    assert_eq!(kinds, ["google", "static"]);

    let ProviderParams::Static(params) = &config.identity_providers[1] else {
        panic!("expected static params");
    };
    assert_eq!(params.name, "dev");
    assert_eq!(params.domain.as_deref(), Some("dev"));
    assert_eq!(params.users["alice"].password.expose_secret(), "alicepw");
    assert_eq!(params.users["alice"].groups, ["devs"]);
    assert!(params.users["bob"].groups.is_empty());
}

#[test]
fn static_user_with_unknown_field_fails() {
    let err = load_err(
        r"
identity-providers:
  - type: static
    name: dev
    users:
      alice:
        password: alicepw
        shell: /bin/sh
",
    );
    assert!(err.starts_with("cannot unmarshal static configuration:"), "{err}");
}
