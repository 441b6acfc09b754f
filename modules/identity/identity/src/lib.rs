//! Identity module
//!
//! Decides whether a request may perform a set of operations, resolves who
//! the caller is and which groups they belong to, and acts as the discharge
//! authority for third-party caveats addressed to this server. Interactive
//! logins meet their waiting clients through a rendezvous keyed by wait-id.
//!
//! [`IdentityServer::build`] wires everything from a [`Config`]; the HTTP
//! surface is [`api::rest::router`].
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod server;

mod provider_decl;

pub use config::{Config, ConfigError, LogFormat, LoggingConfig};
pub use domain::request::{AdminAuthorization, AuthRequest};
pub use domain::service::IdentityService;
pub use infra::{MemIdentityStore, MemMeetingStore};
pub use server::{IdentityServer, ProviderFactory, ProviderRegistry, Stores};
