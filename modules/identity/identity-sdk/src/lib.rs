//! Identity SDK
//!
//! Public contract of the identity module:
//!
//! - [`Operation`], [`Entity`], [`Action`] - what a caller asks to do
//! - [`IdentityRecord`] - a stored identity
//! - [`AuthInfo`] - the result of a successful authorization
//! - [`IdentityProvider`] - plugin API implemented by login providers
//! - [`IdentityStore`], [`MeetingStore`] - storage capabilities
//! - [`IdentityError`] - error taxonomy

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod error;
pub mod models;
pub mod plugin_api;
pub mod provider_params;
pub mod store;

pub use error::{IdentityError, MeetingError, ProviderError, StoreError};
pub use models::{
    ADMIN_USERNAME, Action, AuthInfo, AuthorizedBy, AuthorizedOp, CREATE_AGENT_PREFIX,
    DischargeToken, EVERYONE, Entity, EntityKind, GROUP_LIST_GROUP, IdentityRecord, Operation,
    PublicKey, SSH_KEY_GETTER_GROUP,
};
pub use plugin_api::{
    IdentityProvider, InitParams, LoginMethod, LoginOutcome, LoginRequest, LoginResponse,
    VisitCompleter, escape_html,
};
pub use provider_params::{
    KeystoneParams, LdapParams, OAuthParams, OpenIdConnectParams, ProviderParams, StaticParams,
    StaticUser,
};
pub use store::{
    ExternalGroupSource, IdentityStore, LoginResult, MeetingEntry, MeetingState, MeetingStore,
};
