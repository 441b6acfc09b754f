//! Plugin API for identity providers.
//!
//! A provider authenticates users against some upstream (an OAuth service,
//! a directory, a static table) and reports the outcome of each login to the
//! rendezvous through the [`VisitCompleter`] it receives at init time. The
//! identity module never depends on a provider's wire protocol.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{IdentityError, ProviderError};
use crate::models::IdentityRecord;
use crate::store::IdentityStore;

/// HTTP method of a login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Get,
    Post,
}

/// A request to one of a provider's login endpoints.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub method: LoginMethod,
    /// Rendezvous wait-id taken from the `id` query parameter.
    pub wait_id: Option<String>,
    pub query: HashMap<String, String>,
    /// Form fields of a `POST`; empty for `GET`.
    pub form: HashMap<String, String>,
}

impl LoginRequest {
    #[must_use]
    pub fn get(wait_id: Option<&str>) -> Self {
        Self {
            method: LoginMethod::Get,
            wait_id: wait_id.map(str::to_owned),
            query: HashMap::new(),
            form: HashMap::new(),
        }
    }

    #[must_use]
    pub fn post(wait_id: Option<&str>, form: HashMap<String, String>) -> Self {
        Self {
            method: LoginMethod::Post,
            form,
            ..Self::get(wait_id)
        }
    }
}

/// What a provider sends back to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    Html { status: u16, body: String },
    Redirect { location: String },
}

impl LoginResponse {
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Html {
            status: 200,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn error(status: u16, body: impl Into<String>) -> Self {
        Self::Html {
            status,
            body: body.into(),
        }
    }
}

/// Escapes text for use in HTML element content and quoted attributes.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Result of an interactive login, reported to the rendezvous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success(IdentityRecord),
    Failure(String),
}

/// Callback through which providers finish a rendezvous.
#[async_trait]
pub trait VisitCompleter: Send + Sync {
    /// Completes rendezvous `wait_id` with `outcome`.
    ///
    /// # Errors
    ///
    /// [`crate::MeetingError::AlreadyCompleted`] (wrapped) if the rendezvous
    /// was already completed, e.g. by a replayed provider callback.
    async fn complete(&self, wait_id: &str, outcome: LoginOutcome) -> Result<(), IdentityError>;
}

/// Dependencies handed to a provider once at startup.
#[derive(Clone)]
pub struct InitParams {
    pub store: Arc<dyn IdentityStore>,
    pub completer: Arc<dyn VisitCompleter>,
    /// Absolute URL of this provider's login endpoint, without query.
    pub url_prefix: String,
}

/// Plugin API trait for identity providers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name used in URLs and external ids.
    fn name(&self) -> &str;

    /// Human readable name shown on the provider selection page.
    fn description(&self) -> &str;

    /// Whether login needs a browser round trip.
    fn interactive(&self) -> bool;

    /// Called once before the provider serves requests.
    ///
    /// # Errors
    ///
    /// Any failure aborts startup.
    async fn init(&self, params: InitParams) -> anyhow::Result<()>;

    /// URL the user should visit to log in for rendezvous `wait_id`.
    fn url(&self, wait_id: &str) -> String;

    /// Serves the login form or processes submitted credentials. On a
    /// definite outcome the provider calls [`VisitCompleter::complete`].
    async fn handle(&self, req: LoginRequest) -> LoginResponse;

    /// Live group lookup for identities this provider created.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] if the upstream cannot be queried.
    async fn get_groups(&self, identity: &IdentityRecord) -> Result<Vec<String>, ProviderError> {
        let _ = identity;
        Ok(Vec::new())
    }
}
