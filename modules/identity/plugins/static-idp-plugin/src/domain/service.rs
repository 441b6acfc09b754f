//! Credential checking for the static identity provider.

use std::collections::{BTreeMap, HashMap};

use identity_sdk::{IdentityRecord, ProviderError, StaticParams, StaticUser, escape_html};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

/// Username and password submitted through the login form.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> Credentials<'a> {
    /// Reads the `username` and `password` form fields.
    #[must_use]
    pub fn from_form(form: &'a HashMap<String, String>) -> Option<Self> {
        let username = form.get("username").map(String::as_str)?;
        let password = form.get("password").map(String::as_str)?;
        if username.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

/// Static identity provider service.
///
/// Users are looked up by the name they type; the identity they log in as is
/// `<user>@<domain>` when the provider has a domain, otherwise `<user>`.
pub struct Service {
    name: String,
    description: String,
    domain: Option<String>,
    users: BTreeMap<String, StaticUser>,
}

impl Service {
    #[must_use]
    pub fn from_params(params: &StaticParams) -> Self {
        Self {
            name: params.name.clone(),
            description: params
                .description
                .clone()
                .unwrap_or_else(|| params.name.clone()),
            domain: params.domain.clone().filter(|d| !d.is_empty()),
            users: params.users.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the identity for valid credentials. An unknown user and a
    /// wrong password are indistinguishable.
    #[must_use]
    pub fn authenticate(&self, creds: Credentials<'_>) -> Option<IdentityRecord> {
        let user = self.users.get(creds.username)?;
        let matches: bool = user
            .password
            .expose_secret()
            .as_bytes()
            .ct_eq(creds.password.as_bytes())
            .into();
        matches.then(|| self.record_for(creds.username, user))
    }

    /// Configured groups of an identity this provider created.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnknownIdentity`] if the identity did not come from
    /// this provider or its user has been removed from the table.
    pub fn groups(&self, identity: &IdentityRecord) -> Result<Vec<String>, ProviderError> {
        let unknown = || ProviderError::UnknownIdentity(identity.username.clone());
        let user = identity
            .external_id
            .as_deref()
            .and_then(|id| id.strip_prefix(self.name.as_str()))
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(unknown)?;
        self.users
            .get(user)
            .map(|u| u.groups.clone())
            .ok_or_else(unknown)
    }

    fn record_for(&self, user: &str, entry: &StaticUser) -> IdentityRecord {
        let username = match &self.domain {
            Some(domain) => format!("{user}@{domain}"),
            None => user.to_owned(),
        };
        let mut record = IdentityRecord::new(username)
            .with_external_id(format!("{}:{user}", self.name))
            .with_groups(entry.groups.iter().cloned());
        record.name.clone_from(&entry.name);
        record.email.clone_from(&entry.email);
        record
    }
}

/// The login form, posting back to `action`.
#[must_use]
pub fn login_form(title: &str, action: &str, message: Option<&str>) -> String {
    let title = escape_html(title);
    let action = escape_html(action);
    let message = message
        .map(|m| format!("<p class=\"error\">{}</p>", escape_html(m)))
        .unwrap_or_default();
    format!(
        "<html><head><title>{title}</title></head><body>\
         <h1>{title}</h1>{message}\
         <form method=\"post\" action=\"{action}\">\
         <label>Username <input type=\"text\" name=\"username\"></label>\
         <label>Password <input type=\"password\" name=\"password\"></label>\
         <button type=\"submit\">Log in</button>\
         </form></body></html>"
    )
}

/// Terminal page for a rejected login; the rendezvous is already closed.
#[must_use]
pub fn login_failed_page(title: &str, message: &str) -> String {
    let title = escape_html(title);
    let message = escape_html(message);
    format!(
        "<html><head><title>{title}</title></head><body>\
         <h1>Login failed</h1><p class=\"error\">{message}</p>\
         <p>Start again from the application that sent you here.</p>\
         </body></html>"
    )
}
