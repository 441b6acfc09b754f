//! Request-scoped authorization context.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use idm_bakery::Macaroon;
use parking_lot::Mutex;
use secrecy::SecretString;

/// State of the `Authorization` header as far as administrator Basic
/// authentication is concerned.
#[derive(Debug, Clone, Default)]
pub enum AdminAuthorization {
    /// No `Authorization` header.
    #[default]
    Absent,
    /// A header that is not valid Basic authentication.
    Malformed(String),
    Basic {
        username: String,
        password: SecretString,
    },
}

impl AdminAuthorization {
    /// Interprets a raw `Authorization` header value.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        let Some((scheme, encoded)) = value.trim().split_once(' ') else {
            return Self::Malformed("invalid or missing HTTP auth header".to_owned());
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return Self::Malformed("invalid or missing HTTP auth header".to_owned());
        }
        let decoded = match STANDARD.decode(encoded.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return Self::Malformed("invalid HTTP auth encoding".to_owned()),
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return Self::Malformed("invalid HTTP auth encoding".to_owned());
        };
        match text.split_once(':') {
            Some((username, password)) => Self::Basic {
                username: username.to_owned(),
                password: SecretString::from(password.to_owned()),
            },
            None => Self::Malformed("invalid HTTP auth contents".to_owned()),
        }
    }
}

/// Everything authorization needs to know about the in-flight request.
///
/// Passed by reference through every call of a single authorization. The
/// group memo lives only as long as the request.
#[derive(Debug, Default)]
pub struct AuthRequest {
    pub authorization: AdminAuthorization,
    /// Presented credential bundles, each a primary macaroon followed by its
    /// discharges.
    pub credentials: Vec<Vec<Macaroon>>,
    /// Absolute path of the request URL.
    pub path: String,
    /// When set, resolved usernames must end in `@<domain>`.
    pub required_domain: Option<String>,
    groups_memo: Mutex<HashMap<String, Vec<String>>>,
}

impl AuthRequest {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_authorization(mut self, authorization: AdminAuthorization) -> Self {
        self.authorization = authorization;
        self
    }

    #[must_use]
    pub fn with_basic_auth(self, username: &str, password: &str) -> Self {
        self.with_authorization(AdminAuthorization::Basic {
            username: username.to_owned(),
            password: SecretString::from(password.to_owned()),
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, bundle: Vec<Macaroon>) -> Self {
        self.credentials.push(bundle);
        self
    }

    #[must_use]
    pub fn with_required_domain(mut self, domain: impl Into<String>) -> Self {
        self.required_domain = Some(domain.into());
        self
    }

    pub(crate) fn memoized_groups(&self, username: &str) -> Option<Vec<String>> {
        self.groups_memo.lock().get(username).cloned()
    }

    pub(crate) fn memoize_groups(&self, username: &str, groups: &[String]) {
        self.groups_memo
            .lock()
            .insert(username.to_owned(), groups.to_vec());
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn parses_basic_header() {
        let header = format!("Basic {}", STANDARD.encode("admin:s3cret:with-colon"));
        let AdminAuthorization::Basic { username, password } = AdminAuthorization::from_header(&header)
        else {
            panic!("expected basic credentials");
        };
        assert_eq!(username, "admin");
        assert_eq!(password.expose_secret(), "s3cret:with-colon");
    }

    #[test]
    fn other_schemes_are_malformed() {
        assert!(matches!(
            AdminAuthorization::from_header("Bearer abc"),
            AdminAuthorization::Malformed(_)
        ));
        assert!(matches!(
            AdminAuthorization::from_header("Basic !!!"),
            AdminAuthorization::Malformed(_)
        ));
        let no_colon = format!("Basic {}", STANDARD.encode("admin"));
        assert!(matches!(
            AdminAuthorization::from_header(&no_colon),
            AdminAuthorization::Malformed(_)
        ));
    }
}
