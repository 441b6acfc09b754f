//! Building an [`AuthRequest`] from an incoming HTTP request.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use idm_bakery::decode_bundle;
use tracing::debug;

use crate::api::rest::error::ApiError;
use crate::domain::request::{AdminAuthorization, AuthRequest};

/// Header carrying encoded macaroon bundles, comma separated.
pub const MACAROONS_HEADER: &str = "Macaroons";

/// Prefix of cookies carrying encoded macaroon bundles.
pub const MACAROON_COOKIE_PREFIX: &str = "macaroon-";

/// Query parameter restricting resolved usernames to a domain.
pub const DOMAIN_QUERY_PARAM: &str = "domain";

impl<S: Send + Sync> FromRequestParts<S> for AuthRequest {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authorization = match parts.headers.get(AUTHORIZATION) {
            None => AdminAuthorization::Absent,
            Some(value) => value.to_str().map_or_else(
                |_| AdminAuthorization::Malformed("invalid or missing HTTP auth header".to_owned()),
                AdminAuthorization::from_header,
            ),
        };
        let mut req = AuthRequest::new(parts.uri.path()).with_authorization(authorization);

        let header_bundles = parts
            .headers
            .get_all(MACAROONS_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','));
        let cookie_bundles = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| name.starts_with(MACAROON_COOKIE_PREFIX))
            .map(|(_, value)| value);
        for encoded in header_bundles.chain(cookie_bundles) {
            let encoded = encoded.trim();
            if encoded.is_empty() {
                continue;
            }
            match decode_bundle(encoded) {
                Ok(bundle) => req.credentials.push(bundle),
                Err(e) => debug!(error = %e, "ignoring undecodable macaroon bundle"),
            }
        }

        if let Some(query) = parts.uri.query() {
            req.required_domain = url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == DOMAIN_QUERY_PARAM)
                .map(|(_, v)| v.into_owned())
                .filter(|d| !d.is_empty());
        }
        Ok(req)
    }
}
