//! Turns "more proof needed" into a fresh macaroon the client can discharge.

use std::sync::Arc;

use chrono::{Duration, Utc};
use identity_sdk::MeetingError;
use idm_bakery::{BakeryError, Caveat, Macaroon, Op, Oven};
use thiserror::Error;

use crate::domain::meeting::Place;
use crate::domain::request::AuthRequest;

/// Cookie name suffix for macaroons minted here, so several identity
/// cookies can coexist in one client.
pub const COOKIE_NAME_SUFFIX: &str = "idm";

const MACAROON_VALIDITY_DAYS: i64 = 365;

/// Caveats and operations a caller must still satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DischargeRequired {
    pub caveats: Vec<Caveat>,
    pub ops: Vec<Op>,
}

/// Everything a client needs to obtain the missing discharges.
#[derive(Debug, Clone)]
pub struct DischargeRequiredResponse {
    pub macaroon: Macaroon,
    /// Path, relative to the request path, the macaroon cookie applies to.
    pub macaroon_path: String,
    pub cookie_name_suffix: &'static str,
    pub wait_id: String,
    pub wait_url: String,
    pub visit_url: String,
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("{0}")]
    Path(&'static str),

    #[error("cannot create macaroon: {0}")]
    Bakery(#[from] BakeryError),

    #[error("cannot open rendezvous: {0}")]
    Rendezvous(#[from] MeetingError),
}

pub struct Minter {
    oven: Arc<Oven>,
    place: Arc<Place>,
}

impl Minter {
    #[must_use]
    pub fn new(oven: Arc<Oven>, place: Arc<Place>) -> Self {
        Self { oven, place }
    }

    /// Mints a year-long macaroon for `required`, opening a rendezvous whose
    /// wait-id becomes the ticket of every caveat addressed to this server.
    ///
    /// # Errors
    ///
    /// Any [`MintError`]; the request fails without retry.
    #[tracing::instrument(skip_all, fields(path = %req.path))]
    pub async fn discharge_required(
        &self,
        req: &AuthRequest,
        required: DischargeRequired,
    ) -> Result<DischargeRequiredResponse, MintError> {
        let macaroon_path = relative_url_path(&req.path, "/")?;
        let wait_id = self.place.new_wait_id().await?;

        let location = self.oven.location();
        let caveats: Vec<Caveat> = required
            .caveats
            .into_iter()
            .map(|cav| {
                if cav.location.as_deref() == Some(location) {
                    cav.with_ticket(wait_id.clone())
                } else {
                    cav
                }
            })
            .collect();
        let macaroon = self.oven.new_macaroon(
            Utc::now() + Duration::days(MACAROON_VALIDITY_DAYS),
            &caveats,
            &required.ops,
        )?;

        Ok(DischargeRequiredResponse {
            macaroon,
            macaroon_path,
            cookie_name_suffix: COOKIE_NAME_SUFFIX,
            wait_url: format!("{location}/wait?id={wait_id}"),
            visit_url: format!("{location}/login?id={wait_id}"),
            wait_id,
        })
    }
}

/// Relative path that leads from `base` to `target`; both must be absolute.
///
/// The last element of `base` is ignored, as a browser resolving a relative
/// reference would.
///
/// # Errors
///
/// [`MintError::Path`] if either path is not absolute.
pub fn relative_url_path(base: &str, target: &str) -> Result<String, MintError> {
    if !base.starts_with('/') {
        return Err(MintError::Path("non-absolute base URL"));
    }
    if !target.starts_with('/') {
        return Err(MintError::Path("non-absolute target URL"));
    }
    let mut base_parts: Vec<&str> = base.split('/').collect();
    let mut target_parts: Vec<&str> = target.split('/').collect();
    base_parts.pop();
    let last = target_parts.pop().unwrap_or_default();

    let common = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(b, t)| b == t)
        .count();

    let mut result: Vec<&str> = vec![".."; base_parts.len() - common];
    result.extend_from_slice(&target_parts[common..]);
    result.push(last);
    let joined = result.join("/");
    Ok(if joined.is_empty() { ".".to_owned() } else { joined })
}
