//! Minting of macaroons and discharges.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::caveat::{Caveat, time_before};
use crate::error::BakeryError;
use crate::macaroon::{Macaroon, hmac_sha256};
use crate::op::Op;

const ID_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct MacaroonId {
    v: u8,
    nonce: String,
    ops: Vec<Op>,
}

#[derive(Serialize, Deserialize)]
struct CaveatId {
    condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ticket: Option<String>,
    nonce: String,
}

/// What a discharger learns from a caveat id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyCaveatInfo {
    pub condition: String,
    pub ticket: Option<String>,
}

/// Mints macaroons rooted in a single secret key.
///
/// Every oven sharing the same key and location can verify and discharge
/// the others' macaroons.
pub struct Oven {
    location: String,
    root_key: SecretSlice<u8>,
}

impl Oven {
    #[must_use]
    pub fn new(location: impl Into<String>, root_key: SecretSlice<u8>) -> Self {
        Self {
            location: location.into(),
            root_key,
        }
    }

    /// Oven with a freshly generated key. Macaroons it mints are only
    /// verifiable by this process.
    #[must_use]
    pub fn with_random_key(location: impl Into<String>) -> Self {
        let mut key = vec![0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self::new(location, SecretSlice::from(key))
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Mints a macaroon authorizing `ops` until `expiry`, carrying `caveats`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier cannot be encoded or signed.
    pub fn new_macaroon(
        &self,
        expiry: DateTime<Utc>,
        caveats: &[Caveat],
        ops: &[Op],
    ) -> Result<Macaroon, BakeryError> {
        let mut ops = ops.to_vec();
        ops.sort();
        ops.dedup();
        let id = encode(&MacaroonId {
            v: ID_VERSION,
            nonce: random_nonce(),
            ops,
        })?;
        let mut m = Macaroon::new(
            self.root_key.expose_secret(),
            id,
            self.location.clone(),
        )?;
        m.add_first_party_caveat(&time_before(expiry).condition)?;
        add_caveats(&mut m, caveats)?;
        Ok(m)
    }

    /// Mints a discharge for a caveat id previously issued by this oven.
    ///
    /// # Errors
    ///
    /// Returns [`BakeryError::Malformed`] if any of `caveats` is a
    /// third-party caveat.
    pub fn discharge(&self, caveat_id: &str, caveats: &[Caveat]) -> Result<Macaroon, BakeryError> {
        if caveats.iter().any(Caveat::is_third_party) {
            return Err(BakeryError::Malformed(
                "discharge macaroons accept first-party caveats only".to_owned(),
            ));
        }
        let key = self.caveat_key(caveat_id)?;
        let mut m = Macaroon::new(&key, caveat_id.to_owned(), self.location.clone())?;
        add_caveats(&mut m, caveats)?;
        Ok(m)
    }

    /// Decodes a third-party caveat id minted by [`Oven::new_macaroon`].
    ///
    /// # Errors
    ///
    /// Returns [`BakeryError::Malformed`] if the id was not produced here.
    pub fn decode_caveat_id(&self, caveat_id: &str) -> Result<ThirdPartyCaveatInfo, BakeryError> {
        let id: CaveatId = decode(caveat_id)?;
        Ok(ThirdPartyCaveatInfo {
            condition: id.condition,
            ticket: id.ticket,
        })
    }

    pub(crate) fn ops_of(&self, m: &Macaroon) -> Result<Vec<Op>, BakeryError> {
        let id: MacaroonId = decode(m.identifier())?;
        if id.v != ID_VERSION {
            return Err(BakeryError::Malformed(format!(
                "unsupported macaroon identifier version {}",
                id.v
            )));
        }
        Ok(id.ops)
    }

    pub(crate) fn root_key(&self) -> &[u8] {
        self.root_key.expose_secret()
    }

    pub(crate) fn caveat_key(&self, caveat_id: &str) -> Result<[u8; 32], BakeryError> {
        hmac_sha256(self.root_key.expose_secret(), caveat_id.as_bytes())
    }
}

fn add_caveats(m: &mut Macaroon, caveats: &[Caveat]) -> Result<(), BakeryError> {
    for cav in caveats {
        match &cav.location {
            None => m.add_first_party_caveat(&cav.condition)?,
            Some(location) => {
                let cid = encode(&CaveatId {
                    condition: cav.condition.clone(),
                    ticket: cav.ticket.clone(),
                    nonce: random_nonce(),
                })?;
                tracing::debug!(location = %location, condition = %cav.condition, "adding third-party caveat");
                m.add_third_party_caveat(location, &cid)?;
            }
        }
    }
    Ok(())
}

fn random_nonce() -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    hex::encode(nonce)
}

fn encode<T: Serialize>(value: &T) -> Result<String, BakeryError> {
    let json = serde_json::to_vec(value).map_err(|e| BakeryError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, BakeryError> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| BakeryError::Malformed(format!("invalid identifier: {e}")))?;
    serde_json::from_slice(&raw).map_err(|e| BakeryError::Malformed(format!("invalid identifier: {e}")))
}
