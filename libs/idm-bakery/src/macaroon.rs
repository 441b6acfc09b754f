//! The macaroon value and its signature chain.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BakeryError;

type HmacSha256 = Hmac<Sha256>;

pub(crate) type Signature = [u8; 32];

/// A caveat as recorded inside a macaroon.
///
/// For first-party caveats `id` is the condition. For third-party caveats it
/// is the opaque caveat id that the matching discharge carries as identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub id: String,
}

impl CaveatRecord {
    #[must_use]
    pub fn is_third_party(&self) -> bool {
        self.location.is_some()
    }
}

/// A bearer credential with an append-only list of caveats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macaroon {
    location: String,
    identifier: String,
    caveats: Vec<CaveatRecord>,
    #[serde(with = "hex_signature")]
    signature: Signature,
}

impl Macaroon {
    pub(crate) fn new(
        root_key: &[u8],
        identifier: String,
        location: String,
    ) -> Result<Self, BakeryError> {
        let signature = hmac_sha256(root_key, identifier.as_bytes())?;
        Ok(Self {
            location,
            identifier,
            caveats: Vec::new(),
            signature,
        })
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn caveats(&self) -> &[CaveatRecord] {
        &self.caveats
    }

    pub(crate) fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Attenuates the macaroon with a condition the verifier must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`BakeryError::Crypto`] if the HMAC cannot be computed.
    pub fn add_first_party_caveat(&mut self, condition: &str) -> Result<(), BakeryError> {
        self.signature = hmac_sha256(&self.signature, condition.as_bytes())?;
        self.caveats.push(CaveatRecord {
            location: None,
            id: condition.to_owned(),
        });
        Ok(())
    }

    pub(crate) fn add_third_party_caveat(
        &mut self,
        location: &str,
        caveat_id: &str,
    ) -> Result<(), BakeryError> {
        self.signature = hmac_sha256(&self.signature, caveat_id.as_bytes())?;
        self.caveats.push(CaveatRecord {
            location: Some(location.to_owned()),
            id: caveat_id.to_owned(),
        });
        Ok(())
    }

    /// Binds this discharge macaroon to `primary` so that it cannot be
    /// replayed alongside any other macaroon.
    pub fn bind_for_request(&mut self, primary: &Macaroon) {
        self.signature = bind_signature(&primary.signature, &self.signature);
    }
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Signature, BakeryError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| BakeryError::Crypto(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

pub(crate) fn bind_signature(primary: &Signature, discharge: &Signature) -> Signature {
    let digest = Sha256::new()
        .chain_update(primary)
        .chain_update(discharge)
        .finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Encodes a bundle (primary first, then its discharges) for transport in a
/// header or cookie.
///
/// # Errors
///
/// Returns [`BakeryError::Malformed`] if the bundle cannot be serialized.
pub fn encode_bundle(bundle: &[Macaroon]) -> Result<String, BakeryError> {
    let json = serde_json::to_vec(bundle).map_err(|e| BakeryError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a bundle produced by [`encode_bundle`].
///
/// # Errors
///
/// Returns [`BakeryError::Malformed`] on bad base64, bad JSON, or an empty
/// bundle.
pub fn decode_bundle(encoded: &str) -> Result<Vec<Macaroon>, BakeryError> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|e| BakeryError::Malformed(format!("invalid base64: {e}")))?;
    let bundle: Vec<Macaroon> =
        serde_json::from_slice(&raw).map_err(|e| BakeryError::Malformed(e.to_string()))?;
    if bundle.is_empty() {
        return Err(BakeryError::Malformed("empty macaroon bundle".to_owned()));
    }
    Ok(bundle)
}

mod hex_signature {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::Signature;

    pub fn serialize<S: Serializer>(sig: &Signature, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(sig))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signature, D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        Signature::try_from(bytes.as_slice()).map_err(|_| D::Error::custom("signature must be 32 bytes"))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use chrono::{Duration, Utc};
    use secrecy::SecretSlice;

    use super::*;
    use crate::checker::Checker;
    use crate::op::Op;
    use crate::oven::Oven;

    fn oven() -> Oven {
        Oven::new("https://idm.test", SecretSlice::from(vec![7u8; 32]))
    }

    #[tokio::test]
    async fn rewritten_caveat_breaks_the_signature() {
        let oven = oven();
        let mut m = oven
            .new_macaroon(Utc::now() + Duration::hours(1), &[], &[Op::new("global", "read")])
            .unwrap();
        m.add_first_party_caveat("declared username bob").unwrap();
        m.caveats[1].id = "declared username admin@idm".to_owned();

        let checker: Checker<()> = Checker::new(std::sync::Arc::new(oven));
        let err = checker.verify(&(), &[m]).await.unwrap_err();
        assert!(matches!(err, BakeryError::InvalidSignature));
    }

    #[test]
    fn bundle_survives_transport_encoding() {
        let oven = oven();
        let m = oven
            .new_macaroon(Utc::now() + Duration::hours(1), &[], &[Op::login()])
            .unwrap();
        let encoded = encode_bundle(std::slice::from_ref(&m)).unwrap();
        let decoded = decode_bundle(&encoded).unwrap();
        assert_eq!(decoded, vec![m]);
    }

    #[test]
    fn empty_bundle_is_rejected() {
        let encoded = URL_SAFE_NO_PAD.encode(b"[]");
        assert!(matches!(
            decode_bundle(&encoded),
            Err(BakeryError::Malformed(_))
        ));
    }
}
