//! Verification of macaroon bundles.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use crate::caveat::{COND_DECLARED, COND_TIME_BEFORE, parse_condition};
use crate::error::BakeryError;
use crate::macaroon::{Macaroon, Signature, bind_signature, hmac_sha256};
use crate::op::Op;
use crate::oven::Oven;

/// Evaluates one kind of first-party condition.
///
/// `C` is the request-scoped context handed to [`Checker::verify`]. The
/// returned error string becomes the reason of
/// [`BakeryError::CaveatFailed`].
#[async_trait]
pub trait ConditionChecker<C: Sync>: Send + Sync {
    async fn check(&self, ctx: &C, arg: &str) -> Result<(), String>;
}

/// What a verified bundle proves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verified {
    /// Operations named in the primary macaroon's identifier.
    pub ops: Vec<Op>,
    /// Attributes from `declared` caveats anywhere in the bundle.
    pub declared: BTreeMap<String, String>,
}

impl Verified {
    #[must_use]
    pub fn allows(&self, op: &Op) -> bool {
        self.ops.contains(op)
    }
}

/// Verifies bundles minted by an [`Oven`].
pub struct Checker<C> {
    oven: Arc<Oven>,
    conditions: HashMap<String, Arc<dyn ConditionChecker<C>>>,
}

impl<C: Sync> Checker<C> {
    #[must_use]
    pub fn new(oven: Arc<Oven>) -> Self {
        Self {
            oven,
            conditions: HashMap::new(),
        }
    }

    /// Registers a checker for conditions named `name`.
    #[must_use]
    pub fn with_condition(
        mut self,
        name: impl Into<String>,
        checker: Arc<dyn ConditionChecker<C>>,
    ) -> Self {
        self.conditions.insert(name.into(), checker);
        self
    }

    #[must_use]
    pub fn oven(&self) -> &Arc<Oven> {
        &self.oven
    }

    /// Verifies `bundle`: the primary macaroon first, then any discharges
    /// bound to it.
    ///
    /// # Errors
    ///
    /// - [`BakeryError::InvalidSignature`] if any signature chain is broken
    /// - [`BakeryError::DischargeMissing`] if a third-party caveat is not discharged
    /// - [`BakeryError::CaveatFailed`] if a first-party condition fails
    /// - [`BakeryError::Malformed`] if the primary identifier cannot be decoded
    pub async fn verify(&self, ctx: &C, bundle: &[Macaroon]) -> Result<Verified, BakeryError> {
        let (primary, discharges) = bundle
            .split_first()
            .ok_or_else(|| BakeryError::Malformed("empty macaroon bundle".to_owned()))?;
        let ops = self.oven.ops_of(primary)?;

        let mut conditions = Vec::new();
        let mut pending = VecDeque::new();
        verify_chain(primary, self.oven.root_key(), None, &mut conditions, &mut pending)?;

        let mut used = vec![false; discharges.len()];
        while let Some(caveat_id) = pending.pop_front() {
            let idx = discharges
                .iter()
                .enumerate()
                .position(|(i, d)| !used[i] && d.identifier() == caveat_id)
                .ok_or_else(|| BakeryError::DischargeMissing(caveat_id.clone()))?;
            used[idx] = true;
            let key = self.oven.caveat_key(&caveat_id)?;
            verify_chain(
                &discharges[idx],
                &key,
                Some(primary.signature()),
                &mut conditions,
                &mut pending,
            )?;
        }

        let mut declared = BTreeMap::new();
        for condition in &conditions {
            self.check_condition(ctx, condition, &mut declared).await?;
        }
        Ok(Verified { ops, declared })
    }

    async fn check_condition(
        &self,
        ctx: &C,
        condition: &str,
        declared: &mut BTreeMap<String, String>,
    ) -> Result<(), BakeryError> {
        let (name, arg) = parse_condition(condition);
        match name {
            COND_TIME_BEFORE => {
                let deadline = DateTime::parse_from_rfc3339(arg)
                    .map_err(|e| BakeryError::caveat_failed(condition, format!("invalid time: {e}")))?;
                if Utc::now() >= deadline {
                    return Err(BakeryError::caveat_failed(condition, "macaroon has expired"));
                }
                Ok(())
            }
            COND_DECLARED => {
                let (key, value) = parse_condition(arg);
                if key.is_empty() {
                    return Err(BakeryError::caveat_failed(condition, "declared caveat has no key"));
                }
                match declared.get(key) {
                    Some(existing) if existing != value => Err(BakeryError::caveat_failed(
                        condition,
                        format!("got conflicting declared values for \"{key}\""),
                    )),
                    Some(_) => Ok(()),
                    None => {
                        declared.insert(key.to_owned(), value.to_owned());
                        Ok(())
                    }
                }
            }
            other => {
                let checker = self
                    .conditions
                    .get(other)
                    .ok_or_else(|| BakeryError::caveat_failed(condition, "caveat not recognized"))?;
                checker
                    .check(ctx, arg)
                    .await
                    .map_err(|reason| BakeryError::caveat_failed(condition, reason))
            }
        }
    }
}

/// Recomputes the signature chain of `m` from `key`, collecting first-party
/// conditions and third-party caveat ids on the way.
fn verify_chain(
    m: &Macaroon,
    key: &[u8],
    bound_to: Option<&Signature>,
    conditions: &mut Vec<String>,
    pending: &mut VecDeque<String>,
) -> Result<(), BakeryError> {
    let mut sig = hmac_sha256(key, m.identifier().as_bytes())?;
    for cav in m.caveats() {
        sig = hmac_sha256(&sig, cav.id.as_bytes())?;
        if cav.is_third_party() {
            pending.push_back(cav.id.clone());
        } else {
            conditions.push(cav.id.clone());
        }
    }
    let expected = match bound_to {
        Some(primary) => bind_signature(primary, &sig),
        None => sig,
    };
    if bool::from(expected.as_slice().ct_eq(m.signature().as_slice())) {
        Ok(())
    } else {
        Err(BakeryError::InvalidSignature)
    }
}
