//! Caveat values and the condition grammar understood by the checker.
//!
//! A condition is a name optionally followed by a single space and an
//! argument string, e.g. `time-before 2026-01-01T00:00:00Z`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BakeryError;

pub const COND_TIME_BEFORE: &str = "time-before";
pub const COND_DECLARED: &str = "declared";
pub const COND_NEED_DECLARED: &str = "need-declared";

/// A caveat to be added to a macaroon.
///
/// First-party caveats have no location and are checked by the verifier.
/// Third-party caveats name the location that must discharge them; the
/// optional `ticket` travels inside the encoded caveat id so the discharger
/// can correlate the discharge with out-of-band state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl Caveat {
    #[must_use]
    pub fn first_party(condition: impl Into<String>) -> Self {
        Self {
            location: None,
            condition: condition.into(),
            ticket: None,
        }
    }

    #[must_use]
    pub fn third_party(location: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            condition: condition.into(),
            ticket: None,
        }
    }

    #[must_use]
    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = Some(ticket.into());
        self
    }

    #[must_use]
    pub fn is_third_party(&self) -> bool {
        self.location.is_some()
    }
}

/// Caveat that expires the macaroon at `t`.
#[must_use]
pub fn time_before(t: DateTime<Utc>) -> Caveat {
    Caveat::first_party(format!(
        "{COND_TIME_BEFORE} {}",
        t.to_rfc3339_opts(SecondsFormat::Millis, true)
    ))
}

/// Caveat declaring an attribute of the bearer, e.g. `declared username bob`.
#[must_use]
pub fn declared(key: &str, value: &str) -> Caveat {
    Caveat::first_party(format!("{COND_DECLARED} {key} {value}"))
}

/// Wraps a third-party caveat so that its discharger must declare `keys`.
#[must_use]
pub fn need_declared(caveat: Caveat, keys: &[&str]) -> Caveat {
    Caveat {
        condition: format!("{COND_NEED_DECLARED} {} {}", keys.join(","), caveat.condition),
        ..caveat
    }
}

/// Splits a condition into its name and argument.
#[must_use]
pub fn parse_condition(condition: &str) -> (&str, &str) {
    condition.split_once(' ').unwrap_or((condition, ""))
}

/// A third-party condition with any `need-declared` wrapper removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyCondition<'a> {
    pub declared_keys: Vec<&'a str>,
    pub name: &'a str,
    pub arg: &'a str,
}

impl<'a> ThirdPartyCondition<'a> {
    /// Parses `[need-declared k1,k2 ]name[ arg]`.
    ///
    /// # Errors
    ///
    /// Returns [`BakeryError::Malformed`] if a `need-declared` wrapper has no
    /// keys or no inner condition.
    pub fn parse(condition: &'a str) -> Result<Self, BakeryError> {
        let (name, arg) = parse_condition(condition);
        if name != COND_NEED_DECLARED {
            return Ok(Self {
                declared_keys: Vec::new(),
                name,
                arg,
            });
        }
        let (keys, inner) = parse_condition(arg);
        if keys.is_empty() || inner.is_empty() {
            return Err(BakeryError::Malformed(format!(
                "need-declared caveat is not of the form \"need-declared key[,key...] condition\": {condition}"
            )));
        }
        let (name, arg) = parse_condition(inner);
        Ok(Self {
            declared_keys: keys.split(',').filter(|k| !k.is_empty()).collect(),
            name,
            arg,
        })
    }
}
