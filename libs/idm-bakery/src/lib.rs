//! Macaroon toolkit for the IDM server.
//!
//! A macaroon minted by an [`Oven`] names the operations it authorizes in its
//! identifier. Callers may attenuate it with first-party caveats; the oven may
//! attach third-party caveats that must be discharged before the macaroon is
//! accepted. A [`Checker`] verifies the whole bundle and reports the operations
//! and declared attributes it proves.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod caveat;
pub mod checker;
pub mod error;
pub mod macaroon;
pub mod op;
pub mod oven;

pub use caveat::{Caveat, ThirdPartyCondition, declared, need_declared, time_before};
pub use checker::{Checker, ConditionChecker, Verified};
pub use error::BakeryError;
pub use macaroon::{Macaroon, decode_bundle, encode_bundle};
pub use op::{LOGIN_OP_ACTION, LOGIN_OP_ENTITY, Op};
pub use oven::{Oven, ThirdPartyCaveatInfo};
