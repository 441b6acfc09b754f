#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Static Identity Provider Plugin
//!
//! Interactive login against a user table held in configuration. Meant for
//! development and testing.
//!
//! ## Configuration
//!
//! ```yaml
//! identity-providers:
//!   - type: static
//!     name: static
//!     description: Development users
//!     domain: dev
//!     users:
//!       alice:
//!         password: alicepw
//!         name: Alice
//!         email: alice@example.com
//!         groups: [devs]
//! ```
//!
//! With `domain` set, `alice` logs in as `alice@dev`. Every identity gets the
//! external id `<provider name>:<user>`, which routes live group lookups back
//! to this provider.

pub mod domain;
pub mod module;

pub use module::{StaticIdentityProvider, factory};
