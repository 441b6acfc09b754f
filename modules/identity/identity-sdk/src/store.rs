//! Storage capabilities the identity module depends on.
//!
//! Backends live outside this crate. The module ships in-memory
//! implementations for single-instance deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeetingError, ProviderError, StoreError};
use crate::models::{DischargeToken, IdentityRecord};

/// Persistent identity records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Loads the identity named `username`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no such identity.
    async fn identity(&self, username: &str) -> Result<IdentityRecord, StoreError>;

    /// Inserts or replaces the record keyed by its username.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on storage failure.
    async fn upsert_identity(&self, record: IdentityRecord) -> Result<(), StoreError>;

    /// Adds then removes directly stored groups, returning the updated record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if there is no such identity.
    async fn modify_groups(
        &self,
        username: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<IdentityRecord, StoreError>;
}

/// Live group lookup for identities that originate from an external provider.
#[async_trait]
pub trait ExternalGroupSource: Send + Sync {
    /// # Errors
    ///
    /// Any [`ProviderError`]; callers treat failures as an empty contribution.
    async fn groups(&self, identity: &IdentityRecord) -> Result<Vec<String>, ProviderError>;
}

/// Outcome recorded when an interactive login finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginResult {
    Success(DischargeToken),
    Failure(String),
}

/// Lifecycle state of a rendezvous entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingState {
    Pending,
    Done,
    Expired,
}

/// A rendezvous entry as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingEntry {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<LoginResult>,
}

impl MeetingEntry {
    /// State of the entry given that pending entries created before
    /// `cutoff` have expired.
    #[must_use]
    pub fn state(&self, cutoff: DateTime<Utc>) -> MeetingState {
        match (&self.result, self.created_at < cutoff) {
            (Some(_), _) => MeetingState::Done,
            (None, true) => MeetingState::Expired,
            (None, false) => MeetingState::Pending,
        }
    }
}

/// Shared key-value table behind the login rendezvous.
///
/// Implementations may be distributed; `complete` must be an atomic
/// compare-and-set across every instance sharing the store.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    /// Creates a pending entry.
    ///
    /// # Errors
    ///
    /// [`MeetingError::Store`] on backend failure.
    async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<(), MeetingError>;

    /// # Errors
    ///
    /// [`MeetingError::NotFound`] if `id` is unknown or already purged.
    async fn get(&self, id: &str) -> Result<MeetingEntry, MeetingError>;

    /// Records `result` if the entry is still pending and was created at or
    /// after `created_after`.
    ///
    /// # Errors
    ///
    /// - [`MeetingError::NotFound`] for an unknown id
    /// - [`MeetingError::AlreadyCompleted`] if a result is already recorded
    /// - [`MeetingError::Expired`] if the entry is older than `created_after`
    async fn complete(
        &self,
        id: &str,
        result: LoginResult,
        created_after: DateTime<Utc>,
    ) -> Result<(), MeetingError>;

    /// Purges every entry created before `cutoff`, returning how many went.
    ///
    /// # Errors
    ///
    /// [`MeetingError::Store`] on backend failure.
    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, MeetingError>;
}
