//! In-memory store backends for single-instance deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use identity_sdk::{
    IdentityRecord, IdentityStore, LoginResult, MeetingEntry, MeetingError, MeetingStore,
    StoreError,
};

#[derive(Debug, Default)]
pub struct MemIdentityStore {
    identities: DashMap<String, IdentityRecord>,
}

impl MemIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identities(records: impl IntoIterator<Item = IdentityRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.identities.insert(record.username.clone(), record);
        }
        store
    }
}

#[async_trait]
impl IdentityStore for MemIdentityStore {
    async fn identity(&self, username: &str) -> Result<IdentityRecord, StoreError> {
        self.identities
            .get(username)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(username.to_owned()))
    }

    async fn upsert_identity(&self, record: IdentityRecord) -> Result<(), StoreError> {
        self.identities.insert(record.username.clone(), record);
        Ok(())
    }

    async fn modify_groups(
        &self,
        username: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<IdentityRecord, StoreError> {
        let mut record = self
            .identities
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(username.to_owned()))?;
        for g in add {
            if !record.groups.contains(g) {
                record.groups.push(g.clone());
            }
        }
        record.groups.retain(|g| !remove.contains(g));
        Ok(record.clone())
    }
}

/// Rendezvous table held in this process only. Instances behind a load
/// balancer need a shared backend instead.
#[derive(Debug, Default)]
pub struct MemMeetingStore {
    entries: DashMap<String, MeetingEntry>,
}

impl MemMeetingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MeetingStore for MemMeetingStore {
    async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<(), MeetingError> {
        self.entries.insert(
            id.to_owned(),
            MeetingEntry {
                created_at,
                result: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<MeetingEntry, MeetingError> {
        self.entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MeetingError::NotFound(id.to_owned()))
    }

    async fn complete(
        &self,
        id: &str,
        result: LoginResult,
        created_after: DateTime<Utc>,
    ) -> Result<(), MeetingError> {
        match self.entries.entry(id.to_owned()) {
            Entry::Vacant(_) => Err(MeetingError::NotFound(id.to_owned())),
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.result.is_some() {
                    return Err(MeetingError::AlreadyCompleted(id.to_owned()));
                }
                if entry.created_at < created_after {
                    return Err(MeetingError::Expired(id.to_owned()));
                }
                entry.result = Some(result);
                Ok(())
            }
        }
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, MeetingError> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.created_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
