//! Interactive login rendezvous.
//!
//! A [`Place`] correlates the request that needs a discharge with the later
//! request in which the user finishes logging in. Entries live in a
//! [`MeetingStore`] that may be shared by several server instances; each
//! instance keeps its own table of in-process waiters so a local completion
//! wakes them at once, and waiters re-read the store every poll interval to
//! observe completions recorded elsewhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use identity_sdk::{LoginResult, MeetingError, MeetingStore};
use rand::RngCore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WAIT_ID_BYTES: usize = 24;

/// Shortest interval between store re-reads of one waiter.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct PlaceConfig {
    /// Pending entries older than this have expired.
    pub wait_timeout: Duration,
    /// Interval between store re-reads while waiting.
    pub poll_interval: Duration,
}

struct Waiters {
    notify: Arc<Notify>,
    count: usize,
}

pub struct Place {
    store: Arc<dyn MeetingStore>,
    waiters: DashMap<String, Waiters>,
    config: PlaceConfig,
}

/// Registration of one waiter; dropping it releases the slot.
struct WaiterSlot<'a> {
    place: &'a Place,
    id: String,
    notify: Arc<Notify>,
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut slot) = self.place.waiters.entry(self.id.clone()) {
            let waiters = slot.get_mut();
            waiters.count -= 1;
            if waiters.count == 0 {
                slot.remove();
            }
        }
    }
}

impl Place {
    #[must_use]
    pub fn new(store: Arc<dyn MeetingStore>, mut config: PlaceConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            store,
            waiters: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout
    }

    /// Allocates an unguessable id and records a pending entry for it.
    ///
    /// # Errors
    ///
    /// [`MeetingError::Store`] if the entry cannot be recorded.
    pub async fn new_wait_id(&self) -> Result<String, MeetingError> {
        let mut bytes = [0u8; WAIT_ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let id = hex::encode(bytes);
        self.store.put(&id, Utc::now()).await?;
        debug!(wait_id = %id, "rendezvous opened");
        Ok(id)
    }

    /// Waits until `id` is completed, `timeout` elapses or `cancel` fires.
    ///
    /// The entry is not consumed: every waiter sees the same result.
    ///
    /// # Errors
    ///
    /// - [`MeetingError::NotFound`] for an unknown or purged id
    /// - [`MeetingError::Expired`] if the entry outlived the wait timeout
    /// - [`MeetingError::Timeout`] if `timeout` elapsed first
    /// - [`MeetingError::Cancelled`] if `cancel` fired first
    pub async fn wait(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<LoginResult, MeetingError> {
        let slot = self.register(id);
        // No deadline when `timeout` is beyond what the clock can represent.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            // Registered before the read so a completion between the read and
            // the select still wakes us.
            notified.as_mut().enable();

            let entry = self.store.get(id).await?;
            if let Some(result) = entry.result {
                return Ok(result);
            }
            if entry.created_at < self.cutoff() {
                return Err(MeetingError::Expired(id.to_owned()));
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MeetingError::Cancelled),
                () = &mut notified => {}
                () = sleep_until(deadline) => {
                    return Err(MeetingError::Timeout(id.to_owned()));
                }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Fails unless `id` is open and still awaiting its result.
    ///
    /// # Errors
    ///
    /// - [`MeetingError::NotFound`] for an unknown or purged id
    /// - [`MeetingError::AlreadyCompleted`] if a result is recorded
    /// - [`MeetingError::Expired`] if the entry outlived the wait timeout
    pub async fn ensure_pending(&self, id: &str) -> Result<(), MeetingError> {
        let entry = self.store.get(id).await?;
        if entry.result.is_some() {
            return Err(MeetingError::AlreadyCompleted(id.to_owned()));
        }
        if entry.created_at < self.cutoff() {
            return Err(MeetingError::Expired(id.to_owned()));
        }
        Ok(())
    }

    /// Records the result of rendezvous `id` and wakes its local waiters.
    ///
    /// # Errors
    ///
    /// - [`MeetingError::AlreadyCompleted`] on any completion after the first
    /// - [`MeetingError::NotFound`] or [`MeetingError::Expired`] if the entry
    ///   is gone or too old
    pub async fn complete(&self, id: &str, result: LoginResult) -> Result<(), MeetingError> {
        self.store.complete(id, result, self.cutoff()).await?;
        if let Some(waiters) = self.waiters.get(id) {
            waiters.notify.notify_waiters();
        }
        debug!(wait_id = %id, "rendezvous completed");
        Ok(())
    }

    /// Purges expired entries.
    ///
    /// # Errors
    ///
    /// [`MeetingError::Store`] on backend failure.
    pub async fn sweep(&self) -> Result<usize, MeetingError> {
        self.store.remove_older_than(self.cutoff()).await
    }

    /// Runs [`Place::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("rendezvous sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => match self.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "purged expired rendezvous entries"),
                        Err(e) => warn!(error = %e, "rendezvous sweep failed"),
                    },
                }
            }
        })
    }

    fn register(&self, id: &str) -> WaiterSlot<'_> {
        let notify = {
            let mut waiters = self
                .waiters
                .entry(id.to_owned())
                .or_insert_with(|| Waiters {
                    notify: Arc::new(Notify::new()),
                    count: 0,
                });
            waiters.count += 1;
            waiters.notify.clone()
        };
        WaiterSlot {
            place: self,
            id: id.to_owned(),
            notify,
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let now = Utc::now();
        chrono::Duration::from_std(self.config.wait_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    #[cfg(test)]
    fn waiter_count(&self, id: &str) -> usize {
        self.waiters.get(id).map_or(0, |w| w.count)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use identity_sdk::{DischargeToken, MeetingEntry};

    use super::*;
    use crate::infra::memstore::MemMeetingStore;

    fn config() -> PlaceConfig {
        PlaceConfig {
            wait_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(60),
        }
    }

    fn place() -> Arc<Place> {
        Arc::new(Place::new(Arc::new(MemMeetingStore::new()), config()))
    }

    fn token(user: &str) -> LoginResult {
        LoginResult::Success(DischargeToken {
            kind: "test".to_owned(),
            value: user.to_owned(),
            expires: DateTime::from_timestamp(1_900_000_000, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn zero_timeout_without_completion_times_out() {
        let place = place();
        let id = place.new_wait_id().await.unwrap();
        let err = place
            .wait(&id, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, MeetingError::Timeout(id.clone()));
        assert_eq!(
            err.to_string(),
            format!("login never completed for rendezvous \"{id}\"")
        );
        assert_eq!(place.waiter_count(&id), 0);
    }

    #[tokio::test]
    async fn wait_ids_are_unique_and_opaque() {
        let place = place();
        let a = place.new_wait_id().await.unwrap();
        let b = place.new_wait_id().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), WAIT_ID_BYTES * 2);
    }

    #[tokio::test]
    async fn second_completion_fails_and_first_result_stands() {
        let place = place();
        let id = place.new_wait_id().await.unwrap();
        place.complete(&id, token("alice")).await.unwrap();
        assert_eq!(
            place.complete(&id, token("mallory")).await,
            Err(MeetingError::AlreadyCompleted(id.clone()))
        );
        let got = place
            .wait(&id, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got, token("alice"));
    }

    #[tokio::test]
    async fn concurrent_waiters_observe_the_same_result() {
        let place = place();
        let id = place.new_wait_id().await.unwrap();
        let cancel = CancellationToken::new();

        let spawn_waiter = || {
            let place = place.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { place.wait(&id, Duration::from_secs(30), &cancel).await })
        };
        let first = spawn_waiter();
        let second = spawn_waiter();

        while place.waiter_count(&id) < 2 {
            tokio::task::yield_now().await;
        }
        place
            .complete(&id, LoginResult::Failure("denied".to_owned()))
            .await
            .unwrap();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a, LoginResult::Failure("denied".to_owned()));
        assert_eq!(a, b);
        assert_eq!(place.waiter_count(&id), 0);
    }

    #[tokio::test]
    async fn cancellation_is_not_a_timeout_and_releases_the_slot() {
        let place = place();
        let id = place.new_wait_id().await.unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let place = place.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { place.wait(&id, Duration::from_secs(30), &cancel).await })
        };
        while place.waiter_count(&id) < 1 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(MeetingError::Cancelled));
        assert_eq!(place.waiter_count(&id), 0);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let place = place();
        assert_eq!(
            place
                .wait("nope", Duration::from_secs(1), &CancellationToken::new())
                .await,
            Err(MeetingError::NotFound("nope".to_owned()))
        );
        assert_eq!(
            place.complete("nope", LoginResult::Failure("x".to_owned())).await,
            Err(MeetingError::NotFound("nope".to_owned()))
        );
    }

    #[tokio::test]
    async fn expired_entry_fails_instead_of_hanging_and_is_swept() {
        let store = Arc::new(MemMeetingStore::new());
        let place = Place::new(store.clone(), config());
        store
            .put("stale", Utc::now() - chrono::Duration::minutes(11))
            .await
            .unwrap();

        assert_eq!(
            place
                .wait("stale", Duration::from_secs(30), &CancellationToken::new())
                .await,
            Err(MeetingError::Expired("stale".to_owned()))
        );
        assert_eq!(
            place.complete("stale", LoginResult::Failure("late".to_owned())).await,
            Err(MeetingError::Expired("stale".to_owned()))
        );
        assert_eq!(place.sweep().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn completion_by_a_peer_instance_is_observed_by_polling() {
        let store: Arc<MemMeetingStore> = Arc::new(MemMeetingStore::new());
        let polling = PlaceConfig {
            poll_interval: Duration::from_millis(10),
            ..config()
        };
        let here = Arc::new(Place::new(store.clone(), polling));
        let peer = Place::new(store, polling);

        let id = here.new_wait_id().await.unwrap();
        let waiter = {
            let here = here.clone();
            let id = id.clone();
            tokio::spawn(async move {
                here.wait(&id, Duration::from_secs(30), &CancellationToken::new())
                    .await
            })
        };
        while here.waiter_count(&id) < 1 {
            tokio::task::yield_now().await;
        }
        peer.complete(&id, LoginResult::Failure("elsewhere".to_owned()))
            .await
            .unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Ok(LoginResult::Failure("elsewhere".to_owned()))
        );
    }

    #[tokio::test]
    async fn unrepresentable_timeout_waits_for_completion() {
        let place = place();
        let id = place.new_wait_id().await.unwrap();
        let waiter = {
            let place = place.clone();
            let id = id.clone();
            tokio::spawn(async move {
                place.wait(&id, Duration::MAX, &CancellationToken::new()).await
            })
        };
        while place.waiter_count(&id) < 1 {
            tokio::task::yield_now().await;
        }
        place.complete(&id, token("alice")).await.unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(token("alice")));
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemMeetingStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl MeetingStore for CountingStore {
        async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<(), MeetingError> {
            self.inner.put(id, created_at).await
        }

        async fn get(&self, id: &str) -> Result<MeetingEntry, MeetingError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.get(id).await
        }

        async fn complete(
            &self,
            id: &str,
            result: LoginResult,
            created_after: DateTime<Utc>,
        ) -> Result<(), MeetingError> {
            self.inner.complete(id, result, created_after).await
        }

        async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, MeetingError> {
            self.inner.remove_older_than(cutoff).await
        }
    }

    #[tokio::test]
    async fn zero_poll_interval_is_raised_to_the_floor() {
        let store = Arc::new(CountingStore::default());
        let place = Place::new(
            store.clone(),
            PlaceConfig {
                poll_interval: Duration::ZERO,
                ..config()
            },
        );
        let id = place.new_wait_id().await.unwrap();

        let err = place
            .wait(&id, Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, MeetingError::Timeout(id));
        let reads = store.reads.load(Ordering::Relaxed);
        assert!(reads <= 100 / 10 + 2, "{reads} store reads in 100ms");
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let place = place();
        let cancel = CancellationToken::new();
        let handle = place.clone().spawn_sweeper(Duration::from_millis(5), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
