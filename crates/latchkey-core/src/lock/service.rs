//! Lease lock service
//!
//! Provides:
//! - The acquisition loop: set-if-absent, then steal a stale lease, then back off and retry
//! - Release: conditional delete of a live lease
//! - Holder-checked release against the value a grant wrote
//! - A critical-section helper that acquires, runs and releases
//!
//! When the store offers check-and-act operations and the options prefer them,
//! the steal and both releases run as single server-side steps. Otherwise the
//! two-step protocol runs and the following races remain:
//! - a losing steal still overwrote the winner's expiry with its own (off by
//!   the time between the two writes)
//! - a release can delete a lease stolen between its read and its delete

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use latchkey_common::{Clock, SystemClock};
use latchkey_store::{ConditionalDelete, StoreAdapter};
use metrics::counter;
use tracing::{debug, info, warn};

use super::model::*;
use crate::backoff::{Delay, JitterSource, SeededJitter, TokioDelay};
use crate::cancel::CancelReason;
use crate::error::{LockError, Result};
use crate::key::derive_key_with_suffix;
use crate::lease::{decode_expiry, encode_expiry, is_stale, new_expiry};

#[derive(Default)]
struct LockStatsCollector {
    total_acquisitions: AtomicU64,
    fresh_acquisitions: AtomicU64,
    steals: AtomicU64,
    lost_steals: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    total_releases: AtomicU64,
    skipped_releases: AtomicU64,
    store_errors: AtomicU64,
    corrupt_values: AtomicU64,
    total_retries: AtomicU64,
}

impl LockStatsCollector {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockStats {
        LockStats {
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            fresh_acquisitions: self.fresh_acquisitions.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            lost_steals: self.lost_steals.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            skipped_releases: self.skipped_releases.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            corrupt_values: self.corrupt_values.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
        }
    }
}

/// Lease-based lock over a shared key-value store
///
/// Cloning is cheap; clones share the store, injected collaborators and statistics.
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn StoreAdapter>,
    options: LockOptions,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    delay: Arc<dyn Delay>,
    stats: Arc<LockStatsCollector>,
}

impl LeaseLock {
    /// Create a lock using the system clock, entropy-seeded jitter and the tokio timer
    pub fn new(store: Arc<dyn StoreAdapter>, options: LockOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            store,
            options,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(SeededJitter::from_entropy()),
            delay: Arc::new(TokioDelay),
            stats: Arc::new(LockStatsCollector::default()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    pub fn key_for(&self, resource_id: &str) -> String {
        derive_key_with_suffix(resource_id, &self.options.key_suffix)
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Acquire `resource_id` with the lock's default lease duration and wait budget
    pub async fn acquire(&self, resource_id: &str) -> Result<Acquisition> {
        self.acquire_with(AcquireRequest::new(resource_id)).await
    }

    /// Acquire with per-call overrides, deadline and cancellation
    ///
    /// Returns `Ok(Acquisition::TimedOut)` when the wait budget runs out and
    /// `Err(LockError::Cancelled)` when the signal fires or the deadline passes.
    /// Store failures end the loop immediately.
    pub async fn acquire_with(&self, request: AcquireRequest) -> Result<Acquisition> {
        let key = self.key_for(&request.resource_id);
        let lease_duration_ms = request
            .lease_duration_ms
            .unwrap_or(self.options.lease_duration_ms);
        if lease_duration_ms <= 0 {
            return Err(LockError::InvalidOptions(format!(
                "lease duration must be positive, got {lease_duration_ms}"
            )));
        }

        let mut remaining_ms = request
            .wait_budget_ms
            .unwrap_or(self.options.wait_budget_ms);
        let started_ms = self.clock.now_ms();
        let mut attempts: u32 = 0;

        loop {
            self.check_cancelled(&request, &key)?;
            attempts += 1;

            match self.try_acquire(&key, lease_duration_ms).await {
                Ok(Some((path, expires_at_ms))) => {
                    self.record_acquired(path);
                    info!(
                        key = %key,
                        path = path.as_str(),
                        attempts,
                        expires_at_ms,
                        "Lease acquired"
                    );
                    return Ok(Acquisition::Acquired(LeaseGrant {
                        resource_id: request.resource_id,
                        key,
                        expires_at_ms,
                        path,
                        attempts,
                    }));
                }
                Ok(None) => {}
                Err(e) => {
                    self.record_failure(&key, &e);
                    return Err(e);
                }
            }

            if remaining_ms <= 0 {
                return Ok(self.timed_out(&key, attempts, started_ms));
            }

            let jitter_ms = self.jitter.sample_ms(self.options.backoff);
            remaining_ms -= jitter_ms as i64;
            LockStatsCollector::incr(&self.stats.total_retries);
            debug!(
                key = %key,
                attempt = attempts,
                jitter_ms,
                remaining_ms,
                "Lease held elsewhere, backing off"
            );
            self.pause(Duration::from_millis(jitter_ms), &request, &key)
                .await?;

            // Retry only while the budget is still >= 0 after the sleep
            if remaining_ms < 0 {
                return Ok(self.timed_out(&key, attempts, started_ms));
            }
        }
    }

    fn timed_out(&self, key: &str, attempts: u32, started_ms: i64) -> Acquisition {
        LockStatsCollector::incr(&self.stats.timeouts);
        counter!("latchkey_acquire_timeout_total").increment(1);
        let waited_ms = self.clock.now_ms() - started_ms;
        info!(key = %key, attempts, waited_ms, "Lease wait budget exhausted");
        Acquisition::TimedOut {
            attempts,
            waited_ms,
        }
    }

    /// Release `resource_id` if its lease is still live
    ///
    /// Deletes the key when the stored expiry is at or after now. An expired
    /// lease is left in place for contenders to steal. This does not check who
    /// wrote the lease; see [`release_grant`](Self::release_grant).
    pub async fn release(&self, resource_id: &str) -> Result<ReleaseOutcome> {
        let key = self.key_for(resource_id);
        let outcome = self.release_live(&key).await;
        self.finish_release(&key, outcome)
    }

    /// Release the lease described by `grant`, only if the store still holds the value it wrote
    pub async fn release_grant(&self, grant: &LeaseGrant) -> Result<ReleaseOutcome> {
        let outcome = self.release_owned(grant).await;
        self.finish_release(&grant.key, outcome)
    }

    /// Acquire, run `critical_section`, then release
    ///
    /// Returns `Ok(None)` without running the section when the wait budget runs
    /// out. A failed release after the section is returned as an error and the
    /// section's output is dropped.
    pub async fn with_lease<R, F, Fut, T>(&self, request: R, critical_section: F) -> Result<Option<T>>
    where
        R: Into<AcquireRequest>,
        F: FnOnce(LeaseGrant) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(grant) = self.acquire_with(request.into()).await?.into_grant() else {
            return Ok(None);
        };

        let output = critical_section(grant.clone()).await;

        self.release_grant(&grant).await?;
        Ok(Some(output))
    }

    /// One pass of the protocol. `Ok(None)` means the lease is held elsewhere.
    async fn try_acquire(
        &self,
        key: &str,
        lease_duration_ms: i64,
    ) -> Result<Option<(AcquirePath, i64)>> {
        let expires_at_ms = new_expiry(self.clock.now_ms(), lease_duration_ms);
        let value = encode_expiry(expires_at_ms);

        if self.store.set_if_absent(key, &value).await? {
            return Ok(Some((AcquirePath::Fresh, expires_at_ms)));
        }

        let Some(current) = self.store.get(key).await? else {
            // Released between the two calls
            return Ok(None);
        };

        match decode_expiry(&current) {
            Some(current_expiry) if !is_stale(current_expiry, self.clock.now_ms()) => {
                return Ok(None);
            }
            Some(_) => {}
            None => match self.options.corrupt_policy {
                CorruptLeasePolicy::Fail => {
                    return Err(LockError::CorruptLeaseValue {
                        key: key.to_string(),
                        value: current,
                    });
                }
                CorruptLeasePolicy::Overwrite => {
                    LockStatsCollector::incr(&self.stats.corrupt_values);
                    warn!(key = %key, value = %current, "Overwriting corrupt lease value");
                }
            },
        }

        let won = if self.use_check_and_act() {
            self.store.replace_if_equals(key, &current, &value).await?
        } else {
            match self.store.get_and_replace(key, &value).await? {
                Some(previous) => previous == current,
                // Deleted after our read; our write created the key
                None => true,
            }
        };

        if won {
            Ok(Some((AcquirePath::Stolen, expires_at_ms)))
        } else {
            LockStatsCollector::incr(&self.stats.lost_steals);
            debug!(key = %key, "Stale lease stolen by another contender first");
            Ok(None)
        }
    }

    async fn release_live(&self, key: &str) -> Result<ReleaseOutcome> {
        let now_ms = self.clock.now_ms();

        if self.use_check_and_act() {
            return match self.store.delete_if_live(key, now_ms).await? {
                ConditionalDelete::Deleted => Ok(ReleaseOutcome::Deleted),
                ConditionalDelete::Expired => Ok(ReleaseOutcome::Expired),
                ConditionalDelete::Absent => Ok(ReleaseOutcome::Absent),
                ConditionalDelete::Corrupt(value) => Err(LockError::CorruptLeaseValue {
                    key: key.to_string(),
                    value,
                }),
            };
        }

        let Some(current) = self.store.get(key).await? else {
            return Ok(ReleaseOutcome::Absent);
        };
        let Some(expires_at_ms) = decode_expiry(&current) else {
            return Err(LockError::CorruptLeaseValue {
                key: key.to_string(),
                value: current,
            });
        };

        if expires_at_ms >= now_ms {
            self.store.delete(key).await?;
            Ok(ReleaseOutcome::Deleted)
        } else {
            Ok(ReleaseOutcome::Expired)
        }
    }

    async fn release_owned(&self, grant: &LeaseGrant) -> Result<ReleaseOutcome> {
        let now_ms = self.clock.now_ms();
        let value = encode_expiry(grant.expires_at_ms);

        if self.use_check_and_act() {
            if grant.expires_at_ms < now_ms {
                return Ok(ReleaseOutcome::Expired);
            }
            let deleted = self.store.delete_if_equals(&grant.key, &value).await?;
            return Ok(if deleted {
                ReleaseOutcome::Deleted
            } else {
                ReleaseOutcome::NotOwner
            });
        }

        let Some(current) = self.store.get(&grant.key).await? else {
            return Ok(ReleaseOutcome::Absent);
        };
        if current != value {
            return Ok(ReleaseOutcome::NotOwner);
        }
        if grant.expires_at_ms < now_ms {
            return Ok(ReleaseOutcome::Expired);
        }

        self.store.delete(&grant.key).await?;
        Ok(ReleaseOutcome::Deleted)
    }

    fn finish_release(
        &self,
        key: &str,
        outcome: Result<ReleaseOutcome>,
    ) -> Result<ReleaseOutcome> {
        match &outcome {
            Ok(ReleaseOutcome::Deleted) => {
                LockStatsCollector::incr(&self.stats.total_releases);
                info!(key = %key, "Lease released");
            }
            Ok(skipped) => {
                LockStatsCollector::incr(&self.stats.skipped_releases);
                warn!(key = %key, outcome = skipped.as_str(), "Lease release skipped");
            }
            Err(e) => self.record_failure(key, e),
        }

        if let Ok(released) = &outcome {
            counter!("latchkey_release_total", "outcome" => released.as_str()).increment(1);
        }
        outcome
    }

    fn check_cancelled(&self, request: &AcquireRequest, key: &str) -> Result<()> {
        if request
            .cancel
            .as_ref()
            .is_some_and(|signal| signal.is_cancelled())
        {
            return Err(self.cancelled(key, CancelReason::Requested));
        }
        if let Some(deadline_ms) = request.deadline_ms
            && self.clock.now_ms() >= deadline_ms
        {
            return Err(self.cancelled(key, CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration, request: &AcquireRequest, key: &str) -> Result<()> {
        match &request.cancel {
            Some(signal) => {
                tokio::select! {
                    _ = self.delay.sleep(duration) => Ok(()),
                    _ = signal.cancelled() => Err(self.cancelled(key, CancelReason::Requested)),
                }
            }
            None => {
                self.delay.sleep(duration).await;
                Ok(())
            }
        }
    }

    fn cancelled(&self, key: &str, reason: CancelReason) -> LockError {
        LockStatsCollector::incr(&self.stats.cancellations);
        warn!(key = %key, reason = %reason, "Lease acquisition cancelled");
        LockError::Cancelled(reason)
    }

    fn record_acquired(&self, path: AcquirePath) {
        LockStatsCollector::incr(&self.stats.total_acquisitions);
        match path {
            AcquirePath::Fresh => LockStatsCollector::incr(&self.stats.fresh_acquisitions),
            AcquirePath::Stolen => LockStatsCollector::incr(&self.stats.steals),
        }
        counter!("latchkey_acquire_total", "path" => path.as_str()).increment(1);
    }

    fn record_failure(&self, key: &str, error: &LockError) {
        match error {
            LockError::StoreUnavailable(e) => {
                LockStatsCollector::incr(&self.stats.store_errors);
                warn!(key = %key, error = %e, "Lease store call failed");
            }
            LockError::CorruptLeaseValue { value, .. } => {
                LockStatsCollector::incr(&self.stats.corrupt_values);
                warn!(key = %key, value = %value, "Corrupt lease value");
            }
            LockError::Cancelled(_) | LockError::InvalidOptions(_) => {}
        }
    }

    fn use_check_and_act(&self) -> bool {
        self.options.prefer_atomic && self.store.supports_check_and_act()
    }
}

#[cfg(test)]
mod tests {
    use latchkey_common::ManualClock;
    use latchkey_store::MemoryStore;

    use super::*;
    use crate::backoff::{FixedJitter, RecordingDelay};

    const NOW: i64 = 1_534_150_000_000;

    struct Fixture {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        delay: Arc<RecordingDelay>,
        lock: LeaseLock,
    }

    fn fixture(store: MemoryStore, options: LockOptions) -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW));
        let delay = Arc::new(RecordingDelay::advancing(clock.clone()));
        let lock = LeaseLock::new(Arc::new(store.clone()), options)
            .unwrap()
            .with_clock(clock.clone())
            .with_jitter(Arc::new(FixedJitter(90)))
            .with_delay(delay.clone());
        Fixture {
            store,
            clock,
            delay,
            lock,
        }
    }

    fn two_step() -> LockOptions {
        LockOptions {
            prefer_atomic: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fresh_acquire_writes_expiry() {
        let f = fixture(MemoryStore::new(), two_step());

        let grant = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
        assert_eq!(grant.key, "orderno_lock");
        assert_eq!(grant.path, AcquirePath::Fresh);
        assert_eq!(grant.attempts, 1);
        assert_eq!(grant.expires_at_ms, NOW + 60_000);
        assert_eq!(
            f.store.peek("orderno_lock"),
            Some((NOW + 60_000).to_string())
        );
        assert_eq!(f.delay.count(), 0);
    }

    #[tokio::test]
    async fn test_steal_stale_lease() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", (NOW - 1_000).to_string());

        let grant = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
        assert_eq!(grant.path, AcquirePath::Stolen);
        assert_eq!(
            f.store.peek("orderno_lock"),
            Some((NOW + 60_000).to_string())
        );

        let stats = f.lock.stats();
        assert_eq!(stats.steals, 1);
        assert_eq!(stats.fresh_acquisitions, 0);
    }

    #[tokio::test]
    async fn test_lease_expiring_exactly_now_is_stale() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", NOW.to_string());

        let acquisition = f.lock.acquire("orderno").await.unwrap();
        assert_eq!(acquisition.grant().unwrap().path, AcquirePath::Stolen);
    }

    #[tokio::test]
    async fn test_zero_budget_tries_once_without_sleeping() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", (NOW + 5_000).to_string());

        let acquisition = f
            .lock
            .acquire_with(AcquireRequest::new("orderno").wait_budget_ms(0))
            .await
            .unwrap();

        assert_eq!(
            acquisition,
            Acquisition::TimedOut {
                attempts: 1,
                waited_ms: 0
            }
        );
        assert_eq!(f.delay.count(), 0);
        assert_eq!(f.lock.stats().timeouts, 1);
        // setnx + get, no steal against a live lease
        assert_eq!(f.store.operation_count(), 2);
    }

    #[tokio::test]
    async fn test_budget_decrements_by_jitter() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", (NOW + 60_000).to_string());

        let acquisition = f
            .lock
            .acquire_with(AcquireRequest::new("orderno").wait_budget_ms(270))
            .await
            .unwrap();

        // 270 -> 180 -> 90 -> 0, then one last attempt
        assert_eq!(
            acquisition,
            Acquisition::TimedOut {
                attempts: 4,
                waited_ms: 270
            }
        );
        assert_eq!(f.delay.recorded(), vec![Duration::from_millis(90); 3]);
        assert_eq!(f.lock.stats().total_retries, 3);
    }

    #[tokio::test]
    async fn test_overdrawn_budget_gives_up_without_another_attempt() {
        let f = fixture(MemoryStore::new(), two_step());
        // Stale by the time the single 90ms sleep ends
        f.store.seed("orderno_lock", (NOW + 60).to_string());

        let acquisition = f
            .lock
            .acquire_with(AcquireRequest::new("orderno").wait_budget_ms(50))
            .await
            .unwrap();

        assert_eq!(
            acquisition,
            Acquisition::TimedOut {
                attempts: 1,
                waited_ms: 90
            }
        );
        assert_eq!(f.delay.count(), 1);
        assert_eq!(f.store.peek("orderno_lock"), Some((NOW + 60).to_string()));
        assert_eq!(f.lock.stats().steals, 0);
    }

    #[tokio::test]
    async fn test_acquire_after_holder_lease_expires() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", (NOW + 150).to_string());

        let grant = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
        // Two sleeps of 90ms move the clock past the holder's expiry
        assert_eq!(grant.attempts, 3);
        assert_eq!(grant.path, AcquirePath::Stolen);
        assert_eq!(f.clock.now_ms(), NOW + 180);
    }

    #[tokio::test]
    async fn test_release_deletes_live_lease() {
        let f = fixture(MemoryStore::new(), two_step());
        f.lock.acquire("orderno").await.unwrap();

        assert_eq!(
            f.lock.release("orderno").await.unwrap(),
            ReleaseOutcome::Deleted
        );
        assert!(f.store.is_empty());
        assert_eq!(
            f.lock.release("orderno").await.unwrap(),
            ReleaseOutcome::Absent
        );

        let stats = f.lock.stats();
        assert_eq!(stats.total_releases, 1);
        assert_eq!(stats.skipped_releases, 1);
    }

    #[tokio::test]
    async fn test_release_leaves_expired_lease() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", (NOW - 1).to_string());

        assert_eq!(
            f.lock.release("orderno").await.unwrap(),
            ReleaseOutcome::Expired
        );
        assert!(f.store.peek("orderno_lock").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_value_fails_by_default() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.seed("orderno_lock", "not-a-number");

        let err = f.lock.acquire("orderno").await.unwrap_err();
        assert_eq!(
            err,
            LockError::CorruptLeaseValue {
                key: "orderno_lock".to_string(),
                value: "not-a-number".to_string(),
            }
        );
        assert_eq!(f.store.peek("orderno_lock"), Some("not-a-number".to_string()));

        assert!(matches!(
            f.lock.release("orderno").await,
            Err(LockError::CorruptLeaseValue { .. })
        ));
        assert_eq!(f.lock.stats().corrupt_values, 2);
    }

    #[tokio::test]
    async fn test_corrupt_value_overwrite_policy_steals() {
        let options = LockOptions {
            corrupt_policy: CorruptLeasePolicy::Overwrite,
            ..two_step()
        };
        let f = fixture(MemoryStore::new(), options);
        f.store.seed("orderno_lock", "not-a-number");

        let grant = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
        assert_eq!(grant.path, AcquirePath::Stolen);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_timeout() {
        let f = fixture(MemoryStore::new(), two_step());
        f.store.set_unavailable(true);

        let err = f.lock.acquire("orderno").await.unwrap_err();
        assert!(matches!(err, LockError::StoreUnavailable(_)));
        assert_eq!(f.delay.count(), 0);

        assert!(matches!(
            f.lock.release("orderno").await,
            Err(LockError::StoreUnavailable(_))
        ));
        assert_eq!(f.lock.stats().store_errors, 2);
    }

    #[tokio::test]
    async fn test_invalid_lease_override() {
        let f = fixture(MemoryStore::new(), two_step());
        let result = f
            .lock
            .acquire_with(AcquireRequest::new("orderno").lease_duration_ms(0))
            .await;
        assert!(matches!(result, Err(LockError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_options() {
        let options = LockOptions {
            lease_duration_ms: -5,
            ..Default::default()
        };
        assert!(LeaseLock::new(Arc::new(MemoryStore::new()), options).is_err());
    }

    #[tokio::test]
    async fn test_atomic_steal_and_release() {
        let f = fixture(MemoryStore::new().with_check_and_act(), LockOptions::default());
        f.store.seed("orderno_lock", (NOW - 1_000).to_string());

        let grant = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
        assert_eq!(grant.path, AcquirePath::Stolen);

        assert_eq!(
            f.lock.release("orderno").await.unwrap(),
            ReleaseOutcome::Deleted
        );
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_path_skipped_when_not_preferred() {
        let f = fixture(MemoryStore::new().with_check_and_act(), two_step());
        f.store.seed("orderno_lock", (NOW - 1_000).to_string());

        // Two-step release issues get + delete; the conditional delete would be one call
        f.lock.acquire("orderno").await.unwrap();
        let before = f.store.operation_count();
        f.lock.release("orderno").await.unwrap();
        assert_eq!(f.store.operation_count() - before, 2);
    }

    #[tokio::test]
    async fn test_release_grant_after_steal_keeps_thief_lease() {
        for store in [MemoryStore::new(), MemoryStore::new().with_check_and_act()] {
            let f = fixture(store, LockOptions::default());

            let victim = f
                .lock
                .acquire_with(AcquireRequest::new("orderno").lease_duration_ms(100))
                .await
                .unwrap()
                .into_grant()
                .unwrap();

            f.clock.advance(200);
            let thief = f.lock.acquire("orderno").await.unwrap().into_grant().unwrap();
            assert_eq!(thief.path, AcquirePath::Stolen);

            let outcome = f.lock.release_grant(&victim).await.unwrap();
            assert!(matches!(
                outcome,
                ReleaseOutcome::NotOwner | ReleaseOutcome::Expired
            ));
            assert_eq!(
                f.store.peek("orderno_lock"),
                Some(thief.expires_at_ms.to_string())
            );

            assert_eq!(
                f.lock.release_grant(&thief).await.unwrap(),
                ReleaseOutcome::Deleted
            );
            assert!(f.store.is_empty());
        }
    }

    #[tokio::test]
    async fn test_with_lease_runs_and_releases() {
        let f = fixture(MemoryStore::new(), LockOptions::default());

        let output = f
            .lock
            .with_lease("orderno", |grant| async move { grant.attempts * 10 })
            .await
            .unwrap();
        assert_eq!(output, Some(10));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_with_lease_times_out_without_running() {
        let f = fixture(MemoryStore::new(), LockOptions::default());
        f.store.seed("orderno_lock", (NOW + 60_000).to_string());

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let output = f
            .lock
            .with_lease(
                AcquireRequest::new("orderno").wait_budget_ms(0),
                |_| async move { flag.store(true, Ordering::SeqCst) },
            )
            .await
            .unwrap();
        assert!(output.is_none());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_with_lease_returns_release_failure() {
        let f = fixture(MemoryStore::new(), LockOptions::default());
        let store = f.store.clone();

        let result = f
            .lock
            .with_lease("orderno", |_| async move { store.set_unavailable(true) })
            .await;
        assert!(matches!(result, Err(LockError::StoreUnavailable(_))));

        f.store.set_unavailable(false);
        assert!(f.store.peek("orderno_lock").is_some(), "lease left to expire");
        assert_eq!(f.lock.stats().total_releases, 0);
    }

    #[tokio::test]
    async fn test_custom_key_suffix() {
        let options = LockOptions {
            key_suffix: ":lease".to_string(),
            ..Default::default()
        };
        let f = fixture(MemoryStore::new(), options);
        f.lock.acquire("orderno").await.unwrap();
        assert!(f.store.peek("orderno:lease").is_some());
    }
}
