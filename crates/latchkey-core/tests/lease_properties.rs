//! Property tests for key derivation, jitter and the retry budget

use std::sync::Arc;
use std::time::Duration;

use latchkey_common::ManualClock;
use latchkey_core::{
    AcquireRequest, Acquisition, BackoffRange, JitterSource, LeaseLock, LockOptions,
    RecordingDelay, SeededJitter, derive_key,
};
use latchkey_store::MemoryStore;
use proptest::prelude::*;

const NOW: i64 = 1_534_150_000_000;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

/// Run one acquisition against a held lease and return the recorded sleeps
fn sleeps_for(seed: u64, budget_ms: i64, backoff: BackoffRange) -> (Acquisition, Vec<Duration>) {
    let store = MemoryStore::new();
    store.seed("orderno_lock", (NOW + 3_600_000).to_string());

    let clock = Arc::new(ManualClock::new(NOW));
    let delay = Arc::new(RecordingDelay::advancing(clock.clone()));
    let options = LockOptions {
        backoff,
        ..Default::default()
    };
    let lock = LeaseLock::new(Arc::new(store), options)
        .unwrap()
        .with_clock(clock)
        .with_jitter(Arc::new(SeededJitter::from_seed(seed)))
        .with_delay(delay.clone());

    let acquisition = block_on(lock.acquire_with(
        AcquireRequest::new("orderno").wait_budget_ms(budget_ms),
    ))
    .unwrap();
    (acquisition, delay.recorded())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_derive_key_appends_suffix(resource in ".{0,40}") {
        let key = derive_key(&resource);
        prop_assert!(key.ends_with("_lock"));
        prop_assert_eq!(&key[..resource.len()], resource.as_str());
        prop_assert_eq!(key.len(), resource.len() + "_lock".len());
    }

    #[test]
    fn test_jitter_within_inclusive_bounds(seed: u64, min in 1u64..500, width in 0u64..200) {
        let range = BackoffRange::new(min, min + width).unwrap();
        let jitter = SeededJitter::from_seed(seed);
        for _ in 0..50 {
            let sample = jitter.sample_ms(range);
            prop_assert!(sample >= range.min_ms && sample <= range.max_ms);
        }
    }

    #[test]
    fn test_budget_spent_exactly_by_sampled_jitter(seed: u64, budget_ms in -100i64..2_000) {
        let (acquisition, sleeps) = sleeps_for(seed, budget_ms, BackoffRange::default());

        let Acquisition::TimedOut { attempts, waited_ms } = acquisition else {
            return Err(TestCaseError::fail("held lease must not be acquired"));
        };

        // Every sleep is a valid jitter sample
        for sleep in &sleeps {
            prop_assert!((80..=100).contains(&(sleep.as_millis() as u64)));
        }

        let total: i64 = sleeps.iter().map(|d| d.as_millis() as i64).sum();
        prop_assert_eq!(waited_ms, total);

        if budget_ms <= 0 {
            prop_assert!(sleeps.is_empty());
            prop_assert_eq!(attempts, 1);
        } else {
            // A sleep that lands exactly on zero earns one more attempt, an overdraw does not
            let landed_on_zero = (total == budget_ms) as usize;
            prop_assert_eq!(attempts as usize, sleeps.len() + landed_on_zero);

            // The budget was still positive before the last sleep and spent after it
            let last = sleeps.last().map(|d| d.as_millis() as i64).unwrap_or(0);
            prop_assert!(total >= budget_ms);
            prop_assert!(total - last < budget_ms);
        }
    }

    #[test]
    fn test_same_seed_replays_same_sleeps(seed: u64, budget_ms in 0i64..1_500) {
        let (first, first_sleeps) = sleeps_for(seed, budget_ms, BackoffRange::default());
        let (second, second_sleeps) = sleeps_for(seed, budget_ms, BackoffRange::default());
        prop_assert_eq!(first, second);
        prop_assert_eq!(first_sleeps, second_sleeps);
    }
}
