// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tick::Clock;

use crate::ServiceKey;
use crate::constants::ERR_POISONED_LOCK;

/// Counts recent failures per service and decides whether a service is suppressed.
///
/// Every [`ServiceKey`] owns one failure record: a counter and an expiry instant. Recording a
/// failure increments the counter and pushes the expiry to `now + window`. Once the counter
/// reaches the caller's threshold, the service is suppressed until the expiry passes. Expired
/// records count as zero and restart from one on the next recorded failure; they are never purged
/// in the background.
///
/// `FailureTracker` is a cheap handle. Clones share the same records, so create one tracker and
/// hand clones to every [`RequestExecutor`][crate::RequestExecutor] that should see the same
/// failure state.
///
/// # Thread Safety
///
/// Each record is guarded by its own lock. Concurrent [`record_failure`][Self::record_failure]
/// calls for the same key never lose increments, and readers observe a record either before or
/// after an update, never halfway. A failure recorded concurrently with [`clear`][Self::clear]
/// lands either in the cleared record or in a fresh one, never in neither.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use backstop::{FailureTracker, ServiceKey};
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let tracker = FailureTracker::new(&control.to_clock());
/// let key = ServiceKey::from("fakepost");
///
/// tracker.record_failure(&key, Duration::from_secs(300));
/// assert!(!tracker.is_suppressed(&key, 2));
///
/// tracker.record_failure(&key, Duration::from_secs(300));
/// assert!(tracker.is_suppressed(&key, 2));
///
/// control.advance(Duration::from_secs(300));
/// assert!(!tracker.is_suppressed(&key, 2));
/// ```
#[derive(Debug, Clone)]
pub struct FailureTracker {
    shared: Arc<TrackerShared>,
}

#[derive(Debug)]
struct TrackerShared {
    records: Mutex<HashMap<ServiceKey, Arc<Mutex<FailureRecord>>>>,
    clock: Clock,
}

impl FailureTracker {
    /// Creates an empty tracker that reads time from the given clock.
    #[must_use]
    pub fn new(clock: impl AsRef<Clock>) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                records: Mutex::new(HashMap::new()),
                clock: clock.as_ref().clone(),
            }),
        }
    }

    /// Returns true if `key` has at least `threshold` failures that have not expired yet.
    ///
    /// A key that was never recorded is not suppressed.
    #[must_use]
    pub fn is_suppressed(&self, key: &ServiceKey, threshold: u32) -> bool {
        self.remaining_suppression(key, threshold).is_some()
    }

    /// Records one failure for `key` and extends its expiry to `now + window`.
    ///
    /// Returns the live failure count after the update. If the previous failures already expired,
    /// counting restarts at one.
    pub fn record_failure(&self, key: &ServiceKey, window: Duration) -> u32 {
        // NOTE: the clock is read before taking the lock.
        let now = self.shared.clock.instant();

        // A record detached by `clear` between the lookup and the lock is replaced by a fresh one.
        let count = loop {
            if let Some(count) = hit_attached(&self.record(key), now, window) {
                break count;
            }
        };

        #[cfg(any(feature = "logs", test))]
        tracing::event!(
            name: "backstop.failure",
            tracing::Level::INFO,
            service.key = %key,
            failure.count = count,
            failure.window = window.as_secs_f32(),
        );

        count
    }

    /// Returns the number of failures recorded for `key` that have not expired yet.
    #[must_use]
    pub fn failure_count(&self, key: &ServiceKey) -> u32 {
        let now = self.shared.clock.instant();

        self.existing_record(key)
            .map_or(0, |record| record.lock().expect(ERR_POISONED_LOCK).live_count(now))
    }

    /// Returns how long `key` stays suppressed, or `None` if it is not suppressed.
    ///
    /// A record whose expiry cannot be represented never expires and reports [`Duration::MAX`].
    #[must_use]
    pub fn remaining_suppression(&self, key: &ServiceKey, threshold: u32) -> Option<Duration> {
        let now = self.shared.clock.instant();
        let record = self.existing_record(key)?;
        let record = *record.lock().expect(ERR_POISONED_LOCK);

        if record.live_count(now) < threshold.max(1) {
            return None;
        }

        Some(record.expires_at.map_or(Duration::MAX, |at| at.saturating_duration_since(now)))
    }

    /// Forgets every failure recorded for `key`.
    pub fn clear(&self, key: &ServiceKey) {
        let mut records = self.shared.records.lock().expect(ERR_POISONED_LOCK);

        if let Some(record) = records.remove(key) {
            record.lock().expect(ERR_POISONED_LOCK).detached = true;
        }
    }

    fn existing_record(&self, key: &ServiceKey) -> Option<Arc<Mutex<FailureRecord>>> {
        self.shared.records.lock().expect(ERR_POISONED_LOCK).get(key).map(Arc::clone)
    }

    fn record(&self, key: &ServiceKey) -> Arc<Mutex<FailureRecord>> {
        let mut records = self.shared.records.lock().expect(ERR_POISONED_LOCK);

        if let Some(record) = records.get(key) {
            return Arc::clone(record);
        }

        let record = Arc::new(Mutex::new(FailureRecord::default()));
        records.insert(key.clone(), Arc::clone(&record));
        record
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shared.records.lock().expect(ERR_POISONED_LOCK).len()
    }
}

/// Records a failure unless the record was removed from the tracker.
fn hit_attached(record: &Mutex<FailureRecord>, now: Instant, window: Duration) -> Option<u32> {
    let mut record = record.lock().expect(ERR_POISONED_LOCK);

    (!record.detached).then(|| record.hit(now, window))
}

/// Failure state of one service.
#[derive(Debug, Clone, Copy, Default)]
struct FailureRecord {
    count: u32,
    // `None` means the record never expires, either because nothing was recorded yet
    // (count is zero) or because `now + window` overflowed.
    expires_at: Option<Instant>,
    // Set once the record is removed from the tracker.
    detached: bool,
}

impl FailureRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn live_count(&self, now: Instant) -> u32 {
        if self.is_live(now) { self.count } else { 0 }
    }

    fn hit(&mut self, now: Instant, window: Duration) -> u32 {
        if !self.is_live(now) {
            self.count = 0;
        }

        self.count = self.count.saturating_add(1);

        // Concurrent callers may arrive with slightly older instants; never move the expiry back.
        self.expires_at = match (self.expires_at, now.checked_add(window)) {
            (_, None) => None,
            (Some(current), Some(next)) if self.count > 1 => Some(current.max(next)),
            (_, Some(next)) => Some(next),
        };

        self.count
    }
}
