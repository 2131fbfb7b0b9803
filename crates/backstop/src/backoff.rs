// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Linear backoff schedule used between retry attempts.
///
/// The delay before retry `n` (1-based) is `base_delay * n`:
///
/// **Example with `1s` base delay:** `1s, 2s, 3s, 4s, ...`
///
/// The schedule is deterministic and has no jitter. Many clients that start failing at the same
/// moment will retry in lockstep.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use backstop::LinearBackoff;
///
/// let backoff = LinearBackoff::new(Duration::from_millis(100));
///
/// assert_eq!(backoff.delay(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay(3), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinearBackoff {
    base_delay: Duration,
}

impl LinearBackoff {
    /// Creates a schedule with the given base delay.
    #[must_use]
    pub const fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Returns the base delay of the schedule.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the delay to wait before the given retry.
    ///
    /// `retry` is the 1-based number of the retry about to be performed. A `retry` of `0`
    /// yields [`Duration::ZERO`]. The result saturates at [`Duration::MAX`].
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Returns the delays before the first, second, third, ... retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let backoff = *self;
        (1..=u32::MAX).map(move |retry| backoff.delay(retry))
    }
}
