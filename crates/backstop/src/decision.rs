// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{AttemptOutcome, FailureTracker, ResilienceConfig, ServiceKey};

/// What to do after an attempt: whether to retry and whether the attempt counts as a failure of
/// the service.
///
/// Produced by [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decision {
    retry: bool,
    record_failure: bool,
}

impl Decision {
    const fn new(retry: bool, record_failure: bool) -> Self {
        Self { retry, record_failure }
    }

    /// Returns true if another attempt should be made.
    #[must_use]
    pub fn retry(&self) -> bool {
        self.retry
    }

    /// Returns true if a failure must be recorded for the service.
    #[must_use]
    pub fn record_failure(&self) -> bool {
        self.record_failure
    }
}

/// Decides what follows the attempt with the given 0-based index.
///
/// The rules are evaluated in order and the first match wins:
///
/// | Condition | Retry | Record failure |
/// |-----------|-------|----------------|
/// | `attempt >= max_retries` | no | yes |
/// | [`TransportError`][AttemptOutcome::TransportError] | yes | yes |
/// | [`IncompleteResult`][AttemptOutcome::IncompleteResult] | yes | no |
/// | [`ServerError`][AttemptOutcome::ServerError] | yes | yes |
/// | anything else | no | no |
///
/// The first rule applies to every outcome, successes included: the last permitted attempt always
/// counts as one failure observation for the service.
///
/// # Examples
///
/// ```rust
/// use backstop::{AttemptOutcome, ResilienceConfig, TransportErrorKind, decide};
///
/// let config = ResilienceConfig::default();
/// let outcome = AttemptOutcome::TransportError(TransportErrorKind::Connect);
///
/// let decision = decide(0, &outcome, &config);
/// assert!(decision.retry());
/// assert!(decision.record_failure());
///
/// let decision = decide(config.max_retries(), &outcome, &config);
/// assert!(!decision.retry());
/// assert!(decision.record_failure());
/// ```
#[must_use]
pub fn decide(attempt: u32, outcome: &AttemptOutcome, config: &ResilienceConfig) -> Decision {
    if attempt >= config.max_retries() {
        return Decision::new(false, true);
    }

    match outcome {
        AttemptOutcome::TransportError(_) | AttemptOutcome::ServerError(_) => Decision::new(true, true),
        AttemptOutcome::IncompleteResult(_) => Decision::new(true, false),
        AttemptOutcome::Success(_) | AttemptOutcome::ClientError(_) => Decision::new(false, false),
    }
}

/// Applies [`decide`]: records a failure for `key` when requested and returns whether to retry.
pub fn should_retry(
    attempt: u32,
    outcome: &AttemptOutcome,
    config: &ResilienceConfig,
    tracker: &FailureTracker,
    key: &ServiceKey,
) -> bool {
    let decision = decide(attempt, outcome, config);

    if decision.record_failure() {
        tracker.record_failure(key, config.suppression_window());
    }

    decision.retry()
}
