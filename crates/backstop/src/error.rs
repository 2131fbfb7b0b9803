// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::time::Duration;

use recoverable::{Recovery, RecoveryInfo};

use crate::{HttpError, OutcomeKind, ServiceKey};

/// Result type returned by [`RequestExecutor`][crate::RequestExecutor].
pub type Result<T, E = Failure> = std::result::Result<T, E>;

/// Why a call did not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// The service is suppressed after repeated failures; no request was sent.
    CircuitOpen,
    /// The service answered with a `4xx` status.
    ClientError,
    /// Every permitted attempt failed.
    RetriesExhausted,
    /// The client reported an error that no retry can fix.
    Fatal,
    /// The caller cancelled the call.
    Cancelled,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("service suppressed after repeated failures"),
            Self::ClientError => f.write_str("request rejected by service"),
            Self::RetriesExhausted => f.write_str("retries exhausted"),
            Self::Fatal => f.write_str("request failed permanently"),
            Self::Cancelled => f.write_str("request cancelled"),
        }
    }
}

/// Error returned when a call does not produce a successful response.
///
/// Besides its [`FailureKind`], a failure reports the service it was addressed to, how many
/// attempts were made and what the last attempt observed. Failures of kind
/// [`Fatal`][FailureKind::Fatal] expose the client's [`HttpError`] as their
/// [`source`][std::error::Error::source].
///
/// # Recovery
///
/// [`CircuitOpen`][FailureKind::CircuitOpen] and [`RetriesExhausted`][FailureKind::RetriesExhausted]
/// are reported as [`RecoveryInfo::unavailable`]; a suppressed call carries the remaining
/// suppression time as its delay. All other kinds are [`RecoveryInfo::never`].
///
/// # Examples
///
/// ```rust
/// use backstop::{Failure, FailureKind};
///
/// fn fallback_needed(failure: &Failure) -> bool {
///     matches!(failure.kind(), FailureKind::CircuitOpen | FailureKind::RetriesExhausted)
/// }
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{kind}: service={key}, attempts={attempts}")]
pub struct Failure {
    kind: FailureKind,
    key: ServiceKey,
    attempts: u32,
    last_outcome: Option<OutcomeKind>,
    retry_after: Option<Duration>,
    #[source]
    source: Option<HttpError>,
}

impl Failure {
    fn new(kind: FailureKind, key: &ServiceKey, attempts: u32, last_outcome: Option<OutcomeKind>) -> Self {
        Self {
            kind,
            key: key.clone(),
            attempts,
            last_outcome,
            retry_after: None,
            source: None,
        }
    }

    pub(crate) fn circuit_open(key: &ServiceKey, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(FailureKind::CircuitOpen, key, 0, None)
        }
    }

    pub(crate) fn client_error(key: &ServiceKey, attempts: u32, outcome: OutcomeKind) -> Self {
        Self::new(FailureKind::ClientError, key, attempts, Some(outcome))
    }

    pub(crate) fn retries_exhausted(key: &ServiceKey, attempts: u32, outcome: OutcomeKind) -> Self {
        Self::new(FailureKind::RetriesExhausted, key, attempts, Some(outcome))
    }

    pub(crate) fn fatal(key: &ServiceKey, attempts: u32, last_outcome: Option<OutcomeKind>, source: HttpError) -> Self {
        Self {
            source: Some(source),
            ..Self::new(FailureKind::Fatal, key, attempts, last_outcome)
        }
    }

    pub(crate) fn cancelled(key: &ServiceKey, attempts: u32, last_outcome: Option<OutcomeKind>) -> Self {
        Self::new(FailureKind::Cancelled, key, attempts, last_outcome)
    }

    /// Returns why the call failed.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the service the call was addressed to.
    #[must_use]
    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    /// Returns the number of attempts that completed, successfully or not.
    ///
    /// An attempt interrupted by cancellation is not counted.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the classification of the last completed attempt, if any attempt completed.
    #[must_use]
    pub fn last_outcome(&self) -> Option<OutcomeKind> {
        self.last_outcome
    }

    /// Returns true if the call was fast-failed because the service is suppressed.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.kind == FailureKind::CircuitOpen
    }

    /// Returns true if the call was cancelled by the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl Recovery for Failure {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            FailureKind::CircuitOpen => match self.retry_after {
                Some(delay) => RecoveryInfo::unavailable().delay(delay),
                None => RecoveryInfo::unavailable(),
            },
            FailureKind::RetriesExhausted => RecoveryInfo::unavailable(),
            FailureKind::ClientError | FailureKind::Fatal | FailureKind::Cancelled => RecoveryInfo::never(),
        }
    }
}
