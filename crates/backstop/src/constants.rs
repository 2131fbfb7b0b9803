// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default number of retries after the initial attempt.
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay of the linear backoff schedule.
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default per-attempt timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2000);

/// Default number of recorded failures after which a service is suppressed.
pub(crate) const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Default time a recorded failure keeps counting against a service.
pub(crate) const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default name of the payload flag that tells whether the remote operation completed.
pub(crate) const DEFAULT_COMPLETION_FIELD: &str = "completed";

pub(crate) const ERR_POISONED_LOCK: &str =
    "poisoned lock - cannot continue execution because failure accounting can no longer be trusted";
