// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::Display;

/// Identifies the remote service a request is sent to.
///
/// Failure counts are kept per `ServiceKey`: every distinct key has its own independent
/// suppression state in the [`FailureTracker`][crate::FailureTracker]. Keys should be
/// **long-lived and low-cardinality**, naming a failure domain such as a backend host or an
/// upstream API. Per-request or per-user keys grow the tracker without bound and hide
/// systemic failures.
///
/// Prefer static string keys (`&'static str`); they never allocate.
///
/// # Examples
///
/// ```rust
/// use backstop::ServiceKey;
///
/// let key = ServiceKey::from("fakepost");
/// assert_eq!(key.to_string(), "fakepost");
///
/// let scheme = "https";
/// let authority = "api.example.com";
/// let key = ServiceKey::from(format!("{scheme}://{authority}"));
/// assert_eq!(key.as_str(), "https://api.example.com");
/// ```
///
/// # Telemetry
///
/// Keys are included in log events. Do not build them from secrets or personal data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey(Cow<'static, str>);

impl ServiceKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ServiceKey {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for ServiceKey {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl From<ServiceKey> for Cow<'static, str> {
    fn from(value: ServiceKey) -> Self {
        value.0
    }
}

impl AsRef<str> for ServiceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
