// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient HTTP requests for applications that call remote services.
//!
//! This crate wraps a single outbound HTTP call with bounded automatic retries, linear backoff,
//! and a per-service failure gate that fast-fails calls to a service that is known to be failing.
//!
//! # Core Types
//!
//! - [`RequestExecutor`]: Runs a request against a service, retrying and recording failures.
//! - [`FailureTracker`]: Counts recent failures per [`ServiceKey`] and answers whether a service is
//!   currently suppressed.
//! - [`ResilienceConfig`]: Immutable per-service configuration (retries, delays, thresholds).
//! - [`Failure`]: The error returned when a call does not produce a response.
//!
//! The HTTP transport itself is not part of this crate. Any [`layered::Service`] that turns an
//! [`http::Request`] into an [`http::Response`] or an [`HttpError`] can be used, see [`HttpClient`].
//!
//! # Quick Start
//!
//! ```rust
//! # use bytes::Bytes;
//! # use layered::Execute;
//! # use tick::Clock;
//! use backstop::{FailureTracker, HttpError, RequestExecutor, ResilienceConfig, ServiceKey};
//!
//! # async fn example(clock: Clock) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! // The tracker is shared by every executor that talks to the same services.
//! let tracker = FailureTracker::new(&clock);
//!
//! let client = Execute::new(|_request: http::Request<Bytes>| async move {
//!     Ok::<_, HttpError>(http::Response::new(Bytes::from_static(b"{\"completed\": true}")))
//! });
//!
//! let executor = RequestExecutor::new(client, &tracker, &clock);
//! let config = ResilienceConfig::builder().max_retries(3).build()?;
//!
//! let request = http::Request::get("http://localhost/fakepost").body(Bytes::new())?;
//! let response = executor.execute(&ServiceKey::from("fakepost"), request, &config).await?;
//! # let _response = response;
//! # Ok(())
//! # }
//! ```
//!
//! # Retry Policy
//!
//! Each attempt is classified into an [`AttemptOutcome`] and evaluated by [`decide`]:
//!
//! 1. Once the attempt index reaches [`ResilienceConfig::max_retries`], the call stops and one
//!    failure is recorded for the service, whatever the outcome.
//! 2. Transport failures (connect, DNS, timeout) are retried and recorded.
//! 3. Responses whose JSON payload carries a falsy completion flag are retried, not recorded.
//! 4. `5xx` responses are retried and recorded.
//! 5. Anything else ends the call.
//!
//! Delays between attempts grow linearly, see [`LinearBackoff`].
//!
//! # Features
//!
//! - `hyper`: Enables `HyperClient`, an [`HttpClient`] backed by `hyper-util`.
//! - `logs`: Emits structured `tracing` events for retries, recorded failures and fast-fails.
//! - `serde`: Enables deserialization of [`ResilienceConfig`].

#[doc(inline)]
pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};

mod backoff;
mod bound;
mod client;
mod config;
mod constants;
mod decision;
mod error;
mod executor;
mod outcome;
mod service_key;
mod tracker;

pub use backoff::LinearBackoff;
pub use bound::BoundClient;
pub use client::{HttpClient, HttpError, HttpErrorKind};
#[cfg(feature = "hyper")]
pub use client::HyperClient;
pub use config::{ConfigError, ResilienceConfig, ResilienceConfigBuilder};
pub use decision::{Decision, decide, should_retry};
pub use error::{Failure, FailureKind, Result};
pub use executor::RequestExecutor;
pub use outcome::{AttemptOutcome, OutcomeKind, TransportErrorKind};
pub use service_key::ServiceKey;
pub use tracker::FailureTracker;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod testing;
