// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{Either, select};
use http::{Request, Response};
use tick::Clock;

use crate::{
    AttemptOutcome, BoundClient, Failure, FailureTracker, HttpClient, HttpError, OutcomeKind, ResilienceConfig, Result, ServiceKey,
    TransportErrorKind, should_retry,
};

/// Sends requests to remote services with bounded retries and failure suppression.
///
/// Each call is addressed to a [`ServiceKey`] and governed by a [`ResilienceConfig`]:
///
/// 1. If the service is suppressed in the shared [`FailureTracker`], the call fails fast with
///    [`FailureKind::CircuitOpen`][crate::FailureKind::CircuitOpen] and no request is sent.
/// 2. Otherwise the request is sent through the [`HttpClient`], bounded by the configured timeout.
/// 3. The result is classified and passed to [`should_retry`], which may record a failure for
///    the service.
/// 4. Retries wait for the [`LinearBackoff`][crate::LinearBackoff] delay on the injected clock.
///
/// Every attempt sends a fresh copy of the request (method, URI, version, headers and body).
/// Request extensions are not copied.
///
/// `RequestExecutor` is cheap to clone; clones share the client and the tracker.
///
/// # Examples
///
/// ```rust
/// # use bytes::Bytes;
/// # use layered::Execute;
/// # use tick::Clock;
/// use backstop::{FailureKind, FailureTracker, HttpError, RequestExecutor, ResilienceConfig, ServiceKey};
///
/// # async fn example(clock: Clock) {
/// let client = Execute::new(|_request: http::Request<Bytes>| async move {
///     Ok::<_, HttpError>(http::Response::builder().status(404).body(Bytes::new()).unwrap())
/// });
///
/// let executor = RequestExecutor::new(client, &FailureTracker::new(&clock), &clock);
/// let request = http::Request::post("http://localhost/fakepost").body(Bytes::new()).unwrap();
///
/// let failure = executor
///     .execute(&ServiceKey::from("fakepost"), request, &ResilienceConfig::default())
///     .await
///     .unwrap_err();
///
/// assert_eq!(failure.kind(), FailureKind::ClientError);
/// # }
/// ```
pub struct RequestExecutor<C> {
    shared: Arc<ExecutorShared<C>>,
}

#[derive(Debug)]
struct ExecutorShared<C> {
    client: C,
    tracker: FailureTracker,
    clock: Clock,
}

impl<C> Clone for RequestExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Debug> Debug for RequestExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("client", &self.shared.client)
            .field("tracker", &self.shared.tracker)
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> RequestExecutor<C> {
    /// Creates an executor that sends requests through `client` and records failures in `tracker`.
    ///
    /// Timeouts and backoff delays are measured on `clock`.
    #[must_use]
    pub fn new(client: C, tracker: &FailureTracker, clock: impl AsRef<Clock>) -> Self {
        Self {
            shared: Arc::new(ExecutorShared {
                client,
                tracker: tracker.clone(),
                clock: clock.as_ref().clone(),
            }),
        }
    }

    /// Returns the tracker this executor records failures in.
    #[must_use]
    pub fn tracker(&self) -> &FailureTracker {
        &self.shared.tracker
    }

    /// Sends `request` to the service identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`Failure`] when no successful response was obtained; see
    /// [`FailureKind`][crate::FailureKind] for the possible reasons.
    pub async fn execute(&self, key: &ServiceKey, request: Request<Bytes>, config: &ResilienceConfig) -> Result<Response<Bytes>> {
        self.execute_with_cancel(key, request, config, std::future::pending::<()>())
            .await
    }

    /// Sends `request` like [`execute`][Self::execute], giving up once `deadline` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`FailureKind::Cancelled`][crate::FailureKind::Cancelled] if the deadline passes
    /// before the call finishes, otherwise the same errors as [`execute`][Self::execute].
    pub async fn execute_with_deadline(
        &self,
        key: &ServiceKey,
        request: Request<Bytes>,
        config: &ResilienceConfig,
        deadline: Duration,
    ) -> Result<Response<Bytes>> {
        let deadline = self.shared.clock.delay(deadline);

        self.execute_with_cancel(key, request, config, deadline).await
    }

    /// Sends `request` like [`execute`][Self::execute], giving up as soon as `cancel` completes.
    ///
    /// The request or backoff delay in progress is abandoned. If `cancel` completes at the same
    /// time as an attempt, cancellation wins.
    ///
    /// # Errors
    ///
    /// Returns [`FailureKind::Cancelled`][crate::FailureKind::Cancelled] if `cancel` completes
    /// before the call finishes, otherwise the same errors as [`execute`][Self::execute].
    pub async fn execute_with_cancel<F>(
        &self,
        key: &ServiceKey,
        request: Request<Bytes>,
        config: &ResilienceConfig,
        cancel: F,
    ) -> Result<Response<Bytes>>
    where
        F: Future + Send,
    {
        let shared = &self.shared;

        if let Some(remaining) = shared.tracker.remaining_suppression(key, config.failure_threshold()) {
            log_circuit_open(key, remaining);
            return Err(Failure::circuit_open(key, Some(remaining)));
        }

        let mut cancel = pin!(cancel);
        let backoff = config.backoff();
        let mut attempt: u32 = 0;
        let mut last_outcome = None;

        loop {
            let Some(result) = race(cancel.as_mut(), shared.attempt(clone_request(&request), config)).await else {
                return Err(Failure::cancelled(key, attempt, last_outcome));
            };

            let attempts = attempt.saturating_add(1);

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    log_fatal(key, attempts, &error);
                    return Err(Failure::fatal(key, attempts, last_outcome, error));
                }
            };

            let kind = outcome.kind();
            last_outcome = Some(kind);

            if !should_retry(attempt, &outcome, config, &shared.tracker, key) {
                return match outcome {
                    AttemptOutcome::Success(response) => Ok(response),
                    AttemptOutcome::ClientError(_) => Err(Failure::client_error(key, attempts, kind)),
                    AttemptOutcome::TransportError(_) | AttemptOutcome::ServerError(_) | AttemptOutcome::IncompleteResult(_) => {
                        log_exhausted(key, attempts, kind);
                        Err(Failure::retries_exhausted(key, attempts, kind))
                    }
                };
            }

            let delay = backoff.delay(attempts);
            log_retry(key, attempt, kind, delay);

            if race(cancel.as_mut(), shared.clock.delay(delay)).await.is_none() {
                return Err(Failure::cancelled(key, attempts, last_outcome));
            }

            attempt = attempts;
        }
    }

    /// Binds this executor to one service and configuration.
    ///
    /// The returned [`BoundClient`] is a [`layered::Service`] that can be passed around in place
    /// of the executor.
    #[must_use]
    pub fn bind(&self, key: impl Into<ServiceKey>, config: ResilienceConfig) -> BoundClient<C> {
        BoundClient::new(self.clone(), key.into(), config)
    }
}

impl<C: HttpClient> ExecutorShared<C> {
    /// Sends one request and classifies the result. Only fatal client errors are returned as `Err`.
    async fn attempt(&self, request: Request<Bytes>, config: &ResilienceConfig) -> std::result::Result<AttemptOutcome, HttpError> {
        let call = pin!(self.client.execute(request));
        let timeout = pin!(self.clock.delay(config.timeout()));

        match select(call, timeout).await {
            Either::Left((Ok(response), _)) => Ok(AttemptOutcome::classify(response, config.completion_field())),
            Either::Left((Err(error), _)) => error.transport_kind().map(AttemptOutcome::TransportError).ok_or(error),
            Either::Right(_) => Ok(AttemptOutcome::TransportError(TransportErrorKind::Timeout)),
        }
    }
}

/// Drives `work` unless `cancel` completes first. `cancel` is polled first and wins ties.
async fn race<C, W>(cancel: Pin<&mut C>, work: W) -> Option<W::Output>
where
    C: Future,
    W: Future,
{
    let work = pin!(work);

    match select(cancel, work).await {
        Either::Left(_) => None,
        Either::Right((output, _)) => Some(output),
    }
}

fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut clone = Request::new(request.body().clone());
    clone.method_mut().clone_from(request.method());
    clone.uri_mut().clone_from(request.uri());
    *clone.version_mut() = request.version();
    clone.headers_mut().clone_from(request.headers());
    clone
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
fn log_circuit_open(key: &ServiceKey, remaining: Duration) {
    #[cfg(any(feature = "logs", test))]
    tracing::event!(
        name: "backstop.circuit_open",
        tracing::Level::WARN,
        service.key = %key,
        suppression.remaining = remaining.as_secs_f32(),
    );
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
fn log_retry(key: &ServiceKey, attempt: u32, outcome: OutcomeKind, delay: Duration) {
    #[cfg(any(feature = "logs", test))]
    tracing::event!(
        name: "backstop.retry",
        tracing::Level::WARN,
        service.key = %key,
        attempt.index = attempt,
        attempt.outcome = %outcome,
        retry.delay = delay.as_secs_f32(),
    );
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
fn log_exhausted(key: &ServiceKey, attempts: u32, outcome: OutcomeKind) {
    #[cfg(any(feature = "logs", test))]
    tracing::event!(
        name: "backstop.exhausted",
        tracing::Level::ERROR,
        service.key = %key,
        attempt.count = attempts,
        attempt.outcome = %outcome,
    );
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs feature not used")
)]
fn log_fatal(key: &ServiceKey, attempts: u32, error: &HttpError) {
    #[cfg(any(feature = "logs", test))]
    tracing::event!(
        name: "backstop.fatal",
        tracing::Level::ERROR,
        service.key = %key,
        attempt.count = attempts,
        error = %error,
    );
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Version};
    use tick::ClockControl;
    use tracing_subscriber::util::SubscriberInitExt;

    use super::*;
    use crate::testing::{LogCapture, ScriptedClient, Step};
    use crate::{FailureKind, HttpErrorKind};

    const INCOMPLETE: &str = r#"{"completed": false}"#;
    const COMPLETE: &str = r#"{"completed": true}"#;

    fn executor(client: &ScriptedClient) -> (ClockControl, RequestExecutor<ScriptedClient>) {
        let control = ClockControl::new().auto_advance_timers(true);
        let clock = control.to_clock();
        let executor = RequestExecutor::new(client.clone(), &FailureTracker::new(&clock), &clock);
        (control, executor)
    }

    fn request() -> Request<Bytes> {
        Request::post("http://localhost/fakepost")
            .header("x-request", "1")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    fn key() -> ServiceKey {
        ServiceKey::from("fakepost")
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(RequestExecutor<ScriptedClient>: Send, Sync, Clone, Debug);
    }

    #[test]
    fn clone_request_copies_everything_but_extensions() {
        let mut original = Request::put("http://localhost/a?b=c")
            .version(Version::HTTP_10)
            .header("x-one", "1")
            .header("x-two", "2")
            .body(Bytes::from_static(b"body"))
            .unwrap();
        original.extensions_mut().insert(42_u32);

        let clone = clone_request(&original);

        assert_eq!(clone.method(), Method::PUT);
        assert_eq!(clone.uri(), original.uri());
        assert_eq!(clone.version(), Version::HTTP_10);
        assert_eq!(clone.headers(), original.headers());
        assert_eq!(clone.body(), original.body());
        assert!(clone.extensions().get::<u32>().is_none());
    }

    #[tokio::test]
    async fn every_attempt_sends_the_same_request() {
        let client = ScriptedClient::new([Step::Respond(503, ""), Step::Respond(200, COMPLETE)]);
        let (_control, executor) = executor(&client);

        executor.execute(&key(), request(), &ResilienceConfig::default()).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        for sent in requests {
            assert_eq!(sent.method(), Method::POST);
            assert_eq!(sent.uri(), "http://localhost/fakepost");
            assert_eq!(sent.headers()["x-request"], "1");
            assert_eq!(sent.body(), &Bytes::from_static(b"payload"));
        }
    }

    #[tokio::test]
    async fn success_after_incomplete_returns_last_body() {
        let client = ScriptedClient::new([Step::Respond(200, INCOMPLETE), Step::Respond(200, COMPLETE)]);
        let (_control, executor) = executor(&client);

        let response = executor.execute(&key(), request(), &ResilienceConfig::default()).await.unwrap();

        assert_eq!(response.body(), &Bytes::from_static(COMPLETE.as_bytes()));
        assert_eq!(client.calls(), 2);
        assert_eq!(executor.tracker().failure_count(&key()), 0);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let client = ScriptedClient::new([Step::Respond(404, "")]);
        let (_control, executor) = executor(&client);

        let failure = executor
            .execute(&key(), request(), &ResilienceConfig::default())
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), FailureKind::ClientError);
        assert_eq!(failure.attempts(), 1);
        assert_eq!(failure.last_outcome(), Some(OutcomeKind::ClientError(StatusCode::NOT_FOUND)));
        assert_eq!(client.calls(), 1);
        assert_eq!(executor.tracker().failure_count(&key()), 0);
    }

    #[tokio::test]
    async fn fatal_error_ends_call_without_recording() {
        let client = ScriptedClient::new([Step::Fail(HttpErrorKind::Connect), Step::Fail(HttpErrorKind::Fatal)]);
        let (_control, executor) = executor(&client);

        let failure = executor
            .execute(&key(), request(), &ResilienceConfig::default())
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), FailureKind::Fatal);
        assert_eq!(failure.attempts(), 2);
        assert_eq!(
            failure.last_outcome(),
            Some(OutcomeKind::TransportError(TransportErrorKind::Connect))
        );
        assert_eq!(client.calls(), 2);
        assert_eq!(executor.tracker().failure_count(&key()), 1, "only the connect failure counts");
    }

    #[tokio::test]
    async fn hanging_attempt_times_out() {
        let client = ScriptedClient::new([Step::Hang, Step::Respond(200, COMPLETE)]);
        let (control, executor) = executor(&client);
        let clock = control.to_clock();
        let config = ResilienceConfig::builder()
            .timeout(Duration::from_secs(10))
            .base_delay(Duration::from_secs(1))
            .build()
            .unwrap();

        let start = clock.instant();
        let response = executor.execute(&key(), request(), &config).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(clock.instant() - start, Duration::from_secs(11));
        assert_eq!(executor.tracker().failure_count(&key()), 1);
    }

    #[tokio::test]
    async fn suppressed_service_is_not_called() {
        let client = ScriptedClient::new([Step::Respond(200, COMPLETE)]);
        let (_control, executor) = executor(&client);
        let config = ResilienceConfig::default();

        for _ in 0..config.failure_threshold() {
            executor.tracker().record_failure(&key(), config.suppression_window());
        }

        let failure = executor.execute(&key(), request(), &config).await.unwrap_err();

        assert!(failure.is_circuit_open());
        assert_eq!(failure.attempts(), 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn cancel_during_backoff() {
        let client = ScriptedClient::new([Step::Respond(503, "")]);
        let control = ClockControl::new();
        let clock = control.to_clock();
        let executor = RequestExecutor::new(client.clone(), &FailureTracker::new(&clock), &clock);

        // The clock never advances, so the first backoff delay never completes on its own.
        let key = key();
        let config = ResilienceConfig::default();
        let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
        let call = executor.execute_with_cancel(&key, request(), &config, receiver);
        let cancel = async move {
            tokio::task::yield_now().await;
            sender.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(call, cancel);
        let failure = result.unwrap_err();

        assert!(failure.is_cancelled());
        assert_eq!(failure.attempts(), 1);
        assert_eq!(
            failure.last_outcome(),
            Some(OutcomeKind::ServerError(StatusCode::SERVICE_UNAVAILABLE))
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn ready_cancel_wins_over_ready_attempt() {
        let client = ScriptedClient::new([Step::Respond(200, COMPLETE)]);
        let (_control, executor) = executor(&client);

        let failure = executor
            .execute_with_cancel(&key(), request(), &ResilienceConfig::default(), std::future::ready(()))
            .await
            .unwrap_err();

        assert!(failure.is_cancelled());
        assert_eq!(failure.attempts(), 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn deadline_interrupts_hanging_attempt() {
        let client = ScriptedClient::new([Step::Hang]);
        let (control, executor) = executor(&client);
        let clock = control.to_clock();

        let start = clock.instant();
        let failure = executor
            .execute_with_deadline(&key(), request(), &ResilienceConfig::default(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(failure.is_cancelled());
        assert_eq!(failure.attempts(), 0);
        assert_eq!(client.calls(), 1);
        assert!(clock.instant() - start >= Duration::from_secs(5));
        assert_eq!(executor.tracker().failure_count(&key()), 0);
    }

    #[tokio::test]
    async fn retry_and_exhaustion_emit_logs() {
        let log_capture = LogCapture::new();
        let _guard = log_capture.subscriber().set_default();

        let client = ScriptedClient::new([Step::Respond(503, "")]);
        let (_control, executor) = executor(&client);
        let config = ResilienceConfig::builder().max_retries(1).build().unwrap();

        executor
            .execute(&ServiceKey::from("log_test_service"), request(), &config)
            .await
            .unwrap_err();

        log_capture.assert_contains("backstop::executor");
        log_capture.assert_contains("service.key=log_test_service");
        log_capture.assert_contains("attempt.index=0");
        log_capture.assert_contains("attempt.outcome=server error 503");
        log_capture.assert_contains("retry.delay=1");
        log_capture.assert_contains("attempt.count=2");
        log_capture.assert_not_contains("suppression.remaining");
    }

    #[tokio::test]
    async fn circuit_open_emits_log() {
        let log_capture = LogCapture::new();
        let _guard = log_capture.subscriber().set_default();

        let client = ScriptedClient::new([Step::Respond(200, COMPLETE)]);
        let (_control, executor) = executor(&client);
        let key = ServiceKey::from("log_test_service");
        let config = ResilienceConfig::builder().failure_threshold(1).build().unwrap();
        executor.tracker().record_failure(&key, Duration::from_secs(60));

        executor.execute(&key, request(), &config).await.unwrap_err();

        log_capture.assert_contains("WARN");
        log_capture.assert_contains("suppression.remaining=60");
    }

    #[tokio::test]
    async fn fatal_emits_log() {
        let log_capture = LogCapture::new();
        let _guard = log_capture.subscriber().set_default();

        let client = ScriptedClient::new([Step::Fail(HttpErrorKind::Fatal)]);
        let (_control, executor) = executor(&client);

        executor
            .execute(&ServiceKey::from("log_test_service"), request(), &ResilienceConfig::default())
            .await
            .unwrap_err();

        log_capture.assert_contains("ERROR");
        log_capture.assert_contains("error=request failed permanently");
    }
}
