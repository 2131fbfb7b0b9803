// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use layered::Service;

use crate::{Failure, HttpClient, RequestExecutor, ResilienceConfig, ServiceKey};

/// A [`RequestExecutor`] bound to one service and one configuration.
///
/// Created by [`RequestExecutor::bind`]. Every request passed to
/// [`execute`][Service::execute] is sent to the bound service under the bound configuration, so
/// the client can be handed to code that only knows about [`layered::Service`].
///
/// # Examples
///
/// ```rust
/// # use bytes::Bytes;
/// # use layered::{Execute, Service};
/// # use tick::Clock;
/// use backstop::{FailureTracker, HttpError, RequestExecutor, ResilienceConfig};
///
/// # async fn example(clock: Clock) {
/// let client = Execute::new(|_request: http::Request<Bytes>| async move {
///     Ok::<_, HttpError>(http::Response::new(Bytes::from_static(b"ok")))
/// });
///
/// let fakepost = RequestExecutor::new(client, &FailureTracker::new(&clock), &clock)
///     .bind("fakepost", ResilienceConfig::default());
///
/// let response = fakepost.execute(http::Request::new(Bytes::new())).await.unwrap();
/// assert_eq!(response.body(), "ok");
/// # }
/// ```
pub struct BoundClient<C> {
    executor: RequestExecutor<C>,
    key: ServiceKey,
    config: Arc<ResilienceConfig>,
}

impl<C> BoundClient<C> {
    pub(crate) fn new(executor: RequestExecutor<C>, key: ServiceKey, config: ResilienceConfig) -> Self {
        Self {
            executor,
            key,
            config: Arc::new(config),
        }
    }

    /// Returns the service this client is bound to.
    #[must_use]
    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    /// Returns the configuration this client is bound to.
    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }
}

impl<C> Clone for BoundClient<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            key: self.key.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C: Debug> Debug for BoundClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundClient")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

impl<C: HttpClient> Service<Request<Bytes>> for BoundClient<C> {
    type Out = Result<Response<Bytes>, Failure>;

    async fn execute(&self, input: Request<Bytes>) -> Self::Out {
        self.executor.execute(&self.key, input, &self.config).await
    }
}
