// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

use bytes::Bytes;
use http::{Request, Response};
use layered::Service;
use recoverable::{Recovery, RecoveryInfo};

use crate::TransportErrorKind;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The HTTP transport used by [`RequestExecutor`][crate::RequestExecutor].
///
/// This trait is implemented for every [`layered::Service`] that sends an
/// [`http::Request<Bytes>`] and yields either a fully read [`http::Response<Bytes>`] or an
/// [`HttpError`]. Transport failures must be reported as errors; any response that was received,
/// whatever its status, must be reported as `Ok`.
///
/// # Examples
///
/// ```rust
/// use backstop::{HttpClient, HttpError};
/// use bytes::Bytes;
/// use layered::Execute;
///
/// fn assert_client(_client: impl HttpClient) {}
///
/// assert_client(Execute::new(|_request: http::Request<Bytes>| async move {
///     Ok::<_, HttpError>(http::Response::new(Bytes::new()))
/// }));
/// ```
pub trait HttpClient: Service<Request<Bytes>, Out = Result<Response<Bytes>, HttpError>> {}

impl<S> HttpClient for S where S: Service<Request<Bytes>, Out = Result<Response<Bytes>, HttpError>> {}

/// Category of an [`HttpError`].
///
/// All kinds except [`Fatal`][Self::Fatal] describe a failure to talk to the remote service and
/// count against it. `Fatal` errors are local problems, such as a malformed request, and end the
/// call without being retried or recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HttpErrorKind {
    /// The connection could not be established.
    Connect,
    /// The host name could not be resolved.
    Dns,
    /// The transport gave up waiting for the remote service.
    Timeout,
    /// The connection failed after it was established.
    Transport,
    /// The request cannot succeed against any service.
    Fatal,
}

impl Display for HttpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("connection failed"),
            Self::Dns => f.write_str("name resolution failed"),
            Self::Timeout => f.write_str("request timed out"),
            Self::Transport => f.write_str("transport failed"),
            Self::Fatal => f.write_str("request failed permanently"),
        }
    }
}

/// Error reported by an [`HttpClient`] when no response was received.
///
/// # Examples
///
/// ```rust
/// use backstop::{HttpError, HttpErrorKind, Recovery, RecoveryKind};
///
/// let error = HttpError::with_source(HttpErrorKind::Connect, "connection refused");
///
/// assert_eq!(error.kind(), HttpErrorKind::Connect);
/// assert_eq!(error.recovery().kind(), RecoveryKind::Retry);
/// assert_eq!(error.to_string(), "connection failed");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct HttpError {
    kind: HttpErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    /// Creates an error of the given kind without an underlying cause.
    #[must_use]
    pub fn new(kind: HttpErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Creates an error of the given kind caused by `source`.
    pub fn with_source(kind: HttpErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    /// Maps the error to the transport failure it represents, or `None` for fatal errors.
    pub(crate) fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self.kind {
            HttpErrorKind::Connect => Some(TransportErrorKind::Connect),
            HttpErrorKind::Dns => Some(TransportErrorKind::Dns),
            HttpErrorKind::Timeout => Some(TransportErrorKind::Timeout),
            HttpErrorKind::Transport => Some(TransportErrorKind::Other),
            HttpErrorKind::Fatal => None,
        }
    }
}

impl Recovery for HttpError {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            HttpErrorKind::Fatal => RecoveryInfo::never(),
            _ => RecoveryInfo::retry(),
        }
    }
}

#[cfg(feature = "hyper")]
pub use hyper_client::HyperClient;

#[cfg(feature = "hyper")]
mod hyper_client {
    use bytes::Bytes;
    use http::{Request, Response};
    use http_body_util::{BodyExt, Full};
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioExecutor;
    use layered::Service;

    use super::{HttpError, HttpErrorKind};

    /// An [`HttpClient`][super::HttpClient] backed by the pooled `hyper-util` client.
    ///
    /// Supports plain `http` URIs over HTTP/1. Connection failures are reported as
    /// [`HttpErrorKind::Connect`], failures after the connection was established (including
    /// reading the body) as [`HttpErrorKind::Transport`], and requests without an absolute `http`
    /// URI as [`HttpErrorKind::Fatal`].
    ///
    /// Requires a Tokio runtime.
    #[derive(Debug, Clone)]
    #[cfg_attr(docsrs, doc(cfg(feature = "hyper")))]
    pub struct HyperClient {
        inner: Client<HttpConnector, Full<Bytes>>,
    }

    impl HyperClient {
        /// Creates a client with a fresh connection pool.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Client::builder(TokioExecutor::new()).build_http(),
            }
        }
    }

    impl Default for HyperClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Service<Request<Bytes>> for HyperClient {
        type Out = Result<Response<Bytes>, HttpError>;

        async fn execute(&self, input: Request<Bytes>) -> Self::Out {
            let uri = input.uri();
            if uri.scheme_str() != Some("http") || uri.authority().is_none() {
                return Err(HttpError::with_source(
                    HttpErrorKind::Fatal,
                    format!("unsupported request uri: {uri}"),
                ));
            }

            let response = self.inner.request(input.map(Full::new)).await.map_err(|error| {
                let kind = if error.is_connect() {
                    HttpErrorKind::Connect
                } else {
                    HttpErrorKind::Transport
                };
                HttpError::with_source(kind, error)
            })?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|error| HttpError::with_source(HttpErrorKind::Transport, error))?
                .to_bytes();

            Ok(Response::from_parts(parts, body))
        }
    }
}
