// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

use bytes::Bytes;
use http::{Response, StatusCode};
use serde_json::Value;

/// The transport-level reason an attempt produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The connection to the remote service could not be established.
    Connect,
    /// The host name of the remote service could not be resolved.
    Dns,
    /// The attempt did not complete within the configured timeout.
    Timeout,
    /// The connection failed after it was established, for example while reading the body.
    Other,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Dns => f.write_str("dns"),
            Self::Timeout => f.write_str("timeout"),
            Self::Other => f.write_str("transport"),
        }
    }
}

/// The classified result of a single attempt.
///
/// Outcomes are produced fresh for every attempt and consumed by the retry decision.
/// Use [`AttemptOutcome::classify`] to turn a received response into an outcome.
#[derive(Debug)]
#[non_exhaustive]
pub enum AttemptOutcome {
    /// A response with a non-error status and no incomplete marker.
    Success(Response<Bytes>),
    /// No response was received.
    TransportError(TransportErrorKind),
    /// A response with a `5xx` status.
    ServerError(StatusCode),
    /// A response with a `4xx` status.
    ClientError(StatusCode),
    /// A response whose JSON payload reports that the remote operation has not completed.
    IncompleteResult(Response<Bytes>),
}

impl AttemptOutcome {
    /// Classifies a received response.
    ///
    /// `5xx` statuses are server errors and `4xx` statuses are client errors, whatever the body.
    /// Any other response is a success unless its body is a JSON object whose `completion_field`
    /// is present, not `null` and falsy, which makes it an
    /// [`IncompleteResult`][Self::IncompleteResult].
    ///
    /// Falsy values are `false`, `0`, `""`, `"0"` and `[]`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use backstop::{AttemptOutcome, OutcomeKind};
    /// use bytes::Bytes;
    /// use http::Response;
    ///
    /// let response = Response::new(Bytes::from_static(br#"{"completed": false}"#));
    /// let outcome = AttemptOutcome::classify(response, "completed");
    ///
    /// assert_eq!(outcome.kind(), OutcomeKind::IncompleteResult);
    /// ```
    #[must_use]
    pub fn classify(response: Response<Bytes>, completion_field: &str) -> Self {
        let status = response.status();

        if status.is_server_error() {
            Self::ServerError(status)
        } else if status.is_client_error() {
            Self::ClientError(status)
        } else if is_incomplete(response.body(), completion_field) {
            Self::IncompleteResult(response)
        } else {
            Self::Success(response)
        }
    }

    /// Returns the payload-free summary of this outcome.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::TransportError(kind) => OutcomeKind::TransportError(*kind),
            Self::ServerError(status) => OutcomeKind::ServerError(*status),
            Self::ClientError(status) => OutcomeKind::ClientError(*status),
            Self::IncompleteResult(_) => OutcomeKind::IncompleteResult,
        }
    }
}

/// Payload-free summary of an [`AttemptOutcome`].
///
/// Carried by [`Failure`][crate::Failure] so callers can tell what the last attempt observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OutcomeKind {
    /// The attempt produced a successful response.
    Success,
    /// The attempt produced no response.
    TransportError(TransportErrorKind),
    /// The attempt produced a `5xx` response.
    ServerError(StatusCode),
    /// The attempt produced a `4xx` response.
    ClientError(StatusCode),
    /// The attempt produced a response whose operation has not completed.
    IncompleteResult,
}

impl Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::TransportError(kind) => write!(f, "{kind} error"),
            Self::ServerError(status) => write!(f, "server error {}", status.as_u16()),
            Self::ClientError(status) => write!(f, "client error {}", status.as_u16()),
            Self::IncompleteResult => f.write_str("incomplete result"),
        }
    }
}

fn is_incomplete(body: &Bytes, completion_field: &str) -> bool {
    // Bodies that are not JSON objects carry no completion flag.
    let Ok(Value::Object(payload)) = serde_json::from_slice::<Value>(body) else {
        return false;
    };

    payload.get(completion_field).is_some_and(is_falsy)
}

fn is_falsy(value: &Value) -> bool {
    match value {
        // A null flag counts as absent.
        Value::Null | Value::Object(_) => false,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty() || text == "0",
        Value::Array(items) => items.is_empty(),
    }
}
