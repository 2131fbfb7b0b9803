// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Request, Response};
use layered::Service;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use crate::{HttpError, HttpErrorKind};

/// One scripted reaction of [`ScriptedClient`].
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Respond(u16, &'static str),
    Fail(HttpErrorKind),
    Hang,
}

/// HTTP client that replays a script, repeating the last step once the script runs out.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedClient {
    steps: Arc<Vec<Step>>,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<Request<Bytes>>>>,
}

impl ScriptedClient {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps: Vec<_> = steps.into_iter().collect();
        assert!(!steps.is_empty(), "script must contain at least one step");

        Self {
            steps: Arc::new(steps),
            calls: Arc::new(AtomicU32::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Request<Bytes>> {
        self.requests.lock().unwrap().drain(..).collect()
    }
}

impl Service<Request<Bytes>> for ScriptedClient {
    type Out = Result<Response<Bytes>, HttpError>;

    async fn execute(&self, input: Request<Bytes>) -> Self::Out {
        let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self.steps[index.min(self.steps.len() - 1)].clone();
        self.requests.lock().unwrap().push(input);

        match step {
            Step::Respond(status, body) => Ok(Response::builder()
                .status(status)
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap()),
            Step::Fail(kind) => Err(HttpError::with_source(kind, "scripted failure")),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Collects formatted `tracing` output so tests can assert on emitted events.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    pub(crate) fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(
            output.contains(expected),
            "log output does not contain '{expected}', got:\n{output}"
        );
    }

    pub(crate) fn assert_not_contains(&self, unexpected: &str) {
        let output = self.output();
        assert!(!output.contains(unexpected), "log output contains '{unexpected}', got:\n{output}");
    }

    /// Subscriber writing plain-text events into this capture; install it with `set_default`.
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber {
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[derive(Debug)]
pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
