// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Posts JSON to a service with bounded retries and falls back while the service is suppressed.
//!
//! ```text
//! cargo run -p backstop --example send_post --features hyper,logs -- [service-key] [url]
//! ```
//!
//! Without a server listening on the URL every round fails with connection errors. After the first
//! round the service is suppressed and the remaining rounds take the fallback path without sending
//! a request.

use std::error::Error;
use std::time::Duration;

use backstop::{Failure, FailureTracker, HyperClient, Recovery, RequestExecutor, ResilienceConfig, ServiceKey};
use bytes::Bytes;
use http::Request;
use http::header::CONTENT_TYPE;
use serde_json::json;
use tick::Clock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE: &str = "fakepost";
const DEFAULT_URL: &str = "http://localhost:8080/fakepost";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    let mut args = std::env::args().skip(1);
    let key = ServiceKey::from(args.next().unwrap_or_else(|| DEFAULT_SERVICE.to_string()));
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());

    let clock = Clock::new_tokio();
    let tracker = FailureTracker::new(&clock);
    let executor = RequestExecutor::new(HyperClient::new(), &tracker, &clock);

    let config = ResilienceConfig::builder()
        .max_retries(3)
        .base_delay(Duration::from_millis(200))
        .timeout(Duration::from_secs(10))
        .build()?;

    for round in 1..=3 {
        let request = Request::post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(json!({"round": round}).to_string()))?;

        match executor.execute(&key, request, &config).await {
            Ok(response) => println!("{}: {}", response.status(), String::from_utf8_lossy(response.body())),
            Err(failure) if failure.is_circuit_open() => fallback(&failure),
            Err(failure) => tracing::error!(%failure, last_outcome = ?failure.last_outcome(), "request failed"),
        }
    }

    Ok(())
}

fn fallback(failure: &Failure) {
    let retry_after = failure.recovery().get_delay().unwrap_or_default();

    println!(
        "{} is suppressed, serving cached result; retry in {}s",
        failure.service_key(),
        retry_after.as_secs()
    );
}
