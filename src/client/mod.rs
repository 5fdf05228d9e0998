//! Load-generation client.
//!
//! Splits into request assembly ([`request`]), backpressure interpretation
//! ([`backoff`]), and the concurrent driver ([`driver`]) that runs the
//! worker pool.

mod backoff;
mod driver;
mod request;

pub use backoff::compute_delay;
pub use driver::{DriveReport, LoadDriver};
pub use request::build_request;

use std::time::Duration;

use reqwest::Client;

use crate::config::WorkerConfig;

pub(crate) const USER_AGENT: &str = concat!("quotabench/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// What one request produced, as far as the driver cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: u16,
    pub body_bytes: u64,
    /// How long to back off before the next request. Zero when the server
    /// applied no backpressure.
    pub retry_after: Duration,
}

/// Build the HTTP client a worker pass uses.
pub fn build_http_client(config: &WorkerConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = config.proxy_url() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    builder.build()
}
