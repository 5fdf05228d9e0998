//! Outbound request assembly.
//!
//! Every request a worker sends is built here: shaping query terms, the
//! quota header drawn from the pool, caller-supplied headers, and the
//! connection headers when keepalive is off.

use reqwest::header::CONNECTION;
use reqwest::{Client, Request};

use crate::config::{WorkerConfig, BSIZE_MAX, BSIZE_MIN, DELAY_MAX, DELAY_MIN, QUOTA_HEADER};
use crate::shutdown::Shutdown;

/// Assemble one GET request for `url`.
///
/// Returns `Ok(None)` when shutdown was observed, checked both before and
/// after assembly so a stopping worker never hands back a request.
pub fn build_request(
    client: &Client,
    config: &WorkerConfig,
    url: &str,
    shutdown: &Shutdown,
) -> Result<Option<Request>, reqwest::Error> {
    if shutdown.is_requested() {
        return Ok(None);
    }

    let mut request = client.get(url);

    if let Some(bsize) = config.bsize.sample(BSIZE_MIN, BSIZE_MAX) {
        request = request.query(&[("bsiz", bsize.to_string())]);
    }
    if let Some(delay) = config.delay.sample(DELAY_MIN, DELAY_MAX) {
        request = request.query(&[("dlay", delay.to_string())]);
    }

    if let Some(quota) = config.pick_quota() {
        request = request.header(QUOTA_HEADER, quota);
        if let Some(selector) = &config.quota_selector {
            request = request.header(selector.as_str(), quota);
        }
    }

    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    if !config.keepalive {
        request = request
            .header(CONNECTION, "close")
            .header("Proxy-Connection", "close");
    }

    if shutdown.is_requested() {
        return Ok(None);
    }
    Ok(Some(request.build()?))
}
