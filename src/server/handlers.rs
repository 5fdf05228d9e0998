//! HTTP request handlers for the quota server.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream;
use serde::Deserialize;

use crate::config::{BSIZE_DEFAULT, BSIZE_MAX, BSIZE_MIN, DELAY_DEFAULT, DELAY_MAX, DELAY_MIN};
use crate::quota::now_secs;

use super::AppState;

/// Streamed bodies are sliced from one chunk of this size.
pub(super) const FILLER_CHUNK: usize = 64 * 1024;

const SERVER_ID: &str = concat!("quotabench/", env!("CARGO_PKG_VERSION"));

/// Query terms shaping the synthetic response.
///
/// Kept as strings so unreadable values fall back to the defaults instead
/// of failing extraction.
#[derive(Debug, Default, Deserialize)]
pub struct ShapeParams {
    bsiz: Option<String>,
    dlay: Option<String>,
}

/// Synthetic content endpoint, reachable from any GET path.
///
/// The quota named by the request header is charged the full body size
/// before any byte is produced; a rejected request costs the client an
/// empty 429 plus whatever Retry-After the quota advertises.
pub async fn synthetic(
    State(state): State<AppState>,
    Query(params): Query<ShapeParams>,
    headers: HeaderMap,
) -> Response {
    let bsize = parse_exponent(params.bsiz.as_deref(), BSIZE_MIN, BSIZE_MAX, BSIZE_DEFAULT);
    let delay = parse_exponent(params.dlay.as_deref(), DELAY_MIN, DELAY_MAX, DELAY_DEFAULT);
    let clen: usize = 1 << bsize;

    let quota_name = headers
        .get(state.quota_header.as_str())
        .and_then(|value| value.to_str().ok());

    if let Some(name) = quota_name {
        let decision = state.registry.evaluate(name, clen as f64, now_secs());
        if !decision.allow {
            state.stats.record(429, 0);
            return too_much(decision.retry_after_secs);
        }
    }

    tokio::time::sleep(Duration::from_millis(1 << delay)).await;
    state.stats.record(200, clen as u64);
    filler_response(clen, state.filler.clone())
}

/// Read a log2 query term, falling back to `default` when absent,
/// unreadable, or outside `[min, max)`.
fn parse_exponent(raw: Option<&str>, min: u32, max: u32, default: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if (min as i64) <= n && n < (max as i64) => n as u32,
        _ => default,
    }
}

fn too_much(retry_after_secs: f64) -> Response {
    if retry_after_secs > 0.0 {
        let retry_after = (retry_after_secs.ceil() as u64).to_string();
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after)],
            "Too Much",
        )
            .into_response()
    } else {
        (StatusCode::TOO_MANY_REQUESTS, "Too Much").into_response()
    }
}

/// A `clen`-byte body streamed in slices of the shared filler chunk, with
/// an explicit Content-Length so clients can size their reads.
fn filler_response(clen: usize, chunk: Bytes) -> Response {
    let stream = stream::unfold(clen, move |remaining| {
        let chunk = chunk.clone();
        async move {
            if remaining == 0 {
                return None;
            }
            let take = remaining.min(chunk.len());
            Some((Ok::<_, Infallible>(chunk.slice(..take)), remaining - take))
        }
    });

    (
        [
            (header::CONTENT_LENGTH, clen.to_string()),
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Middleware attaching the standard headers to every response.
pub async fn standard_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_ID));
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
