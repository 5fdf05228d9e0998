//! Concurrent load driver.
//!
//! `parallel` workers run side by side. Each worker makes passes over the
//! URL pool until its pass budget runs out or shutdown is requested; a
//! supervisor wraps the pass loop and restarts it after a transport
//! failure, waiting a randomized exponential delay first. All workers
//! share one stats collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::config::{WorkerConfig, DELAY_MAX, DELAY_MIN};
use crate::shutdown::Shutdown;
use crate::stats::StatsCollector;

use super::{backoff, build_http_client, request, RequestOutcome};

/// Totals across all workers for one drive run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriveReport {
    /// Responses received, any status.
    pub requests: u64,
    /// Responses that applied backpressure (429 or 503).
    pub rejected: u64,
    /// Pass-loop aborts on transport or protocol errors.
    pub failures: u64,
}

#[derive(Clone, Default)]
struct RunCounters {
    requests: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl RunCounters {
    fn note(&self, outcome: &RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if matches!(outcome.status, 429 | 503) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report(&self) -> DriveReport {
        DriveReport {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Owns the worker pool for one drive run.
pub struct LoadDriver {
    config: Arc<WorkerConfig>,
    stats: Arc<StatsCollector>,
    shutdown: Shutdown,
}

impl LoadDriver {
    pub fn new(config: Arc<WorkerConfig>, stats: Arc<StatsCollector>, shutdown: Shutdown) -> Self {
        Self {
            config,
            stats,
            shutdown,
        }
    }

    /// Run all workers to completion and report the totals.
    pub async fn run(&self) -> DriveReport {
        let counters = RunCounters::default();

        let mut handles = Vec::with_capacity(self.config.parallel);
        for worker_id in 0..self.config.parallel {
            let config = self.config.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                supervise_worker(worker_id, &config, &stats, &shutdown, &counters).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        counters.report()
    }
}

/// Keep one worker's pass loop alive until its budget is spent.
///
/// The budget survives restarts: a worker that crashes mid-run resumes
/// with the passes it has left, not a fresh allowance.
async fn supervise_worker(
    worker_id: usize,
    config: &WorkerConfig,
    stats: &StatsCollector,
    shutdown: &Shutdown,
    counters: &RunCounters,
) {
    let mut remaining = (config.limit > 0).then_some(config.limit);

    while !shutdown.is_requested() && remaining.map_or(true, |n| n > 0) {
        match run_passes(worker_id, config, stats, shutdown, counters, &mut remaining).await {
            Ok(()) => {}
            Err(error) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, "pass aborted: {error}");
                let exponent = rand::thread_rng().gen_range(DELAY_MIN..DELAY_MAX);
                let delay = Duration::from_millis((1u64 << exponent) * 20);
                tracing::debug!(worker_id, delay_ms = delay.as_millis() as u64, "restarting worker");
                if !shutdown.sleep(delay).await {
                    break;
                }
            }
        }
    }
    tracing::info!(worker_id, "worker finished");
}

/// The inner loop: walk the URL pool once per pass, honoring backpressure
/// and the inter-pass pause, until the budget or a failure stops it.
///
/// A fresh HTTP client is built per invocation, so a restart after a
/// failure starts from a clean connection state.
async fn run_passes(
    worker_id: usize,
    config: &WorkerConfig,
    stats: &StatsCollector,
    shutdown: &Shutdown,
    counters: &RunCounters,
    remaining: &mut Option<u64>,
) -> Result<(), reqwest::Error> {
    let client = build_http_client(config)?;

    while !shutdown.is_requested() && remaining.map_or(true, |n| n > 0) {
        for url in &config.urls {
            if shutdown.is_requested() {
                return Ok(());
            }
            let Some(outcome) = send_one(&client, config, url, shutdown, stats).await? else {
                return Ok(());
            };
            counters.note(&outcome);
            if !outcome.retry_after.is_zero() {
                tracing::debug!(
                    worker_id,
                    url = %url,
                    status = outcome.status,
                    secs = outcome.retry_after.as_secs_f64(),
                    "backing off"
                );
                if !shutdown.sleep(outcome.retry_after).await {
                    return Ok(());
                }
            }
        }
        if let Some(n) = remaining {
            *n -= 1;
        }
        if !config.pause.is_zero() && !shutdown.sleep(config.pause).await {
            return Ok(());
        }
    }
    Ok(())
}

/// Send one request and digest the response.
///
/// Returns `Ok(None)` when shutdown stopped the request before it was
/// sent.
async fn send_one(
    client: &reqwest::Client,
    config: &WorkerConfig,
    url: &str,
    shutdown: &Shutdown,
    stats: &StatsCollector,
) -> Result<Option<RequestOutcome>, reqwest::Error> {
    let Some(request) = request::build_request(client, config, url, shutdown)? else {
        return Ok(None);
    };

    let response = client.execute(request).await?;
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = response.bytes().await?;
    let body_bytes = body.len() as u64;
    stats.record(status, body_bytes);

    Ok(Some(RequestOutcome {
        status,
        body_bytes,
        retry_after: backoff::compute_delay(status, retry_after.as_deref(), Utc::now()),
    }))
}
