//! Load-generation command.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::client::LoadDriver;
use crate::config::{self, ConfigError, Shaping, WorkerConfig};
use crate::shutdown::{install_signal_handler, Shutdown};
use crate::stats::StatsCollector;

use super::DriveArgs;

/// Generate load until every worker's pass budget is spent or Ctrl+C.
pub async fn cmd_drive(args: DriveArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;

    if args.print_config {
        println!("qbench drive{}", config.to_command_line());
        return Ok(());
    }

    let config = Arc::new(config);
    let stats = Arc::new(StatsCollector::new());
    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone());

    println!(
        "{} Driving {} worker{} across {} URL{}",
        style("→").cyan(),
        config.parallel,
        if config.parallel == 1 { "" } else { "s" },
        config.urls.len(),
        if config.urls.len() == 1 { "" } else { "s" },
    );
    if config.limit == 0 {
        println!("  Press Ctrl+C to stop");
    }

    let reporter = tokio::spawn(report_loop(stats.clone(), shutdown.clone()));

    let driver = LoadDriver::new(config, stats.clone(), shutdown.clone());
    let report = driver.run().await;

    // Workers are done; wind the reporter down and flush what is left.
    shutdown.request();
    let _ = reporter.await;
    if let Some(line) = stats.report_line() {
        println!("{}", line);
    }

    println!(
        "{} {} responses, {} rejected, {} aborted passes",
        style("✓").green(),
        report.requests,
        report.rejected,
        report.failures,
    );
    Ok(())
}

/// Validate the raw arguments into a worker configuration.
fn build_config(args: &DriveArgs) -> Result<WorkerConfig, ConfigError> {
    WorkerConfig::check_urls(&args.urls)?;
    if args.pause < 0 {
        return Err(ConfigError::NegativePause);
    }

    let headers = args
        .headers
        .iter()
        .map(|raw| config::parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WorkerConfig {
        urls: args.urls.clone(),
        parallel: WorkerConfig::effective_parallel(args.parallel),
        limit: args.limit.max(0) as u64,
        pause: Duration::from_millis(args.pause as u64),
        keepalive: args.keepalive,
        bsize: Shaping::from_flag(args.bsize),
        delay: Shaping::from_flag(args.delay),
        proxy: args.proxy.clone(),
        headers,
        quotas: config::expand_at_args(&args.quotas)?,
        quota_selector: args.quota_selector.clone(),
    })
}

async fn report_loop(stats: Arc<StatsCollector>, shutdown: Shutdown) {
    while shutdown.sleep(Duration::from_secs(1)).await {
        if let Some(line) = stats.report_line() {
            println!("{}", line);
        }
    }
}
