//! Quota server command.

use std::sync::Arc;

use console::style;

use crate::config::expand_at_args;
use crate::quota::{now_secs, QuotaRegistry, QuotaSpec};
use crate::server::{self, AppState};
use crate::shutdown::{install_signal_handler, Shutdown};

use super::ServeArgs;

/// Start the quota server.
pub async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(&args.bind)?;

    let registry = Arc::new(QuotaRegistry::new());
    for text in expand_at_args(&args.quotas)? {
        registry.register(QuotaSpec::parse(&text)?, now_secs())?;
    }
    // Every quota opens a fresh window at serve time.
    registry.reinitialize_all(now_secs());

    println!(
        "{} Starting quotabench server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    if registry.is_empty() {
        println!("  {} No quotas configured; all requests pass", style("!").yellow());
    } else {
        println!(
            "  {} Enforcing {} quota{} named by the {} header",
            style("✓").green(),
            registry.len(),
            if registry.len() == 1 { "" } else { "s" },
            args.quota_header,
        );
    }
    println!("  Press Ctrl+C to stop");

    let state = AppState::new(registry, &args.quota_header);
    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone());

    tokio::spawn(server::report_loop(
        state.clone(),
        shutdown.clone(),
        args.suppress_quotas,
    ));

    server::serve(state, &host, port, shutdown).await
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:3030
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
fn parse_bind_address(bind: &str) -> anyhow::Result<(String, u16)> {
    // Try parsing as just a port number
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    // Try parsing as host:port
    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    // Must be just a host, use default port
    Ok((bind.to_string(), 3030))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_address() {
        assert_eq!(
            parse_bind_address("3030").unwrap(),
            ("127.0.0.1".to_string(), 3030)
        );
        assert_eq!(
            parse_bind_address("0.0.0.0").unwrap(),
            ("0.0.0.0".to_string(), 3030)
        );
        assert_eq!(
            parse_bind_address("localhost:8080").unwrap(),
            ("localhost".to_string(), 8080)
        );
    }
}
