//! Quota-enforcing test server.
//!
//! Serves synthetic content from any GET path with:
//! - `bsiz`/`dlay` query terms shaping body size and latency
//! - Per-name quota enforcement before a single body byte is produced
//! - Retry-After hints on rejections, when the quota opts in
//! - Per-status counters drained to the console once a second

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;

use crate::quota::QuotaRegistry;
use crate::shutdown::Shutdown;
use crate::stats::StatsCollector;

/// Default name of the header that selects a quota, overridable per server.
pub const DEFAULT_QUOTA_HEADER: &str = crate::config::QUOTA_HEADER;

/// Shared state for the quota server.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<QuotaRegistry>,
    pub stats: Arc<StatsCollector>,
    /// Lowercased name of the header that carries the quota name.
    pub quota_header: String,
    /// Reusable filler chunk bodies are streamed from.
    pub filler: Bytes,
}

impl AppState {
    pub fn new(registry: Arc<QuotaRegistry>, quota_header: &str) -> Self {
        Self {
            registry,
            stats: Arc::new(StatsCollector::new()),
            quota_header: quota_header.to_ascii_lowercase(),
            filler: Bytes::from(vec![b'Y'; handlers::FILLER_CHUNK]),
        }
    }
}

/// Start the server and run until shutdown is requested.
pub async fn serve(state: AppState, host: &str, port: u16, shutdown: Shutdown) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    Ok(())
}

/// Print per-status counters, and quota usage unless suppressed, once a
/// second until shutdown.
pub async fn report_loop(state: AppState, shutdown: Shutdown, suppress_quotas: bool) {
    while shutdown.sleep(Duration::from_secs(1)).await {
        if let Some(line) = state.stats.report_line() {
            println!("{}", line);
        }
        if !suppress_quotas {
            for line in state.registry.summaries() {
                println!("{}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::quota::{now_secs, QuotaSpec};

    fn setup_test_app(specs: &[&str]) -> (axum::Router, AppState) {
        let registry = Arc::new(QuotaRegistry::new());
        let now = now_secs();
        for text in specs {
            registry
                .register(QuotaSpec::parse(text).unwrap(), now)
                .unwrap();
        }

        let state = AppState::new(registry, DEFAULT_QUOTA_HEADER);
        let app = create_router(state.clone());
        (app, state)
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_default_response_shape() {
        let (app, _state) = setup_test_app(&[]);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-length")
                .unwrap()
                .to_str()
                .unwrap(),
            "1024"
        );
        let body = body_bytes(response).await;
        assert_eq!(body.len(), 1024);
        assert!(body.iter().all(|b| *b == b'Y'));
    }

    #[tokio::test]
    async fn test_standard_headers_on_every_response() {
        let (app, _state) = setup_test_app(&[]);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert!(headers
            .get("server")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("quotabench/"));
        assert!(headers.get("date").is_some());
        assert_eq!(headers.get("cache-control").unwrap(), "private");
        assert_eq!(headers.get("pragma").unwrap(), "no-cache");
    }

    #[tokio::test]
    async fn test_bsiz_shapes_the_body() {
        let (app, _state) = setup_test_app(&[]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=12")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.len(), 4096);
    }

    #[tokio::test]
    async fn test_out_of_range_bsiz_falls_back_to_default() {
        let (app, _state) = setup_test_app(&[]);

        for uri in ["/?bsiz=99", "/?bsiz=abc", "/?bsiz=-4", "/?bsiz=9"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_bytes(response).await.len(), 1024, "uri {uri}");
        }
    }

    #[tokio::test]
    async fn test_any_path_serves_content() {
        let (app, _state) = setup_test_app(&[]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/some/deep/path?bsiz=11")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.len(), 2048);
    }

    #[tokio::test]
    async fn test_quota_accept_then_reject_with_hint() {
        // 2KB per week: the first 1KB response fits, the next 2KB does not.
        let (app, _state) = setup_test_app(&["t:2KB/1w:0:h"]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=11")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        // (3072 / 2048) * 604800, rounded up.
        assert_eq!(
            response
                .headers()
                .get("retry-after")
                .unwrap()
                .to_str()
                .unwrap(),
            "907200"
        );
        assert_eq!(body_bytes(response).await, b"Too Much");
    }

    #[tokio::test]
    async fn test_suppressed_hint_omits_retry_after() {
        let (app, _state) = setup_test_app(&["t:1KB/1w"]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_none());
    }

    #[tokio::test]
    async fn test_unknown_quota_name_is_not_limited() {
        let (app, _state) = setup_test_app(&["t:1KB/1w"]);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/?bsiz=20")
                        .header(DEFAULT_QUOTA_HEADER, "ghost")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_request_without_quota_header_is_not_limited() {
        let (app, _state) = setup_test_app(&["t:1KB/1w"]);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/?bsiz=20")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_rejections_count_zero_bytes() {
        let (app, state) = setup_test_app(&["t:1KB/1w"]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header(DEFAULT_QUOTA_HEADER, "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(state.stats.drain(), vec![(200, 1, 1024), (429, 1, 0)]);
    }

    #[tokio::test]
    async fn test_custom_quota_header_name() {
        let registry = Arc::new(QuotaRegistry::new());
        registry
            .register(QuotaSpec::parse("t:1KB/1w").unwrap(), now_secs())
            .unwrap();
        let state = AppState::new(registry, "X-My-Quota");
        let app = create_router(state);

        assert!(app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header("x-my-quota", "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
            .is_success());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?bsiz=10")
                    .header("x-my-quota", "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
