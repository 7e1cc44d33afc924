//! HTTP control plane
//!
//! Routes:
//!
//! - `GET /limit?ip=` / `GET /unlimit?ip=` / `GET /limits`: rule groups
//!   (`/limit` refuses whitelisted targets with 403)
//! - `GET /execute`: top talkers of the current hour
//! - `POST /ban`: forward high-volume talkers to the ban service
//! - `GET /update`, `GET /remove`: ban service passthrough
//! - `GET /healthz`

pub mod error;
pub mod handlers;

use crate::audit::AuditLog;
use crate::ban::BanClient;
use crate::config::ReportConfig;
use crate::core::firewall::LimitPolicy;
use crate::core::manager::RateLimitManager;
use crate::notify::Notifier;
use crate::whitelist::Whitelist;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of every handler
pub struct AppState {
    pub manager: RateLimitManager,
    /// Settings for newly installed groups; `policy.port` also scopes removals
    pub policy: LimitPolicy,
    pub ban: BanClient,
    pub report: ReportConfig,
    /// `None` when auditing is disabled
    pub audit: Option<AuditLog>,
    /// Targets `/limit` refuses
    pub whitelist: Whitelist,
    /// `None` when no webhook is configured
    pub notifier: Option<Notifier>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/limit", get(handlers::limit))
        .route("/unlimit", get(handlers::unlimit))
        .route("/limits", get(handlers::limits))
        .route("/execute", get(handlers::execute))
        .route("/ban", post(handlers::ban))
        .route("/update", get(handlers::update_proxy))
        .route("/remove", get(handlers::remove_proxy))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the control API until Ctrl-C or SIGTERM
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Control API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down control API");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BanConfig, NotifyConfig};
    use crate::core::backend::RuleBackend;
    use crate::core::firewall::DEFAULT_CHAIN;
    use crate::core::memory::MemoryBackend;
    use axum::Json;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_state(backend: Arc<MemoryBackend>, access_log: std::path::PathBuf) -> Arc<AppState> {
        Arc::new(AppState {
            manager: RateLimitManager::new(backend, DEFAULT_CHAIN),
            policy: LimitPolicy::default(),
            ban: BanClient::new(&BanConfig {
                service_url: "http://127.0.0.1:1".to_string(),
                ..BanConfig::default()
            })
            .unwrap(),
            report: ReportConfig {
                access_log,
                top_n: 10,
            },
            audit: None,
            whitelist: Whitelist::new(["127.0.0.1", "192.168.0.0/16"]),
            notifier: None,
        })
    }

    fn test_app() -> (Arc<MemoryBackend>, Router) {
        let backend = Arc::new(MemoryBackend::new());
        let state = test_state(backend.clone(), "/nonexistent/access.log".into());
        (backend, router(state))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_limit_then_already_limited() {
        let (backend, app) = test_app();

        let (status, body) = get_json(&app, "/limit?ip=198.51.100.7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "limited");
        assert_eq!(body["ip"], "198.51.100.7");

        let (_, body) = get_json(&app, "/limit?ip=198.51.100.7").await;
        assert_eq!(body["status"], "already_limited");
        assert_eq!(backend.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_limit_refuses_whitelisted_targets() {
        let (backend, app) = test_app();

        let (status, body) = get_json(&app, "/limit?ip=127.0.0.1").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "whitelisted");
        assert_eq!(body["ip"], "127.0.0.1");

        // Overlaps 192.168.0.0/16
        let (status, _) = get_json(&app, "/limit?ip=192.168.7.0/24").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = get_json(&app, "/limit?ip=192.0.0.0/8").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(backend.lines().is_empty());

        let (status, _) = get_json(&app, "/limit?ip=192.169.0.1").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unlimit_ignores_whitelist() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .append_rule(&LimitPolicy::default().drop_rule(DEFAULT_CHAIN, "127.0.0.1"))
            .await
            .unwrap();
        let app = router(test_state(backend.clone(), "/nonexistent/access.log".into()));

        let (status, body) = get_json(&app, "/unlimit?ip=127.0.0.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);
        assert!(backend.lines().is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_announced_on_webhook() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let hook = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    "{\"code\":0}"
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, hook).await.unwrap();
        });

        let backend = Arc::new(MemoryBackend::new());
        let mut state = test_state(backend, "/nonexistent/access.log".into());
        Arc::get_mut(&mut state).unwrap().notifier = Notifier::from_config(&NotifyConfig {
            webhook_url: Some(format!("http://{addr}/hook")),
            ..NotifyConfig::default()
        })
        .unwrap();
        let app = router(state);

        get_json(&app, "/limit?ip=198.51.100.7").await;
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message["msg_type"], "text");
        assert_eq!(
            message["content"]["text"],
            "[iplimit] 198.51.100.7: rate limit limited"
        );

        // Nothing changed, nothing announced
        get_json(&app, "/limit?ip=198.51.100.7").await;
        get_json(&app, "/unlimit?ip=198.51.100.7").await;
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message["content"]["text"],
            "[iplimit] 198.51.100.7: rate limit removed (2 rules deleted)"
        );
    }

    #[tokio::test]
    async fn test_limit_requires_ip() {
        let (_backend, app) = test_app();

        let (status, body) = get_json(&app, "/limit").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'ip' query parameter");

        let (status, _) = get_json(&app, "/unlimit?ip=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_limit_rejects_invalid_target() {
        let (backend, app) = test_app();
        let (status, body) = get_json(&app, "/limit?ip=10.0.0.1%20-j%20ACCEPT").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ip"], "10.0.0.1 -j ACCEPT");
        assert!(backend.lines().is_empty());
    }

    #[tokio::test]
    async fn test_limit_backend_failure_is_500() {
        let (backend, app) = test_app();
        backend.set_unavailable(true);

        let (status, body) = get_json(&app, "/limit?ip=198.51.100.7").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "failed");
        assert!(body["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_unlimit_reports_removed_count() {
        let (_backend, app) = test_app();
        get_json(&app, "/limit?ip=10.0.0.0/24").await;

        let (status, body) = get_json(&app, "/unlimit?ip=10.0.0.0/24").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "unlimited");
        assert_eq!(body["removed"], 2);
        assert!(body.get("warning").is_none());

        let (_, body) = get_json(&app, "/unlimit?ip=10.0.0.0/24").await;
        assert_eq!(body["removed"], 0);
    }

    #[tokio::test]
    async fn test_unlimit_warns_when_rules_remain() {
        let (backend, app) = test_app();
        get_json(&app, "/limit?ip=198.51.100.7").await;
        backend.fail_next_deletes(1);

        let (status, body) = get_json(&app, "/unlimit?ip=198.51.100.7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);
        assert_eq!(body["failed_deletes"], 1);
        assert!(body["warning"].as_str().unwrap().contains("still exist"));
    }

    #[tokio::test]
    async fn test_limits_lists_sorted_targets() {
        let (_backend, app) = test_app();
        get_json(&app, "/limit?ip=10.0.0.1").await;
        get_json(&app, "/limit?ip=10.0.0.0/24").await;

        let (status, body) = get_json(&app, "/limits").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limited_ips"], serde_json::json!(["10.0.0.0/24", "10.0.0.1"]));
    }

    #[tokio::test]
    async fn test_limits_backend_failure_is_500() {
        let (backend, app) = test_app();
        backend.set_unavailable(true);
        let (status, body) = get_json(&app, "/limits").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_execute_missing_log_is_500() {
        let (_backend, app) = test_app();
        let (status, _) = get_json(&app, "/execute").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_execute_empty_log() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let state = test_state(Arc::new(MemoryBackend::new()), file.path().to_path_buf());
        let app = router(state);

        let (status, body) = get_json(&app, "/execute").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_ban_requires_entries() {
        let (_backend, app) = test_app();
        for body in ["", "[]"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/ban")
                        .header("content-type", "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_ban_skips_low_counts() {
        let (_backend, app) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ban")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"[{"ip": "192.0.2.1", "count": 12}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body[0]["status"], "skipped");
    }

    #[tokio::test]
    async fn test_proxy_unreachable_is_502() {
        let (_backend, app) = test_app();
        let (status, body) = get_json(&app, "/remove?cidr=10.0.0.1").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Failed to forward request");
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_backend, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
