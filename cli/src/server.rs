//! REST cron endpoint and the background tick loop.

use crate::app::App;
use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use watchdog_core::WatchdogError;

pub const CRON_ROUTE: &str = "/watchdog/v1/cron";
const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct CronQuery {
    key: Option<String>,
    force: Option<String>,
    notify_only: Option<String>,
}

fn truthy(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "message": message,
            "data": { "status": status.as_u16() },
        })),
    )
        .into_response()
}

async fn cron(State(app): State<Arc<App>>, Query(query): Query<CronQuery>) -> Response {
    let result = app
        .watchdog
        .handle_cron_request(
            query.key.as_deref(),
            truthy(&query.force),
            truthy(&query.notify_only),
        )
        .await;

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(WatchdogError::Forbidden) => error_response(
            StatusCode::FORBIDDEN,
            "watchdog_forbidden",
            "Invalid or missing cron key.",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Cron request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "watchdog_error",
                "The cron run failed. Check the server log for details.",
            )
        }
    }
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route(CRON_ROUTE, get(cron).post(cron))
        .with_state(app)
}

async fn tick(app: &App) {
    if let Err(e) = app.watchdog.evaluate_schedule() {
        tracing::warn!(error = %e, "Schedule evaluation failed");
    }
    match app.watchdog.run_due_events().await {
        Ok(outcomes) if !outcomes.is_empty() => {
            tracing::info!(events = outcomes.len(), "Ran due cron events");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Running due events failed"),
    }
}

pub async fn serve(app: App) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", app.config.host, app.config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", app.config.host, app.config.port))?;

    let app = Arc::new(app);

    let ticker = {
        let app = app.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                tick(&app).await;
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, route = CRON_ROUTE, "Listening");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    ticker.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::routing::post;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const KEY: &str = "known-secret";

    fn app(dir: &TempDir, with_plugins_dir: bool) -> Arc<App> {
        let plugins_dir = dir.path().join("plugins");
        if with_plugins_dir {
            std::fs::create_dir_all(&plugins_dir).unwrap();
        }
        let config = Config {
            store: dir.path().join("store.json"),
            plugins_dir,
            sendmail: "/nonexistent/sendmail".to_string(),
            ..Config::default()
        };

        let app = App::build(config).unwrap();
        app.watchdog
            .settings()
            .update(|s| {
                s.cron_secret = KEY.to_string();
                s.notifications.email.enabled = false;
            })
            .unwrap();
        Arc::new(app)
    }

    async fn call(app: Arc<App>, method: Method, query: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(format!("{}?{}", CRON_ROUTE, query))
            .body(Body::empty())
            .unwrap();

        let response = router(app).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// Local endpoint that accepts every webhook delivery.
    async fn webhook_receiver() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let receiver = Router::new().route("/hook", post(|| async { StatusCode::OK }));
        tokio::spawn(async move { axum::serve(listener, receiver).await });
        url
    }

    #[tokio::test]
    async fn test_missing_key_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(app(&dir, true), Method::GET, "").await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body,
            json!({
                "code": "watchdog_forbidden",
                "message": "Invalid or missing cron key.",
                "data": { "status": 403 }
            })
        );
    }

    #[tokio::test]
    async fn test_wrong_key_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(app(&dir, true), Method::POST, "key=not-the-key").await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "watchdog_forbidden");
        assert_eq!(body["data"]["status"], 403);
    }

    #[tokio::test]
    async fn test_valid_key_runs_a_scan() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true);

        for method in [Method::GET, Method::POST] {
            let (status, body) = call(app.clone(), method, &format!("key={}", KEY)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
            assert!(body["message"].as_str().unwrap().starts_with("Scan complete: 0 plugin(s) at risk"));
            assert_eq!(body["queue"], json!({ "processed": 0, "succeeded": 0 }));
        }
    }

    #[tokio::test]
    async fn test_force_and_notify_only_flags() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, true);
        let url = webhook_receiver().await;
        app.watchdog
            .settings()
            .update(|s| {
                s.notifications.webhook.enabled = true;
                s.notifications.webhook.url = url;
            })
            .unwrap();

        let (status, body) = call(app.clone(), Method::GET, &format!("key={}&notify_only=1", KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Nothing to notify.");
        assert_eq!(body["queue"], json!({ "processed": 0, "succeeded": 0 }));

        let query = format!("key={}&notify_only=true&force=yes", KEY);
        let (status, body) = call(app.clone(), Method::POST, &query).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Notifications sent.");
        assert_eq!(body["queue"], json!({ "processed": 1, "succeeded": 1 }));

        let query = format!("key={}&notify_only=1&force=no", KEY);
        let (_, body) = call(app, Method::GET, &query).await;
        assert_eq!(body["message"], "Nothing to notify.");
    }

    #[cfg(feature = "wordpress")]
    #[tokio::test]
    async fn test_failed_run_is_a_server_error() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(app(&dir, false), Method::GET, &format!("key={}", KEY)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({
                "code": "watchdog_error",
                "message": "The cron run failed. Check the server log for details.",
                "data": { "status": 500 }
            })
        );
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&Some("1".to_string())));
        assert!(truthy(&Some("TRUE".to_string())));
        assert!(!truthy(&Some("0".to_string())));
        assert!(!truthy(&None));
    }
}
