//! Control API handlers
//!
//! Each handler validates its input, calls into the manager (or the ban
//! client / report) and maps the typed outcome to JSON. Successful changes
//! are announced on the chat webhook in the background.

use super::AppState;
use super::error::ApiError;
use crate::ban::{BanRequest, BanStatus};
use crate::core::manager::LimitOutcome;
use crate::notify::NotifyEvent;
use crate::report::{TalkerCount, hourly_report};
use crate::validators::validate_target;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Query, RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct IpQuery {
    ip: Option<String>,
}

/// Extracts and validates the `ip` query parameter
fn target_param(query: IpQuery) -> Result<String, ApiError> {
    let raw = query
        .ip
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| {
            warn!("Missing 'ip' query parameter!");
            ApiError::MissingParam("ip")
        })?;
    validate_target(&raw).map_err(|e| {
        warn!("Rejected target '{raw}': {e}");
        ApiError::invalid(raw, e)
    })
}

/// Posts `event` to the webhook without holding up the response
fn notify_in_background(state: &AppState, event: NotifyEvent, vars: Vec<(&'static str, String)>) {
    let Some(notifier) = state.notifier.clone() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(event, &vars).await {
            warn!("Failed to send {event} notification: {e}");
        }
    });
}

/// `GET /limit?ip=`
pub async fn limit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpQuery>,
) -> Result<Json<Value>, ApiError> {
    let ip = target_param(query)?;

    if state.whitelist.is_whitelisted(&ip) {
        warn!("Refusing to limit whitelisted {ip}");
        if let Some(audit) = &state.audit {
            audit
                .log_limit(&ip, None, Some("whitelisted".to_string()))
                .await;
        }
        return Err(ApiError::Whitelisted(ip));
    }

    match state.manager.limit(&ip, &state.policy).await {
        Ok(outcome) => {
            if let Some(audit) = &state.audit {
                audit.log_limit(&ip, Some(outcome.as_ref()), None).await;
            }
            if outcome == LimitOutcome::Limited {
                notify_in_background(
                    &state,
                    NotifyEvent::Limit,
                    vec![("ip", ip.clone()), ("status", outcome.to_string())],
                );
            }
            Ok(Json(json!({ "ip": ip, "status": outcome })))
        }
        Err(e) => {
            error!("Failed to limit {ip}: {e}");
            if let Some(audit) = &state.audit {
                audit.log_limit(&ip, None, Some(e.to_string())).await;
            }
            Err(ApiError::Target { ip, source: e })
        }
    }
}

/// `GET /unlimit?ip=`
pub async fn unlimit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpQuery>,
) -> Result<Json<Value>, ApiError> {
    let ip = target_param(query)?;

    let report = match state.manager.unlimit(&ip, state.policy.port).await {
        Ok(report) => report,
        Err(e) => {
            error!("Failed to remove limit for {ip}: {e}");
            if let Some(audit) = &state.audit {
                audit.log_unlimit(&ip, 0, false, Some(e.to_string())).await;
            }
            return Err(ApiError::Target { ip, source: e });
        }
    };

    if let Some(audit) = &state.audit {
        audit
            .log_unlimit(&ip, report.removed, report.still_present, None)
            .await;
    }

    let mut body = json!({
        "ip": ip,
        "status": "unlimited",
        "removed": report.removed,
    });
    if report.still_present {
        body["warning"] = json!(format!("Rules for {ip} still exist after attempted deletion"));
    }
    if !report.failures.is_empty() {
        body["failed_deletes"] = json!(report.failures.len());
    }
    if report.removed > 0 {
        notify_in_background(
            &state,
            NotifyEvent::Unlimit,
            vec![("ip", ip.clone()), ("removed", report.removed.to_string())],
        );
    }
    info!("Removed limit rule for {ip}");
    Ok(Json(body))
}

/// `GET /limits`
pub async fn limits(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let limited = state.manager.list_limited().await.map_err(|e| {
        error!("Failed to list limits: {e}");
        ApiError::Core(e)
    })?;
    Ok(Json(json!({ "limited_ips": limited })))
}

/// `GET /execute`: top talkers of the current hour
pub async fn execute(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TalkerCount>>, ApiError> {
    let talkers = hourly_report(
        &state.report.access_log,
        state.report.top_n,
        chrono::Local::now(),
    )
    .await
    .map_err(|e| {
        error!("Failed to build top-talkers report: {e}");
        ApiError::Core(e)
    })?;
    Ok(Json(talkers))
}

/// `POST /ban` with a JSON array of `{"ip", "count"}`
pub async fn ban(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let entries: Vec<BanRequest> = if body.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::Invalid {
            ip: None,
            message: format!("Invalid ban request body: {e}"),
        })?
    };

    if entries.is_empty() {
        warn!("Missing IP data in request body!");
        return Err(ApiError::Invalid {
            ip: None,
            message: "Missing IP data in request body".to_string(),
        });
    }

    let results = state.ban.ban_all(&entries).await;

    if let Some(audit) = &state.audit {
        for result in results.iter().filter(|r| r.status != BanStatus::Skipped) {
            audit
                .log_ban(&result.ip, result.count, result.error.clone())
                .await;
        }
    }
    for result in results.iter().filter(|r| r.status == BanStatus::Success) {
        notify_in_background(
            &state,
            NotifyEvent::Ban,
            vec![
                ("ip", result.ip.clone()),
                ("count", result.count.to_string()),
                ("status", result.status.to_string()),
            ],
        );
    }

    Ok(Json(results).into_response())
}

async fn forward(state: &AppState, path: &str, query: Option<String>) -> Result<Response, ApiError> {
    let forwarded = state
        .ban
        .forward(path, query.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to proxy {path} request: {e}");
            ApiError::Forward(e)
        })?;

    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = forwarded.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(forwarded.body))
        .map_err(|e| ApiError::Core(crate::core::error::Error::Internal(e.to_string())))
}

/// `GET /update?cidr=&ban_type=&ban_time=`, proxied to the ban service
pub async fn update_proxy(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    forward(&state, "update", query).await
}

/// `GET /remove?cidr=`, proxied to the ban service
pub async fn remove_proxy(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    forward(&state, "remove", query).await
}

pub async fn healthz() -> &'static str {
    "ok"
}
