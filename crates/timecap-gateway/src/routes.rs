//! API route handlers for the gateway.
//!
//! Callers identify themselves with an explicit `uid`, either in the body
//! or query string or via the `X-User-Id` header. Handlers return
//! `(StatusCode, Json)` pairs; error bodies are `{"ok": false, "error": ..}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use timecap_core::error::TimecapError;
use timecap_core::types::{CapsuleStatus, PushSubscription, User, validate_answers};
use timecap_store::PreferencesPatch;
use uuid::Uuid;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn bad_request(msg: impl Into<String>) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"ok": false, "error": msg.into()})),
    )
}

fn error_response(e: TimecapError) -> ApiResponse {
    let status = match e {
        TimecapError::Validation(_) => StatusCode::BAD_REQUEST,
        TimecapError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
}

/// Caller identity: explicit field first, `X-User-Id` header as fallback.
fn resolve_uid(headers: &HeaderMap, explicit: Option<&str>) -> Option<String> {
    if let Some(uid) = explicit {
        let uid = uid.trim();
        if !uid.is_empty() {
            return Some(uid.to_string());
        }
    }
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "timecap-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Seal a new capsule.
pub async fn create_capsule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, body["uid"].as_str()) else {
        return bad_request("uid is required");
    };

    let raw_answers: Vec<String> = match body["answers"].as_array() {
        Some(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        None => return bad_request("answers must be an array of strings"),
    };
    let answers = match validate_answers(&raw_answers) {
        Ok(a) => a,
        Err(e) => return error_response(e),
    };

    let Some(deliver_at) = body["deliverAt"].as_i64() else {
        return bad_request("deliverAt must be an epoch-millisecond timestamp");
    };
    let now = now_millis();
    if deliver_at <= now {
        return bad_request("deliverAt must be in the future");
    }
    let interval = body["interval"].as_str().unwrap_or("").to_string();

    match state
        .store
        .create_capsule(&uid, answers, deliver_at, &interval, now)
        .await
    {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"ok": true, "id": id, "deliverAt": deliver_at})),
        ),
        Err(e) => error_response(e),
    }
}

/// List the caller's capsules, newest first, optionally filtered by status.
pub async fn list_capsules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, params.get("uid").map(String::as_str)) else {
        return bad_request("uid is required");
    };

    let status = match params.get("status").map(String::as_str) {
        None | Some("") => None,
        Some("pending") => Some(CapsuleStatus::Pending),
        Some("delivered") => Some(CapsuleStatus::Delivered),
        Some("returned") => Some(CapsuleStatus::Returned),
        Some(other) => return bad_request(format!("unknown status filter: {other}")),
    };

    match state.store.list_capsules(&uid, status).await {
        Ok(capsules) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "capsules": capsules})),
        ),
        Err(e) => error_response(e),
    }
}

/// Fetch one capsule. Someone else's capsule reads as missing.
pub async fn get_capsule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, params.get("uid").map(String::as_str)) else {
        return bad_request("uid is required");
    };

    match state.store.get_capsule(&id).await {
        Ok(Some(capsule)) if capsule.uid == uid => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "capsule": capsule})),
        ),
        Ok(_) => error_response(TimecapError::NotFound(format!("capsule {id}"))),
        Err(e) => error_response(e),
    }
}

/// Record post-delivery reflections. Only legal once delivered.
pub async fn return_capsule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, body["uid"].as_str()) else {
        return bad_request("uid is required");
    };

    let raw: Vec<String> = match body["returnAnswers"].as_array() {
        Some(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        None => return bad_request("returnAnswers must be an array of strings"),
    };
    let answers = match validate_answers(&raw) {
        Ok(a) => a,
        Err(e) => return error_response(e),
    };

    // Ownership first so a wrong uid reads as missing rather than leaking
    // lifecycle state.
    match state.store.get_capsule(&id).await {
        Ok(Some(capsule)) if capsule.uid == uid => {}
        Ok(_) => return error_response(TimecapError::NotFound(format!("capsule {id}"))),
        Err(e) => return error_response(e),
    }

    match state.store.record_return_answers(&id, answers).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => error_response(e),
    }
}

/// Run one sweep. Per-capsule failures are reported in the body, not the
/// status code; only a failed due-index read is a 500.
pub async fn deliver(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.sweeper.run(now_millis()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "delivered": report.delivered,
                "errors": report.errors,
            })),
        ),
        Err(e) => error_response(e),
    }
}

/// Deliver a single capsule immediately, regardless of its due time.
pub async fn deliver_now(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(id) = body["id"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("id is required");
    };
    match state.sweeper.deliver_now(id).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "delivered": report.delivered,
                "errors": report.errors,
            })),
        ),
        Err(e) => error_response(e),
    }
}

/// Run the legacy migration. Safe to call repeatedly.
pub async fn migrate(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.migrator.run(now_millis()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "migrated": report.migrated,
                "errors": report.errors,
                "users": report.users,
            })),
        ),
        Err(e) => error_response(e),
    }
}

/// Register a user from an email address; an existing address returns the
/// existing account.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let email = body["email"].as_str().unwrap_or("").trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return bad_request("a valid email is required");
    }

    match state.store.find_user_by_email(&email).await {
        Ok(Some(uid)) => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({"ok": true, "uid": uid, "created": false})),
            );
        }
        Ok(None) => {}
        Err(e) => return error_response(e),
    }

    let uid = Uuid::new_v4().to_string();
    let user = User::from_email(&uid, &email, now_millis());
    match state.store.create_user(&user).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"ok": true, "uid": uid, "created": true})),
        ),
        Err(e) => error_response(e),
    }
}

/// Partial update of notification preferences and phone number.
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, body["uid"].as_str()) else {
        return bad_request("uid is required");
    };

    let patch = PreferencesPatch {
        notify_email: body["notifyEmail"].as_bool(),
        notify_sms: body["notifySms"].as_bool(),
        notify_push: body["notifyPush"].as_bool(),
        phone: body["phone"].as_str().map(String::from),
    };

    match state.store.update_preferences(&uid, &patch).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => error_response(e),
    }
}

/// Store a browser push subscription. Re-subscribing the same endpoint is
/// a no-op.
pub async fn push_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, body["uid"].as_str()) else {
        return bad_request("uid is required");
    };
    let subscription: PushSubscription =
        match serde_json::from_value(body["subscription"].clone()) {
            Ok(s) => s,
            Err(_) => return bad_request("subscription must carry an endpoint"),
        };
    if subscription.endpoint.is_empty() {
        return bad_request("subscription must carry an endpoint");
    }

    match state.store.add_push_subscription(&uid, &subscription).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => error_response(e),
    }
}

/// Drop a push subscription by endpoint.
pub async fn push_unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let Some(uid) = resolve_uid(&headers, body["uid"].as_str()) else {
        return bad_request("uid is required");
    };
    let Some(endpoint) = body["endpoint"].as_str().filter(|s| !s.is_empty()) else {
        return bad_request("endpoint is required");
    };

    match state.store.remove_push_subscription(&uid, endpoint).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => error_response(e),
    }
}

/// The VAPID public key browsers need to create a subscription.
pub async fn vapid_key(State(state): State<Arc<AppState>>) -> ApiResponse {
    if state.vapid_public_key.is_empty() {
        return error_response(TimecapError::NotFound("push is not configured".into()));
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "publicKey": state.vapid_public_key})),
    )
}
