use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    accounts::{Credentials, RegisterOutcome, Registration},
    auth::Caller,
    complaints::{AdminUpdate, NewComplaint, OwnerUpdate},
    error::{Result, ValidJson},
    store::{
        audit::{
            ACTION_ACCOUNT_APPROVE, ACTION_ACCOUNT_LIST, ACTION_ACCOUNT_LOGIN,
            ACTION_ACCOUNT_REGISTER, ACTION_ACCOUNT_UPDATE, ACTION_COMPLAINT_CREATE,
            ACTION_COMPLAINT_DELETE, ACTION_COMPLAINT_EDIT, ACTION_COMPLAINT_TRANSITION,
            ACTION_SYSTEM_TOGGLE,
        },
        AuditEvent, AuditQuery,
    },
    AppState,
};

// ── IP extraction ────────────────────────────────────────────────────────────

fn extract_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }
    addr.ip().to_string()
}

// ── Audit helper ─────────────────────────────────────────────────────────────

/// Append to the audit log. A failed write is logged, never surfaced.
fn audit<T>(
    state: &AppState,
    action: &str,
    subject: Option<String>,
    ip: String,
    outcome: &Result<T>,
    detail: Option<String>,
) {
    let (success, detail) = match outcome {
        Ok(_) => (true, detail),
        Err(e) => (false, Some(e.to_string())),
    };
    info!(action, subject = ?subject, success, "audit");
    if let Err(e) = state
        .store
        .record_audit(AuditEvent::new(action, subject, ip, success, detail))
    {
        warn!(error = %e, action, "failed to record audit event");
    }
}

/// Base URL for approval links: the configured public URL, else the
/// request's `Host` header.
fn approval_base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(ref url) = state.public_url {
        return url.trim_end_matches('/').to_owned();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Accounts ─────────────────────────────────────────────────────────────────

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidJson(body): ValidJson<Registration>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let email = body.email.clone();
    let base_url = approval_base_url(&state, &headers);

    let outcome = state.accounts.register(body, &base_url).await;
    let detail = match &outcome {
        Ok(RegisterOutcome::Active { account, .. }) => Some(format!("role={}", account.role)),
        Ok(RegisterOutcome::PendingApproval { .. }) => Some("pending approval".into()),
        Err(_) => None,
    };
    audit(&state, ACTION_ACCOUNT_REGISTER, Some(email), ip, &outcome, detail);

    let response = match outcome? {
        RegisterOutcome::Active { token, account } => (
            StatusCode::CREATED,
            Json(json!({"success": true, "token": token, "user": account})),
        ),
        RegisterOutcome::PendingApproval { .. } => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Registration successful. Your account is pending admin approval.",
            })),
        ),
    };
    Ok(response.into_response())
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidJson(body): ValidJson<Credentials>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.accounts.login(&body);
    audit(
        &state,
        ACTION_ACCOUNT_LOGIN,
        Some(body.email.clone()),
        ip,
        &outcome,
        None,
    );

    let session = outcome?;
    Ok(Json(json!({"success": true, "token": session.token, "user": session.account})).into_response())
}

pub async fn approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(token): Path<String>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.accounts.approve_by_token(&token);
    let subject = outcome.as_ref().ok().map(|a| a.id.clone());
    audit(&state, ACTION_ACCOUNT_APPROVE, subject, ip, &outcome, None);

    let account = outcome?;
    Ok(Json(json!({
        "success": true,
        "message": format!("The account for {} ({}) is now active.", account.name, account.email),
        "user": account,
    }))
    .into_response())
}

pub async fn me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Response> {
    Ok(Json(json!({"success": true, "data": state.accounts.me(&caller)})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidJson(body): ValidJson<ProfileUpdate>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.accounts.update_profile(&caller, &body.name);
    audit(
        &state,
        ACTION_ACCOUNT_UPDATE,
        Some(caller.id().to_owned()),
        ip,
        &outcome,
        None,
    );

    Ok(Json(json!({"success": true, "data": outcome?})).into_response())
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.accounts.list_accounts(&caller);
    let detail = outcome.as_ref().ok().map(|a| format!("count={}", a.len()));
    audit(&state, ACTION_ACCOUNT_LIST, None, ip, &outcome, detail);

    let accounts = outcome?;
    Ok(Json(json!({"success": true, "count": accounts.len(), "data": accounts})).into_response())
}

// ── Complaints ───────────────────────────────────────────────────────────────

pub async fn list_complaints(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Response> {
    let complaints = state.complaints.list(&caller)?;
    Ok(Json(json!({"success": true, "count": complaints.len(), "data": complaints})).into_response())
}

pub async fn create_complaint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidJson(body): ValidJson<NewComplaint>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.complaints.create(&caller, body);
    let subject = outcome.as_ref().ok().map(|c| c.id.clone());
    audit(
        &state,
        ACTION_COMPLAINT_CREATE,
        subject,
        ip,
        &outcome,
        Some(format!("owner={}", caller.id())),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "data": outcome?})),
    )
        .into_response())
}

pub async fn get_complaint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Response> {
    let complaint = state.complaints.get(&caller, &id)?;
    Ok(Json(json!({"success": true, "data": complaint})).into_response())
}

pub async fn transition_complaint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<AdminUpdate>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.complaints.admin_transition(&caller, &id, body);
    let detail = outcome
        .as_ref()
        .ok()
        .map(|c| format!("status={}", c.status.as_str()));
    audit(
        &state,
        ACTION_COMPLAINT_TRANSITION,
        Some(id),
        ip,
        &outcome,
        detail,
    );

    Ok(Json(json!({"success": true, "data": outcome?})).into_response())
}

pub async fn edit_complaint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<OwnerUpdate>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.complaints.owner_edit(&caller, &id, body);
    audit(&state, ACTION_COMPLAINT_EDIT, Some(id), ip, &outcome, None);

    Ok(Json(json!({"success": true, "data": outcome?})).into_response())
}

pub async fn delete_complaint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.complaints.delete(&caller, &id);
    audit(
        &state,
        ACTION_COMPLAINT_DELETE,
        Some(id),
        ip,
        &outcome,
        Some(format!("by={}", caller.id())),
    );

    outcome?;
    Ok(Json(json!({"success": true, "message": "complaint removed"})).into_response())
}

pub async fn complaint_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Response> {
    let stats = state.complaints.stats(&caller)?;
    Ok(Json(json!({"success": true, "data": stats})).into_response())
}

// ── System mode ──────────────────────────────────────────────────────────────

pub async fn system_status(State(state): State<AppState>) -> Result<Response> {
    let mode = state.mode.get_mode()?;
    Ok(Json(json!({"success": true, "data": mode})).into_response())
}

pub async fn toggle_system(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response> {
    let ip = extract_ip(&headers, &addr);
    let outcome = state.mode.toggle(&caller);
    let detail = outcome.as_ref().ok().map(|m| format!("online={}", m.online));
    audit(
        &state,
        ACTION_SYSTEM_TOGGLE,
        Some(caller.id().to_owned()),
        ip,
        &outcome,
        detail,
    );

    Ok(Json(json!({"success": true, "data": outcome?})).into_response())
}

// ── Audit query ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub action: Option<String>,
    pub limit: Option<usize>,
}

pub async fn audit_events(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Response> {
    caller.require_admin()?;
    let query = AuditQuery {
        since: params.since,
        until: params.until,
        action: params.action,
        limit: params.limit.unwrap_or(100).clamp(1, 1000),
    };
    let events = state.store.list_audit(&query)?;
    Ok(Json(json!({"success": true, "count": events.len(), "data": events})).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins() {
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(extract_ip(&headers, &addr), "10.0.0.1");

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.9"));
        assert_eq!(extract_ip(&headers, &addr), "172.16.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(extract_ip(&headers, &addr), "203.0.113.7");
    }
}
