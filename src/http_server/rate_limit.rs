//! Rate limit middleware: a global rule for every request and a stricter
//! rule for the credential endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::errors::ErrorResponse;
use super::state::AppState;
use crate::auth::{RateLimitDecision, RateLimitRule};

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Client address, honoring `X-Forwarded-For` only behind a trusted proxy
pub fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = forwarded_for(request.headers()) {
            return forwarded;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn global_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let rule = state.rate_limits.global.clone();
    enforce(&state, &rule, request, next).await
}

pub async fn auth_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let rule = state.rate_limits.auth.clone();
    enforce(&state, &rule, request, next).await
}

async fn enforce(state: &AppState, rule: &RateLimitRule, request: Request, next: Next) -> Response {
    if !state.rate_limits.enabled {
        return next.run(request).await;
    }

    let client = client_key(&request, state.trust_proxy);
    let decision = state.limiter.check(&client, rule);

    if !decision.allowed {
        tracing::warn!(client = %client, rule = %rule.name, "rate limit exceeded");
        let body = ErrorResponse {
            error: format!("Rate limit exceeded, retry in {}s", decision.reset_after_secs()),
            code: "RATE_LIMITED",
            status: 429,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        set_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_after_secs()));
        return response;
    }

    let mut response = next.run(request).await;
    set_headers(response.headers_mut(), &decision);
    response
}

/// An inner limiter's headers are kept
fn set_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.entry(LIMIT).or_insert(HeaderValue::from(decision.limit));
    headers.entry(REMAINING).or_insert(HeaderValue::from(decision.remaining));
    headers.entry(RESET).or_insert(HeaderValue::from(decision.reset_after_secs()));
}
