//! Helpers shared by the router tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use serde_json::Value;

use super::state::AppState;
use crate::auth::{AuthError, AuthResult, OAuthProviderConfig, OAuthTokenResponse, OAuthTransport};
use crate::config::AppConfig;
use crate::directory::User;

/// Provider stand-in: accepts the code `good-code` and returns `profile`
pub struct CannedTransport {
    pub profile: Value,
}

#[async_trait]
impl OAuthTransport for CannedTransport {
    async fn exchange_code(
        &self,
        _config: &OAuthProviderConfig,
        code: &str,
        _code_verifier: &str,
    ) -> AuthResult<OAuthTokenResponse> {
        if code != "good-code" {
            return Err(AuthError::OAuthError("invalid_grant".to_string()));
        }
        Ok(OAuthTokenResponse {
            access_token: "access".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: None,
            id_token: None,
        })
    }

    async fn fetch_userinfo(&self, _config: &OAuthProviderConfig, _access_token: &str) -> AuthResult<Value> {
        Ok(self.profile.clone())
    }
}

pub fn state(config: &AppConfig) -> AppState {
    state_with_profile(config, serde_json::json!({}))
}

pub fn state_with_profile(config: &AppConfig, profile: Value) -> AppState {
    AppState::with_transport(config, Arc::new(CannedTransport { profile }))
}

/// Stored user plus a live session token
pub fn user_with_session(state: &AppState, email: &str) -> (User, String) {
    let user = User::new(email, email.split('@').next().unwrap_or("user"), None);
    state.directory.users().create(&user).unwrap();
    let signed_in = state.auth.start_session(user).unwrap();
    (signed_in.user, signed_in.token)
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
