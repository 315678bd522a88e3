//! HTTP basic authentication.
//!
//! # Purpose
//! Validates `Authorization: Basic` headers against the configured static
//! users and attaches the resulting [`UserInfo`] to the request. The
//! subject is the hex SHA-256 of the username, so user records stay stable
//! without persisting raw usernames as keys.
use crate::app::AppState;
use crate::auth::UserInfo;
use crate::config::BasicAuthConfig;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Stable subject identifier for a username.
pub fn subject_id(username: &str) -> String {
    hex::encode(Sha256::digest(username.as_bytes()))
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(info) = verify(&state.basic, request.headers()) else {
        return (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Basic realm=\"varys\"")],
        )
            .into_response();
    };

    request.extensions_mut().insert(info);
    next.run(request).await
}

fn verify(config: &BasicAuthConfig, headers: &HeaderMap) -> Option<UserInfo> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    let entry = config
        .users
        .iter()
        .find(|user| user.username == username && user.password == password)?;

    Some(UserInfo {
        subject: subject_id(username),
        profile: username.to_string(),
        email: username.to_string(),
        groups: entry.groups.clone(),
    })
}
