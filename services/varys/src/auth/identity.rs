//! Per-request identity resolution and enforcement.
//!
//! # Purpose
//! After authentication, materialize the caller as a stored [`User`] (first
//! sight creates the row and seeds its roles), enforce the request path
//! against the caller's roles, and hand the user to the downstream handler
//! via request extensions.
//!
//! # Key invariants
//! - Upsert happens before the authorization decision: a brand-new user
//!   must hold their default roles before the first enforce.
//! - Role seeding precedes the row write; a crash between the two leaves a
//!   role edge without a row, which the next request heals, rather than a
//!   row without roles, which nothing would.
use crate::app::AppState;
use crate::auth::UserInfo;
use crate::model::User;
use crate::store::StoreError;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use casbin::{CoreApi, RbacApi};
use std::collections::HashMap;

const BASELINE_ROLE: &str = "read:varys";

pub async fn resolve(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(info) = request.extensions().get::<UserInfo>().cloned() else {
        tracing::error!("identity middleware ran without an authenticated user");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut user = User {
        kind: state.auth_kind.to_string(),
        id: info.subject.clone(),
        name: info.profile.clone(),
        site_counters: HashMap::new(),
    };

    let existing = match state.kv.read(|txn| {
        match state.users.get(txn, &user.kind, &user.id) {
            Ok(found) => Ok(Some(found)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }) {
        Ok(existing) => existing,
        Err(err) => {
            tracing::error!(error = ?err, "failed to look up user");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match existing {
        Some(found) => user = found,
        None => {
            let mut roles = vec![BASELINE_ROLE.to_string()];
            roles.extend(info.groups.iter().cloned());
            if let Err(err) = state
                .enforcer
                .write()
                .await
                .add_roles_for_user(&user.k(), roles, None)
                .await
            {
                tracing::error!(error = %err, "failed to add default roles for user");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }

            let write = state.kv.write(|txn| {
                match state.users.get(txn, &user.kind, &user.id) {
                    // Another request materialized the row first.
                    Ok(found) => Ok(Some(found)),
                    Err(StoreError::NotFound(_)) => {
                        state.users.put(txn, &user.kind, &user.id, &user)?;
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            });
            match write {
                Ok(Some(found)) => user = found,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(error = ?err, "failed to create user");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
    }

    let decision = state.enforcer.read().await.enforce((
        user.k(),
        request.uri().path().to_string(),
        request.method().as_str().to_string(),
    ));
    match decision {
        Ok(true) => {}
        Ok(false) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to enforce access");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}
