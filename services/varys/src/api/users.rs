//! User handlers.
//!
//! # Purpose
//! User listing, the caller's own identity, and self-service credential
//! rotation (incrementing the caller's per-service counter).
use crate::api::error::{ApiError, api_internal, api_not_found};
use crate::api::types::{UpdateUserRequest, UserView};
use crate::app::AppState;
use crate::auth::UserInfo;
use crate::model::User;
use crate::store::StoreError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "List users", body = [UserView])
    )
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let users = state
        .kv
        .read(|txn| state.users.list(txn))
        .map_err(|err| api_internal("failed to list users", &err))?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/self",
    tag = "users",
    responses(
        (status = 200, description = "The caller's authenticated identity", body = UserInfo)
    )
)]
pub(crate) async fn get_current_user(
    Extension(info): Extension<UserInfo>,
) -> Json<UserInfo> {
    Json(info)
}

#[utoipa::path(
    put,
    path = "/api/v1/users/self",
    tag = "users",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated"),
        (status = 404, description = "Named service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_current_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(target) = body.rotate_service else {
        return Ok(StatusCode::OK);
    };

    state
        .kv
        .write(|txn| {
            let service = state.services.get(txn, &target.kind, &target.name)?;
            let mut row = state.users.get(txn, &user.kind, &user.id)?;
            *row.site_counters.entry(service.k()).or_insert(0) += 1;
            state.users.put(txn, &user.kind, &user.id, &row)
        })
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_not_found("service not found"),
            other => api_internal("failed to rotate service counter", &other),
        })?;

    Ok(StatusCode::OK)
}
