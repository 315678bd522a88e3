//! Grant management handlers.
//!
//! # Purpose
//! Manage the role edges that authorize users on a service. Only roles of
//! the form `{permission}:{kind}:{name}` for the target service are
//! honoured; anything else in a request is silently dropped.
use crate::api::error::{ApiError, api_internal, api_validation_error};
use crate::api::types::{ListGrantsResponse, UserGrant, UserView};
use crate::api::{fetch_service, users_for_role};
use crate::app::AppState;
use crate::model::{Permission, Service, User};
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use casbin::RbacApi;
use std::collections::HashMap;

/// Roles a grant request may assign for this service.
fn assignable_roles(service: &Service) -> Vec<String> {
    Permission::ALL
        .iter()
        .map(|perm| format!("{perm}:{}:{}", service.kind, service.name))
        .collect()
}

/// Role pairs the grant listing inspects: for each role family, the
/// service-specific role and its kind-level roll-up parent.
fn listed_roles(service: &Service) -> Vec<[String; 2]> {
    let mut roles: Vec<[String; 2]> = Permission::ALL
        .iter()
        .map(|perm| {
            [
                format!("{perm}:{}:{}", service.kind, service.name),
                format!("{perm}:{}", service.kind),
            ]
        })
        .collect();

    // Management roles granted to the creator live under the varys
    // namespace and must show up in the listing as well.
    for perm in [Permission::Admin, Permission::Update, Permission::Delete] {
        roles.push([
            format!("{perm}:varys:services:{}:{}", service.kind, service.name),
            format!("{perm}:varys:services:{}", service.kind),
        ]);
    }
    roles
}

#[utoipa::path(
    get,
    path = "/api/v1/services/{kind}/{name}/grants",
    tag = "grants",
    responses(
        (status = 200, description = "Grants on the service", body = ListGrantsResponse),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_grants(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ListGrantsResponse>, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;

    let mut response = ListGrantsResponse {
        assignable_roles: assignable_roles(&service),
        grants: Vec::new(),
    };
    let mut user_slots: HashMap<String, usize> = HashMap::new();

    {
        let enforcer = state.enforcer.read().await;
        for roles in listed_roles(&service) {
            for role in roles {
                for user_key in users_for_role(&enforcer, &role) {
                    let slot = *user_slots.entry(user_key).or_insert_with(|| {
                        response.grants.push(UserGrant {
                            user: UserView {
                                kind: String::new(),
                                id: String::new(),
                                name: String::new(),
                            },
                            roles: Vec::new(),
                        });
                        response.grants.len() - 1
                    });
                    response.grants[slot].roles.push(role.clone());
                }
            }
        }
    }

    // Resolve user rows under one read transaction; prune grants whose
    // user has disappeared since the role lookup.
    let mut missing: Vec<usize> = Vec::new();
    state
        .kv
        .read(|txn| {
            for (user_key, slot) in &user_slots {
                let Some((user_kind, user_id)) = user_key.split_once('/') else {
                    missing.push(*slot);
                    continue;
                };
                match state.users.get(txn, user_kind, user_id) {
                    Ok(user) => response.grants[*slot].user = UserView::from(&user),
                    Err(StoreError::NotFound(_)) => missing.push(*slot),
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        })
        .map_err(|err| api_internal("failed to load users for grants", &err))?;

    missing.sort_unstable();
    for slot in missing.into_iter().rev() {
        response.grants.remove(slot);
    }

    Ok(Json(response))
}

#[utoipa::path(
    put,
    path = "/api/v1/services/{kind}/{name}/grants",
    tag = "grants",
    request_body = UserGrant,
    responses(
        (status = 200, description = "Roles granted"),
        (status = 400, description = "Empty role list or missing user", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn put_grant(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<UserGrant>,
) -> Result<StatusCode, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;
    let (user_key, roles) = validate_grant(&service, &body)?;

    state
        .enforcer
        .write()
        .await
        .add_roles_for_user(&user_key, roles, None)
        .await
        .map_err(|err| api_internal("failed to add roles for user", &err))?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/api/v1/services/{kind}/{name}/grants",
    tag = "grants",
    request_body = UserGrant,
    responses(
        (status = 200, description = "Roles revoked"),
        (status = 400, description = "Empty role list or missing user", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_grant(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<UserGrant>,
) -> Result<StatusCode, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;
    let (user_key, roles) = validate_grant(&service, &body)?;

    let mut enforcer = state.enforcer.write().await;
    for role in roles {
        enforcer
            .delete_role_for_user(&user_key, &role, None)
            .await
            .map_err(|err| api_internal("failed to delete role for user", &err))?;
    }

    Ok(StatusCode::OK)
}

/// Validate a grant request and keep only roles belonging to the service.
fn validate_grant(service: &Service, grant: &UserGrant) -> Result<(String, Vec<String>), ApiError> {
    if grant.user.kind.is_empty() || grant.user.id.is_empty() {
        return Err(api_validation_error("user kind and id are required"));
    }
    if grant.roles.is_empty() {
        return Err(api_validation_error("at least one role is required"));
    }

    let allowed = assignable_roles(service);
    let roles: Vec<String> = grant
        .roles
        .iter()
        .filter(|role| allowed.contains(role))
        .cloned()
        .collect();

    let user = User {
        kind: grant.user.kind.clone(),
        id: grant.user.id.clone(),
        name: grant.user.name.clone(),
        site_counters: HashMap::new(),
    };

    Ok((user.k(), roles))
}
