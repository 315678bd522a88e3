//! Credential derivation handlers.
//!
//! # Purpose
//! The hottest path in the engine: authorize the caller against the target
//! service and derive their credentials on the fly. Denials on the
//! per-user fetch are reported as 404 so the response does not reveal
//! whether the service exists or the caller merely lacks access.
use crate::api::error::{ApiError, api_internal, api_not_found};
use crate::api::types::{Credentials, ServiceCredentials, UserCredential};
use crate::api::{fetch_service, users_for_role};
use crate::app::AppState;
use crate::derive::derive_credentials;
use crate::model::{Permission, User};
use crate::store::StoreError;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use casbin::CoreApi;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListCredentialsQuery {
    #[serde(default)]
    permissions: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/services/{kind}/{name}/credentials",
    tag = "credentials",
    params(
        ("kind" = String, Path, description = "Service kind"),
        ("name" = String, Path, description = "Service name")
    ),
    responses(
        (status = 200, description = "Derived credentials for the caller", body = ServiceCredentials),
        (status = 404, description = "Service not found or caller not authorized", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_service_credentials(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ServiceCredentials>, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;

    // Any business permission on the service is enough to receive
    // credentials; the derived pair is the same either way.
    let pattern = business_permission_pattern();
    let allowed = state
        .enforcer
        .read()
        .await
        .enforce((user.k(), service.k(), pattern))
        .map_err(|err| api_internal("failed to enforce credentials access", &err))?;
    if !allowed {
        // 404, not 401: do not reveal existence vs. permission.
        return Err(api_not_found("service not found"));
    }

    let (username, password) = derive_credentials(&state.root_key, &service, &user);

    Ok(Json(ServiceCredentials {
        address: service.address.clone(),
        credentials: Credentials { username, password },
    }))
}

fn business_permission_pattern() -> String {
    let alternatives: Vec<String> = Permission::BUSINESS
        .iter()
        .map(|perm| format!("({perm})"))
        .collect();
    alternatives.join("|")
}

#[utoipa::path(
    get,
    path = "/api/v1/credentials/{kind}/{name}",
    tag = "credentials",
    params(
        ("kind" = String, Path, description = "Service kind"),
        ("name" = String, Path, description = "Service name"),
        ("permissions" = Option<String>, Query, description = "Comma-separated permission filter")
    ),
    responses(
        (status = 200, description = "Credentials for every user holding a matching permission", body = [UserCredential]),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_credentials(
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ListCredentialsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserCredential>>, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;

    // Default to every business permission; `system` is a connector
    // credential and never part of user-driven enumeration.
    let permissions: Vec<Permission> = match query.permissions.as_deref() {
        Some(param) if !param.is_empty() => param
            .split(',')
            .filter_map(|token| token.parse::<Permission>().ok())
            .filter(|perm| *perm != Permission::System)
            .collect(),
        _ => Permission::BUSINESS.to_vec(),
    };

    let mut credentials: Vec<UserCredential> = Vec::new();
    let mut user_slots: HashMap<String, usize> = HashMap::new();

    {
        let enforcer = state.enforcer.read().await;
        for perm in &permissions {
            // Users can hold the service-specific role or the kind-level
            // roll-up; both carry the permission.
            let roles = [
                format!("{perm}:{}:{}", service.kind, service.name),
                format!("{perm}:{}", service.kind),
            ];
            for role in roles {
                for user_key in users_for_role(&enforcer, &role) {
                    let slot = *user_slots.entry(user_key).or_insert_with(|| {
                        credentials.push(UserCredential {
                            permissions: Vec::new(),
                            credentials: Credentials {
                                username: String::new(),
                                password: String::new(),
                            },
                        });
                        credentials.len() - 1
                    });
                    if !credentials[slot].permissions.contains(perm) {
                        credentials[slot].permissions.push(*perm);
                    }
                }
            }
        }
    }

    // One read transaction covers every user fetch. A user whose record
    // vanished between the role lookup and here is silently skipped.
    let mut missing: Vec<usize> = Vec::new();
    state
        .kv
        .read(|txn| {
            for (user_key, slot) in &user_slots {
                let Some((user_kind, user_id)) = user_key.split_once('/') else {
                    missing.push(*slot);
                    continue;
                };
                let user: User = match state.users.get(txn, user_kind, user_id) {
                    Ok(user) => user,
                    Err(StoreError::NotFound(_)) => {
                        missing.push(*slot);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let (username, password) = derive_credentials(&state.root_key, &service, &user);
                credentials[*slot].credentials = Credentials { username, password };
            }
            Ok(())
        })
        .map_err(|err| api_internal("failed to load users for credentials", &err))?;

    missing.sort_unstable();
    for slot in missing.into_iter().rev() {
        credentials.remove(slot);
    }

    Ok(Json(credentials))
}
