//! Service CRUD handlers.
//!
//! # Purpose
//! Create, read, update, and delete the services whose credentials the
//! engine derives. Creation generates the service key and applies the
//! rendered service policy; deletion removes the policy residue so a
//! recreated `(kind, name)` starts from a clean slate.
use crate::api::error::{
    ApiError, api_already_exists, api_internal, api_not_found, api_validation_error,
};
use crate::api::types::{CreateServiceRequest, ServiceView, UpdateServiceRequest};
use crate::api::{fetch_service, parse_template};
use crate::app::AppState;
use crate::auth::rbac::policy::{
    erase_service_policy, install_policy, parse_policy, render_service_policy, service_roles,
    uninstall_service_policy, write_policy,
};
use crate::model::{Service, ServiceTemplates, User};
use crate::store::StoreError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use rand::RngCore;
use rand::rngs::OsRng;
use varys_pass::TemplateClass;

#[utoipa::path(
    get,
    path = "/api/v1/services",
    tag = "services",
    responses(
        (status = 200, description = "List services", body = [ServiceView])
    )
)]
pub(crate) async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceView>>, ApiError> {
    let services = state
        .kv
        .read(|txn| state.services.list(txn))
        .map_err(|err| api_internal("failed to list services", &err))?;
    Ok(Json(services.iter().map(ServiceView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/services",
    tag = "services",
    request_body = CreateServiceRequest,
    responses(
        (status = 200, description = "Service created"),
        (status = 400, description = "Invalid input or service already exists", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_service(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<StatusCode, ApiError> {
    if body.kind.is_empty() || body.name.is_empty() || body.address.is_empty() {
        return Err(api_validation_error("kind, name, and address are required"));
    }

    let mut key = vec![0u8; 32];
    OsRng.fill_bytes(&mut key);

    let service = Service {
        kind: body.kind,
        name: body.name,
        address: body.address,
        key,
        templates: ServiceTemplates {
            user_template: parse_template(&body.templates.user_template)?
                .unwrap_or(TemplateClass::Basic),
            password_template: parse_template(&body.templates.password_template)?
                .unwrap_or(TemplateClass::Max),
        },
    };

    let rules = parse_policy(&render_service_policy(&service, &user))
        .map_err(|err| api_internal("failed to parse service policy", &err))?;

    // The existence check, the record write, and the service policy share
    // one transaction: either the service exists with its rules or nothing
    // was written. The enforcer lock is held across commit and model
    // update so other requests never observe the halfway point.
    let mut enforcer = state.enforcer.write().await;
    state
        .kv
        .write(|txn| {
            match state.services.get(txn, &service.kind, &service.name) {
                Ok(_) => return Err(StoreError::Conflict(service.k())),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            state
                .services
                .put(txn, &service.kind, &service.name, &service)?;
            write_policy(txn, &rules)
        })
        .map_err(|err| match err {
            StoreError::Conflict(_) => api_already_exists("service already exists"),
            other => api_internal("failed to create service", &other),
        })?;

    // The store is already consistent; this only brings the in-memory
    // model up to date with it.
    install_policy(&mut enforcer, &rules)
        .await
        .map_err(|err| api_internal("failed to install service policy", &err))?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/api/v1/services/{kind}/{name}",
    tag = "services",
    params(
        ("kind" = String, Path, description = "Service kind"),
        ("name" = String, Path, description = "Service name")
    ),
    responses(
        (status = 200, description = "Service metadata", body = ServiceView),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_service(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ServiceView>, ApiError> {
    let service = fetch_service(&state, &kind, &name)?;
    Ok(Json(ServiceView::from(&service)))
}

#[utoipa::path(
    put,
    path = "/api/v1/services/{kind}/{name}",
    tag = "services",
    request_body = UpdateServiceRequest,
    responses(
        (status = 200, description = "Service updated"),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_service(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<StatusCode, ApiError> {
    if kind.is_empty() || name.is_empty() {
        return Err(api_validation_error("kind and name are required"));
    }

    let user_template = parse_template(&body.templates.user_template)?;
    let password_template = parse_template(&body.templates.password_template)?;

    state
        .kv
        .write(|txn| {
            let mut service = state.services.get(txn, &kind, &name)?;

            if body.rotate_key {
                OsRng.fill_bytes(&mut service.key);
            }
            if !body.address.is_empty() {
                service.address = body.address.clone();
            }
            if let Some(template) = user_template {
                service.templates.user_template = template;
            }
            if let Some(template) = password_template {
                service.templates.password_template = template;
            }

            state.services.put(txn, &kind, &name, &service)
        })
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_not_found("service not found"),
            other => api_internal("failed to update service", &other),
        })?;

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/api/v1/services/{kind}/{name}",
    tag = "services",
    responses(
        (status = 200, description = "Service deleted"),
        (status = 404, description = "Service not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_service(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if kind.is_empty() || name.is_empty() {
        return Err(api_validation_error("kind and name are required"));
    }

    // The record delete and the policy purge share one transaction:
    // leaving rules behind would silently re-grant old users if the
    // (kind, name) pair is recreated, and a record-less half-purge would
    // orphan the rest forever. The enforcer lock is held across commit
    // and model update so other requests never observe the halfway point.
    let roles = service_roles(&kind, &name);
    let mut enforcer = state.enforcer.write().await;
    state
        .kv
        .write(|txn| {
            state.services.delete(txn, &kind, &name)?;
            erase_service_policy(txn, &roles)
        })
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_not_found("service not found"),
            other => api_internal("failed to delete service", &other),
        })?;

    // The store is already consistent; this only brings the in-memory
    // model up to date with it.
    uninstall_service_policy(&mut enforcer, &roles)
        .await
        .map_err(|err| api_internal("failed to remove service policy", &err))?;

    Ok(StatusCode::OK)
}
