//! OpenAPI schema aggregation.
//!
//! # Purpose
//! Collects the routes and wire types into one document served at
//! `/api/v1/openapi.json` for docs and client generation.
use crate::api::types::{
    CreateServiceRequest, Credentials, ErrorResponse, ListGrantsResponse, ServiceCredentials,
    ServiceRef, ServiceView, TemplatesSpec, TemplatesView, UpdateServiceRequest,
    UpdateUserRequest, UserCredential, UserGrant, UserView,
};
use crate::api::{credentials, grants, services, users};
use crate::auth::UserInfo;
use crate::model::Permission;
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "varys",
        version = "v1",
        description = "Derivation-based credentials engine HTTP API"
    ),
    paths(
        services::list_services,
        services::create_service,
        services::get_service,
        services::update_service,
        services::delete_service,
        credentials::get_service_credentials,
        credentials::list_credentials,
        grants::list_grants,
        grants::put_grant,
        grants::delete_grant,
        users::list_users,
        users::get_current_user,
        users::update_current_user
    ),
    components(schemas(
        ErrorResponse,
        TemplatesSpec,
        TemplatesView,
        CreateServiceRequest,
        UpdateServiceRequest,
        ServiceView,
        UserView,
        Credentials,
        ServiceCredentials,
        UserCredential,
        UserGrant,
        ListGrantsResponse,
        ServiceRef,
        UpdateUserRequest,
        UserInfo,
        Permission
    )),
    tags(
        (name = "services", description = "Service management"),
        (name = "credentials", description = "Credential derivation"),
        (name = "grants", description = "Grant management"),
        (name = "users", description = "User management")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
