//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, layers the authentication and identity
//! middleware around the API routes, and defines the shared application
//! state injected into handlers.
//!
//! # Notes
//! Middleware runs outermost-first: request tracing, then basic
//! authentication, then identity resolution/enforcement. The OpenAPI
//! document sits outside the authenticated subtree.
use crate::api;
use crate::auth;
use crate::config::{BasicAuthConfig, VarysConfig};
use crate::model::{Service, User};
use crate::store::{Collection, KvStore};
use axum::Router;
use axum::middleware;
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<KvStore>,
    pub enforcer: auth::rbac::SharedEnforcer,
    pub services: Collection<Service>,
    pub users: Collection<User>,
    pub root_key: Arc<str>,
    pub auth_kind: Arc<str>,
    pub basic: Arc<BasicAuthConfig>,
}

impl AppState {
    pub fn new(
        config: &VarysConfig,
        kv: Arc<KvStore>,
        enforcer: auth::rbac::SharedEnforcer,
    ) -> Self {
        Self {
            kv,
            enforcer,
            services: Collection::new("varys/services"),
            users: Collection::new("varys/users"),
            root_key: config.credential.root_key.as_str().into(),
            auth_kind: config.auth.auth_type.as_str().into(),
            basic: Arc::new(config.auth.basic.clone()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/services",
            get(api::services::list_services).post(api::services::create_service),
        )
        .route(
            "/api/v1/services/:kind/:name",
            get(api::services::get_service)
                .put(api::services::update_service)
                .delete(api::services::delete_service),
        )
        .route(
            "/api/v1/services/:kind/:name/credentials",
            get(api::credentials::get_service_credentials),
        )
        .route(
            "/api/v1/services/:kind/:name/grants",
            get(api::grants::list_grants)
                .put(api::grants::put_grant)
                .delete(api::grants::delete_grant),
        )
        .route(
            "/api/v1/credentials/:kind/:name",
            get(api::credentials::list_credentials),
        )
        .route("/api/v1/users", get(api::users::list_users))
        .route(
            "/api/v1/users/self",
            get(api::users::get_current_user).put(api::users::update_current_user),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::identity::resolve,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::basic::authenticate,
        ));

    Router::new()
        .merge(api)
        .route("/api/v1/openapi.json", get(api::openapi::openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
