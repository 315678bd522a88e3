//! HTTP API module.
//!
//! # Purpose
//! Exposes the route handler modules plus the helpers they share: service
//! lookup with consistent error mapping, reverse role lookups filtered to
//! user subjects, and template-token validation.
pub mod credentials;
pub mod error;
pub mod grants;
pub mod openapi;
pub mod services;
pub mod types;
pub mod users;

use crate::api::error::{ApiError, api_internal, api_not_found, api_validation_error};
use crate::app::AppState;
use crate::model::Service;
use crate::store::StoreError;
use casbin::{Enforcer, RbacApi};
use varys_pass::TemplateClass;

/// Fetch a service by its path variables.
///
/// Empty variables are a 400, a missing record a 404, anything else a 500.
pub(crate) fn fetch_service(state: &AppState, kind: &str, name: &str) -> Result<Service, ApiError> {
    if kind.is_empty() || name.is_empty() {
        return Err(api_validation_error("kind and name are required"));
    }

    state
        .kv
        .read(|txn| state.services.get(txn, kind, name))
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_not_found("service not found"),
            other => api_internal("failed to get service", &other),
        })
}

/// Users holding a role, as `{kind}/{id}` keys.
///
/// The role graph also contains role-to-role edges; only `/_user/` members
/// are callers, so everything else is filtered out.
pub(crate) fn users_for_role(enforcer: &Enforcer, role: &str) -> Vec<String> {
    enforcer
        .get_users_for_role(role, None)
        .into_iter()
        .filter_map(|member| member.strip_prefix("/_user/").map(str::to_string))
        .collect()
}

/// Parse an optional template token; empty means "keep the default".
pub(crate) fn parse_template(token: &str) -> Result<Option<TemplateClass>, ApiError> {
    if token.is_empty() {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| api_validation_error(&format!("unknown template class: {token}")))
}
