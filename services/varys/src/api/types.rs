//! Wire types for the HTTP API.
//!
//! # Purpose
//! Request and response shapes, kept separate from the storage models so
//! secret fields (`Service.key`, `User.site_counters`) never appear on the
//! wire. Views convert from the models; requests carry raw template tokens
//! validated against the closed set at the handler edge.
use crate::model::{Permission, Service, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Template tokens as they appear on the wire; empty means "default".
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct TemplatesSpec {
    #[serde(default)]
    pub user_template: String,
    #[serde(default)]
    pub password_template: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct CreateServiceRequest {
    pub kind: String,
    pub name: String,
    pub address: String,
    #[serde(flatten)]
    pub templates: TemplatesSpec,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct UpdateServiceRequest {
    /// Rotate the key used to derive credentials for this service.
    #[serde(default)]
    pub rotate_key: bool,
    #[serde(default)]
    pub address: String,
    #[serde(flatten)]
    pub templates: TemplatesSpec,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TemplatesView {
    pub user_template: String,
    pub password_template: String,
}

/// A service as exposed on the wire; the derivation key stays private.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ServiceView {
    pub kind: String,
    pub name: String,
    pub address: String,
    pub templates: TemplatesView,
}

impl From<&Service> for ServiceView {
    fn from(service: &Service) -> Self {
        Self {
            kind: service.kind.clone(),
            name: service.name.clone(),
            address: service.address.clone(),
            templates: TemplatesView {
                user_template: service.templates.user_template.as_str().to_string(),
                password_template: service.templates.password_template.as_str().to_string(),
            },
        }
    }
}

/// A user as exposed on the wire; rotation counters stay private.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserView {
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            kind: user.kind.clone(),
            id: user.id.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ServiceCredentials {
    pub address: String,
    pub credentials: Credentials,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserCredential {
    pub permissions: Vec<Permission>,
    pub credentials: Credentials,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserGrant {
    pub user: UserView,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ListGrantsResponse {
    pub assignable_roles: Vec<String>,
    pub grants: Vec<UserGrant>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ServiceRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct UpdateUserRequest {
    /// Increment the caller's rotation counter for this service.
    #[serde(default)]
    pub rotate_service: Option<ServiceRef>,
}
