//! Authentication and identity handling.
//!
//! # Purpose
//! `basic` validates credentials and produces the authenticated
//! [`UserInfo`]; `identity` turns that into a persisted [`crate::model::User`]
//! and enforces authorization on the request path; `rbac` holds the
//! enforcer, its storage adapter, and the policy assets.
pub mod basic;
pub mod identity;
pub mod rbac;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity produced by the upstream authenticator.
///
/// The subject is a stable, opaque identifier; groups seed the user's
/// initial roles on first sight.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub subject: String,
    pub profile: String,
    pub email: String,
    pub groups: Vec<String>,
}
