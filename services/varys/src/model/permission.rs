//! Permission vocabulary.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// A base permission applied to a managed service.
///
/// Together with service identifiers these form role names such as
/// `read:crdb:test`. `System` is special: it is what trusted connectors use
/// to enumerate every credential for a service, and it is excluded from
/// user-driven credential listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Update,
    Delete,
    Admin,
    System,
}

impl Permission {
    /// Every permission, in role-rendering order.
    pub const ALL: [Permission; 6] = [
        Permission::Read,
        Permission::Write,
        Permission::Update,
        Permission::Delete,
        Permission::Admin,
        Permission::System,
    ];

    /// The permissions a user can hold directly on a target system.
    pub const BUSINESS: [Permission; 5] = [
        Permission::Read,
        Permission::Write,
        Permission::Update,
        Permission::Delete,
        Permission::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Update => "update",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
            Permission::System => "system",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|perm| perm.as_str() == value)
            .ok_or(())
    }
}
