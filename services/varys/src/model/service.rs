//! Service records.
//!
//! # Purpose
//! Defines the stored shape of a managed service. The `key` field is
//! 32 bytes of cryptographically random material generated at create time;
//! it never leaves the store and is one of the derivation inputs, so
//! rotating it invalidates every credential derived for the service.
use serde::{Deserialize, Serialize};
use varys_pass::TemplateClass;

/// Template classes used when deriving credentials for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplates {
    pub user_template: TemplateClass,
    pub password_template: TemplateClass,
}

/// Metadata for an external system whose credentials varys derives.
///
/// `(kind, name)` is unique; the canonical key doubles as the policy object
/// target-system rules are written against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub kind: String,
    pub name: String,
    pub address: String,
    pub key: Vec<u8>,
    pub templates: ServiceTemplates,
}

impl Service {
    /// Canonical key for the service, used in policy objects and counters.
    pub fn k(&self) -> String {
        format!("/_service/{}/{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_shape() {
        let service = Service {
            kind: "crdb".to_string(),
            name: "test".to_string(),
            address: "db:5432".to_string(),
            key: vec![0; 32],
            templates: ServiceTemplates {
                user_template: TemplateClass::Basic,
                password_template: TemplateClass::Max,
            },
        };
        assert_eq!(service.k(), "/_service/crdb/test");
    }
}
