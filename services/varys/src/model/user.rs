//! User records.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A principal known to the engine, identified by `(kind, id)`.
///
/// `site_counters` maps a service's canonical key to that user's rotation
/// counter for the service. Missing entries read as zero; incrementing one
/// rederives the user's credentials for that service without touching any
/// key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub kind: String,
    pub id: String,
    pub name: String,
    pub site_counters: HashMap<String, u32>,
}

impl User {
    /// Canonical key for the user, used as the policy subject.
    pub fn k(&self) -> String {
        format!("/_user/{}/{}", self.kind, self.id)
    }

    /// Current rotation counter for a service key.
    pub fn counter_for(&self, service_key: &str) -> u32 {
        self.site_counters.get(service_key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_shape() {
        let user = User {
            kind: "basic".to_string(),
            id: "u1".to_string(),
            name: "badadmin".to_string(),
            site_counters: HashMap::new(),
        };
        assert_eq!(user.k(), "/_user/basic/u1");
    }

    #[test]
    fn missing_counter_reads_zero() {
        let mut user = User {
            kind: "basic".to_string(),
            id: "u1".to_string(),
            name: "badadmin".to_string(),
            site_counters: HashMap::new(),
        };
        assert_eq!(user.counter_for("/_service/crdb/test"), 0);
        user.site_counters.insert("/_service/crdb/test".to_string(), 3);
        assert_eq!(user.counter_for("/_service/crdb/test"), 3);
    }
}
