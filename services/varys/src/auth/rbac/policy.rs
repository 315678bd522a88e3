//! Policy assets and loading.
//!
//! # Purpose
//! Embeds the default policy applied at startup and the per-service policy
//! template applied when a service is created, plus the machinery that
//! installs either. Installation is split in two halves: the storage half
//! writes every rule of a document through one caller-supplied transaction
//! (so a record written alongside them shares the same commit), and the
//! model half updates the in-memory enforcer afterwards with auto-save
//! suspended, since the rules are already persisted.
use crate::auth::rbac::adapter::KvAdapter;
use crate::model::{Permission, Service, User};
use crate::store::{KvStore, StoreResult, Txn};
use anyhow::{Context, bail};
use casbin::{CoreApi, Enforcer, MgmtApi};

/// Baseline rules applied on every startup.
///
/// Every authenticated principal holds `read:varys` (granted on first
/// sight); operators additionally hold `admin:varys`. Paths with `:kind`
/// and `:name` segments rely on the model's `keyMatch2` object matcher.
pub const DEFAULT_POLICY: &str = "
# - Baseline capabilities granted to every authenticated principal.
p, read:varys, /api/v1/services,                         GET
p, read:varys, /api/v1/services/:kind/:name,             GET
p, read:varys, /api/v1/services/:kind/:name/credentials, GET
p, read:varys, /api/v1/users/self,                       (GET)|(PUT)

# - Capabilities reserved for operators of varys itself.
p, admin:varys, /api/v1/services,                        POST
p, admin:varys, /api/v1/services/:kind/:name,            (PUT)|(DELETE)
p, admin:varys, /api/v1/services/:kind/:name/grants,     (GET)|(PUT)|(DELETE)
p, admin:varys, /api/v1/users,                           GET
p, admin:varys, /api/v1/credentials/:kind/:name,         GET

# - Operators inherit the baseline capabilities.
g, admin:varys, read:varys
";

const SERVICE_POLICY_TEMPLATE: &str = "
# - Roles that grant a user additional capabilities on the service being created.
p, system:{kind}:{name},                /api/v1/credentials/{kind}/{name},     GET
p, admin:varys:services:{kind}:{name},  /api/v1/services/{kind}/{name}/grants, (GET)|(PUT)|(DELETE)
p, update:varys:services:{kind}:{name}, /api/v1/services/{kind}/{name},        PUT
p, delete:varys:services:{kind}:{name}, /api/v1/services/{kind}/{name},        DELETE

# - Roles that enable a user to communicate with the target system.
p, read:{kind}:{name},   /_service/{kind}/{name}, read
p, write:{kind}:{name},  /_service/{kind}/{name}, write
p, update:{kind}:{name}, /_service/{kind}/{name}, update
p, delete:{kind}:{name}, /_service/{kind}/{name}, delete
p, admin:{kind}:{name},  /_service/{kind}/{name}, admin

# - Roll newly generated roles up into a parent role for system operators and administrators.
g, system:{kind},                system:{kind}:{name}
g, admin:varys:services:{kind},  admin:varys:services:{kind}:{name}
g, update:varys:services:{kind}, update:varys:services:{kind}:{name}
g, delete:varys:services:{kind}, delete:varys:services:{kind}:{name}
g, read:{kind},                  read:{kind}:{name}
g, write:{kind},                 write:{kind}:{name}
g, update:{kind},                update:{kind}:{name}
g, delete:{kind},                delete:{kind}:{name}
g, admin:{kind},                 admin:{kind}:{name}

# - Assign the creator of the service additional permissions on the service.
g, {creator}, admin:varys:services:{kind}:{name}
g, {creator}, update:varys:services:{kind}:{name}
g, {creator}, delete:varys:services:{kind}:{name}
";

/// Render the per-service policy for a newly created service.
pub fn render_service_policy(service: &Service, creator: &User) -> String {
    SERVICE_POLICY_TEMPLATE
        .replace("{kind}", &service.kind)
        .replace("{name}", &service.name)
        .replace("{creator}", &creator.k())
}

/// The roles a service policy introduces for `(kind, name)`.
///
/// Used to purge the policy residue when the service is deleted: p-rules
/// keyed by these subjects and g-edges keyed by these parents cover the
/// full rendered template plus any grants issued afterwards.
pub fn service_roles(kind: &str, name: &str) -> Vec<String> {
    let mut roles: Vec<String> = Permission::ALL
        .iter()
        .map(|perm| format!("{perm}:{kind}:{name}"))
        .collect();
    for perm in [Permission::Admin, Permission::Update, Permission::Delete] {
        roles.push(format!("{perm}:varys:services:{kind}:{name}"));
    }
    roles
}

/// One rule of a parsed policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub ptype: String,
    pub fields: Vec<String>,
}

/// Parse a policy document into its rules.
///
/// Lines are `ptype, field, field, ...`; `#` starts a comment.
pub fn parse_policy(policy: &str) -> anyhow::Result<Vec<ParsedRule>> {
    let mut rules = Vec::new();

    for line in policy.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split(',').map(str::trim);
        let Some(ptype) = fields.next().filter(|ptype| !ptype.is_empty()) else {
            continue;
        };
        if !matches!(&ptype[..1], "p" | "g") {
            bail!("unrecognized sec type: {}", &ptype[..1]);
        }

        let fields: Vec<String> = fields.map(str::to_string).collect();
        if fields.is_empty() || fields.iter().any(String::is_empty) {
            bail!("policy rule has missing fields: {line}");
        }

        rules.push(ParsedRule {
            ptype: ptype.to_string(),
            fields,
        });
    }

    Ok(rules)
}

/// Persist a parsed document's rules through the caller's transaction.
///
/// Nothing reaches the store until that transaction commits, so a record
/// written under the same transaction and the rules that authorize it
/// land (or vanish) together.
pub fn write_policy(txn: &Txn<'_>, rules: &[ParsedRule]) -> StoreResult<()> {
    for rule in rules {
        KvAdapter::write_rule_in(txn, &rule.ptype, &rule.fields)?;
    }
    Ok(())
}

/// Update the in-memory enforcer with rules that are already persisted.
///
/// Auto-save is suspended for the duration so the adapter is not asked to
/// write each rule a second time. Already-present rules are skipped by the
/// enforcer itself.
pub async fn install_policy(enforcer: &mut Enforcer, rules: &[ParsedRule]) -> anyhow::Result<()> {
    enforcer.enable_auto_save(false);
    let result = install(enforcer, rules).await;
    enforcer.enable_auto_save(true);
    result
}

async fn install(enforcer: &mut Enforcer, rules: &[ParsedRule]) -> anyhow::Result<()> {
    for rule in rules {
        match &rule.ptype[..1] {
            "p" => {
                enforcer
                    .add_named_policy(&rule.ptype, rule.fields.clone())
                    .await
                    .with_context(|| format!("install policy rule: {:?}", rule.fields))?;
            }
            "g" => {
                enforcer
                    .add_named_grouping_policy(&rule.ptype, rule.fields.clone())
                    .await
                    .with_context(|| format!("install grouping rule: {:?}", rule.fields))?;
            }
            other => bail!("unrecognized sec type: {other}"),
        }
    }
    Ok(())
}

/// Parse a policy document, persist it in one transaction, and install it
/// into the enforcer. Safe to repeat: rule keys are content hashes and the
/// enforcer skips rules it already holds.
pub async fn ensure_policy(
    kv: &KvStore,
    enforcer: &mut Enforcer,
    policy: &str,
) -> anyhow::Result<()> {
    let rules = parse_policy(policy)?;
    kv.write(|txn| write_policy(txn, &rules))
        .context("persist policy rules")?;
    install_policy(enforcer, &rules).await
}

/// Storage half of a service-policy purge: delete, through the caller's
/// transaction, every p-rule keyed by one of the service's roles and every
/// g-edge pointing at one.
pub fn erase_service_policy(txn: &Txn<'_>, roles: &[String]) -> StoreResult<()> {
    for role in roles {
        KvAdapter::remove_filtered_in(txn, "p", 0, std::slice::from_ref(role))?;
        KvAdapter::remove_filtered_in(txn, "g", 1, std::slice::from_ref(role))?;
    }
    Ok(())
}

/// Model half of a service-policy purge, for rules already erased from the
/// store. Auto-save is suspended so the adapter is not asked to delete
/// them again.
pub async fn uninstall_service_policy(
    enforcer: &mut Enforcer,
    roles: &[String],
) -> anyhow::Result<()> {
    enforcer.enable_auto_save(false);
    let result = uninstall(enforcer, roles).await;
    enforcer.enable_auto_save(true);
    result
}

async fn uninstall(enforcer: &mut Enforcer, roles: &[String]) -> anyhow::Result<()> {
    for role in roles {
        enforcer
            .remove_filtered_named_policy("p", 0, vec![role.clone()])
            .await
            .with_context(|| format!("remove policy rules for {role}"))?;
        enforcer
            .remove_filtered_named_grouping_policy("g", 1, vec![role.clone()])
            .await
            .with_context(|| format!("remove role edges for {role}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rbac::build_enforcer;
    use crate::model::ServiceTemplates;
    use crate::store::KvStore;
    use casbin::{CoreApi, RbacApi};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use varys_pass::TemplateClass;

    fn crdb_test() -> Service {
        Service {
            kind: "crdb".to_string(),
            name: "test".to_string(),
            address: "db:5432".to_string(),
            key: vec![0; 32],
            templates: ServiceTemplates {
                user_template: TemplateClass::Basic,
                password_template: TemplateClass::Max,
            },
        }
    }

    fn creator() -> User {
        User {
            kind: "basic".to_string(),
            id: "subject-1".to_string(),
            name: "badadmin".to_string(),
            site_counters: HashMap::new(),
        }
    }

    async fn enforcer_on(dir: &TempDir) -> (Arc<KvStore>, Enforcer) {
        let kv = Arc::new(KvStore::open(&dir.path().join("db.varys"), "k").expect("open"));
        let enforcer = build_enforcer(kv.clone()).await.expect("enforcer");
        (kv, enforcer)
    }

    #[test]
    fn rendered_policy_names_the_service_and_creator() {
        let rendered = render_service_policy(&crdb_test(), &creator());

        assert!(rendered.contains("p, system:crdb:test,                /api/v1/credentials/crdb/test,     GET"));
        assert!(rendered.contains("p, read:crdb:test,   /_service/crdb/test, read"));
        assert!(rendered.contains("g, read:crdb,                  read:crdb:test"));
        assert!(rendered.contains("g, /_user/basic/subject-1, admin:varys:services:crdb:test"));
        assert!(rendered.contains("g, /_user/basic/subject-1, update:varys:services:crdb:test"));
        assert!(rendered.contains("g, /_user/basic/subject-1, delete:varys:services:crdb:test"));
        assert!(!rendered.contains("{kind}"));
        assert!(!rendered.contains("{creator}"));
    }

    #[tokio::test]
    async fn ensure_policy_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
            .await
            .expect("first");
        let policies = enforcer.get_policy().len();
        let groupings = enforcer.get_grouping_policy().len();
        ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
            .await
            .expect("second");
        assert_eq!(enforcer.get_policy().len(), policies);
        assert_eq!(enforcer.get_grouping_policy().len(), groupings);
    }

    #[tokio::test]
    async fn role_rollup_grants_transitively() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        let policy = render_service_policy(&crdb_test(), &creator());
        ensure_policy(&kv, &mut enforcer, &policy)
            .await
            .expect("policy");
        enforcer
            .add_roles_for_user("alice", vec!["admin:crdb".to_string()], None)
            .await
            .expect("grant");

        // alice -> admin:crdb -> admin:crdb:test -> admin on the service.
        assert!(enforcer
            .enforce(("alice", "/_service/crdb/test", "admin"))
            .expect("enforce"));
        // No write rule reaches alice.
        assert!(!enforcer
            .enforce(("alice", "/_service/crdb/test", "write"))
            .expect("enforce"));
    }

    #[tokio::test]
    async fn action_matching_is_containment() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        let policy = render_service_policy(&crdb_test(), &creator());
        ensure_policy(&kv, &mut enforcer, &policy)
            .await
            .expect("policy");
        enforcer
            .add_roles_for_user("bob", vec!["read:crdb:test".to_string()], None)
            .await
            .expect("grant");

        // The credentials fetch asks with a disjunction of every business
        // permission; holding any one of them is enough.
        let pattern = "(read)|(write)|(update)|(delete)|(admin)";
        assert!(enforcer
            .enforce(("bob", "/_service/crdb/test", pattern))
            .expect("enforce"));
        assert!(!enforcer
            .enforce(("carol", "/_service/crdb/test", pattern))
            .expect("enforce"));
    }

    #[tokio::test]
    async fn default_policy_covers_parameterized_paths() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
            .await
            .expect("policy");
        enforcer
            .add_roles_for_user("bob", vec!["read:varys".to_string()], None)
            .await
            .expect("grant");

        assert!(enforcer
            .enforce(("bob", "/api/v1/services/crdb/test/credentials", "GET"))
            .expect("enforce"));
        assert!(enforcer
            .enforce(("bob", "/api/v1/users/self", "PUT"))
            .expect("enforce"));
        // Grants administration stays closed to baseline users.
        assert!(!enforcer
            .enforce(("bob", "/api/v1/services/crdb/test/grants", "GET"))
            .expect("enforce"));
        assert!(!enforcer
            .enforce(("bob", "/api/v1/services", "POST"))
            .expect("enforce"));
    }

    #[tokio::test]
    async fn operators_inherit_the_baseline() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
            .await
            .expect("policy");
        enforcer
            .add_roles_for_user("root", vec!["admin:varys".to_string()], None)
            .await
            .expect("grant");

        assert!(enforcer
            .enforce(("root", "/api/v1/services", "POST"))
            .expect("enforce"));
        assert!(enforcer
            .enforce(("root", "/api/v1/services", "GET"))
            .expect("enforce"));
    }

    #[test]
    fn service_roles_cover_the_template() {
        let roles = service_roles("crdb", "test");
        assert!(roles.contains(&"read:crdb:test".to_string()));
        assert!(roles.contains(&"system:crdb:test".to_string()));
        assert!(roles.contains(&"admin:varys:services:crdb:test".to_string()));
        assert_eq!(roles.len(), 9);
    }

    #[test]
    fn parse_policy_reads_rules_and_skips_comments() {
        let rules = parse_policy(DEFAULT_POLICY).expect("parse");
        assert!(rules.iter().any(|rule| {
            rule.ptype == "p" && rule.fields == ["read:varys", "/api/v1/services", "GET"]
        }));
        assert!(rules
            .iter()
            .any(|rule| rule.ptype == "g" && rule.fields == ["admin:varys", "read:varys"]));
        assert!(rules.iter().all(|rule| !rule.fields.is_empty()));

        assert!(parse_policy("x, sub, obj, act").is_err());
        assert!(parse_policy("p,").is_err());
    }

    #[tokio::test]
    async fn policy_rules_share_their_transaction_with_the_caller() {
        let dir = TempDir::new().unwrap();
        let (kv, _enforcer) = enforcer_on(&dir).await;

        let rules = parse_policy(&render_service_policy(&crdb_test(), &creator())).expect("parse");

        // A failure after the rules are staged discards all of them.
        let result: crate::store::StoreResult<()> = kv.write(|txn| {
            write_policy(txn, &rules)?;
            Err(crate::store::StoreError::Conflict("forced".to_string()))
        });
        assert!(result.is_err());
        let stored = kv
            .read(|txn| txn.scan_prefix("varys/rules/"))
            .expect("scan");
        assert!(stored.is_empty());

        // A committed transaction lands every rule at once, and a fresh
        // enforcer picks them up from the store.
        kv.write(|txn| write_policy(txn, &rules)).expect("write");
        let reloaded = build_enforcer(kv.clone()).await.expect("reload");
        assert!(reloaded
            .enforce(("/_user/basic/subject-1", "/api/v1/services/crdb/test", "PUT"))
            .expect("enforce"));
    }

    #[tokio::test]
    async fn erase_and_uninstall_remove_the_service_policy() {
        let dir = TempDir::new().unwrap();
        let (kv, mut enforcer) = enforcer_on(&dir).await;

        let policy = render_service_policy(&crdb_test(), &creator());
        ensure_policy(&kv, &mut enforcer, &policy)
            .await
            .expect("policy");
        enforcer
            .add_roles_for_user("bob", vec!["read:crdb:test".to_string()], None)
            .await
            .expect("grant");
        assert!(enforcer
            .enforce(("bob", "/_service/crdb/test", "read"))
            .expect("enforce"));

        let roles = service_roles("crdb", "test");
        kv.write(|txn| erase_service_policy(txn, &roles))
            .expect("erase");
        uninstall_service_policy(&mut enforcer, &roles)
            .await
            .expect("uninstall");

        assert!(!enforcer
            .enforce(("bob", "/_service/crdb/test", "read"))
            .expect("enforce"));
        let stored = kv
            .read(|txn| txn.scan_prefix("varys/rules/"))
            .expect("scan");
        assert!(stored.is_empty());
    }
}
