//! Role-based authorization.
//!
//! # Purpose
//! Wires the embedded Casbin model, the KV-backed policy adapter, and the
//! policy assets together. The enforcer is shared across requests behind a
//! `tokio::sync::RwLock`; mutations (grants, service policies) take the
//! write half, decisions and reverse lookups the read half.
//!
//! # Key invariants
//! - `keyMatch2` keeps literal objects exact while letting the default
//!   policy cover parameterized API paths.
//! - `regexMatch` on actions gives containment semantics, so a policy
//!   action like `(GET)|(PUT)` matches either verb and a request action of
//!   `(read)|(write)` matches any policy granting one of them.
pub mod adapter;
pub mod policy;

use crate::store::KvStore;
use anyhow::Context;
use casbin::{CoreApi, DefaultModel, Enforcer};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Embedded Casbin model for varys authorization.
pub const MODEL_CONF: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && regexMatch(r.act, p.act)
"#;

pub type SharedEnforcer = Arc<RwLock<Enforcer>>;

/// Build the enforcer over the KV-backed adapter.
///
/// Loading happens inside `Enforcer::new`; auto-save keeps every mutation
/// persisted through the adapter in the same call, and role links are
/// rebuilt incrementally as grouping rules change.
pub async fn build_enforcer(kv: Arc<KvStore>) -> anyhow::Result<Enforcer> {
    let model = DefaultModel::from_str(MODEL_CONF)
        .await
        .context("parse authorization model")?;
    let adapter = adapter::KvAdapter::new(kv);

    let mut enforcer = Enforcer::new(model, adapter)
        .await
        .context("load authorization policy")?;
    enforcer.enable_auto_save(true);
    enforcer.enable_auto_build_role_links(true);

    Ok(enforcer)
}
