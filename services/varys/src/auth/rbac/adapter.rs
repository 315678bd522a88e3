//! KV-backed Casbin policy adapter.
//!
//! # Purpose
//! Persists policy tuples in the shared store under
//! `varys/rules/{ptype}/{base32(sha256(tagged rule))}`. The key is a
//! content hash of the tagged tuple, so storing the same rule twice
//! deduplicates naturally and removal never needs a scan for exact rules.
//!
//! # Key invariants
//! - The tagged tuple `[ptype, fields...]` is the unit of hashing and the
//!   stored value; the hash input joins it with `+++`.
//! - `save_policy` is a misuse: auto-save is mandatory, rules are only
//!   ever written through the incremental adapter calls.
//! - A rule that fails to decode during load is logged and skipped; one
//!   corrupt row must not take authorization down with it.
use crate::store::{KvStore, StoreError, StoreResult, Txn};
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model, Result as CasbinResult};
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const RULE_PREFIX: &str = "varys/rules";

pub struct KvAdapter {
    kv: Arc<KvStore>,
}

impl KvAdapter {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Content-addressed storage key for a tagged rule.
    fn rule_key(ptype: &str, tagged: &[String]) -> String {
        let digest = Sha256::digest(tagged.join("+++").as_bytes());
        format!("{RULE_PREFIX}/{ptype}/{}", BASE32_NOPAD.encode(&digest))
    }

    fn tag(ptype: &str, rule: &[String]) -> Vec<String> {
        let mut tagged = Vec::with_capacity(rule.len() + 1);
        tagged.push(ptype.to_string());
        tagged.extend_from_slice(rule);
        tagged
    }

    /// Insert one rule through an already-open transaction, so callers can
    /// gate a whole batch of rules (and anything else written alongside
    /// them) on a single commit.
    pub(crate) fn write_rule_in(txn: &Txn<'_>, ptype: &str, fields: &[String]) -> StoreResult<()> {
        let tagged = Self::tag(ptype, fields);
        let value = bincode::serialize(&tagged).map_err(|err| {
            StoreError::Unexpected(anyhow::anyhow!("encode policy rule: {err}"))
        })?;
        txn.set(&Self::rule_key(ptype, &tagged), &value)
    }

    /// Filtered removal through an already-open transaction.
    ///
    /// A negative offset deletes all rules of the ptype. Otherwise the
    /// field values are placed at `offset` within the rule's field list and
    /// matched position-wise, empty slots acting as wildcards.
    pub(crate) fn remove_filtered_in(
        txn: &Txn<'_>,
        ptype: &str,
        offset: i64,
        field_values: &[String],
    ) -> StoreResult<bool> {
        let mut query = vec![String::new(); 7];
        query[0] = ptype.to_string();
        if offset >= 0 {
            for (i, value) in field_values.iter().enumerate() {
                query[offset as usize + i + 1] = value.clone();
            }
        }

        let mut removed = false;
        for (key, value) in txn.scan_prefix(&format!("{RULE_PREFIX}/{ptype}/"))? {
            if offset < 0 {
                removed |= txn.delete(&key)?;
                continue;
            }
            let tagged: Vec<String> = bincode::deserialize(&value).map_err(|err| {
                StoreError::Unexpected(anyhow::anyhow!("decode policy rule {key}: {err}"))
            })?;
            if query_matches(&query, &tagged) {
                removed |= txn.delete(&key)?;
            }
        }
        Ok(removed)
    }

    fn insert_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<()> {
        self.kv.write(|txn| {
            for rule in rules {
                Self::write_rule_in(txn, ptype, rule)?;
            }
            Ok(())
        })
    }

    fn delete_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<()> {
        self.kv.write(|txn| {
            for rule in rules {
                let tagged = Self::tag(ptype, rule);
                // Missing keys are fine; removal is idempotent.
                txn.delete(&Self::rule_key(ptype, &tagged))?;
            }
            Ok(())
        })
    }

    /// Delete every stored rule of `ptype` matching the query vector, in
    /// its own transaction.
    pub fn remove_filtered(
        &self,
        ptype: &str,
        offset: i64,
        field_values: &[String],
    ) -> StoreResult<bool> {
        self.kv
            .write(|txn| Self::remove_filtered_in(txn, ptype, offset, field_values))
    }
}

/// Position-wise wildcard match: empty query slots match anything; a
/// non-empty slot beyond the rule's arity matches nothing.
fn query_matches(query: &[String], rule: &[String]) -> bool {
    query.iter().enumerate().all(|(i, slot)| {
        slot.is_empty() || rule.get(i).is_some_and(|field| field == slot)
    })
}

fn adapter_err(err: StoreError) -> casbin::Error {
    AdapterError(Box::new(err)).into()
}

fn misuse(message: &'static str) -> casbin::Error {
    AdapterError(message.into()).into()
}

#[async_trait]
impl Adapter for KvAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> CasbinResult<()> {
        let rows = self
            .kv
            .read(|txn| txn.scan_prefix(&format!("{RULE_PREFIX}/")))
            .map_err(adapter_err)?;

        for (key, value) in rows {
            let tagged: Vec<String> = match bincode::deserialize(&value) {
                Ok(tagged) => tagged,
                Err(err) => {
                    tracing::warn!(%key, error = %err, "skipping undecodable policy rule");
                    continue;
                }
            };
            let Some((ptype, fields)) = tagged.split_first() else {
                tracing::warn!(%key, "skipping empty policy rule");
                continue;
            };
            let sec = ptype[..1].to_string();
            m.add_policy(&sec, ptype, fields.to_vec());
        }

        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        _m: &mut dyn Model,
        _f: Filter<'a>,
    ) -> CasbinResult<()> {
        Err(misuse("filtered policy loading is not supported"))
    }

    async fn save_policy(&mut self, _m: &mut dyn Model) -> CasbinResult<()> {
        Err(misuse("unsupported: must use auto-save"))
    }

    async fn clear_policy(&mut self) -> CasbinResult<()> {
        self.kv
            .write(|txn| {
                for (key, _) in txn.scan_prefix(&format!("{RULE_PREFIX}/"))? {
                    txn.delete(&key)?;
                }
                Ok(())
            })
            .map_err(adapter_err)
    }

    fn is_filtered(&self) -> bool {
        false
    }

    async fn add_policy(&mut self, _sec: &str, ptype: &str, rule: Vec<String>) -> CasbinResult<bool> {
        self.insert_rules(ptype, &[rule]).map_err(adapter_err)?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> CasbinResult<bool> {
        self.insert_rules(ptype, &rules).map_err(adapter_err)?;
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> CasbinResult<bool> {
        self.delete_rules(ptype, &[rule]).map_err(adapter_err)?;
        Ok(true)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> CasbinResult<bool> {
        self.delete_rules(ptype, &rules).map_err(adapter_err)?;
        Ok(true)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> CasbinResult<bool> {
        self.remove_filtered(ptype, field_index as i64, &field_values)
            .map_err(adapter_err)
    }
}
