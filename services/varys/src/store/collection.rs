//! Typed record collections.
//!
//! # Purpose
//! A `Collection<T>` is a CRUD façade over one record family, scoping keys
//! to `{prefix}/{kind}/{name}` and encoding values with the store codec.
//! Operations take the transaction explicitly, so a handler can run several
//! of them under one commit.
use super::{StoreError, StoreResult, Txn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy)]
pub struct Collection<T> {
    prefix: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            _record: PhantomData,
        }
    }

    fn key(&self, kind: &str, name: &str) -> String {
        format!("{}/{}/{}", self.prefix, kind, name)
    }

    /// Decode every record under the collection prefix.
    pub fn list(&self, txn: &Txn<'_>) -> StoreResult<Vec<T>> {
        let rows = txn.scan_prefix(&format!("{}/", self.prefix))?;
        rows.into_iter()
            .map(|(key, value)| {
                bincode::deserialize(&value).map_err(|err| {
                    StoreError::Unexpected(anyhow::anyhow!("decode {key}: {err}"))
                })
            })
            .collect()
    }

    pub fn get(&self, txn: &Txn<'_>, kind: &str, name: &str) -> StoreResult<T> {
        let key = self.key(kind, name);
        let value = txn.get(&key)?.ok_or(StoreError::NotFound(key.clone()))?;
        bincode::deserialize(&value)
            .map_err(|err| StoreError::Unexpected(anyhow::anyhow!("decode {key}: {err}")))
    }

    pub fn put(&self, txn: &Txn<'_>, kind: &str, name: &str, record: &T) -> StoreResult<()> {
        let value = bincode::serialize(record)
            .map_err(|err| StoreError::Unexpected(anyhow::anyhow!("encode record: {err}")))?;
        txn.set(&self.key(kind, name), &value)
    }

    pub fn delete(&self, txn: &Txn<'_>, kind: &str, name: &str) -> StoreResult<()> {
        let key = self.key(kind, name);
        if txn.delete(&key)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Service, ServiceTemplates, User};
    use crate::store::KvStore;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use varys_pass::TemplateClass;

    const SERVICES: Collection<Service> = Collection::new("varys/services");
    const USERS: Collection<User> = Collection::new("varys/users");

    fn sample_service(name: &str) -> Service {
        Service {
            kind: "crdb".to_string(),
            name: name.to_string(),
            address: "db:5432".to_string(),
            key: (0..32).collect(),
            templates: ServiceTemplates {
                user_template: TemplateClass::Basic,
                password_template: TemplateClass::Max,
            },
        }
    }

    #[test]
    fn service_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("db.varys"), "k").expect("open");
        let service = sample_service("test");

        store
            .write(|txn| SERVICES.put(txn, "crdb", "test", &service))
            .expect("put");
        let loaded = store
            .read(|txn| SERVICES.get(txn, "crdb", "test"))
            .expect("get");
        assert_eq!(loaded, service);
    }

    #[test]
    fn user_round_trip_keeps_counters() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("db.varys"), "k").expect("open");

        let mut counters = HashMap::new();
        counters.insert("/_service/crdb/test".to_string(), 7u32);
        let user = User {
            kind: "basic".to_string(),
            id: "u1".to_string(),
            name: "badadmin".to_string(),
            site_counters: counters,
        };

        store
            .write(|txn| USERS.put(txn, "basic", "u1", &user))
            .expect("put");
        let loaded = store
            .read(|txn| USERS.get(txn, "basic", "u1"))
            .expect("get");
        assert_eq!(loaded, user);
        assert_eq!(loaded.counter_for("/_service/crdb/test"), 7);
    }

    #[test]
    fn list_returns_all_records_in_the_family() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("db.varys"), "k").expect("open");

        store
            .write(|txn| {
                SERVICES.put(txn, "crdb", "one", &sample_service("one"))?;
                SERVICES.put(txn, "crdb", "two", &sample_service("two"))?;
                USERS.put(
                    txn,
                    "basic",
                    "u1",
                    &User {
                        kind: "basic".to_string(),
                        id: "u1".to_string(),
                        name: "badadmin".to_string(),
                        site_counters: HashMap::new(),
                    },
                )
            })
            .expect("seed");

        let services = store.read(|txn| SERVICES.list(txn)).expect("list");
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("db.varys"), "k").expect("open");

        let result = store.read(|txn| SERVICES.get(txn, "crdb", "missing"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("db.varys"), "k").expect("open");

        let result = store.write(|txn| SERVICES.delete(txn, "crdb", "missing"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
