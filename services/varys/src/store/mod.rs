//! Embedded, encrypted key-value storage.
//!
//! # Purpose
//! Wraps redb with the transaction contract the rest of the engine relies
//! on: snapshot-isolated read/write transactions, prefix scans, and
//! transparent value encryption. Transactions are scoped through the
//! `read`/`write` closures (commit on `Ok`, discard on `Err`), so a
//! transaction can never leak past its scope, and collections take the
//! transaction as an explicit parameter so several operations can share
//! one commit.
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::anyhow;
use rand::RngCore;
use rand::rngs::OsRng;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

mod collection;

pub use collection::Collection;

// One table holds every record family; key prefixes partition it.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("write issued on a read-only transaction")]
    ReadOnly,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

/// AES-256-GCM sealing for values at rest.
///
/// The key is SHA-256 of the configured passphrase; each sealed value
/// carries its random 96-bit nonce as a prefix.
struct ValueCipher {
    cipher: Aes256Gcm,
}

impl ValueCipher {
    fn new(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    fn seal(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| StoreError::Unexpected(anyhow!("value encryption failed")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> StoreResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Unexpected(anyhow!("sealed value too short")));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Unexpected(anyhow!("value decryption failed")))
    }
}

/// Handle to the embedded store.
pub struct KvStore {
    db: Database,
    cipher: ValueCipher,
}

impl KvStore {
    /// Open (or create) the store file and initialize the records table.
    pub fn open(path: &Path, passphrase: &str) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Unexpected(err.into()))?;
            }
        }

        let db = Database::create(path)?;
        let init = db.begin_write()?;
        init.open_table(RECORDS)?;
        init.commit()?;

        Ok(Self {
            db,
            cipher: ValueCipher::new(passphrase),
        })
    }

    /// Run a closure inside a read transaction.
    pub fn read<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Txn<'_>) -> StoreResult<R>,
    {
        let txn = Txn {
            inner: TxnInner::Read(self.db.begin_read()?),
            cipher: &self.cipher,
        };
        f(&txn)
    }

    /// Run a closure inside a write transaction.
    ///
    /// The transaction commits when the closure returns `Ok` and is
    /// discarded on `Err`; there is no path on which it stays open.
    pub fn write<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Txn<'_>) -> StoreResult<R>,
    {
        let txn = Txn {
            inner: TxnInner::Write(self.db.begin_write()?),
            cipher: &self.cipher,
        };
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.discard();
                Err(err)
            }
        }
    }
}

enum TxnInner {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

/// A snapshot-isolated transaction. Reads inside a write transaction see
/// that transaction's own writes.
pub struct Txn<'store> {
    inner: TxnInner,
    cipher: &'store ValueCipher,
}

impl Txn<'_> {
    pub fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let sealed = match &self.inner {
            TxnInner::Read(txn) => {
                let table = txn.open_table(RECORDS)?;
                table.get(key)?.map(|guard| guard.value().to_vec())
            }
            TxnInner::Write(txn) => {
                let table = txn.open_table(RECORDS)?;
                table.get(key)?.map(|guard| guard.value().to_vec())
            }
        };

        sealed.map(|bytes| self.cipher.open(&bytes)).transpose()
    }

    pub fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let TxnInner::Write(txn) = &self.inner else {
            return Err(StoreError::ReadOnly);
        };
        let sealed = self.cipher.seal(value)?;
        let mut table = txn.open_table(RECORDS)?;
        table.insert(key, sealed.as_slice())?;
        Ok(())
    }

    /// Delete a key. Returns whether the key existed.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let TxnInner::Write(txn) = &self.inner else {
            return Err(StoreError::ReadOnly);
        };
        let mut table = txn.open_table(RECORDS)?;
        Ok(table.remove(key)?.is_some())
    }

    /// Collect every `(key, value)` under a prefix, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut rows = Vec::new();
        match &self.inner {
            TxnInner::Read(txn) => {
                let table = txn.open_table(RECORDS)?;
                for entry in table.range(prefix..)? {
                    let (key, value) = entry?;
                    if !key.value().starts_with(prefix) {
                        break;
                    }
                    rows.push((key.value().to_string(), value.value().to_vec()));
                }
            }
            TxnInner::Write(txn) => {
                let table = txn.open_table(RECORDS)?;
                for entry in table.range(prefix..)? {
                    let (key, value) = entry?;
                    if !key.value().starts_with(prefix) {
                        break;
                    }
                    rows.push((key.value().to_string(), value.value().to_vec()));
                }
            }
        }

        rows.into_iter()
            .map(|(key, sealed)| Ok((key, self.cipher.open(&sealed)?)))
            .collect()
    }

    fn commit(self) -> StoreResult<()> {
        match self.inner {
            TxnInner::Read(_) => Ok(()),
            TxnInner::Write(txn) => Ok(txn.commit()?),
        }
    }

    fn discard(self) {
        if let TxnInner::Write(txn) = self.inner {
            let _ = txn.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> KvStore {
        KvStore::open(&dir.path().join("db.varys"), "test-passphrase").expect("open store")
    }

    #[test]
    fn set_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .write(|txn| txn.set("varys/services/crdb/test", b"payload"))
            .expect("write");

        let value = store
            .read(|txn| txn.get("varys/services/crdb/test"))
            .expect("read");
        assert_eq!(value.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn failed_write_leaves_no_effect() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let result: StoreResult<()> = store.write(|txn| {
            txn.set("varys/services/crdb/test", b"payload")?;
            Err(StoreError::Conflict("forced".to_string()))
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let value = store
            .read(|txn| txn.get("varys/services/crdb/test"))
            .expect("read");
        assert!(value.is_none());
    }

    #[test]
    fn writes_are_visible_inside_their_own_transaction() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .write(|txn| {
                txn.set("k", b"v")?;
                assert_eq!(txn.get("k")?.as_deref(), Some(&b"v"[..]));
                Ok(())
            })
            .expect("write");
    }

    #[test]
    fn scan_is_prefix_scoped_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .write(|txn| {
                txn.set("varys/users/basic/b", b"2")?;
                txn.set("varys/users/basic/a", b"1")?;
                txn.set("varys/services/crdb/test", b"x")?;
                Ok(())
            })
            .expect("write");

        let rows = store
            .read(|txn| txn.scan_prefix("varys/users/"))
            .expect("scan");
        let keys: Vec<&str> = rows.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, ["varys/users/basic/a", "varys/users/basic/b"]);
    }

    #[test]
    fn read_transactions_reject_writes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let result = store.read(|txn| txn.set("k", b"v"));
        assert!(matches!(result, Err(StoreError::ReadOnly)));
    }

    #[test]
    fn delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.write(|txn| txn.set("k", b"v")).expect("write");
        assert!(store.write(|txn| txn.delete("k")).expect("delete"));
        assert!(!store.write(|txn| txn.delete("k")).expect("delete"));
    }

    #[test]
    fn values_are_opaque_without_the_passphrase() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.varys");

        {
            let store = KvStore::open(&path, "first-passphrase").expect("open");
            store.write(|txn| txn.set("k", b"secret")).expect("write");
        }

        let reopened = KvStore::open(&path, "second-passphrase").expect("open");
        let result = reopened.read(|txn| txn.get("k"));
        assert!(result.is_err());
    }
}
