//! The keyspace: a set of numbered databases, each a concurrent map from key
//! to a typed, optionally-expiring value.
//!
//! Each entry carries a `version` counter bumped on every mutation — this is
//! the fingerprint `WATCH` snapshots and compares against at `EXEC` time.

pub mod bitops;
pub mod hashes;
pub mod lists;
pub mod sets;
pub mod sortedset;
pub mod strings;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RedisError, RedisResult};
use crate::value::Value;

pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expire_at_ms: Option<i64>,
    pub version: u64,
}

impl Entry {
    fn fresh(value: Value) -> Self {
        Entry { value, expire_at_ms: None, version: 0 }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expire_at_ms, Some(at) if at <= now)
    }
}

/// A single numbered database (what `SELECT` switches between).
pub struct Database {
    map: DashMap<Bytes, Entry>,
    version_seq: AtomicU64,
}

impl Default for Database {
    fn default() -> Self {
        Database { map: DashMap::new(), version_seq: AtomicU64::new(1) }
    }
}

/// Snapshot of a key's existence + version, taken by `WATCH` and compared at
/// `EXEC` time. A key that didn't exist when watched has fingerprint `None`;
/// any later write (including creation) changes it.
pub type Fingerprint = Option<u64>;

impl Database {
    fn next_version(&self) -> u64 {
        self.version_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn fingerprint(&self, key: &[u8]) -> Fingerprint {
        self.purge_if_expired(key);
        self.map.get(key).map(|e| e.version)
    }

    fn purge_if_expired(&self, key: &[u8]) {
        let now = now_ms();
        let expired = self.map.get(key).map(|e| e.is_expired(now)).unwrap_or(false);
        if expired {
            self.map.remove(key);
        }
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        self.map.contains_key(key)
    }

    pub fn type_name(&self, key: &[u8]) -> Option<&'static str> {
        self.purge_if_expired(key);
        self.map.get(key).map(|e| e.value.type_name())
    }

    pub fn del(&self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        self.map.remove(key).is_some()
    }

    pub fn rename(&self, src: &[u8], dst: &[u8]) -> RedisResult<()> {
        self.purge_if_expired(src);
        let (_, mut entry) = self.map.remove(src).ok_or(RedisError::NoSuchKey)?;
        entry.version = self.next_version();
        self.map.insert(Bytes::copy_from_slice(dst), entry);
        Ok(())
    }

    pub fn rename_nx(&self, src: &[u8], dst: &[u8]) -> RedisResult<bool> {
        self.purge_if_expired(src);
        self.purge_if_expired(dst);
        if !self.map.contains_key(src) {
            return Err(RedisError::NoSuchKey);
        }
        if self.map.contains_key(dst) {
            return Ok(false);
        }
        self.rename(src, dst)?;
        Ok(true)
    }

    pub fn copy(&self, src: &[u8], dst: &[u8], replace: bool) -> bool {
        self.purge_if_expired(src);
        self.purge_if_expired(dst);
        if !replace && self.map.contains_key(dst) {
            return false;
        }
        let Some(entry) = self.map.get(src).map(|e| e.value.clone()) else { return false };
        let expire_at = self.map.get(src).and_then(|e| e.expire_at_ms);
        let mut new_entry = Entry::fresh(entry);
        new_entry.expire_at_ms = expire_at;
        new_entry.version = self.next_version();
        self.map.insert(Bytes::copy_from_slice(dst), new_entry);
        true
    }

    pub fn ttl_ms(&self, key: &[u8]) -> Option<Option<i64>> {
        self.purge_if_expired(key);
        self.map.get(key).map(|e| e.expire_at_ms.map(|at| at - now_ms()))
    }

    pub fn set_expire_at(&self, key: &[u8], at_ms: Option<i64>) -> bool {
        self.purge_if_expired(key);
        if let Some(mut e) = self.map.get_mut(key) {
            e.expire_at_ms = at_ms;
            e.version += 1;
            true
        } else {
            false
        }
    }

    pub fn persist(&self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        if let Some(mut e) = self.map.get_mut(key) {
            if e.expire_at_ms.take().is_some() {
                e.version += 1;
                return true;
            }
        }
        false
    }

    pub fn keys_matching(&self, pattern: &[u8]) -> Vec<Bytes> {
        let now = now_ms();
        self.map
            .iter()
            .filter(|kv| !kv.value().is_expired(now))
            .map(|kv| kv.key().clone())
            .filter(|k| crate::glob::glob_match(pattern, k))
            .collect()
    }

    pub fn random_key(&self) -> Option<Bytes> {
        let now = now_ms();
        let candidates: Vec<Bytes> =
            self.map.iter().filter(|kv| !kv.value().is_expired(now)).map(|kv| kv.key().clone()).collect();
        if candidates.is_empty() {
            return None;
        }
        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    /// Runs `f` against the value at `key`, requiring the key to already
    /// exist and hold `Value::String` et al. via `extract`.
    pub fn with_value<T>(&self, key: &[u8], f: impl FnOnce(&Value) -> RedisResult<T>) -> RedisResult<T> {
        self.purge_if_expired(key);
        match self.map.get(key) {
            Some(e) => f(&e.value),
            None => Err(RedisError::NoSuchKey),
        }
    }

    pub fn get_opt(&self, key: &[u8]) -> Option<Value> {
        self.purge_if_expired(key);
        self.map.get(key).map(|e| e.value.clone())
    }

    /// Mutates the value at `key`, creating it via `default` if absent.
    /// `f` returns `Ok(Some(T))` to keep the (possibly emptied) key, or
    /// `Ok(None)` to signal the value is now empty and should be deleted.
    ///
    /// A freshly-inserted default is rolled back if `f` fails, so a rejected
    /// write on a brand-new key leaves no trace of it behind.
    pub fn mutate_or_insert<T>(
        &self,
        key: &[u8],
        default: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> RedisResult<T>,
    ) -> RedisResult<T> {
        self.purge_if_expired(key);
        let existed = self.map.contains_key(key);
        let mut entry = self.map.entry(Bytes::copy_from_slice(key)).or_insert_with(|| Entry::fresh(default()));
        match f(&mut entry.value) {
            Ok(result) => {
                entry.version += 1;
                Ok(result)
            }
            Err(e) => {
                if !existed {
                    drop(entry);
                    self.map.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Mutates the value at `key` only if it already exists.
    pub fn mutate_existing<T>(&self, key: &[u8], f: impl FnOnce(&mut Value) -> RedisResult<T>) -> RedisResult<T> {
        self.purge_if_expired(key);
        let mut entry = self.map.get_mut(key).ok_or(RedisError::NoSuchKey)?;
        let result = f(&mut entry.value)?;
        entry.version += 1;
        Ok(result)
    }

    pub fn set_value(&self, key: &[u8], value: Value, expire_at_ms: Option<i64>) {
        let version = self.map.get(key).map(|e| e.version + 1).unwrap_or_else(|| self.next_version());
        self.map.insert(Bytes::copy_from_slice(key), Entry { value, expire_at_ms, version });
    }

    /// Sets a value only if absent (`SETNX`-style). Returns `false` without
    /// mutating if the key already exists.
    pub fn set_value_nx(&self, key: &[u8], value: Value, expire_at_ms: Option<i64>) -> bool {
        self.purge_if_expired(key);
        use dashmap::mapref::entry::Entry as DEntry;
        match self.map.entry(Bytes::copy_from_slice(key)) {
            DEntry::Occupied(_) => false,
            DEntry::Vacant(v) => {
                let version = self.next_version();
                v.insert(Entry { value, expire_at_ms, version });
                true
            }
        }
    }

    pub fn delete_if_empty_collection(&self, key: &[u8]) {
        let empty = self.map.get(key).map(|e| match &e.value {
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
            Value::Stream(s) => s.is_empty(),
            _ => false,
        });
        if empty == Some(true) {
            self.map.remove(key);
        }
    }
}

/// The full keyspace: one `Database` per numbered index (`SELECT 0..N`).
pub struct Store {
    dbs: Vec<Database>,
}

impl Store {
    pub fn new(num_dbs: usize) -> Self {
        let mut dbs = Vec::with_capacity(num_dbs.max(1));
        for _ in 0..num_dbs.max(1) {
            dbs.push(Database::default());
        }
        Store { dbs }
    }

    pub fn num_dbs(&self) -> usize {
        self.dbs.len()
    }

    pub fn db(&self, index: usize) -> RedisResult<&Database> {
        self.dbs.get(index).ok_or(RedisError::BadDbIndex)
    }

    pub fn flush_all(&self) {
        for db in &self.dbs {
            db.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_key_reads_as_absent() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"v")), Some(now_ms() - 1));
        assert!(!db.exists(b"k"));
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn fingerprint_changes_on_write() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"v")), None);
        let fp1 = db.fingerprint(b"k");
        db.set_value(b"k", Value::String(Bytes::from_static(b"v2")), None);
        let fp2 = db.fingerprint(b"k");
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn rename_moves_value_and_bumps_version() {
        let db = Database::default();
        db.set_value(b"a", Value::String(Bytes::from_static(b"1")), None);
        db.rename(b"a", b"b").unwrap();
        assert!(!db.exists(b"a"));
        assert!(db.exists(b"b"));
    }

    #[test]
    fn mutate_or_insert_rolls_back_default_on_failure() {
        let db = Database::default();
        let result: RedisResult<()> = db.mutate_or_insert(
            b"fresh",
            || Value::List(Default::default()),
            |_| Err(RedisError::WrongType),
        );
        assert!(result.is_err());
        assert!(!db.exists(b"fresh"));
    }

    #[test]
    fn mutate_or_insert_keeps_existing_value_on_failure() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"v")), None);
        let result: RedisResult<()> =
            db.mutate_or_insert(b"k", || Value::List(Default::default()), |_| Err(RedisError::WrongType));
        assert!(result.is_err());
        assert!(db.exists(b"k"));
    }
}
