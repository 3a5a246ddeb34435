//! MULTI/EXEC/DISCARD/WATCH/UNWATCH bookkeeping for a single connection.
//!
//! Queuing and fingerprint comparison live here; running the queued commands
//! back through the dispatcher is the connection loop's job.

use bytes::Bytes;

use crate::error::{RedisError, RedisResult};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct WatchedKey {
    pub db_index: usize,
    pub key: Bytes,
    pub fingerprint: Option<u64>,
}

#[derive(Default)]
pub struct TransactionState {
    in_multi: bool,
    queued: Vec<(Bytes, Vec<Bytes>)>,
    watched: Vec<WatchedKey>,
    dirty: bool,
}

impl TransactionState {
    pub fn in_multi(&self) -> bool {
        self.in_multi
    }

    pub fn multi(&mut self) -> RedisResult<()> {
        if self.in_multi {
            return Err(RedisError::NestedMulti);
        }
        self.in_multi = true;
        self.dirty = false;
        Ok(())
    }

    pub fn discard(&mut self) -> RedisResult<()> {
        if !self.in_multi {
            return Err(RedisError::DiscardWithoutMulti);
        }
        self.in_multi = false;
        self.queued.clear();
        self.watched.clear();
        self.dirty = false;
        Ok(())
    }

    pub fn queue(&mut self, name: Bytes, args: Vec<Bytes>) {
        self.queued.push((name, args));
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn watch(&mut self, store: &Store, db_index: usize, key: &[u8]) -> RedisResult<()> {
        if self.in_multi {
            return Err(RedisError::WatchInsideMulti);
        }
        let fingerprint = store.db(db_index)?.fingerprint(key);
        self.watched.push(WatchedKey { db_index, key: Bytes::copy_from_slice(key), fingerprint });
        Ok(())
    }

    pub fn unwatch(&mut self) {
        self.watched.clear();
    }

    /// Pulls the queued commands out for execution, clearing MULTI state.
    /// Returns `None` if any watched key's fingerprint has changed (the
    /// caller replies with a null array and must not run anything).
    pub fn exec(&mut self, store: &Store) -> RedisResult<Option<Vec<(Bytes, Vec<Bytes>)>>> {
        if !self.in_multi {
            return Err(RedisError::ExecWithoutMulti);
        }
        let aborted = self.dirty || self.watch_invalidated(store)?;
        let queued = std::mem::take(&mut self.queued);
        self.in_multi = false;
        self.watched.clear();
        self.dirty = false;
        if aborted {
            Ok(None)
        } else {
            Ok(Some(queued))
        }
    }

    fn watch_invalidated(&self, store: &Store) -> RedisResult<bool> {
        for w in &self.watched {
            let current = store.db(w.db_index)?.fingerprint(&w.key);
            if current != w.fingerprint {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn exec_without_multi_errs() {
        let store = Store::new(1);
        let mut tx = TransactionState::default();
        assert_eq!(tx.exec(&store), Err(RedisError::ExecWithoutMulti));
    }

    #[test]
    fn watched_key_modified_aborts_exec() {
        let store = Store::new(1);
        store.db(0).unwrap().set_value(b"k", Value::String(Bytes::from_static(b"v")), None);
        let mut tx = TransactionState::default();
        tx.watch(&store, 0, b"k").unwrap();
        tx.multi().unwrap();
        tx.queue(Bytes::from_static(b"GET"), vec![Bytes::from_static(b"k")]);
        store.db(0).unwrap().set_value(b"k", Value::String(Bytes::from_static(b"v2")), None);
        assert_eq!(tx.exec(&store).unwrap(), None);
    }

    #[test]
    fn untouched_watch_lets_exec_through() {
        let store = Store::new(1);
        store.db(0).unwrap().set_value(b"k", Value::String(Bytes::from_static(b"v")), None);
        let mut tx = TransactionState::default();
        tx.watch(&store, 0, b"k").unwrap();
        tx.multi().unwrap();
        tx.queue(Bytes::from_static(b"GET"), vec![Bytes::from_static(b"k")]);
        let queued = tx.exec(&store).unwrap();
        assert!(queued.is_some());
        assert_eq!(queued.unwrap().len(), 1);
    }

    #[test]
    fn nested_multi_rejected() {
        let mut tx = TransactionState::default();
        tx.multi().unwrap();
        assert_eq!(tx.multi(), Err(RedisError::NestedMulti));
    }
}
