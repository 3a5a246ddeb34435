//! List commands: LPUSH/RPUSH/LRANGE and friends.

use bytes::Bytes;
use std::collections::VecDeque;

use super::Database;
use crate::error::{RedisError, RedisResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

pub fn push(db: &Database, key: &[u8], side: Side, values: &[Bytes], only_if_exists: bool) -> RedisResult<Option<usize>> {
    if only_if_exists && !db.exists(key) {
        return Ok(None);
    }
    let len = db.mutate_or_insert(
        key,
        || Value::List(VecDeque::new()),
        |v| {
            let l = match v {
                Value::List(l) => l,
                _ => return Err(RedisError::WrongType),
            };
            for val in values {
                match side {
                    Side::Left => l.push_front(val.clone()),
                    Side::Right => l.push_back(val.clone()),
                }
            }
            Ok(l.len())
        },
    )?;
    Ok(Some(len))
}

pub fn pop(db: &Database, key: &[u8], side: Side, count: Option<usize>) -> RedisResult<Vec<Bytes>> {
    let result = db.mutate_existing(key, |v| {
        let l = match v {
            Value::List(l) => l,
            _ => return Err(RedisError::WrongType),
        };
        let n = count.unwrap_or(1).min(l.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let item = match side {
                Side::Left => l.pop_front(),
                Side::Right => l.pop_back(),
            };
            match item {
                Some(v) => out.push(v),
                None => break,
            }
        }
        Ok(out)
    });
    let out = match result {
        Ok(v) => v,
        Err(RedisError::NoSuchKey) => Vec::new(),
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(out)
}

pub fn llen(db: &Database, key: &[u8]) -> RedisResult<usize> {
    match db.get_opt(key) {
        Some(Value::List(l)) => Ok(l.len()),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(0),
    }
}

fn normalize(idx: i64, len: i64) -> i64 {
    if idx < 0 {
        (len + idx).max(-1)
    } else {
        idx
    }
}

pub fn lrange(db: &Database, key: &[u8], start: i64, stop: i64) -> RedisResult<Vec<Bytes>> {
    match db.get_opt(key) {
        Some(Value::List(l)) => {
            let len = l.len() as i64;
            let s = normalize(start, len).max(0);
            let e = normalize(stop, len).min(len - 1);
            if s > e || s >= len {
                return Ok(Vec::new());
            }
            Ok(l.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect())
        }
        Some(_) => Err(RedisError::WrongType),
        None => Ok(Vec::new()),
    }
}

pub fn lindex(db: &Database, key: &[u8], idx: i64) -> RedisResult<Option<Bytes>> {
    match db.get_opt(key) {
        Some(Value::List(l)) => {
            let len = l.len() as i64;
            let i = normalize(idx, len);
            if i < 0 || i >= len {
                Ok(None)
            } else {
                Ok(l.get(i as usize).cloned())
            }
        }
        Some(_) => Err(RedisError::WrongType),
        None => Ok(None),
    }
}

pub fn lset(db: &Database, key: &[u8], idx: i64, value: Bytes) -> RedisResult<()> {
    db.mutate_existing(key, |v| {
        let l = match v {
            Value::List(l) => l,
            _ => return Err(RedisError::WrongType),
        };
        let len = l.len() as i64;
        let i = normalize(idx, len);
        if i < 0 || i >= len {
            return Err(RedisError::OutOfRange);
        }
        l[i as usize] = value;
        Ok(())
    })
}

pub fn ltrim(db: &Database, key: &[u8], start: i64, stop: i64) -> RedisResult<()> {
    let result = db.mutate_existing(key, |v| {
        let l = match v {
            Value::List(l) => l,
            _ => return Err(RedisError::WrongType),
        };
        let len = l.len() as i64;
        let s = normalize(start, len).max(0);
        let e = normalize(stop, len).min(len - 1);
        if s > e || s >= len {
            l.clear();
        } else {
            let trimmed: VecDeque<Bytes> = l.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect();
            *l = trimmed;
        }
        Ok(())
    });
    match result {
        Ok(()) | Err(RedisError::NoSuchKey) => {}
        Err(e) => return Err(e),
    }
    db.delete_if_empty_collection(key);
    Ok(())
}

pub fn lrem(db: &Database, key: &[u8], count: i64, value: &Bytes) -> RedisResult<usize> {
    let removed = db.mutate_existing(key, |v| {
        let l = match v {
            Value::List(l) => l,
            _ => return Err(RedisError::WrongType),
        };
        let mut removed = 0;
        if count >= 0 {
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut out = VecDeque::with_capacity(l.len());
            for item in l.drain(..) {
                if removed < limit && &item == value {
                    removed += 1;
                } else {
                    out.push_back(item);
                }
            }
            *l = out;
        } else {
            let limit = (-count) as usize;
            let mut out = VecDeque::with_capacity(l.len());
            for item in l.drain(..).rev() {
                if removed < limit && &item == value {
                    removed += 1;
                } else {
                    out.push_front(item);
                }
            }
            *l = out;
        }
        Ok(removed)
    });
    let removed = match removed {
        Ok(n) => n,
        Err(RedisError::NoSuchKey) => 0,
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(removed)
}

pub fn linsert(db: &Database, key: &[u8], before: bool, pivot: &Bytes, value: Bytes) -> RedisResult<i64> {
    match db.mutate_existing(key, |v| {
        let l = match v {
            Value::List(l) => l,
            _ => return Err(RedisError::WrongType),
        };
        match l.iter().position(|x| x == pivot) {
            Some(pos) => {
                let insert_at = if before { pos } else { pos + 1 };
                l.insert(insert_at, value);
                Ok(l.len() as i64)
            }
            None => Ok(-1),
        }
    }) {
        Err(RedisError::NoSuchKey) => Ok(0),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_order() {
        let db = Database::default();
        push(&db, b"l", Side::Right, &[Bytes::from_static(b"a"), Bytes::from_static(b"b")], false).unwrap();
        push(&db, b"l", Side::Left, &[Bytes::from_static(b"z")], false).unwrap();
        assert_eq!(lrange(&db, b"l", 0, -1).unwrap(), vec![Bytes::from_static(b"z"), Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn pop_empties_key() {
        let db = Database::default();
        push(&db, b"l", Side::Right, &[Bytes::from_static(b"a")], false).unwrap();
        assert_eq!(pop(&db, b"l", Side::Left, None).unwrap(), vec![Bytes::from_static(b"a")]);
        assert!(!db.exists(b"l"));
    }

    #[test]
    fn lrem_negative_count_from_tail() {
        let db = Database::default();
        push(&db, b"l", Side::Right, &[Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"a")], false).unwrap();
        assert_eq!(lrem(&db, b"l", -1, &Bytes::from_static(b"a")).unwrap(), 1);
        assert_eq!(lrange(&db, b"l", 0, -1).unwrap(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn linsert_on_missing_pivot_returns_minus_one() {
        let db = Database::default();
        push(&db, b"l", Side::Right, &[Bytes::from_static(b"a")], false).unwrap();
        assert_eq!(linsert(&db, b"l", true, &Bytes::from_static(b"z"), Bytes::from_static(b"x")).unwrap(), -1);
    }

    #[test]
    fn linsert_on_missing_key_returns_zero() {
        let db = Database::default();
        assert_eq!(linsert(&db, b"missing", true, &Bytes::from_static(b"z"), Bytes::from_static(b"x")).unwrap(), 0);
    }

    #[test]
    fn linsert_propagates_wrongtype() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"v")), None);
        let result = linsert(&db, b"k", true, &Bytes::from_static(b"z"), Bytes::from_static(b"x"));
        assert!(matches!(result, Err(RedisError::WrongType)));
    }
}
