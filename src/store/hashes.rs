//! Hash commands: HSET/HGET and friends.

use bytes::Bytes;
use std::collections::HashMap;

use super::Database;
use crate::error::{RedisError, RedisResult};
use crate::value::Value;

fn as_hash(v: &Value) -> RedisResult<&HashMap<Bytes, Bytes>> {
    v.as_hash().ok_or(RedisError::WrongType)
}

pub fn hset(db: &Database, key: &[u8], pairs: &[(Bytes, Bytes)]) -> RedisResult<usize> {
    let added = db.mutate_or_insert(
        key,
        || Value::Hash(HashMap::new()),
        |v| {
            let h = match v {
                Value::Hash(h) => h,
                _ => return Err(RedisError::WrongType),
            };
            let mut added = 0;
            for (f, val) in pairs {
                if h.insert(f.clone(), val.clone()).is_none() {
                    added += 1;
                }
            }
            Ok(added)
        },
    )?;
    Ok(added)
}

pub fn hsetnx(db: &Database, key: &[u8], field: &Bytes, value: &Bytes) -> RedisResult<bool> {
    db.mutate_or_insert(
        key,
        || Value::Hash(HashMap::new()),
        |v| {
            let h = match v {
                Value::Hash(h) => h,
                _ => return Err(RedisError::WrongType),
            };
            if h.contains_key(field) {
                Ok(false)
            } else {
                h.insert(field.clone(), value.clone());
                Ok(true)
            }
        },
    )
}

pub fn hget(db: &Database, key: &[u8], field: &[u8]) -> RedisResult<Option<Bytes>> {
    match db.get_opt(key) {
        Some(v) => Ok(as_hash(&v)?.get(field).cloned()),
        None => Ok(None),
    }
}

pub fn hmget(db: &Database, key: &[u8], fields: &[Bytes]) -> RedisResult<Vec<Option<Bytes>>> {
    match db.get_opt(key) {
        Some(v) => {
            let h = as_hash(&v)?;
            Ok(fields.iter().map(|f| h.get(f.as_ref()).cloned()).collect())
        }
        None => Ok(vec![None; fields.len()]),
    }
}

pub fn hdel(db: &Database, key: &[u8], fields: &[Bytes]) -> RedisResult<usize> {
    let removed = db.mutate_existing(key, |v| {
        let h = match v {
            Value::Hash(h) => h,
            _ => return Err(RedisError::WrongType),
        };
        Ok(fields.iter().filter(|f| h.remove(f.as_ref()).is_some()).count())
    });
    let removed = match removed {
        Ok(n) => n,
        Err(RedisError::NoSuchKey) => 0,
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(removed)
}

pub fn hexists(db: &Database, key: &[u8], field: &[u8]) -> RedisResult<bool> {
    match db.get_opt(key) {
        Some(v) => Ok(as_hash(&v)?.contains_key(field)),
        None => Ok(false),
    }
}

pub fn hgetall(db: &Database, key: &[u8]) -> RedisResult<Vec<(Bytes, Bytes)>> {
    match db.get_opt(key) {
        Some(v) => Ok(as_hash(&v)?.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        None => Ok(Vec::new()),
    }
}

pub fn hkeys(db: &Database, key: &[u8]) -> RedisResult<Vec<Bytes>> {
    Ok(hgetall(db, key)?.into_iter().map(|(k, _)| k).collect())
}

pub fn hvals(db: &Database, key: &[u8]) -> RedisResult<Vec<Bytes>> {
    Ok(hgetall(db, key)?.into_iter().map(|(_, v)| v).collect())
}

pub fn hlen(db: &Database, key: &[u8]) -> RedisResult<usize> {
    match db.get_opt(key) {
        Some(v) => Ok(as_hash(&v)?.len()),
        None => Ok(0),
    }
}

pub fn hstrlen(db: &Database, key: &[u8], field: &[u8]) -> RedisResult<usize> {
    Ok(hget(db, key, field)?.map(|v| v.len()).unwrap_or(0))
}

pub fn hincrby(db: &Database, key: &[u8], field: &Bytes, delta: i64) -> RedisResult<i64> {
    db.mutate_or_insert(
        key,
        || Value::Hash(HashMap::new()),
        |v| {
            let h = match v {
                Value::Hash(h) => h,
                _ => return Err(RedisError::WrongType),
            };
            let cur: i64 = match h.get(field) {
                Some(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()).ok_or(RedisError::NotAnInteger)?,
                None => 0,
            };
            let next = cur.checked_add(delta).ok_or(RedisError::OutOfRange)?;
            h.insert(field.clone(), Bytes::from(next.to_string()));
            Ok(next)
        },
    )
}

pub fn hincrbyfloat(db: &Database, key: &[u8], field: &Bytes, delta: f64) -> RedisResult<f64> {
    db.mutate_or_insert(
        key,
        || Value::Hash(HashMap::new()),
        |v| {
            let h = match v {
                Value::Hash(h) => h,
                _ => return Err(RedisError::WrongType),
            };
            let cur: f64 = match h.get(field) {
                Some(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()).ok_or(RedisError::NotAFloat)?,
                None => 0.0,
            };
            let next = cur + delta;
            h.insert(field.clone(), Bytes::from(crate::store::strings::format_float(next)));
            Ok(next)
        },
    )
}

pub fn hrandfield(db: &Database, key: &[u8], count: Option<i64>) -> RedisResult<Vec<Bytes>> {
    let pairs = hgetall(db, key)?;
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    match count {
        None => Ok(pairs.choose(&mut rng).map(|(k, _)| vec![k.clone()]).unwrap_or_default()),
        Some(n) if n >= 0 => {
            let mut keys: Vec<Bytes> = pairs.into_iter().map(|(k, _)| k).collect();
            keys.shuffle(&mut rng);
            keys.truncate(n as usize);
            Ok(keys)
        }
        Some(n) => {
            let keys: Vec<Bytes> = pairs.into_iter().map(|(k, _)| k).collect();
            Ok((0..(-n) as usize).filter_map(|_| keys.choose(&mut rng).cloned()).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hset_counts_new_fields_only() {
        let db = Database::default();
        assert_eq!(hset(&db, b"h", &[(Bytes::from_static(b"a"), Bytes::from_static(b"1"))]).unwrap(), 1);
        assert_eq!(hset(&db, b"h", &[(Bytes::from_static(b"a"), Bytes::from_static(b"2"))]).unwrap(), 0);
        assert_eq!(hget(&db, b"h", b"a").unwrap(), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn hdel_empties_key() {
        let db = Database::default();
        hset(&db, b"h", &[(Bytes::from_static(b"a"), Bytes::from_static(b"1"))]).unwrap();
        assert_eq!(hdel(&db, b"h", &[Bytes::from_static(b"a")]).unwrap(), 1);
        assert!(!db.exists(b"h"));
    }

    #[test]
    fn hincrby_on_fresh_field() {
        let db = Database::default();
        assert_eq!(hincrby(&db, b"h", &Bytes::from_static(b"n"), 5).unwrap(), 5);
    }
}
