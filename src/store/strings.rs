//! String commands: GET/SET and friends, plus counters and range ops.

use bytes::Bytes;

use super::{now_ms, Database};
use crate::error::{RedisError, RedisResult};
use crate::value::Value;

fn as_string<'a>(v: &'a Value) -> RedisResult<&'a Bytes> {
    v.as_string().ok_or(RedisError::WrongType)
}

pub fn get(db: &Database, key: &[u8]) -> RedisResult<Option<Bytes>> {
    match db.get_opt(key) {
        Some(v) => as_string(&v).map(|b| Some(b.clone())),
        None => Ok(None),
    }
}

pub struct SetOpts {
    pub nx: bool,
    pub xx: bool,
    pub get: bool,
    pub expire_at_ms: Option<i64>,
    pub keep_ttl: bool,
}

impl Default for SetOpts {
    fn default() -> Self {
        SetOpts { nx: false, xx: false, get: false, expire_at_ms: None, keep_ttl: false }
    }
}

/// Implements `SET key value [NX|XX] [GET] [EX|PX|EXAT|PXAT|KEEPTTL]`.
/// Returns `(applied, old_value_if_get)`.
pub fn set(db: &Database, key: &[u8], value: Bytes, opts: SetOpts) -> RedisResult<(bool, Option<Bytes>)> {
    let existing = db.get_opt(key);
    if let Some(v) = &existing {
        as_string(v)?;
    }
    let old = if opts.get { existing.as_ref().map(|v| v.as_string().unwrap().clone()) } else { None };

    if opts.nx && existing.is_some() {
        return Ok((false, old));
    }
    if opts.xx && existing.is_none() {
        return Ok((false, old));
    }

    let expire_at = if opts.keep_ttl {
        db.ttl_ms(key).flatten().map(|remaining_ms| now_ms() + remaining_ms)
    } else {
        opts.expire_at_ms
    };
    db.set_value(key, Value::String(value), expire_at);
    Ok((true, old))
}

pub fn getset(db: &Database, key: &[u8], value: Bytes) -> RedisResult<Option<Bytes>> {
    let old = get(db, key)?;
    db.set_value(key, Value::String(value), None);
    Ok(old)
}

pub fn getdel(db: &Database, key: &[u8]) -> RedisResult<Option<Bytes>> {
    let old = get(db, key)?;
    if old.is_some() {
        db.del(key);
    }
    Ok(old)
}

pub fn setnx(db: &Database, key: &[u8], value: Bytes) -> bool {
    db.set_value_nx(key, Value::String(value), None)
}

pub fn setex(db: &Database, key: &[u8], seconds: i64, value: Bytes) -> RedisResult<()> {
    if seconds <= 0 {
        return Err(RedisError::InvalidArgument("invalid expire time in 'setex' command".into()));
    }
    db.set_value(key, Value::String(value), Some(now_ms() + seconds * 1000));
    Ok(())
}

pub fn psetex(db: &Database, key: &[u8], millis: i64, value: Bytes) -> RedisResult<()> {
    if millis <= 0 {
        return Err(RedisError::InvalidArgument("invalid expire time in 'psetex' command".into()));
    }
    db.set_value(key, Value::String(value), Some(now_ms() + millis));
    Ok(())
}

pub fn append(db: &Database, key: &[u8], suffix: &[u8]) -> RedisResult<usize> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::new()),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let mut buf = s.to_vec();
            buf.extend_from_slice(suffix);
            *s = Bytes::from(buf);
            Ok(s.len())
        },
    )
}

pub fn strlen(db: &Database, key: &[u8]) -> RedisResult<usize> {
    Ok(get(db, key)?.map(|b| b.len()).unwrap_or(0))
}

pub fn getrange(db: &Database, key: &[u8], start: i64, end: i64) -> RedisResult<Bytes> {
    let Some(s) = get(db, key)? else { return Ok(Bytes::new()) };
    Ok(Bytes::copy_from_slice(&slice_range(&s, start, end)))
}

pub fn slice_range(s: &[u8], start: i64, end: i64) -> Vec<u8> {
    let len = s.len() as i64;
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len);
    let end = norm(end).min(len - 1);
    if start > end || start >= len {
        return Vec::new();
    }
    s[start as usize..=(end as usize)].to_vec()
}

pub fn setrange(db: &Database, key: &[u8], offset: usize, value: &[u8]) -> RedisResult<usize> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::new()),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let mut buf = s.to_vec();
            if buf.len() < offset + value.len() {
                buf.resize(offset + value.len(), 0);
            }
            buf[offset..offset + value.len()].copy_from_slice(value);
            *s = Bytes::from(buf);
            Ok(s.len())
        },
    )
}

fn parse_int(b: &Bytes) -> RedisResult<i64> {
    std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()).ok_or(RedisError::NotAnInteger)
}

pub fn incr_by(db: &Database, key: &[u8], delta: i64) -> RedisResult<i64> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::from_static(b"0")),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let cur = parse_int(s)?;
            let next = cur.checked_add(delta).ok_or(RedisError::OutOfRange)?;
            *s = Bytes::from(next.to_string());
            Ok(next)
        },
    )
}

pub fn incr_by_float(db: &Database, key: &[u8], delta: f64) -> RedisResult<f64> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::from_static(b"0")),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let cur: f64 = std::str::from_utf8(s).ok().and_then(|s| s.parse().ok()).ok_or(RedisError::NotAFloat)?;
            let next = cur + delta;
            if !next.is_finite() {
                return Err(RedisError::InvalidArgument("increment would produce NaN or Infinity".into()));
            }
            *s = Bytes::from(format_float(next));
            Ok(next)
        },
    )
}

pub fn format_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e17 {
        format!("{}", f as i64)
    } else {
        let mut s = format!("{:.17}", f);
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

pub fn mget(db: &Database, keys: &[Bytes]) -> Vec<Option<Bytes>> {
    keys.iter()
        .map(|k| match db.get_opt(k) {
            Some(Value::String(b)) => Some(b),
            _ => None,
        })
        .collect()
}

pub fn mset(db: &Database, pairs: &[(Bytes, Bytes)]) {
    for (k, v) in pairs {
        db.set_value(k, Value::String(v.clone()), None);
    }
}

pub fn msetnx(db: &Database, pairs: &[(Bytes, Bytes)]) -> bool {
    if pairs.iter().any(|(k, _)| db.exists(k)) {
        return false;
    }
    mset(db, pairs);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_nx_xx_semantics() {
        let db = Database::default();
        let (applied, _) = set(&db, b"k", Bytes::from_static(b"v"), SetOpts { xx: true, ..Default::default() }).unwrap();
        assert!(!applied);
        let (applied, _) = set(&db, b"k", Bytes::from_static(b"v"), SetOpts { nx: true, ..Default::default() }).unwrap();
        assert!(applied);
        let (applied, _) = set(&db, b"k", Bytes::from_static(b"v2"), SetOpts { nx: true, ..Default::default() }).unwrap();
        assert!(!applied);
    }

    #[test]
    fn incr_by_on_missing_key() {
        let db = Database::default();
        assert_eq!(incr_by(&db, b"counter", 5).unwrap(), 5);
        assert_eq!(incr_by(&db, b"counter", -2).unwrap(), 3);
    }

    #[test]
    fn getrange_negative_indices() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"Hello World")), None);
        assert_eq!(getrange(&db, b"k", -5, -1).unwrap(), Bytes::from_static(b"World"));
    }

    #[test]
    fn wrong_type_on_list() {
        let db = Database::default();
        db.set_value(b"k", Value::List(Default::default()), None);
        assert_eq!(get(&db, b"k"), Err(RedisError::WrongType));
    }
}
