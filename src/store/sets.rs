//! Set commands: SADD/SMEMBERS and the set-algebra family.

use bytes::Bytes;
use std::collections::HashSet;

use super::Database;
use crate::error::{RedisError, RedisResult};
use crate::value::Value;

fn as_set(v: &Value) -> RedisResult<&HashSet<Bytes>> {
    v.as_set().ok_or(RedisError::WrongType)
}

pub fn sadd(db: &Database, key: &[u8], members: &[Bytes]) -> RedisResult<usize> {
    db.mutate_or_insert(
        key,
        || Value::Set(HashSet::new()),
        |v| {
            let s = match v {
                Value::Set(s) => s,
                _ => return Err(RedisError::WrongType),
            };
            Ok(members.iter().filter(|m| s.insert((*m).clone())).count())
        },
    )
}

pub fn srem(db: &Database, key: &[u8], members: &[Bytes]) -> RedisResult<usize> {
    let removed = db.mutate_existing(key, |v| {
        let s = match v {
            Value::Set(s) => s,
            _ => return Err(RedisError::WrongType),
        };
        Ok(members.iter().filter(|m| s.remove(m.as_ref())).count())
    });
    let removed = match removed {
        Ok(n) => n,
        Err(RedisError::NoSuchKey) => 0,
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(removed)
}

pub fn sismember(db: &Database, key: &[u8], member: &[u8]) -> RedisResult<bool> {
    match db.get_opt(key) {
        Some(v) => Ok(as_set(&v)?.contains(member)),
        None => Ok(false),
    }
}

pub fn smismember(db: &Database, key: &[u8], members: &[Bytes]) -> RedisResult<Vec<bool>> {
    match db.get_opt(key) {
        Some(v) => {
            let s = as_set(&v)?;
            Ok(members.iter().map(|m| s.contains(m.as_ref())).collect())
        }
        None => Ok(vec![false; members.len()]),
    }
}

pub fn smembers(db: &Database, key: &[u8]) -> RedisResult<Vec<Bytes>> {
    match db.get_opt(key) {
        Some(v) => Ok(as_set(&v)?.iter().cloned().collect()),
        None => Ok(Vec::new()),
    }
}

pub fn scard(db: &Database, key: &[u8]) -> RedisResult<usize> {
    match db.get_opt(key) {
        Some(v) => Ok(as_set(&v)?.len()),
        None => Ok(0),
    }
}

pub fn spop(db: &Database, key: &[u8], count: Option<usize>) -> RedisResult<Vec<Bytes>> {
    use rand::seq::IteratorRandom;
    let result = db.mutate_existing(key, |v| {
        let s = match v {
            Value::Set(s) => s,
            _ => return Err(RedisError::WrongType),
        };
        let n = count.unwrap_or(1).min(s.len());
        let mut rng = rand::thread_rng();
        let chosen: Vec<Bytes> = s.iter().cloned().choose_multiple(&mut rng, n);
        for c in &chosen {
            s.remove(c);
        }
        Ok(chosen)
    });
    let out = match result {
        Ok(v) => v,
        Err(RedisError::NoSuchKey) => Vec::new(),
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(out)
}

pub fn srandmember(db: &Database, key: &[u8], count: Option<i64>) -> RedisResult<Vec<Bytes>> {
    let members = smembers(db, key)?;
    if members.is_empty() {
        return Ok(Vec::new());
    }
    use rand::seq::{IteratorRandom, SliceRandom};
    let mut rng = rand::thread_rng();
    match count {
        None => Ok(members.choose(&mut rng).cloned().into_iter().collect()),
        Some(n) if n >= 0 => Ok(members.into_iter().choose_multiple(&mut rng, n as usize)),
        Some(n) => Ok((0..(-n) as usize).filter_map(|_| members.choose(&mut rng).cloned()).collect()),
    }
}

fn load_sets(db: &Database, keys: &[Bytes]) -> RedisResult<Vec<HashSet<Bytes>>> {
    keys.iter()
        .map(|k| match db.get_opt(k) {
            Some(v) => as_set(&v).cloned(),
            None => Ok(HashSet::new()),
        })
        .collect()
}

pub fn sunion(db: &Database, keys: &[Bytes]) -> RedisResult<HashSet<Bytes>> {
    let sets = load_sets(db, keys)?;
    Ok(sets.into_iter().flatten().collect())
}

pub fn sinter(db: &Database, keys: &[Bytes]) -> RedisResult<HashSet<Bytes>> {
    let mut sets = load_sets(db, keys)?;
    if sets.is_empty() {
        return Ok(HashSet::new());
    }
    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let mut acc = iter.next().unwrap();
    for s in iter {
        acc.retain(|m| s.contains(m));
    }
    Ok(acc)
}

pub fn sdiff(db: &Database, keys: &[Bytes]) -> RedisResult<HashSet<Bytes>> {
    let mut sets = load_sets(db, keys)?;
    if sets.is_empty() {
        return Ok(HashSet::new());
    }
    let mut acc = sets.remove(0);
    for s in sets {
        acc.retain(|m| !s.contains(m));
    }
    Ok(acc)
}

pub fn store_result(db: &Database, dest: &[u8], result: HashSet<Bytes>) -> usize {
    let len = result.len();
    if result.is_empty() {
        db.del(dest);
    } else {
        db.set_value(dest, Value::Set(result), None);
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sadd_dedupes() {
        let db = Database::default();
        assert_eq!(sadd(&db, b"s", &[Bytes::from_static(b"a"), Bytes::from_static(b"a")]).unwrap(), 1);
        assert_eq!(scard(&db, b"s").unwrap(), 1);
    }

    #[test]
    fn set_algebra() {
        let db = Database::default();
        sadd(&db, b"a", &[Bytes::from_static(b"x"), Bytes::from_static(b"y")]).unwrap();
        sadd(&db, b"b", &[Bytes::from_static(b"y"), Bytes::from_static(b"z")]).unwrap();
        let inter = sinter(&db, &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap();
        assert_eq!(inter, HashSet::from([Bytes::from_static(b"y")]));
        let diff = sdiff(&db, &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap();
        assert_eq!(diff, HashSet::from([Bytes::from_static(b"x")]));
    }
}
