//! Sorted set commands: ZADD/ZRANGE and score-ordered queries.

use bytes::Bytes;

use super::Database;
use crate::error::{RedisError, RedisResult};
use crate::value::{SortedSet, Value};

fn as_zset(v: &Value) -> RedisResult<&SortedSet> {
    v.as_sorted_set().ok_or(RedisError::WrongType)
}

pub struct ZaddOpts {
    pub nx: bool,
    pub xx: bool,
    pub gt: bool,
    pub lt: bool,
    pub ch: bool,
    pub incr: bool,
}

impl Default for ZaddOpts {
    fn default() -> Self {
        ZaddOpts { nx: false, xx: false, gt: false, lt: false, ch: false, incr: false }
    }
}

/// Returns `(added_or_changed_count, incr_result_if_incr_mode)`.
pub fn zadd(db: &Database, key: &[u8], pairs: &[(f64, Bytes)], opts: &ZaddOpts) -> RedisResult<(usize, Option<f64>)> {
    if opts.nx && (opts.gt || opts.lt) {
        return Err(RedisError::InvalidArgument("GT, LT, and/or NX options at the same time are not compatible".into()));
    }
    let mut incr_result = None;
    let count = db.mutate_or_insert(
        key,
        || Value::SortedSet(SortedSet::default()),
        |v| {
            let z = match v {
                Value::SortedSet(z) => z,
                _ => return Err(RedisError::WrongType),
            };
            let mut changed = 0usize;
            for (score, member) in pairs {
                let existing = z.score(member);
                if opts.nx && existing.is_some() {
                    continue;
                }
                if opts.xx && existing.is_none() {
                    continue;
                }
                let new_score = if opts.incr {
                    existing.unwrap_or(0.0) + score
                } else {
                    *score
                };
                if let Some(old) = existing {
                    if opts.gt && new_score <= old {
                        if opts.incr {
                            incr_result = None;
                        }
                        continue;
                    }
                    if opts.lt && new_score >= old {
                        if opts.incr {
                            incr_result = None;
                        }
                        continue;
                    }
                }
                let was_new = z.insert(member.clone(), new_score);
                if was_new || opts.ch || opts.incr {
                    if was_new || existing != Some(new_score) {
                        changed += 1;
                    }
                }
                if opts.incr {
                    incr_result = Some(new_score);
                }
            }
            Ok(changed)
        },
    )?;
    Ok((count, incr_result))
}

pub fn zscore(db: &Database, key: &[u8], member: &[u8]) -> RedisResult<Option<f64>> {
    match db.get_opt(key) {
        Some(v) => Ok(as_zset(&v)?.score(member)),
        None => Ok(None),
    }
}

pub fn zmscore(db: &Database, key: &[u8], members: &[Bytes]) -> RedisResult<Vec<Option<f64>>> {
    match db.get_opt(key) {
        Some(v) => {
            let z = as_zset(&v)?;
            Ok(members.iter().map(|m| z.score(m)).collect())
        }
        None => Ok(vec![None; members.len()]),
    }
}

pub fn zcard(db: &Database, key: &[u8]) -> RedisResult<usize> {
    match db.get_opt(key) {
        Some(v) => Ok(as_zset(&v)?.len()),
        None => Ok(0),
    }
}

pub fn zrank(db: &Database, key: &[u8], member: &[u8], reverse: bool) -> RedisResult<Option<usize>> {
    match db.get_opt(key) {
        Some(v) => {
            let z = as_zset(&v)?;
            Ok(z.rank(member).map(|r| if reverse { z.len() - 1 - r } else { r }))
        }
        None => Ok(None),
    }
}

pub fn zrem(db: &Database, key: &[u8], members: &[Bytes]) -> RedisResult<usize> {
    let removed = db.mutate_existing(key, |v| {
        let z = match v {
            Value::SortedSet(z) => z,
            _ => return Err(RedisError::WrongType),
        };
        Ok(members.iter().filter(|m| z.remove(m).is_some()).count())
    });
    let removed = match removed {
        Ok(n) => n,
        Err(RedisError::NoSuchKey) => 0,
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(removed)
}

pub fn zincrby(db: &Database, key: &[u8], delta: f64, member: &Bytes) -> RedisResult<f64> {
    db.mutate_or_insert(
        key,
        || Value::SortedSet(SortedSet::default()),
        |v| {
            let z = match v {
                Value::SortedSet(z) => z,
                _ => return Err(RedisError::WrongType),
            };
            let new_score = z.score(member).unwrap_or(0.0) + delta;
            z.insert(member.clone(), new_score);
            Ok(new_score)
        },
    )
}

pub fn zrange_by_rank(db: &Database, key: &[u8], start: i64, stop: i64, reverse: bool) -> RedisResult<Vec<(Bytes, f64)>> {
    match db.get_opt(key) {
        Some(v) => {
            let z = as_zset(&v)?;
            let len = z.len() as i64;
            if len == 0 {
                return Ok(Vec::new());
            }
            let norm = |i: i64| -> i64 {
                if i < 0 {
                    (len + i).max(0)
                } else {
                    i
                }
            };
            let s = norm(start).min(len - 1).max(0);
            let e = norm(stop).min(len - 1);
            if s > e {
                return Ok(Vec::new());
            }
            let mut items = z.range_by_rank(s as usize, e as usize);
            if reverse {
                items.reverse();
            }
            Ok(items)
        }
        None => Ok(Vec::new()),
    }
}

pub fn zrange_by_score(
    db: &Database,
    key: &[u8],
    min: f64,
    min_inclusive: bool,
    max: f64,
    max_inclusive: bool,
    reverse: bool,
    limit: Option<(usize, usize)>,
) -> RedisResult<Vec<(Bytes, f64)>> {
    match db.get_opt(key) {
        Some(v) => {
            let z = as_zset(&v)?;
            let mut items = z.range_by_score(min, min_inclusive, max, max_inclusive);
            if reverse {
                items.reverse();
            }
            if let Some((offset, count)) = limit {
                items = items.into_iter().skip(offset).take(count).collect();
            }
            Ok(items)
        }
        None => Ok(Vec::new()),
    }
}

pub fn zcount(db: &Database, key: &[u8], min: f64, min_inclusive: bool, max: f64, max_inclusive: bool) -> RedisResult<usize> {
    Ok(zrange_by_score(db, key, min, min_inclusive, max, max_inclusive, false, None)?.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopSide {
    Min,
    Max,
}

pub fn zpop(db: &Database, key: &[u8], side: PopSide, count: usize) -> RedisResult<Vec<(Bytes, f64)>> {
    let result = db.mutate_existing(key, |v| {
        let z = match v {
            Value::SortedSet(z) => z,
            _ => return Err(RedisError::WrongType),
        };
        let items: Vec<(Bytes, f64)> = match side {
            PopSide::Min => z.iter_ascending().take(count).map(|(m, s)| (m.clone(), s)).collect(),
            PopSide::Max => z.iter_ascending().rev().take(count).map(|(m, s)| (m.clone(), s)).collect(),
        };
        for (m, _) in &items {
            z.remove(m);
        }
        Ok(items)
    });
    let out = match result {
        Ok(v) => v,
        Err(RedisError::NoSuchKey) => Vec::new(),
        Err(e) => return Err(e),
    };
    db.delete_if_empty_collection(key);
    Ok(out)
}

pub fn zrandmember(db: &Database, key: &[u8], count: Option<i64>) -> RedisResult<Vec<(Bytes, f64)>> {
    let members: Vec<(Bytes, f64)> = match db.get_opt(key) {
        Some(v) => as_zset(&v)?.iter_ascending().map(|(m, s)| (m.clone(), s)).collect(),
        None => Vec::new(),
    };
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zadd_and_range() {
        let db = Database::default();
        zadd(
            &db,
            b"z",
            &[(1.0, Bytes::from_static(b"a")), (2.0, Bytes::from_static(b"b")), (0.5, Bytes::from_static(b"c"))],
            &ZaddOpts::default(),
        )
        .unwrap();
        let all = zrange_by_rank(&db, b"z", 0, -1, false).unwrap();
        assert_eq!(all.iter().map(|(m, _)| m.clone()).collect::<Vec<_>>(), vec![
            Bytes::from_static(b"c"),
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
        ]);
    }

    #[test]
    fn zadd_nx_skips_existing() {
        let db = Database::default();
        zadd(&db, b"z", &[(1.0, Bytes::from_static(b"a"))], &ZaddOpts::default()).unwrap();
        zadd(&db, b"z", &[(5.0, Bytes::from_static(b"a"))], &ZaddOpts { nx: true, ..Default::default() }).unwrap();
        assert_eq!(zscore(&db, b"z", b"a").unwrap(), Some(1.0));
    }

    #[test]
    fn zpopmin_removes_lowest() {
        let db = Database::default();
        zadd(&db, b"z", &[(1.0, Bytes::from_static(b"a")), (2.0, Bytes::from_static(b"b"))], &ZaddOpts::default()).unwrap();
        let popped = zpop(&db, b"z", PopSide::Min, 1).unwrap();
        assert_eq!(popped, vec![(Bytes::from_static(b"a"), 1.0)]);
    }
}
