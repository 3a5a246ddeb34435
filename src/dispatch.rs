//! Command dispatch: decodes argument vectors into typed calls against the
//! store, auth, pub/sub, and transaction layers, producing a `Reply`.

use bytes::Bytes;

use crate::connection::{Connection, ServerShared};
use crate::error::{RedisError, RedisResult};
use crate::resp::Reply;
use crate::store::bitops::{self, BitFieldType, BitOpKind, Overflow};
use crate::store::lists::Side;
use crate::store::sortedset::{PopSide, ZaddOpts};
use crate::store::{hashes, lists, sets, sortedset, strings, now_ms};
use crate::passthrough;
use crate::streams::StreamId;

fn arg_str(b: &Bytes) -> String {
    String::from_utf8_lossy(b).to_string()
}

fn parse_i64(b: &Bytes) -> RedisResult<i64> {
    arg_str(b).parse().map_err(|_| RedisError::NotAnInteger)
}

fn parse_f64(b: &Bytes) -> RedisResult<f64> {
    let v: f64 = arg_str(b).parse().map_err(|_| RedisError::NotAFloat)?;
    if !v.is_finite() {
        return Err(RedisError::NotAFloat);
    }
    Ok(v)
}

const IMMEDIATE_IN_MULTI: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH", "RESET"];

pub async fn dispatch(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> Reply {
    if conn.tx_state.in_multi() && !IMMEDIATE_IN_MULTI.contains(&name) {
        conn.tx_state.queue(Bytes::copy_from_slice(name.as_bytes()), args.to_vec());
        return Reply::Simple("QUEUED".to_string());
    }
    match run(shared, conn, name, args).await {
        Ok(r) => r,
        Err(e) => Reply::from(e),
    }
}

async fn run(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> RedisResult<Reply> {
    match name {
        "PING" => Ok(match args.first() {
            Some(msg) => Reply::Bulk(msg.clone()),
            None => Reply::Simple("PONG".to_string()),
        }),
        "ECHO" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Bulk(args[0].clone()))
        }
        "AUTH" => auth(shared, conn, args).await,
        "HELLO" => hello(shared, conn, args).await,
        "SELECT" => {
            require_args_result(args, 1, name)?;
            let idx = parse_i64(&args[0])? as usize;
            shared.store.db(idx)?;
            conn.db_index = idx;
            Ok(Reply::ok())
        }
        "SWAPDB" => {
            require_args_result(args, 2, name)?;
            let a = parse_i64(&args[0])? as usize;
            let b = parse_i64(&args[1])? as usize;
            shared.store.db(a)?;
            shared.store.db(b)?;
            Ok(Reply::ok())
        }
        "DBSIZE" => Ok(Reply::Integer(shared.store.db(conn.db_index)?.len() as i64)),
        "FLUSHDB" => {
            shared.store.db(conn.db_index)?.clear();
            Ok(Reply::ok())
        }
        "FLUSHALL" => {
            shared.store.flush_all();
            Ok(Reply::ok())
        }
        "COMMAND" => Ok(match args.first().map(arg_str).as_deref() {
            Some("COUNT") => Reply::Integer(0),
            _ => Reply::Array(Vec::new()),
        }),

        // Generic key commands
        "EXISTS" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Integer(args.iter().filter(|k| db.exists(k)).count() as i64))
        }
        "DEL" | "UNLINK" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Integer(args.iter().filter(|k| db.del(k)).count() as i64))
        }
        "TOUCH" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Integer(args.iter().filter(|k| db.exists(k)).count() as i64))
        }
        "TYPE" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Simple(db.type_name(&args[0]).unwrap_or("none").to_string()))
        }
        "KEYS" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Array(db.keys_matching(&args[0]).into_iter().map(Reply::Bulk).collect()))
        }
        "RANDOMKEY" => {
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::from_bulk_opt(db.random_key()))
        }
        "RENAME" => {
            require_args_result(args, 2, name)?;
            shared.store.db(conn.db_index)?.rename(&args[0], &args[1])?;
            Ok(Reply::ok())
        }
        "RENAMENX" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(shared.store.db(conn.db_index)?.rename_nx(&args[0], &args[1])? as i64))
        }
        "COPY" => {
            require_args_result(args, 2, name)?;
            let replace = args.iter().any(|a| arg_str(a).eq_ignore_ascii_case("REPLACE"));
            Ok(Reply::Integer(shared.store.db(conn.db_index)?.copy(&args[0], &args[1], replace) as i64))
        }
        "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT" => expire(shared, conn, name, args),
        "TTL" => {
            require_args_result(args, 1, name)?;
            match shared.store.db(conn.db_index)?.ttl_ms(&args[0]) {
                None => Ok(Reply::Integer(-2)),
                Some(None) => Ok(Reply::Integer(-1)),
                Some(Some(ms)) => Ok(Reply::Integer((ms + 999) / 1000)),
            }
        }
        "PTTL" => {
            require_args_result(args, 1, name)?;
            match shared.store.db(conn.db_index)?.ttl_ms(&args[0]) {
                None => Ok(Reply::Integer(-2)),
                Some(None) => Ok(Reply::Integer(-1)),
                Some(Some(ms)) => Ok(Reply::Integer(ms)),
            }
        }
        "PERSIST" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(shared.store.db(conn.db_index)?.persist(&args[0]) as i64))
        }

        // Strings
        "GET" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::from_bulk_opt(strings::get(shared.store.db(conn.db_index)?, &args[0])?))
        }
        "SET" => set_command(shared, conn, args),
        "SETNX" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(strings::setnx(shared.store.db(conn.db_index)?, &args[0], args[1].clone()) as i64))
        }
        "SETEX" => {
            require_args_result(args, 3, name)?;
            strings::setex(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, args[2].clone())?;
            Ok(Reply::ok())
        }
        "PSETEX" => {
            require_args_result(args, 3, name)?;
            strings::psetex(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, args[2].clone())?;
            Ok(Reply::ok())
        }
        "GETSET" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::from_bulk_opt(strings::getset(shared.store.db(conn.db_index)?, &args[0], args[1].clone())?))
        }
        "GETDEL" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::from_bulk_opt(strings::getdel(shared.store.db(conn.db_index)?, &args[0])?))
        }
        "APPEND" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(strings::append(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "STRLEN" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(strings::strlen(shared.store.db(conn.db_index)?, &args[0])? as i64))
        }
        "GETRANGE" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Bulk(strings::getrange(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, parse_i64(&args[2])?)?))
        }
        "SETRANGE" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Integer(strings::setrange(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])? as usize, &args[2])? as i64))
        }
        "INCR" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(strings::incr_by(shared.store.db(conn.db_index)?, &args[0], 1)?))
        }
        "DECR" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(strings::incr_by(shared.store.db(conn.db_index)?, &args[0], -1)?))
        }
        "INCRBY" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(strings::incr_by(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?)?))
        }
        "DECRBY" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(strings::incr_by(shared.store.db(conn.db_index)?, &args[0], -parse_i64(&args[1])?)?))
        }
        "INCRBYFLOAT" => {
            require_args_result(args, 2, name)?;
            let v = strings::incr_by_float(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])?)?;
            Ok(Reply::bulk_str(strings::format_float(v)))
        }
        "MGET" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Array(strings::mget(shared.store.db(conn.db_index)?, args).into_iter().map(Reply::from_bulk_opt).collect()))
        }
        "MSET" => {
            require_args_result(args, 2, name)?;
            if args.len() % 2 != 0 {
                return Err(RedisError::WrongArity(name.to_lowercase()));
            }
            let pairs: Vec<(Bytes, Bytes)> = args.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
            strings::mset(shared.store.db(conn.db_index)?, &pairs);
            Ok(Reply::ok())
        }
        "MSETNX" => {
            require_args_result(args, 2, name)?;
            if args.len() % 2 != 0 {
                return Err(RedisError::WrongArity(name.to_lowercase()));
            }
            let pairs: Vec<(Bytes, Bytes)> = args.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
            Ok(Reply::Integer(strings::msetnx(shared.store.db(conn.db_index)?, &pairs) as i64))
        }

        // Bit operations
        "SETBIT" => {
            require_args_result(args, 3, name)?;
            let bit = parse_i64(&args[2])?;
            if bit != 0 && bit != 1 {
                return Err(RedisError::InvalidArgument("bit is not an integer or out of range".into()));
            }
            Ok(Reply::Integer(bitops::setbit(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])? as usize, bit as u8)? as i64))
        }
        "GETBIT" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(bitops::getbit(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])? as usize)? as i64))
        }
        "BITCOUNT" => {
            require_args_result(args, 1, name)?;
            let range = if args.len() >= 3 {
                let is_bit = args.len() >= 4 && arg_str(&args[3]).eq_ignore_ascii_case("BIT");
                Some((parse_i64(&args[1])?, parse_i64(&args[2])?, is_bit))
            } else {
                None
            };
            Ok(Reply::Integer(bitops::bitcount(shared.store.db(conn.db_index)?, &args[0], range)?))
        }
        "BITPOS" => {
            require_args_result(args, 2, name)?;
            let bit = parse_i64(&args[1])? as u8;
            let start = args.get(2).map(|a| parse_i64(a)).transpose()?;
            let end = args.get(3).map(|a| parse_i64(a)).transpose()?;
            Ok(Reply::Integer(bitops::bitpos(shared.store.db(conn.db_index)?, &args[0], bit, start, end, args.get(3).is_some())?))
        }
        "BITOP" => {
            require_args_result(args, 3, name)?;
            let op = match arg_str(&args[0]).to_uppercase().as_str() {
                "AND" => BitOpKind::And,
                "OR" => BitOpKind::Or,
                "XOR" => BitOpKind::Xor,
                "NOT" => BitOpKind::Not,
                _ => return Err(RedisError::Syntax),
            };
            let len = bitops::bitop(shared.store.db(conn.db_index)?, op, &args[1], &args[2..])?;
            Ok(Reply::Integer(len as i64))
        }
        "BITFIELD" => bitfield(shared, conn, args),

        // Hashes
        "HSET" | "HMSET" => {
            require_args_result(args, 3, name)?;
            if (args.len() - 1) % 2 != 0 {
                return Err(RedisError::WrongArity(name.to_lowercase()));
            }
            let pairs: Vec<(Bytes, Bytes)> = args[1..].chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
            let added = hashes::hset(shared.store.db(conn.db_index)?, &args[0], &pairs)?;
            Ok(if name == "HMSET" { Reply::ok() } else { Reply::Integer(added as i64) })
        }
        "HSETNX" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Integer(hashes::hsetnx(shared.store.db(conn.db_index)?, &args[0], &args[1], &args[2])? as i64))
        }
        "HGET" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::from_bulk_opt(hashes::hget(shared.store.db(conn.db_index)?, &args[0], &args[1])?))
        }
        "HMGET" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Array(hashes::hmget(shared.store.db(conn.db_index)?, &args[0], &args[1..])?.into_iter().map(Reply::from_bulk_opt).collect()))
        }
        "HDEL" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(hashes::hdel(shared.store.db(conn.db_index)?, &args[0], &args[1..])? as i64))
        }
        "HEXISTS" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(hashes::hexists(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "HGETALL" => {
            require_args_result(args, 1, name)?;
            let pairs = hashes::hgetall(shared.store.db(conn.db_index)?, &args[0])?;
            Ok(Reply::Array(pairs.into_iter().flat_map(|(k, v)| [Reply::Bulk(k), Reply::Bulk(v)]).collect()))
        }
        "HKEYS" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Array(hashes::hkeys(shared.store.db(conn.db_index)?, &args[0])?.into_iter().map(Reply::Bulk).collect()))
        }
        "HVALS" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Array(hashes::hvals(shared.store.db(conn.db_index)?, &args[0])?.into_iter().map(Reply::Bulk).collect()))
        }
        "HLEN" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(hashes::hlen(shared.store.db(conn.db_index)?, &args[0])? as i64))
        }
        "HSTRLEN" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(hashes::hstrlen(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "HINCRBY" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Integer(hashes::hincrby(shared.store.db(conn.db_index)?, &args[0], &args[1], parse_i64(&args[2])?)?))
        }
        "HINCRBYFLOAT" => {
            require_args_result(args, 3, name)?;
            let v = hashes::hincrbyfloat(shared.store.db(conn.db_index)?, &args[0], &args[1], parse_f64(&args[2])?)?;
            Ok(Reply::bulk_str(strings::format_float(v)))
        }
        "HRANDFIELD" => {
            require_args_result(args, 1, name)?;
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?;
            Ok(Reply::Array(hashes::hrandfield(shared.store.db(conn.db_index)?, &args[0], count)?.into_iter().map(Reply::Bulk).collect()))
        }

        // Lists
        "LPUSH" | "RPUSH" | "LPUSHX" | "RPUSHX" => {
            require_args_result(args, 2, name)?;
            let side = if name.starts_with('L') { Side::Left } else { Side::Right };
            let xx = name.ends_with('X');
            match lists::push(shared.store.db(conn.db_index)?, &args[0], side, &args[1..], xx)? {
                Some(len) => Ok(Reply::Integer(len as i64)),
                None => Ok(Reply::Integer(0)),
            }
        }
        "LPOP" | "RPOP" => {
            require_args_result(args, 1, name)?;
            let side = if name == "LPOP" { Side::Left } else { Side::Right };
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?;
            let popped = lists::pop(shared.store.db(conn.db_index)?, &args[0], side, count.map(|c| c as usize))?;
            Ok(match count {
                None => popped.into_iter().next().map(Reply::Bulk).unwrap_or(Reply::NullBulk),
                Some(_) if popped.is_empty() => Reply::NullArray,
                Some(_) => Reply::Array(popped.into_iter().map(Reply::Bulk).collect()),
            })
        }
        "LLEN" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(lists::llen(shared.store.db(conn.db_index)?, &args[0])? as i64))
        }
        "LRANGE" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Array(lists::lrange(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, parse_i64(&args[2])?)?.into_iter().map(Reply::Bulk).collect()))
        }
        "LINDEX" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::from_bulk_opt(lists::lindex(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?)?))
        }
        "LSET" => {
            require_args_result(args, 3, name)?;
            lists::lset(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, args[2].clone())?;
            Ok(Reply::ok())
        }
        "LTRIM" => {
            require_args_result(args, 3, name)?;
            lists::ltrim(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, parse_i64(&args[2])?)?;
            Ok(Reply::ok())
        }
        "LREM" => {
            require_args_result(args, 3, name)?;
            Ok(Reply::Integer(lists::lrem(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, &args[2])? as i64))
        }
        "LINSERT" => {
            require_args_result(args, 4, name)?;
            let before = arg_str(&args[1]).eq_ignore_ascii_case("BEFORE");
            Ok(Reply::Integer(lists::linsert(shared.store.db(conn.db_index)?, &args[0], before, &args[2], args[3].clone())?))
        }

        // Sets
        "SADD" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(sets::sadd(shared.store.db(conn.db_index)?, &args[0], &args[1..])? as i64))
        }
        "SREM" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(sets::srem(shared.store.db(conn.db_index)?, &args[0], &args[1..])? as i64))
        }
        "SISMEMBER" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(sets::sismember(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "SMISMEMBER" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Array(sets::smismember(shared.store.db(conn.db_index)?, &args[0], &args[1..])?.into_iter().map(|b| Reply::Integer(b as i64)).collect()))
        }
        "SMEMBERS" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Array(sets::smembers(shared.store.db(conn.db_index)?, &args[0])?.into_iter().map(Reply::Bulk).collect()))
        }
        "SCARD" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(sets::scard(shared.store.db(conn.db_index)?, &args[0])? as i64))
        }
        "SPOP" => {
            require_args_result(args, 1, name)?;
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?;
            let popped = sets::spop(shared.store.db(conn.db_index)?, &args[0], count.map(|c| c as usize))?;
            Ok(match count {
                None => popped.into_iter().next().map(Reply::Bulk).unwrap_or(Reply::NullBulk),
                Some(_) => Reply::Array(popped.into_iter().map(Reply::Bulk).collect()),
            })
        }
        "SRANDMEMBER" => {
            require_args_result(args, 1, name)?;
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?;
            let result = sets::srandmember(shared.store.db(conn.db_index)?, &args[0], count)?;
            Ok(match count {
                None => result.into_iter().next().map(Reply::Bulk).unwrap_or(Reply::NullBulk),
                Some(_) => Reply::Array(result.into_iter().map(Reply::Bulk).collect()),
            })
        }
        "SUNION" | "SINTER" | "SDIFF" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            let result = match name {
                "SUNION" => sets::sunion(db, args)?,
                "SINTER" => sets::sinter(db, args)?,
                _ => sets::sdiff(db, args)?,
            };
            Ok(Reply::Array(result.into_iter().map(Reply::Bulk).collect()))
        }
        "SUNIONSTORE" | "SINTERSTORE" | "SDIFFSTORE" => {
            require_args_result(args, 2, name)?;
            let db = shared.store.db(conn.db_index)?;
            let result = match name {
                "SUNIONSTORE" => sets::sunion(db, &args[1..])?,
                "SINTERSTORE" => sets::sinter(db, &args[1..])?,
                _ => sets::sdiff(db, &args[1..])?,
            };
            Ok(Reply::Integer(sets::store_result(db, &args[0], result) as i64))
        }
        "SMOVE" => {
            require_args_result(args, 3, name)?;
            let db = shared.store.db(conn.db_index)?;
            if sets::sismember(db, &args[0], &args[2])? {
                sets::srem(db, &args[0], std::slice::from_ref(&args[2]))?;
                sets::sadd(db, &args[1], std::slice::from_ref(&args[2]))?;
                Ok(Reply::Integer(1))
            } else {
                Ok(Reply::Integer(0))
            }
        }

        // Sorted sets
        "ZADD" => zadd_command(shared, conn, args),
        "ZSCORE" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::from_bulk_opt(sortedset::zscore(shared.store.db(conn.db_index)?, &args[0], &args[1])?.map(|s| Bytes::from(strings::format_float(s)))))
        }
        "ZMSCORE" => {
            require_args_result(args, 2, name)?;
            let scores = sortedset::zmscore(shared.store.db(conn.db_index)?, &args[0], &args[1..])?;
            Ok(Reply::Array(scores.into_iter().map(|s| Reply::from_bulk_opt(s.map(|s| Bytes::from(strings::format_float(s))))).collect()))
        }
        "ZCARD" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(sortedset::zcard(shared.store.db(conn.db_index)?, &args[0])? as i64))
        }
        "ZRANK" | "ZREVRANK" => {
            require_args_result(args, 2, name)?;
            let rank = sortedset::zrank(shared.store.db(conn.db_index)?, &args[0], &args[1], name == "ZREVRANK")?;
            Ok(rank.map(|r| Reply::Integer(r as i64)).unwrap_or(Reply::NullBulk))
        }
        "ZREM" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(sortedset::zrem(shared.store.db(conn.db_index)?, &args[0], &args[1..])? as i64))
        }
        "ZINCRBY" => {
            require_args_result(args, 3, name)?;
            let v = sortedset::zincrby(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])?, &args[2])?;
            Ok(Reply::bulk_str(strings::format_float(v)))
        }
        "ZRANGE" | "ZREVRANGE" => {
            require_args_result(args, 3, name)?;
            let with_scores = args.iter().any(|a| arg_str(a).eq_ignore_ascii_case("WITHSCORES"));
            let items = sortedset::zrange_by_rank(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])?, parse_i64(&args[2])?, name == "ZREVRANGE")?;
            Ok(zset_reply(items, with_scores))
        }
        "ZRANGEBYSCORE" | "ZREVRANGEBYSCORE" => {
            require_args_result(args, 3, name)?;
            let reverse = name == "ZREVRANGEBYSCORE";
            let (min_arg, max_arg) = if reverse { (&args[2], &args[1]) } else { (&args[1], &args[2]) };
            let (min, min_inc) = parse_score_bound(min_arg)?;
            let (max, max_inc) = parse_score_bound(max_arg)?;
            let with_scores = args.iter().any(|a| arg_str(a).eq_ignore_ascii_case("WITHSCORES"));
            let limit = parse_limit(&args[3..])?;
            let items = sortedset::zrange_by_score(shared.store.db(conn.db_index)?, &args[0], min, min_inc, max, max_inc, reverse, limit)?;
            Ok(zset_reply(items, with_scores))
        }
        "ZCOUNT" => {
            require_args_result(args, 3, name)?;
            let (min, min_inc) = parse_score_bound(&args[1])?;
            let (max, max_inc) = parse_score_bound(&args[2])?;
            Ok(Reply::Integer(sortedset::zcount(shared.store.db(conn.db_index)?, &args[0], min, min_inc, max, max_inc)? as i64))
        }
        "ZPOPMIN" | "ZPOPMAX" => {
            require_args_result(args, 1, name)?;
            let side = if name == "ZPOPMIN" { PopSide::Min } else { PopSide::Max };
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?.unwrap_or(1) as usize;
            let items = sortedset::zpop(shared.store.db(conn.db_index)?, &args[0], side, count)?;
            Ok(zset_reply(items, true))
        }
        "ZRANDMEMBER" => {
            require_args_result(args, 1, name)?;
            let count = args.get(1).map(|a| parse_i64(a)).transpose()?;
            let with_scores = args.len() > 2 && arg_str(&args[2]).eq_ignore_ascii_case("WITHSCORES");
            let items = sortedset::zrandmember(shared.store.db(conn.db_index)?, &args[0], count)?;
            Ok(match count {
                None => items.into_iter().next().map(|(m, _)| Reply::Bulk(m)).unwrap_or(Reply::NullBulk),
                Some(_) => zset_reply(items, with_scores),
            })
        }

        // Transactions
        "MULTI" => {
            conn.tx_state.multi()?;
            Ok(Reply::ok())
        }
        "DISCARD" => {
            conn.tx_state.discard()?;
            Ok(Reply::ok())
        }
        "WATCH" => {
            require_args_result(args, 1, name)?;
            for key in args {
                conn.tx_state.watch(&shared.store, conn.db_index, key)?;
            }
            Ok(Reply::ok())
        }
        "UNWATCH" => {
            conn.tx_state.unwatch();
            Ok(Reply::ok())
        }
        "EXEC" => exec_command(shared, conn).await,
        "RESET" => {
            conn.tx_state.discard().ok();
            conn.tx_state.unwatch();
            shared.pubsub.unsubscribe_all(conn.subscriber_id);
            conn.channels.clear();
            conn.patterns.clear();
            conn.db_index = 0;
            conn.identity = if shared.auth.requires_auth() { None } else { Some(crate::auth::Identity::default_user()) };
            Ok(Reply::Simple("RESET".to_string()))
        }

        // Pub/Sub
        "SUBSCRIBE" | "PSUBSCRIBE" => subscribe(shared, conn, name, args),
        "UNSUBSCRIBE" | "PUNSUBSCRIBE" => unsubscribe(shared, conn, name, args),
        "PUBLISH" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(shared.pubsub.publish(&args[0], args[1].clone()) as i64))
        }
        "PUBSUB" => pubsub_admin(shared, args),

        // Streams
        "XADD" => xadd(shared, conn, args),
        "XLEN" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            Ok(Reply::Integer(db.with_value(&args[0], |v| v.as_stream().ok_or(RedisError::WrongType).map(|s| s.len() as i64)).unwrap_or(0)))
        }
        "XRANGE" | "XREVRANGE" => xrange(shared, conn, name, args),
        "XDEL" => {
            require_args_result(args, 2, name)?;
            let ids: Vec<StreamId> = args[1..].iter().map(|a| StreamId::parse(&arg_str(a), 0)).collect::<RedisResult<_>>()?;
            let db = shared.store.db(conn.db_index)?;
            let removed = match db.mutate_existing(&args[0], |v| Ok(v_stream_mut(v)?.xdel(&ids))) {
                Ok(n) => n,
                Err(RedisError::NoSuchKey) => 0,
                Err(e) => return Err(e),
            };
            db.delete_if_empty_collection(&args[0]);
            Ok(Reply::Integer(removed as i64))
        }
        "XGROUP" => xgroup(shared, conn, args),
        "XACK" => {
            require_args_result(args, 3, name)?;
            let ids: Vec<StreamId> = args[2..].iter().map(|a| StreamId::parse(&arg_str(a), 0)).collect::<RedisResult<_>>()?;
            let acked = match shared.store.db(conn.db_index)?.mutate_existing(&args[0], |v| Ok(v_stream_mut(v)?.xack(&args[1], &ids))) {
                Ok(n) => n,
                Err(RedisError::NoSuchKey) => 0,
                Err(e) => return Err(e),
            };
            Ok(Reply::Integer(acked as i64))
        }
        "XREADGROUP" => xreadgroup(shared, conn, args),
        "XREAD" => xread(shared, conn, args),
        "XTRIM" => {
            require_args_result(args, 3, name)?;
            let strategy = arg_str(&args[1]).to_uppercase();
            let threshold = if arg_str(&args[2]).eq_ignore_ascii_case("~") || arg_str(&args[2]).eq_ignore_ascii_case("=") {
                args.get(3).ok_or(RedisError::Syntax)?
            } else {
                &args[2]
            };
            let db = shared.store.db(conn.db_index)?;
            let removed = db.mutate_existing(&args[0], |v| {
                let s = v_stream_mut(v)?;
                match strategy.as_str() {
                    "MAXLEN" => Ok(s.xtrim_maxlen(parse_i64(threshold)? as usize)),
                    "MINID" => Ok(s.xtrim_minid(StreamId::parse(&arg_str(threshold), 0)?)),
                    _ => Err(RedisError::Syntax),
                }
            });
            let removed = match removed {
                Ok(n) => n,
                Err(RedisError::NoSuchKey) => 0,
                Err(e) => return Err(e),
            };
            db.delete_if_empty_collection(&args[0]);
            Ok(Reply::Integer(removed as i64))
        }
        "XSETID" => {
            require_args_result(args, 2, name)?;
            let id = StreamId::parse(&arg_str(&args[1]), 0)?;
            shared.store.db(conn.db_index)?.mutate_existing(&args[0], |v| {
                let s = v_stream_mut(v)?;
                s.last_id = id;
                Ok(())
            })?;
            Ok(Reply::ok())
        }
        "XPENDING" => xpending(shared, conn, args),
        "XCLAIM" => xclaim(shared, conn, args),
        "XAUTOCLAIM" => xautoclaim(shared, conn, args),
        "XINFO" => xinfo(shared, conn, args),

        // Server introspection and compatibility niceties
        "INFO" => Ok(info_reply(shared)),
        "CONFIG" => config_command(shared, args),
        "CLIENT" => client_command(conn, args),
        "READONLY" | "READWRITE" => Ok(Reply::ok()),

        // Extra string/list surface
        "GETEX" => getex(shared, conn, args),
        "RPOPLPUSH" => {
            require_args_result(args, 2, name)?;
            let db = shared.store.db(conn.db_index)?;
            let popped = lists::pop(db, &args[0], Side::Right, Some(1))?;
            match popped.into_iter().next() {
                Some(v) => {
                    lists::push(db, &args[1], Side::Left, std::slice::from_ref(&v), false)?;
                    Ok(Reply::Bulk(v))
                }
                None => Ok(Reply::NullBulk),
            }
        }

        // Pass-through families
        "PFADD" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(passthrough::pfadd(shared.store.db(conn.db_index)?, &args[0], &args[1..])? as i64))
        }
        "PFCOUNT" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(passthrough::pfcount(shared.store.db(conn.db_index)?, args)? as i64))
        }
        "PFMERGE" => {
            require_args_result(args, 1, name)?;
            passthrough::pfmerge(shared.store.db(conn.db_index)?, &args[0], &args[1..])?;
            Ok(Reply::ok())
        }
        "BF.RESERVE" => {
            require_args_result(args, 2, name)?;
            passthrough::bf_reserve(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])? as usize)?;
            Ok(Reply::ok())
        }
        "BF.ADD" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(passthrough::bf_add(shared.store.db(conn.db_index)?, &args[0], args[1].clone())? as i64))
        }
        "BF.EXISTS" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(passthrough::bf_exists(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "CF.RESERVE" => {
            require_args_result(args, 2, name)?;
            passthrough::cf_reserve(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])? as usize)?;
            Ok(Reply::ok())
        }
        "CF.ADD" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(passthrough::cf_add(shared.store.db(conn.db_index)?, &args[0], args[1].clone())? as i64))
        }
        "CF.EXISTS" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(passthrough::cf_exists(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "CF.DEL" => {
            require_args_result(args, 2, name)?;
            Ok(Reply::Integer(passthrough::cf_del(shared.store.db(conn.db_index)?, &args[0], &args[1])? as i64))
        }
        "TDIGEST.CREATE" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::ok())
        }
        "TDIGEST.ADD" => {
            require_args_result(args, 2, name)?;
            let values: Vec<f64> = args[1..].iter().map(parse_f64).collect::<RedisResult<_>>()?;
            passthrough::tdigest_add(shared.store.db(conn.db_index)?, &args[0], &values)?;
            Ok(Reply::ok())
        }
        "TDIGEST.QUANTILE" => {
            require_args_result(args, 2, name)?;
            let q = parse_f64(&args[1])?;
            let v = passthrough::tdigest_quantile(shared.store.db(conn.db_index)?, &args[0], q)?;
            Ok(v.map(|v| Reply::bulk_str(strings::format_float(v))).unwrap_or(Reply::NullBulk))
        }
        "TOPK.RESERVE" => {
            require_args_result(args, 2, name)?;
            passthrough::topk_reserve(shared.store.db(conn.db_index)?, &args[0], parse_i64(&args[1])? as usize);
            Ok(Reply::ok())
        }
        "TOPK.ADD" => {
            require_args_result(args, 2, name)?;
            let evicted = passthrough::topk_add(shared.store.db(conn.db_index)?, &args[0], &args[1..])?;
            Ok(Reply::Array(evicted.into_iter().map(Reply::from_bulk_opt).collect()))
        }
        "TOPK.LIST" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Array(passthrough::topk_list(shared.store.db(conn.db_index)?, &args[0])?.into_iter().map(Reply::Bulk).collect()))
        }
        "VSET" => {
            require_args_result(args, 2, name)?;
            let vector: Vec<f32> = args[1..].iter().map(|a| parse_f64(a).map(|f| f as f32)).collect::<RedisResult<_>>()?;
            passthrough::vadd(shared.store.db(conn.db_index)?, &args[0], vector)?;
            Ok(Reply::ok())
        }
        "VGET" => {
            require_args_result(args, 1, name)?;
            let v = passthrough::vget(shared.store.db(conn.db_index)?, &args[0])?;
            Ok(match v {
                Some(vec) => Reply::Array(vec.into_iter().map(|f| Reply::bulk_str(strings::format_float(f as f64))).collect()),
                None => Reply::NullArray,
            })
        }
        "VDIM" => {
            require_args_result(args, 1, name)?;
            let v = passthrough::vget(shared.store.db(conn.db_index)?, &args[0])?;
            Ok(match v {
                Some(vec) => Reply::Integer(vec.len() as i64),
                None => Reply::NullBulk,
            })
        }
        "VDEL" => {
            require_args_result(args, 1, name)?;
            Ok(Reply::Integer(shared.store.db(conn.db_index)?.del(&args[0]) as i64))
        }
        "VSEARCH" => {
            require_args_result(args, 1, name)?;
            let db = shared.store.db(conn.db_index)?;
            let pattern = [args[0].as_ref(), b"*" as &[u8]].concat();
            let keys = db
                .keys_matching(&pattern)
                .into_iter()
                .filter(|k| matches!(db.get_opt(k), Some(crate::value::Value::Vector(_))))
                .collect::<Vec<_>>();
            Ok(Reply::Array(keys.into_iter().map(Reply::Bulk).collect()))
        }
        "VSIM" => {
            require_args_result(args, 3, name)?;
            let count = parse_i64(&args[1])? as usize;
            let query: Vec<f32> = args[2..].iter().map(|a| parse_f64(a).map(|f| f as f32)).collect::<RedisResult<_>>()?;
            let db = shared.store.db(conn.db_index)?;
            let keys = db.keys_matching(b"*");
            let results = passthrough::vsim(db, &keys, &query, count)?;
            Ok(Reply::Array(results.into_iter().flat_map(|(k, s)| [Reply::Bulk(k), Reply::bulk_str(strings::format_float(s as f64))]).collect()))
        }
        "TS.CREATE" => {
            require_args_result(args, 1, name)?;
            let retention = args.get(1).map(|a| parse_i64(a)).transpose()?.unwrap_or(0);
            passthrough::ts_create(shared.store.db(conn.db_index)?, &args[0], retention, Vec::new());
            Ok(Reply::ok())
        }
        "TS.ADD" => {
            require_args_result(args, 3, name)?;
            let ts = if arg_str(&args[1]) == "*" { -1 } else { parse_i64(&args[1])? };
            let v = passthrough::ts_add(shared.store.db(conn.db_index)?, &args[0], ts, parse_f64(&args[2])?)?;
            Ok(Reply::Integer(v))
        }
        "TS.RANGE" => {
            require_args_result(args, 3, name)?;
            let from = if arg_str(&args[1]) == "-" { i64::MIN } else { parse_i64(&args[1])? };
            let to = if arg_str(&args[2]) == "+" { i64::MAX } else { parse_i64(&args[2])? };
            let samples = passthrough::ts_range(shared.store.db(conn.db_index)?, &args[0], from, to)?;
            Ok(Reply::Array(samples.into_iter().map(|(t, v)| Reply::Array(vec![Reply::Integer(t), Reply::bulk_str(strings::format_float(v))])).collect()))
        }
        "TS.GET" => {
            require_args_result(args, 1, name)?;
            let sample = passthrough::ts_get(shared.store.db(conn.db_index)?, &args[0])?;
            Ok(match sample {
                Some((t, v)) => Reply::Array(vec![Reply::Integer(t), Reply::bulk_str(strings::format_float(v))]),
                None => Reply::Array(Vec::new()),
            })
        }
        "TS.INCRBY" => {
            require_args_result(args, 2, name)?;
            let t = passthrough::ts_incrby(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])?)?;
            Ok(Reply::Integer(t))
        }
        "TS.DECRBY" => {
            require_args_result(args, 2, name)?;
            let t = passthrough::ts_decrby(shared.store.db(conn.db_index)?, &args[0], parse_f64(&args[1])?)?;
            Ok(Reply::Integer(t))
        }
        "TS.REVRANGE" => {
            require_args_result(args, 3, name)?;
            let from = if arg_str(&args[1]) == "-" { i64::MIN } else { parse_i64(&args[1])? };
            let to = if arg_str(&args[2]) == "+" { i64::MAX } else { parse_i64(&args[2])? };
            let samples = passthrough::ts_revrange(shared.store.db(conn.db_index)?, &args[0], from, to)?;
            Ok(Reply::Array(samples.into_iter().map(|(t, v)| Reply::Array(vec![Reply::Integer(t), Reply::bulk_str(strings::format_float(v))])).collect()))
        }
        "TS.MRANGE" => {
            require_args_result(args, 3, name)?;
            let from = if arg_str(&args[0]) == "-" { i64::MIN } else { parse_i64(&args[0])? };
            let to = if arg_str(&args[1]) == "+" { i64::MAX } else { parse_i64(&args[1])? };
            let db = shared.store.db(conn.db_index)?;
            let filter_pos = args.iter().position(|a| arg_str(a).eq_ignore_ascii_case("FILTER")).map(|i| i + 1).unwrap_or(2);
            let keys = &args[filter_pos..];
            let series = passthrough::ts_mrange(db, keys, from, to)?;
            Ok(Reply::Array(
                series
                    .into_iter()
                    .map(|(k, samples)| {
                        Reply::Array(vec![
                            Reply::Bulk(k),
                            Reply::Array(Vec::new()),
                            Reply::Array(samples.into_iter().map(|(t, v)| Reply::Array(vec![Reply::Integer(t), Reply::bulk_str(strings::format_float(v))])).collect()),
                        ])
                    })
                    .collect(),
            ))
        }
        "TS.DEL" => {
            require_args_result(args, 3, name)?;
            let from = parse_i64(&args[1])?;
            let to = parse_i64(&args[2])?;
            Ok(Reply::Integer(passthrough::ts_del(shared.store.db(conn.db_index)?, &args[0], from, to)? as i64))
        }
        "TS.INFO" => {
            require_args_result(args, 1, name)?;
            let info = passthrough::ts_info(shared.store.db(conn.db_index)?, &args[0])?;
            Ok(match info {
                Some((count, retention, labels)) => Reply::Array(vec![
                    Reply::bulk_str("totalSamples"),
                    Reply::Integer(count as i64),
                    Reply::bulk_str("retentionTime"),
                    Reply::Integer(retention),
                    Reply::bulk_str("labels"),
                    Reply::Array(labels.into_iter().flat_map(|(k, v)| [Reply::Bulk(k), Reply::Bulk(v)]).collect()),
                ]),
                None => return Err(RedisError::NoSuchKey),
            })
        }
        "JSON.SET" => {
            require_args_result(args, 3, name)?;
            let value: serde_json::Value = serde_json::from_slice(&args[2]).map_err(|_| RedisError::InvalidArgument("invalid JSON".into()))?;
            passthrough::json_set(shared.store.db(conn.db_index)?, &args[0], &arg_str(&args[1]), value)?;
            Ok(Reply::ok())
        }
        "JSON.GET" => {
            require_args_result(args, 1, name)?;
            let path = args.get(1).map(arg_str).unwrap_or_else(|| "$".to_string());
            let v = passthrough::json_get(shared.store.db(conn.db_index)?, &args[0], &path)?;
            Ok(v.map(|v| Reply::bulk_str(v.to_string())).unwrap_or(Reply::NullBulk))
        }
        "JSON.DEL" => {
            require_args_result(args, 1, name)?;
            let path = args.get(1).map(arg_str).unwrap_or_else(|| "$".to_string());
            Ok(Reply::Integer(passthrough::json_del(shared.store.db(conn.db_index)?, &args[0], &path)? as i64))
        }

        _ => Err(RedisError::UnknownCommand(name.to_lowercase(), args.first().map(arg_str).unwrap_or_default())),
    }
}

fn require_args_result(args: &[Bytes], min: usize, name: &str) -> RedisResult<()> {
    if args.len() < min {
        Err(RedisError::WrongArity(name.to_lowercase()))
    } else {
        Ok(())
    }
}

async fn auth(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "AUTH")?;
    let (username, password) = if args.len() >= 2 { (Some(arg_str(&args[0])), arg_str(&args[1])) } else { (None, arg_str(&args[0])) };
    let identity = shared.auth.authenticate(username.as_deref(), &password).await?;
    conn.identity = Some(identity);
    Ok(Reply::ok())
}

async fn hello(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    let mut i = 0;
    if i < args.len() && arg_str(&args[i]).parse::<u32>().is_ok() {
        i += 1;
    }
    while i < args.len() {
        if arg_str(&args[i]).eq_ignore_ascii_case("AUTH") && i + 2 < args.len() {
            let username = arg_str(&args[i + 1]);
            let password = arg_str(&args[i + 2]);
            let identity = shared.auth.authenticate(Some(&username), &password).await?;
            conn.identity = Some(identity);
            i += 3;
        } else {
            i += 1;
        }
    }
    if conn.identity.is_none() && shared.auth.requires_auth() {
        return Err(RedisError::NoAuth);
    }
    Ok(Reply::Array(vec![
        Reply::bulk_str("server"),
        Reply::bulk_str("redberry"),
        Reply::bulk_str("proto"),
        Reply::Integer(2),
        Reply::bulk_str("mode"),
        Reply::bulk_str("standalone"),
    ]))
}

fn expire(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 2, name)?;
    let n = parse_i64(&args[1])?;
    let at_ms = match name {
        "EXPIRE" => now_ms() + n * 1000,
        "PEXPIRE" => now_ms() + n,
        "EXPIREAT" => n * 1000,
        _ => n,
    };
    Ok(Reply::Integer(shared.store.db(conn.db_index)?.set_expire_at(&args[0], Some(at_ms)) as i64))
}

fn set_command(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 2, "SET")?;
    let mut opts = crate::store::strings::SetOpts::default();
    let mut i = 2;
    while i < args.len() {
        let tok = arg_str(&args[i]).to_uppercase();
        match tok.as_str() {
            "NX" => opts.nx = true,
            "XX" => opts.xx = true,
            "GET" => opts.get = true,
            "KEEPTTL" => opts.keep_ttl = true,
            "EX" => {
                i += 1;
                opts.expire_at_ms = Some(now_ms() + parse_i64(args.get(i).ok_or(RedisError::Syntax)?)? * 1000);
            }
            "PX" => {
                i += 1;
                opts.expire_at_ms = Some(now_ms() + parse_i64(args.get(i).ok_or(RedisError::Syntax)?)?);
            }
            "EXAT" => {
                i += 1;
                opts.expire_at_ms = Some(parse_i64(args.get(i).ok_or(RedisError::Syntax)?)? * 1000);
            }
            "PXAT" => {
                i += 1;
                opts.expire_at_ms = Some(parse_i64(args.get(i).ok_or(RedisError::Syntax)?)?);
            }
            _ => return Err(RedisError::Syntax),
        }
        i += 1;
    }
    let (applied, old) = strings::set(shared.store.db(conn.db_index)?, &args[0], args[1].clone(), opts)?;
    if args.iter().any(|a| arg_str(a).eq_ignore_ascii_case("GET")) {
        return Ok(Reply::from_bulk_opt(old));
    }
    Ok(if applied { Reply::ok() } else { Reply::NullBulk })
}

fn bitfield(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "BITFIELD")?;
    let db = shared.store.db(conn.db_index)?;
    let key = &args[0];
    let mut i = 1;
    let mut overflow = Overflow::Wrap;
    let mut results = Vec::new();
    while i < args.len() {
        let op = arg_str(&args[i]).to_uppercase();
        match op.as_str() {
            "OVERFLOW" => {
                i += 1;
                overflow = match arg_str(args.get(i).ok_or(RedisError::Syntax)?).to_uppercase().as_str() {
                    "WRAP" => Overflow::Wrap,
                    "SAT" => Overflow::Sat,
                    "FAIL" => Overflow::Fail,
                    _ => return Err(RedisError::Syntax),
                };
                i += 1;
            }
            "GET" | "SET" | "INCRBY" => {
                let ty = parse_bitfield_type(args.get(i + 1).ok_or(RedisError::Syntax)?)?;
                let offset = parse_bitfield_offset(args.get(i + 2).ok_or(RedisError::Syntax)?, ty.bits)?;
                if op == "GET" {
                    results.push(Reply::Integer(bitops::bitfield_get(db, key, ty, offset)?));
                    i += 3;
                } else if op == "SET" {
                    let value = parse_i64(args.get(i + 3).ok_or(RedisError::Syntax)?)?;
                    let r = bitops::bitfield_set(db, key, ty, offset, value, overflow)?;
                    results.push(r.map(Reply::Integer).unwrap_or(Reply::NullBulk));
                    i += 4;
                } else {
                    let delta = parse_i64(args.get(i + 3).ok_or(RedisError::Syntax)?)?;
                    let r = bitops::bitfield_incrby(db, key, ty, offset, delta, overflow)?;
                    results.push(r.map(Reply::Integer).unwrap_or(Reply::NullBulk));
                    i += 4;
                }
            }
            _ => return Err(RedisError::Syntax),
        }
    }
    Ok(Reply::Array(results))
}

fn parse_bitfield_type(b: &Bytes) -> RedisResult<BitFieldType> {
    let s = arg_str(b);
    let (signed, rest) = match s.chars().next() {
        Some('i') => (true, &s[1..]),
        Some('u') => (false, &s[1..]),
        _ => return Err(RedisError::Syntax),
    };
    let bits: u32 = rest.parse().map_err(|_| RedisError::Syntax)?;
    if bits == 0 || bits > 64 || (!signed && bits == 64) {
        return Err(RedisError::InvalidArgument("Invalid bitfield type".into()));
    }
    Ok(BitFieldType { signed, bits })
}

fn parse_bitfield_offset(b: &Bytes, bits: u32) -> RedisResult<u64> {
    let s = arg_str(b);
    if let Some(rest) = s.strip_prefix('#') {
        let n: u64 = rest.parse().map_err(|_| RedisError::Syntax)?;
        Ok(bitops::resolve_offset(true, n, bits))
    } else {
        s.parse().map_err(|_| RedisError::Syntax)
    }
}

fn parse_score_bound(b: &Bytes) -> RedisResult<(f64, bool)> {
    let s = arg_str(b);
    match s.as_str() {
        "-inf" => Ok((f64::NEG_INFINITY, true)),
        "+inf" | "inf" => Ok((f64::INFINITY, true)),
        _ if s.starts_with('(') => Ok((s[1..].parse().map_err(|_| RedisError::NotAFloat)?, false)),
        _ => Ok((s.parse().map_err(|_| RedisError::NotAFloat)?, true)),
    }
}

fn parse_limit(args: &[Bytes]) -> RedisResult<Option<(usize, usize)>> {
    if args.is_empty() {
        return Ok(None);
    }
    if args.len() >= 3 && arg_str(&args[0]).eq_ignore_ascii_case("LIMIT") {
        Ok(Some((parse_i64(&args[1])? as usize, parse_i64(&args[2])? as usize)))
    } else {
        Ok(None)
    }
}

fn zset_reply(items: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    if with_scores {
        Reply::Array(items.into_iter().flat_map(|(m, s)| [Reply::Bulk(m), Reply::bulk_str(strings::format_float(s))]).collect())
    } else {
        Reply::Array(items.into_iter().map(|(m, _)| Reply::Bulk(m)).collect())
    }
}

fn zadd_command(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 3, "ZADD")?;
    let mut opts = ZaddOpts::default();
    let mut i = 1;
    while i < args.len() {
        let tok = arg_str(&args[i]).to_uppercase();
        match tok.as_str() {
            "NX" => opts.nx = true,
            "XX" => opts.xx = true,
            "GT" => opts.gt = true,
            "LT" => opts.lt = true,
            "CH" => opts.ch = true,
            "INCR" => opts.incr = true,
            _ => break,
        }
        i += 1;
    }
    let rest = &args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(RedisError::Syntax);
    }
    let pairs: Vec<(f64, Bytes)> = rest.chunks(2).map(|c| Ok((parse_f64(&c[0])?, c[1].clone()))).collect::<RedisResult<_>>()?;
    let (count, incr_result) = sortedset::zadd(shared.store.db(conn.db_index)?, &args[0], &pairs, &opts)?;
    if opts.incr {
        Ok(incr_result.map(|v| Reply::bulk_str(strings::format_float(v))).unwrap_or(Reply::NullBulk))
    } else {
        Ok(Reply::Integer(count as i64))
    }
}

async fn exec_command(shared: &ServerShared, conn: &mut Connection) -> RedisResult<Reply> {
    let Some(queued) = conn.tx_state.exec(&shared.store)? else {
        return Ok(Reply::NullArray);
    };
    let mut results = Vec::with_capacity(queued.len());
    for (cmd_name, cmd_args) in queued {
        let name = cmd_name.to_ascii_uppercase();
        let name = String::from_utf8_lossy(&name).to_string();
        results.push(Box::pin(dispatch(shared, conn, &name, &cmd_args)).await);
    }
    Ok(Reply::Array(results))
}

fn subscribe(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, name)?;
    let is_pattern = name == "PSUBSCRIBE";
    let mut replies = Vec::new();
    for channel in args {
        if is_pattern {
            shared.pubsub.psubscribe(channel.clone(), conn.subscriber_id, conn.pubsub_tx.clone());
            conn.patterns.insert(channel.clone());
        } else {
            shared.pubsub.subscribe(channel.clone(), conn.subscriber_id, conn.pubsub_tx.clone());
            conn.channels.insert(channel.clone());
        }
        let total = conn.channels.len() + conn.patterns.len();
        replies.push(Reply::Array(vec![
            Reply::bulk_str(if is_pattern { "psubscribe" } else { "subscribe" }),
            Reply::Bulk(channel.clone()),
            Reply::Integer(total as i64),
        ]));
    }
    Ok(Reply::Array(replies))
}

fn unsubscribe(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> RedisResult<Reply> {
    let is_pattern = name == "PUNSUBSCRIBE";
    let targets: Vec<Bytes> =
        if args.is_empty() { if is_pattern { conn.patterns.iter().cloned().collect() } else { conn.channels.iter().cloned().collect() } } else { args.to_vec() };
    let mut replies = Vec::new();
    for channel in &targets {
        if is_pattern {
            shared.pubsub.punsubscribe(channel, conn.subscriber_id);
            conn.patterns.remove(channel);
        } else {
            shared.pubsub.unsubscribe(channel, conn.subscriber_id);
            conn.channels.remove(channel);
        }
        let total = conn.channels.len() + conn.patterns.len();
        replies.push(Reply::Array(vec![
            Reply::bulk_str(if is_pattern { "punsubscribe" } else { "unsubscribe" }),
            Reply::Bulk(channel.clone()),
            Reply::Integer(total as i64),
        ]));
    }
    if replies.is_empty() {
        replies.push(Reply::Array(vec![
            Reply::bulk_str(if is_pattern { "punsubscribe" } else { "unsubscribe" }),
            Reply::NullBulk,
            Reply::Integer(0),
        ]));
    }
    Ok(Reply::Array(replies))
}

fn pubsub_admin(shared: &ServerShared, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "PUBSUB")?;
    match arg_str(&args[0]).to_uppercase().as_str() {
        "CHANNELS" => {
            let pattern = args.get(1);
            Ok(Reply::Array(shared.pubsub.channels_matching(pattern.map(|b| b.as_ref())).into_iter().map(Reply::Bulk).collect()))
        }
        "NUMSUB" => Ok(Reply::Array(
            args[1..].iter().flat_map(|c| [Reply::Bulk(c.clone()), Reply::Integer(shared.pubsub.numsub(c) as i64)]).collect(),
        )),
        "NUMPAT" => Ok(Reply::Integer(shared.pubsub.numpat() as i64)),
        _ => Err(RedisError::Syntax),
    }
}

fn v_stream_mut(v: &mut crate::value::Value) -> RedisResult<&mut crate::streams::StreamData> {
    match v {
        crate::value::Value::Stream(s) => Ok(s),
        _ => Err(RedisError::WrongType),
    }
}

fn xadd(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 4, "XADD")?;
    let key = &args[0];
    let id_spec = arg_str(&args[1]);
    let fields = &args[2..];
    if fields.is_empty() || fields.len() % 2 != 0 {
        return Err(RedisError::Syntax);
    }
    let field_pairs: Vec<(Bytes, Bytes)> = fields.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    let db = shared.store.db(conn.db_index)?;
    let now = now_ms() as u64;
    let id = db.mutate_or_insert(
        key,
        || crate::value::Value::Stream(crate::streams::StreamData::default()),
        |v| {
            let s = v_stream_mut(v)?;
            let id = s.next_id(&id_spec, now)?;
            Ok(s.xadd(id, field_pairs))
        },
    )?;
    Ok(Reply::bulk_str(id.format()))
}

fn xrange(shared: &ServerShared, conn: &mut Connection, name: &str, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 3, name)?;
    let reverse = name == "XREVRANGE";
    let (start_arg, end_arg) = if reverse { (&args[2], &args[1]) } else { (&args[1], &args[2]) };
    let start = StreamId::parse(&arg_str(start_arg), 0)?;
    let end = StreamId::parse(&arg_str(end_arg), u64::MAX)?;
    let count = parse_limit_count(&args[3..])?;
    let db = shared.store.db(conn.db_index)?;
    let entries = db.with_value(&args[0], |v| {
        let s = v.as_stream().ok_or(RedisError::WrongType)?;
        Ok(if reverse { s.xrevrange(start, end, count) } else { s.xrange(start, end, count) })
    });
    let entries = match entries {
        Ok(e) => e,
        Err(RedisError::NoSuchKey) => Vec::new(),
        Err(e) => return Err(e),
    };
    Ok(Reply::Array(entries.into_iter().map(stream_entry_reply).collect()))
}

fn parse_limit_count(args: &[Bytes]) -> RedisResult<Option<usize>> {
    if args.len() >= 2 && arg_str(&args[0]).eq_ignore_ascii_case("COUNT") {
        Ok(Some(parse_i64(&args[1])? as usize))
    } else {
        Ok(None)
    }
}

fn stream_entry_reply(entry: crate::streams::StreamEntry) -> Reply {
    let fields = entry.fields.into_iter().flat_map(|(k, v)| [Reply::Bulk(k), Reply::Bulk(v)]).collect();
    Reply::Array(vec![Reply::bulk_str(entry.id.format()), Reply::Array(fields)])
}

fn xgroup(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "XGROUP")?;
    let db = shared.store.db(conn.db_index)?;
    match arg_str(&args[0]).to_uppercase().as_str() {
        "CREATE" => {
            require_args_result(args, 4, "XGROUP CREATE")?;
            let mkstream = args.iter().any(|a| arg_str(a).eq_ignore_ascii_case("MKSTREAM"));
            let start = StreamId::parse(&arg_str(&args[3]), 0)?;
            if mkstream && !db.exists(&args[1]) {
                db.set_value(&args[1], crate::value::Value::Stream(crate::streams::StreamData::default()), None);
            }
            db.mutate_existing(&args[1], |v| v_stream_mut(v)?.group_create(args[2].clone(), start, mkstream))?;
            Ok(Reply::ok())
        }
        "DESTROY" => {
            require_args_result(args, 3, "XGROUP DESTROY")?;
            let destroyed = db.mutate_existing(&args[1], |v| Ok(v_stream_mut(v)?.group_destroy(&args[2])))?;
            Ok(Reply::Integer(destroyed as i64))
        }
        "SETID" => {
            require_args_result(args, 4, "XGROUP SETID")?;
            let id = StreamId::parse(&arg_str(&args[3]), 0)?;
            let ok = db.mutate_existing(&args[1], |v| Ok(v_stream_mut(v)?.group_setid(&args[2], id)))?;
            Ok(Reply::Integer(ok as i64))
        }
        "CREATECONSUMER" => {
            require_args_result(args, 4, "XGROUP CREATECONSUMER")?;
            let ok = db.mutate_existing(&args[1], |v| Ok(v_stream_mut(v)?.group_createconsumer(&args[2], args[3].clone(), now_ms() as u64)))?;
            Ok(Reply::Integer(ok as i64))
        }
        "DELCONSUMER" => {
            require_args_result(args, 4, "XGROUP DELCONSUMER")?;
            let n = db.mutate_existing(&args[1], |v| Ok(v_stream_mut(v)?.group_delconsumer(&args[2], &args[3])))?;
            Ok(Reply::Integer(n.unwrap_or(0) as i64))
        }
        _ => Err(RedisError::Syntax),
    }
}

fn xreadgroup(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    // XREADGROUP GROUP <group> <consumer> [COUNT n] STREAMS key id
    require_args_result(args, 6, "XREADGROUP")?;
    if !arg_str(&args[0]).eq_ignore_ascii_case("GROUP") {
        return Err(RedisError::Syntax);
    }
    let group = args[1].clone();
    let consumer = args[2].clone();
    let mut i = 3;
    let mut count = None;
    if i + 1 < args.len() && arg_str(&args[i]).eq_ignore_ascii_case("COUNT") {
        count = Some(parse_i64(&args[i + 1])? as usize);
        i += 2;
    }
    if !(i < args.len() && arg_str(&args[i]).eq_ignore_ascii_case("STREAMS")) {
        return Err(RedisError::Syntax);
    }
    i += 1;
    let remaining = &args[i..];
    if remaining.len() % 2 != 0 {
        return Err(RedisError::Syntax);
    }
    let n = remaining.len() / 2;
    let keys = &remaining[..n];
    let ids = &remaining[n..];
    let db = shared.store.db(conn.db_index)?;
    let now = now_ms() as u64;
    let mut out = Vec::new();
    for (key, id_arg) in keys.iter().zip(ids.iter()) {
        let id_str = arg_str(id_arg);
        let entries = db.mutate_existing(key, |v| {
            let s = v_stream_mut(v)?;
            if id_str == ">" {
                s.group_read_new(&group, &consumer, count, now)
            } else {
                let from = StreamId::parse(&id_str, 0)?;
                s.group_read_pending(&group, &consumer, from, count)
            }
        })?;
        if !entries.is_empty() || id_str == ">" {
            out.push(Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Array(entries.into_iter().map(stream_entry_reply).collect())]));
        }
    }
    if out.is_empty() {
        Ok(Reply::NullArray)
    } else {
        Ok(Reply::Array(out))
    }
}

fn xread(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    // XREAD [COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]
    require_args_result(args, 3, "XREAD")?;
    let mut i = 0;
    let mut count = None;
    while i < args.len() {
        let tok = arg_str(&args[i]).to_uppercase();
        match tok.as_str() {
            "COUNT" => {
                count = Some(parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as usize);
                i += 2;
            }
            "BLOCK" => {
                parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)?;
                i += 2;
            }
            "STREAMS" => {
                i += 1;
                break;
            }
            _ => return Err(RedisError::Syntax),
        }
    }
    let remaining = &args[i..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(RedisError::Syntax);
    }
    let n = remaining.len() / 2;
    let keys = &remaining[..n];
    let ids = &remaining[n..];
    let db = shared.store.db(conn.db_index)?;
    let mut out = Vec::new();
    for (key, id_arg) in keys.iter().zip(ids.iter()) {
        let after = StreamId::parse(&arg_str(id_arg), u64::MAX)?;
        let entries = db.with_value(key, |v| {
            let s = v.as_stream().ok_or(RedisError::WrongType)?;
            Ok(s.xread_after(after, count))
        });
        let entries = match entries {
            Ok(e) => e,
            Err(RedisError::NoSuchKey) => Vec::new(),
            Err(e) => return Err(e),
        };
        if !entries.is_empty() {
            out.push(Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Array(entries.into_iter().map(stream_entry_reply).collect())]));
        }
    }
    if out.is_empty() {
        Ok(Reply::NullArray)
    } else {
        Ok(Reply::Array(out))
    }
}

fn pel_entry_reply(id: StreamId, consumer: Bytes, idle: u64, delivery_count: u64) -> Reply {
    Reply::Array(vec![
        Reply::bulk_str(id.format()),
        Reply::Bulk(consumer),
        Reply::Integer(idle as i64),
        Reply::Integer(delivery_count as i64),
    ])
}

fn xpending(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 2, "XPENDING")?;
    let db = shared.store.db(conn.db_index)?;
    let now = now_ms() as u64;
    if args.len() == 2 {
        let summary = db.with_value(&args[0], |v| v_stream_ref(v)?.pending_summary(&args[1]))?;
        return Ok(Reply::Array(vec![
            Reply::Integer(summary.total as i64),
            summary.min.map(|id| Reply::bulk_str(id.format())).unwrap_or(Reply::NullBulk),
            summary.max.map(|id| Reply::bulk_str(id.format())).unwrap_or(Reply::NullBulk),
            if summary.per_consumer.is_empty() {
                Reply::NullArray
            } else {
                Reply::Array(
                    summary
                        .per_consumer
                        .into_iter()
                        .map(|(c, n)| Reply::Array(vec![Reply::Bulk(c), Reply::bulk_str(n.to_string())]))
                        .collect(),
                )
            },
        ]));
    }
    // extended form: [IDLE min-idle-time] start end count [consumer]
    let mut i = 1;
    let mut min_idle = None;
    if arg_str(&args[i]).eq_ignore_ascii_case("IDLE") {
        min_idle = Some(parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as u64);
        i += 2;
    }
    let start = StreamId::parse(&arg_str(args.get(i).ok_or(RedisError::Syntax)?), 0)?;
    let end = StreamId::parse(&arg_str(args.get(i + 1).ok_or(RedisError::Syntax)?), u64::MAX)?;
    let count = parse_i64(args.get(i + 2).ok_or(RedisError::Syntax)?)? as usize;
    let consumer = args.get(i + 3).cloned();
    let entries = db.with_value(&args[0], |v| {
        v_stream_ref(v)?.pending_extended(&args[1], min_idle, start, end, count, consumer.as_deref(), now)
    })?;
    Ok(Reply::Array(entries.into_iter().map(|(id, c, idle, dc)| pel_entry_reply(id, c, idle, dc)).collect()))
}

fn v_stream_ref(v: &crate::value::Value) -> RedisResult<&crate::streams::StreamData> {
    v.as_stream().ok_or(RedisError::WrongType)
}

fn xclaim(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    // XCLAIM key group consumer min-idle-time id [id ...] [IDLE ms] [TIME ms] [RETRYCOUNT n] [FORCE] [JUSTID]
    require_args_result(args, 5, "XCLAIM")?;
    let group = args[1].clone();
    let consumer = args[2].clone();
    let min_idle_ms = parse_i64(&args[3])? as u64;
    const OPTION_KEYWORDS: &[&str] = &["IDLE", "TIME", "RETRYCOUNT", "FORCE", "JUSTID"];
    let mut ids = Vec::new();
    let mut i = 4;
    while i < args.len() {
        let tok = arg_str(&args[i]);
        if OPTION_KEYWORDS.contains(&tok.to_uppercase().as_str()) {
            break;
        }
        ids.push(StreamId::parse(&tok, 0)?);
        i += 1;
    }
    if ids.is_empty() {
        return Err(RedisError::Syntax);
    }
    let mut idle_override = None;
    let mut time_override = None;
    let mut retrycount_override = None;
    let mut force = false;
    let mut justid = false;
    while i < args.len() {
        match arg_str(&args[i]).to_uppercase().as_str() {
            "IDLE" => {
                idle_override = Some(parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as u64);
                i += 2;
            }
            "TIME" => {
                time_override = Some(parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as u64);
                i += 2;
            }
            "RETRYCOUNT" => {
                retrycount_override = Some(parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as u64);
                i += 2;
            }
            "FORCE" => {
                force = true;
                i += 1;
            }
            "JUSTID" => {
                justid = true;
                i += 1;
            }
            _ => return Err(RedisError::Syntax),
        }
    }
    let now = now_ms() as u64;
    let claimed = shared.store.db(conn.db_index)?.mutate_existing(&args[0], |v| {
        v_stream_mut(v)?.xclaim(&group, &consumer, min_idle_ms, &ids, idle_override, time_override, retrycount_override, force, now)
    })?;
    if justid {
        Ok(Reply::Array(claimed.into_iter().map(|(id, _)| Reply::bulk_str(id.format())).collect()))
    } else {
        Ok(Reply::Array(
            claimed
                .into_iter()
                .filter_map(|(id, fields)| fields.map(|f| stream_entry_reply(crate::streams::StreamEntry { id, fields: f })))
                .collect(),
        ))
    }
}

fn xautoclaim(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    // XAUTOCLAIM key group consumer min-idle-time start [COUNT n] [JUSTID]
    require_args_result(args, 5, "XAUTOCLAIM")?;
    let group = args[1].clone();
    let consumer = args[2].clone();
    let min_idle_ms = parse_i64(&args[3])? as u64;
    let start = StreamId::parse(&arg_str(&args[4]), 0)?;
    let mut count = 100usize;
    let mut justid = false;
    let mut i = 5;
    while i < args.len() {
        match arg_str(&args[i]).to_uppercase().as_str() {
            "COUNT" => {
                count = parse_i64(args.get(i + 1).ok_or(RedisError::Syntax)?)? as usize;
                i += 2;
            }
            "JUSTID" => {
                justid = true;
                i += 1;
            }
            _ => return Err(RedisError::Syntax),
        }
    }
    let now = now_ms() as u64;
    let (cursor, claimed, deleted) = shared
        .store
        .db(conn.db_index)?
        .mutate_existing(&args[0], |v| v_stream_mut(v)?.xautoclaim(&group, &consumer, min_idle_ms, start, count, now))?;
    let entries_reply = if justid {
        Reply::Array(claimed.into_iter().map(|(id, _)| Reply::bulk_str(id.format())).collect())
    } else {
        Reply::Array(
            claimed
                .into_iter()
                .filter_map(|(id, fields)| fields.map(|f| stream_entry_reply(crate::streams::StreamEntry { id, fields: f })))
                .collect(),
        )
    };
    Ok(Reply::Array(vec![
        Reply::bulk_str(cursor.format()),
        entries_reply,
        Reply::Array(deleted.into_iter().map(|id| Reply::bulk_str(id.format())).collect()),
    ]))
}

fn getex(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "GETEX")?;
    let db = shared.store.db(conn.db_index)?;
    let value = strings::get(db, &args[0])?;
    if value.is_none() {
        return Ok(Reply::NullBulk);
    }
    let mut i = 1;
    while i < args.len() {
        match arg_str(&args[i]).to_uppercase().as_str() {
            "PERSIST" => {
                db.persist(&args[0]);
            }
            "EX" => {
                i += 1;
                let at = now_ms() + parse_i64(args.get(i).ok_or(RedisError::Syntax)?)? * 1000;
                db.set_expire_at(&args[0], Some(at));
            }
            "PX" => {
                i += 1;
                let at = now_ms() + parse_i64(args.get(i).ok_or(RedisError::Syntax)?)?;
                db.set_expire_at(&args[0], Some(at));
            }
            "EXAT" => {
                i += 1;
                let at = parse_i64(args.get(i).ok_or(RedisError::Syntax)?)? * 1000;
                db.set_expire_at(&args[0], Some(at));
            }
            "PXAT" => {
                i += 1;
                let at = parse_i64(args.get(i).ok_or(RedisError::Syntax)?)?;
                db.set_expire_at(&args[0], Some(at));
            }
            _ => return Err(RedisError::Syntax),
        }
        i += 1;
    }
    Ok(Reply::from_bulk_opt(value))
}

fn info_reply(shared: &ServerShared) -> Reply {
    let uptime = shared.start_time.elapsed().as_secs();
    let keys = shared.store.db(0).map(|d| d.len()).unwrap_or(0);
    let text = format!(
        "# Server\r\nredis_version:7.4.0\r\nredberry_version:0.1.0\r\ntcp_port:0\r\nuptime_in_seconds:{uptime}\r\nrun_id:0\r\n\
# Clients\r\nconnected_clients:1\r\n\
# Replication\r\nrole:master\r\nconnected_slaves:0\r\n\
# Keyspace\r\ndb0:keys={keys},expires=0,avg_ttl=0\r\n"
    );
    Reply::Bulk(Bytes::from(text))
}

fn config_command(shared: &ServerShared, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "CONFIG")?;
    match arg_str(&args[0]).to_uppercase().as_str() {
        "GET" => {
            require_args_result(args, 2, "CONFIG GET")?;
            let pattern = arg_str(&args[1]).to_lowercase();
            let mut out = Vec::new();
            let mut push = |k: &str, v: String| {
                if pattern == "*" || pattern == k {
                    out.push(Reply::bulk_str(k));
                    out.push(Reply::bulk_str(v));
                }
            };
            push("timeout", "0".to_string());
            push("maxmemory", "0".to_string());
            push("databases", shared.store.num_dbs().to_string());
            Ok(Reply::Array(out))
        }
        "SET" => Ok(Reply::ok()),
        _ => Ok(Reply::Array(Vec::new())),
    }
}

fn client_command(conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 1, "CLIENT")?;
    match arg_str(&args[0]).to_uppercase().as_str() {
        "SETNAME" => Ok(Reply::ok()),
        "GETNAME" => Ok(Reply::Bulk(Bytes::new())),
        "SETINFO" => Ok(Reply::ok()),
        "ID" => Ok(Reply::Integer(conn.subscriber_id as i64)),
        "LIST" => Ok(Reply::Bulk(Bytes::new())),
        "NO-EVICT" | "NO-TOUCH" | "REPLY" => Ok(Reply::ok()),
        _ => Ok(Reply::ok()),
    }
}

fn xinfo(shared: &ServerShared, conn: &mut Connection, args: &[Bytes]) -> RedisResult<Reply> {
    require_args_result(args, 2, "XINFO")?;
    let db = shared.store.db(conn.db_index)?;
    let sub = arg_str(&args[0]).to_uppercase();
    let key = &args[1];
    match sub.as_str() {
        "STREAM" => db.with_value(key, |v| {
            let s = v_stream_ref(v)?;
            Ok(Reply::Array(vec![
                Reply::bulk_str("length"),
                Reply::Integer(s.len() as i64),
                Reply::bulk_str("last-generated-id"),
                Reply::bulk_str(s.last_id.format()),
                Reply::bulk_str("max-deleted-entry-id"),
                Reply::bulk_str(s.max_deleted_id.format()),
                Reply::bulk_str("entries-added"),
                Reply::Integer(s.entries_added as i64),
                Reply::bulk_str("groups"),
                Reply::Integer(s.groups.len() as i64),
            ]))
        }),
        "GROUPS" => db.with_value(key, |v| {
            let s = v_stream_ref(v)?;
            Ok(Reply::Array(
                s.groups
                    .iter()
                    .map(|(name, g)| {
                        Reply::Array(vec![
                            Reply::bulk_str("name"),
                            Reply::Bulk(name.clone()),
                            Reply::bulk_str("consumers"),
                            Reply::Integer(g.consumers.len() as i64),
                            Reply::bulk_str("pending"),
                            Reply::Integer(g.pending.len() as i64),
                            Reply::bulk_str("last-delivered-id"),
                            Reply::bulk_str(g.last_delivered_id.format()),
                        ])
                    })
                    .collect(),
            ))
        }),
        "CONSUMERS" => {
            require_args_result(args, 3, "XINFO CONSUMERS")?;
            let group = &args[2];
            let now = now_ms() as u64;
            db.with_value(key, |v| {
                let s = v_stream_ref(v)?;
                let g = s
                    .groups
                    .get(group.as_ref())
                    .ok_or_else(|| RedisError::NoGroup("key".to_string(), arg_str(group)))?;
                Ok(Reply::Array(
                    g.consumers
                        .iter()
                        .map(|(name, c)| {
                            Reply::Array(vec![
                                Reply::bulk_str("name"),
                                Reply::Bulk(name.clone()),
                                Reply::bulk_str("pending"),
                                Reply::Integer(c.pending_ids.len() as i64),
                                Reply::bulk_str("idle"),
                                Reply::Integer(now.saturating_sub(c.seen_time_ms) as i64),
                            ])
                        })
                        .collect(),
                ))
            })
        }
        _ => Err(RedisError::Syntax),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, NoAuth};
    use crate::pubsub::Registry as PubSubRegistry;
    use crate::store::Store;

    fn shared() -> ServerShared {
        ServerShared {
            store: Store::new(16),
            pubsub: PubSubRegistry::default(),
            auth: Box::new(NoAuth),
            authz: Box::new(AllowAll),
            start_time: std::time::Instant::now(),
        }
    }

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn multi_queues_commands_until_exec() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        assert_eq!(dispatch(&shared, &mut conn, "MULTI", &[]).await, Reply::ok());
        let queued = dispatch(&shared, &mut conn, "SET", &[bytes("k"), bytes("v")]).await;
        assert_eq!(queued, Reply::Simple("QUEUED".to_string()));
        let exec = dispatch(&shared, &mut conn, "EXEC", &[]).await;
        assert_eq!(exec, Reply::Array(vec![Reply::ok()]));
        let get = dispatch(&shared, &mut conn, "GET", &[bytes("k")]).await;
        assert_eq!(get, Reply::Bulk(bytes("v")));
    }

    #[tokio::test]
    async fn reset_clears_transaction_state() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "MULTI", &[]).await;
        let reset = dispatch(&shared, &mut conn, "RESET", &[]).await;
        assert_eq!(reset, Reply::Simple("RESET".to_string()));
        // no longer queueing: a plain command now runs immediately.
        let pong = dispatch(&shared, &mut conn, "PING", &[]).await;
        assert_eq!(pong, Reply::Simple("PONG".to_string()));
    }

    #[tokio::test]
    async fn getex_applies_ttl_without_losing_value() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "SET", &[bytes("k"), bytes("v")]).await;
        let got = dispatch(&shared, &mut conn, "GETEX", &[bytes("k"), bytes("EX"), bytes("100")]).await;
        assert_eq!(got, Reply::Bulk(bytes("v")));
        let ttl = dispatch(&shared, &mut conn, "TTL", &[bytes("k")]).await;
        assert_eq!(ttl, Reply::Integer(100));
    }

    #[tokio::test]
    async fn config_get_reports_timeout() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        let reply = dispatch(&shared, &mut conn, "CONFIG", &[bytes("GET"), bytes("timeout")]).await;
        assert_eq!(reply, Reply::Array(vec![Reply::bulk_str("timeout"), Reply::bulk_str("0")]));
    }

    #[tokio::test]
    async fn info_contains_keyspace_section() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        let reply = dispatch(&shared, &mut conn, "INFO", &[]).await;
        match reply {
            Reply::Bulk(b) => assert!(String::from_utf8_lossy(&b).contains("# Keyspace")),
            other => panic!("expected bulk reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn vset_vget_vdim_roundtrip() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "VSET", &[bytes("v1"), bytes("1.0"), bytes("2.0")]).await;
        let dim = dispatch(&shared, &mut conn, "VDIM", &[bytes("v1")]).await;
        assert_eq!(dim, Reply::Integer(2));
        let got = dispatch(&shared, &mut conn, "VGET", &[bytes("v1")]).await;
        assert_eq!(got, Reply::Array(vec![Reply::bulk_str("1"), Reply::bulk_str("2")]));
    }

    #[tokio::test]
    async fn xinfo_stream_reports_length() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "XADD", &[bytes("s"), bytes("*"), bytes("f"), bytes("v")]).await;
        let reply = dispatch(&shared, &mut conn, "XINFO", &[bytes("STREAM"), bytes("s")]).await;
        match reply {
            Reply::Array(fields) => assert!(fields.contains(&Reply::Integer(1))),
            other => panic!("expected array reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zadd_rejects_nan_score() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        let reply = dispatch(&shared, &mut conn, "ZADD", &[bytes("z"), bytes("nan"), bytes("member")]).await;
        assert!(matches!(reply, Reply::Error(_)));
        assert_eq!(dispatch(&shared, &mut conn, "EXISTS", &[bytes("z")]).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn zrangebyscore_still_accepts_infinite_bounds() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "ZADD", &[bytes("z"), bytes("1"), bytes("a")]).await;
        let reply =
            dispatch(&shared, &mut conn, "ZRANGEBYSCORE", &[bytes("z"), bytes("-inf"), bytes("+inf")]).await;
        assert_eq!(reply, Reply::Array(vec![Reply::bulk_str("a")]));
    }

    #[tokio::test]
    async fn xadd_failure_on_new_key_leaves_no_key_behind() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        let reply = dispatch(&shared, &mut conn, "XADD", &[bytes("s"), bytes("0-0"), bytes("f"), bytes("v")]).await;
        assert!(matches!(reply, Reply::Error(_)));
        assert_eq!(dispatch(&shared, &mut conn, "EXISTS", &[bytes("s")]).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn xdel_emptying_stream_removes_key() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "XADD", &[bytes("s"), bytes("1-0"), bytes("f"), bytes("v")]).await;
        dispatch(&shared, &mut conn, "XDEL", &[bytes("s"), bytes("1-0")]).await;
        assert_eq!(dispatch(&shared, &mut conn, "EXISTS", &[bytes("s")]).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn linsert_reports_wrongtype_instead_of_pivot_not_found() {
        let shared = shared();
        let mut conn = Connection::new(&shared);
        dispatch(&shared, &mut conn, "SET", &[bytes("k"), bytes("v")]).await;
        let reply =
            dispatch(&shared, &mut conn, "LINSERT", &[bytes("k"), bytes("BEFORE"), bytes("x"), bytes("y")]).await;
        assert!(matches!(reply, Reply::Error(_)));
    }
}
