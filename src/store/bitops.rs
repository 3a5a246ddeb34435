//! Bit-level commands over string values: SETBIT/GETBIT/BITCOUNT/BITPOS/
//! BITOP/BITFIELD.

use bytes::Bytes;

use super::Database;
use crate::error::{RedisError, RedisResult};
use crate::value::Value;

fn get_bytes(db: &Database, key: &[u8]) -> RedisResult<Bytes> {
    match db.get_opt(key) {
        Some(Value::String(b)) => Ok(b),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(Bytes::new()),
    }
}

pub fn setbit(db: &Database, key: &[u8], offset: usize, bit: u8) -> RedisResult<u8> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::new()),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let byte_idx = offset / 8;
            let bit_idx = 7 - (offset % 8);
            let mut buf = s.to_vec();
            if buf.len() <= byte_idx {
                buf.resize(byte_idx + 1, 0);
            }
            let old = (buf[byte_idx] >> bit_idx) & 1;
            if bit == 1 {
                buf[byte_idx] |= 1 << bit_idx;
            } else {
                buf[byte_idx] &= !(1 << bit_idx);
            }
            *s = Bytes::from(buf);
            Ok(old)
        },
    )
}

pub fn getbit(db: &Database, key: &[u8], offset: usize) -> RedisResult<u8> {
    let b = get_bytes(db, key)?;
    let byte_idx = offset / 8;
    if byte_idx >= b.len() {
        return Ok(0);
    }
    let bit_idx = 7 - (offset % 8);
    Ok((b[byte_idx] >> bit_idx) & 1)
}

pub fn bitcount(db: &Database, key: &[u8], range: Option<(i64, i64, bool)>) -> RedisResult<i64> {
    let b = get_bytes(db, key)?;
    match range {
        None => Ok(b.iter().map(|byte| byte.count_ones() as i64).sum()),
        Some((start, end, is_bit_range)) => {
            if is_bit_range {
                let total_bits = b.len() as i64 * 8;
                let (s, e) = normalize_range(start, end, total_bits);
                if s > e {
                    return Ok(0);
                }
                let mut count = 0i64;
                for i in s..=e {
                    let byte_idx = (i / 8) as usize;
                    let bit_idx = 7 - (i % 8) as usize;
                    if byte_idx < b.len() && (b[byte_idx] >> bit_idx) & 1 == 1 {
                        count += 1;
                    }
                }
                Ok(count)
            } else {
                let slice = crate::store::strings::slice_range(&b, start, end);
                Ok(slice.iter().map(|byte| byte.count_ones() as i64).sum())
            }
        }
    }
}

fn normalize_range(start: i64, end: i64, len: i64) -> (i64, i64) {
    if len == 0 {
        return (0, -1);
    }
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    (norm(start), norm(end).min(len - 1))
}

pub fn bitpos(db: &Database, key: &[u8], target_bit: u8, start: Option<i64>, end: Option<i64>, end_given: bool) -> RedisResult<i64> {
    let b = get_bytes(db, key)?;
    let total_bits = b.len() as i64 * 8;
    let (s, e) = normalize_range(start.unwrap_or(0), end.unwrap_or(-1), total_bits);
    if s > e {
        return Ok(-1);
    }
    for i in s..=e {
        let byte_idx = (i / 8) as usize;
        let bit_idx = 7 - (i % 8) as usize;
        let bit = (b[byte_idx] >> bit_idx) & 1;
        if bit == target_bit {
            return Ok(i);
        }
    }
    if target_bit == 0 && !end_given {
        return Ok(total_bits);
    }
    Ok(-1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOpKind {
    And,
    Or,
    Xor,
    Not,
}

pub fn bitop(db: &Database, op: BitOpKind, dest: &[u8], sources: &[Bytes]) -> RedisResult<usize> {
    let srcs: Vec<Bytes> = sources.iter().map(|k| get_bytes(db, k)).collect::<RedisResult<_>>()?;
    if op == BitOpKind::Not && srcs.len() != 1 {
        return Err(RedisError::InvalidArgument("BITOP NOT must be called with a single source key".into()));
    }
    let max_len = srcs.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = vec![0u8; max_len];
    match op {
        BitOpKind::Not => {
            let s = &srcs[0];
            for i in 0..max_len {
                result[i] = !s.get(i).copied().unwrap_or(0);
            }
        }
        BitOpKind::And => {
            for i in 0..max_len {
                let mut acc = 0xFFu8;
                for s in &srcs {
                    acc &= s.get(i).copied().unwrap_or(0);
                }
                result[i] = acc;
            }
        }
        BitOpKind::Or => {
            for i in 0..max_len {
                let mut acc = 0u8;
                for s in &srcs {
                    acc |= s.get(i).copied().unwrap_or(0);
                }
                result[i] = acc;
            }
        }
        BitOpKind::Xor => {
            for i in 0..max_len {
                let mut acc = 0u8;
                for s in &srcs {
                    acc ^= s.get(i).copied().unwrap_or(0);
                }
                result[i] = acc;
            }
        }
    }
    if result.is_empty() {
        db.del(dest);
    } else {
        db.set_value(dest, Value::String(Bytes::from(result.clone())), None);
    }
    Ok(result.len())
}

#[derive(Debug, Clone, Copy)]
pub enum Overflow {
    Wrap,
    Sat,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct BitFieldType {
    pub signed: bool,
    pub bits: u32,
}

/// Resolves a `#N` relative offset (`N * bits`) or an absolute bit offset.
pub fn resolve_offset(spec_is_hash: bool, n: u64, ty_bits: u32) -> u64 {
    if spec_is_hash {
        n * ty_bits as u64
    } else {
        n
    }
}

pub fn bitfield_get(db: &Database, key: &[u8], ty: BitFieldType, offset: u64) -> RedisResult<i64> {
    let b = get_bytes(db, key)?;
    Ok(read_bits(&b, offset, ty))
}

fn read_bits(buf: &[u8], offset: u64, ty: BitFieldType) -> i64 {
    let mut raw: u64 = 0;
    for i in 0..ty.bits as u64 {
        let bit_pos = offset + i;
        let byte_idx = (bit_pos / 8) as usize;
        let bit_idx = 7 - (bit_pos % 8) as usize;
        let bit = buf.get(byte_idx).map(|b| (b >> bit_idx) & 1).unwrap_or(0) as u64;
        raw = (raw << 1) | bit;
    }
    if ty.signed && ty.bits < 64 && (raw & (1 << (ty.bits - 1))) != 0 {
        (raw as i64) - (1i64 << ty.bits)
    } else {
        raw as i64
    }
}

fn write_bits(buf: &mut Vec<u8>, offset: u64, ty: BitFieldType, value: u64) {
    let needed_bytes = ((offset + ty.bits as u64) as usize).div_ceil(8);
    if buf.len() < needed_bytes {
        buf.resize(needed_bytes, 0);
    }
    for i in 0..ty.bits as u64 {
        let bit_pos = offset + i;
        let byte_idx = (bit_pos / 8) as usize;
        let bit_idx = 7 - (bit_pos % 8) as usize;
        let bit = (value >> (ty.bits as u64 - 1 - i)) & 1;
        if bit == 1 {
            buf[byte_idx] |= 1 << bit_idx;
        } else {
            buf[byte_idx] &= !(1 << bit_idx);
        }
    }
}

fn clamp(ty: BitFieldType, value: i128, overflow: Overflow) -> Option<i64> {
    let (min, max) = if ty.signed {
        (-(1i128 << (ty.bits - 1)), (1i128 << (ty.bits - 1)) - 1)
    } else {
        (0, (1i128 << ty.bits) - 1)
    };
    if value >= min && value <= max {
        return Some(value as i64);
    }
    match overflow {
        Overflow::Fail => None,
        Overflow::Sat => Some(if value < min { min as i64 } else { max as i64 }),
        Overflow::Wrap => {
            let range = max - min + 1;
            let mut wrapped = (value - min) % range;
            if wrapped < 0 {
                wrapped += range;
            }
            Some((wrapped + min) as i64)
        }
    }
}

pub fn bitfield_set(db: &Database, key: &[u8], ty: BitFieldType, offset: u64, value: i64, overflow: Overflow) -> RedisResult<Option<i64>> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::new()),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let old = read_bits(s, offset, ty);
            let Some(clamped) = clamp(ty, value as i128, overflow) else { return Ok(None) };
            let mut buf = s.to_vec();
            write_bits(&mut buf, offset, ty, clamped as u64 & mask(ty.bits));
            *s = Bytes::from(buf);
            Ok(Some(old))
        },
    )
}

pub fn bitfield_incrby(db: &Database, key: &[u8], ty: BitFieldType, offset: u64, delta: i64, overflow: Overflow) -> RedisResult<Option<i64>> {
    db.mutate_or_insert(
        key,
        || Value::String(Bytes::new()),
        |v| {
            let s = match v {
                Value::String(b) => b,
                _ => return Err(RedisError::WrongType),
            };
            let old = read_bits(s, offset, ty);
            let Some(clamped) = clamp(ty, old as i128 + delta as i128, overflow) else { return Ok(None) };
            let mut buf = s.to_vec();
            write_bits(&mut buf, offset, ty, clamped as u64 & mask(ty.bits));
            *s = Bytes::from(buf);
            Ok(Some(clamped))
        },
    )
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setbit_getbit_roundtrip() {
        let db = Database::default();
        assert_eq!(setbit(&db, b"k", 7, 1).unwrap(), 0);
        assert_eq!(getbit(&db, b"k", 7).unwrap(), 1);
        assert_eq!(getbit(&db, b"k", 0).unwrap(), 0);
    }

    #[test]
    fn bitcount_whole_string() {
        let db = Database::default();
        db.set_value(b"k", Value::String(Bytes::from_static(b"foobar")), None);
        assert_eq!(bitcount(&db, b"k", None).unwrap(), 26);
    }

    #[test]
    fn bitfield_overflow_wrap_and_sat() {
        let db = Database::default();
        let ty = BitFieldType { signed: false, bits: 8 };
        bitfield_set(&db, b"k", ty, 0, 255, Overflow::Wrap).unwrap();
        let wrapped = bitfield_incrby(&db, b"k", ty, 0, 10, Overflow::Wrap).unwrap().unwrap();
        assert_eq!(wrapped, 9);
        let db2 = Database::default();
        bitfield_set(&db2, b"k", ty, 0, 255, Overflow::Wrap).unwrap();
        let sat = bitfield_incrby(&db2, b"k", ty, 0, 10, Overflow::Sat).unwrap().unwrap();
        assert_eq!(sat, 255);
    }

    #[test]
    fn bitop_and_or_xor_not() {
        let db = Database::default();
        db.set_value(b"a", Value::String(Bytes::from_static(b"abc")), None);
        db.set_value(b"b", Value::String(Bytes::from_static(b"abd")), None);
        let len = bitop(&db, BitOpKind::Xor, b"dest", &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap();
        assert_eq!(len, 3);
    }
}
