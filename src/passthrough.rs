//! Opaque pass-through command families: HyperLogLog, Bloom/Cuckoo filters,
//! t-digest, Top-K, vectors, time series, and JSON documents.
//!
//! These never need deep algorithmic fidelity to ship a wire-compatible
//! surface — each stores a small serializable model behind the family's type
//! tag and implements just the operations that round-trip through it.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};

use crate::error::{RedisError, RedisResult};
use crate::store::Database;
use crate::value::{BlobKind, TimeSeriesData, TimeSeriesSample, Value};

fn hash64(item: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    item.hash(&mut h);
    h.finish()
}

/// HyperLogLog is stored under the ordinary `String` type tag (as in real
/// Redis); the payload here is a serialized exact set of item hashes rather
/// than a true HLL register array, trading memory-boundedness for exact
/// cardinality within this server's scope.
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct HllState {
    hashes: HashSet<u64>,
}

const HLL_MAGIC: &[u8] = b"HYLL";

fn load_hll(db: &Database, key: &[u8]) -> RedisResult<HllState> {
    match db.get_opt(key) {
        Some(Value::String(b)) if b.starts_with(HLL_MAGIC) => {
            Ok(serde_json::from_slice(&b[HLL_MAGIC.len()..]).unwrap_or_default())
        }
        Some(Value::String(_)) => Err(RedisError::InvalidArgument("WRONGTYPE Key is not a valid HyperLogLog string value.".into())),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(HllState::default()),
    }
}

fn store_hll(db: &Database, key: &[u8], state: &HllState) {
    let mut buf = HLL_MAGIC.to_vec();
    buf.extend_from_slice(&serde_json::to_vec(state).unwrap_or_default());
    db.set_value(key, Value::String(Bytes::from(buf)), None);
}

pub fn pfadd(db: &Database, key: &[u8], elements: &[Bytes]) -> RedisResult<bool> {
    let mut state = load_hll(db, key)?;
    let before = state.hashes.len();
    for e in elements {
        state.hashes.insert(hash64(e));
    }
    let changed = state.hashes.len() != before || (elements.is_empty() && !db.exists(key));
    store_hll(db, key, &state);
    Ok(changed)
}

pub fn pfcount(db: &Database, keys: &[Bytes]) -> RedisResult<usize> {
    let mut union = HashSet::new();
    for k in keys {
        union.extend(load_hll(db, k)?.hashes);
    }
    Ok(union.len())
}

pub fn pfmerge(db: &Database, dest: &[u8], sources: &[Bytes]) -> RedisResult<()> {
    let mut state = load_hll(db, dest)?;
    for k in sources {
        state.hashes.extend(load_hll(db, k)?.hashes);
    }
    store_hll(db, dest, &state);
    Ok(())
}

/// Bloom/Cuckoo filters: modeled as an exact membership set. Like the
/// HyperLogLog shim above, this sacrifices the probabilistic space bound for
/// correctness within the scope this server targets.
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct FilterState {
    members: HashSet<Bytes>,
    capacity: usize,
}

fn load_filter(db: &Database, key: &[u8], kind: BlobKind) -> RedisResult<FilterState> {
    match db.get_opt(key) {
        Some(Value::Blob(k, b)) if k == kind => Ok(serde_json::from_slice(&b).unwrap_or_default()),
        Some(Value::Blob(_, _)) => Err(RedisError::WrongType),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(FilterState::default()),
    }
}

fn store_filter(db: &Database, key: &[u8], kind: BlobKind, state: &FilterState) {
    let bytes = Bytes::from(serde_json::to_vec(state).unwrap_or_default());
    db.set_value(key, Value::Blob(kind, bytes), None);
}

pub fn bf_reserve(db: &Database, key: &[u8], capacity: usize) -> RedisResult<()> {
    if db.exists(key) {
        return Err(RedisError::Other("item exists".into()));
    }
    store_filter(db, key, BlobKind::Bloom, &FilterState { members: HashSet::new(), capacity });
    Ok(())
}

pub fn bf_add(db: &Database, key: &[u8], item: Bytes) -> RedisResult<bool> {
    let mut state = load_filter(db, key, BlobKind::Bloom)?;
    let added = state.members.insert(item);
    store_filter(db, key, BlobKind::Bloom, &state);
    Ok(added)
}

pub fn bf_exists(db: &Database, key: &[u8], item: &[u8]) -> RedisResult<bool> {
    Ok(load_filter(db, key, BlobKind::Bloom)?.members.contains(item))
}

pub fn cf_reserve(db: &Database, key: &[u8], capacity: usize) -> RedisResult<()> {
    if db.exists(key) {
        return Err(RedisError::Other("item exists".into()));
    }
    store_filter(db, key, BlobKind::Cuckoo, &FilterState { members: HashSet::new(), capacity });
    Ok(())
}

pub fn cf_add(db: &Database, key: &[u8], item: Bytes) -> RedisResult<bool> {
    let mut state = load_filter(db, key, BlobKind::Cuckoo)?;
    let added = state.members.insert(item);
    store_filter(db, key, BlobKind::Cuckoo, &state);
    Ok(added)
}

pub fn cf_exists(db: &Database, key: &[u8], item: &[u8]) -> RedisResult<bool> {
    Ok(load_filter(db, key, BlobKind::Cuckoo)?.members.contains(item))
}

pub fn cf_del(db: &Database, key: &[u8], item: &[u8]) -> RedisResult<bool> {
    let mut state = load_filter(db, key, BlobKind::Cuckoo)?;
    let removed = state.members.remove(item);
    store_filter(db, key, BlobKind::Cuckoo, &state);
    Ok(removed)
}

/// t-digest: modeled as the full sorted sample set rather than compressed
/// centroids, so quantile queries are exact for the scope of this server.
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct TDigestState {
    samples: Vec<f64>,
}

fn load_tdigest(db: &Database, key: &[u8]) -> RedisResult<TDigestState> {
    match db.get_opt(key) {
        Some(Value::Blob(BlobKind::TDigest, b)) => Ok(serde_json::from_slice(&b).unwrap_or_default()),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(TDigestState::default()),
    }
}

fn store_tdigest(db: &Database, key: &[u8], state: &TDigestState) {
    let bytes = Bytes::from(serde_json::to_vec(state).unwrap_or_default());
    db.set_value(key, Value::Blob(BlobKind::TDigest, bytes), None);
}

pub fn tdigest_add(db: &Database, key: &[u8], values: &[f64]) -> RedisResult<()> {
    let mut state = load_tdigest(db, key)?;
    state.samples.extend_from_slice(values);
    store_tdigest(db, key, &state);
    Ok(())
}

pub fn tdigest_quantile(db: &Database, key: &[u8], q: f64) -> RedisResult<Option<f64>> {
    let mut state = load_tdigest(db, key)?;
    if state.samples.is_empty() {
        return Ok(None);
    }
    state.samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((q * (state.samples.len() - 1) as f64).round() as usize).min(state.samples.len() - 1);
    Ok(Some(state.samples[idx]))
}

/// Top-K: an exact frequency counter over all seen items, reporting the
/// highest-frequency `k` on `TOPK.LIST`.
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct TopKState {
    k: usize,
    counts: HashMap<Bytes, u64>,
}

fn load_topk(db: &Database, key: &[u8]) -> RedisResult<TopKState> {
    match db.get_opt(key) {
        Some(Value::Blob(BlobKind::TopK, b)) => Ok(serde_json::from_slice(&b).unwrap_or_default()),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(TopKState::default()),
    }
}

fn store_topk(db: &Database, key: &[u8], state: &TopKState) {
    let bytes = Bytes::from(serde_json::to_vec(state).unwrap_or_default());
    db.set_value(key, Value::Blob(BlobKind::TopK, bytes), None);
}

pub fn topk_reserve(db: &Database, key: &[u8], k: usize) {
    store_topk(db, key, &TopKState { k, counts: HashMap::new() });
}

pub fn topk_add(db: &Database, key: &[u8], items: &[Bytes]) -> RedisResult<Vec<Option<Bytes>>> {
    let mut state = load_topk(db, key)?;
    if state.k == 0 {
        state.k = 10;
    }
    let mut evicted = Vec::with_capacity(items.len());
    for item in items {
        *state.counts.entry(item.clone()).or_insert(0) += 1;
        if state.counts.len() > state.k.max(1) * 4 {
            if let Some((min_item, _)) = state.counts.iter().min_by_key(|(_, c)| **c).map(|(i, c)| (i.clone(), *c)) {
                state.counts.remove(&min_item);
                evicted.push(Some(min_item));
                continue;
            }
        }
        evicted.push(None);
    }
    store_topk(db, key, &state);
    Ok(evicted)
}

pub fn topk_list(db: &Database, key: &[u8]) -> RedisResult<Vec<Bytes>> {
    let state = load_topk(db, key)?;
    let mut items: Vec<(Bytes, u64)> = state.counts.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1));
    items.truncate(state.k.max(1));
    Ok(items.into_iter().map(|(i, _)| i).collect())
}

/// Vectors: cosine-similarity search over a flat map of stored embeddings.
pub fn vadd(db: &Database, key: &[u8], vector: Vec<f32>) -> RedisResult<()> {
    db.set_value(key, Value::Vector(vector), None);
    Ok(())
}

pub fn vget(db: &Database, key: &[u8]) -> RedisResult<Option<Vec<f32>>> {
    match db.get_opt(key) {
        Some(Value::Vector(v)) => Ok(Some(v)),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(None),
    }
}

pub fn vsim(db: &Database, keys: &[Bytes], query: &[f32], count: usize) -> RedisResult<Vec<(Bytes, f32)>> {
    let mut scored: Vec<(Bytes, f32)> = Vec::new();
    for k in keys {
        if let Some(Value::Vector(v)) = db.get_opt(k) {
            scored.push((k.clone(), cosine_similarity(&v, query)));
        }
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(count);
    Ok(scored)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Time series: an append-only, timestamp-sorted sample list.
pub fn ts_create(db: &Database, key: &[u8], retention_ms: i64, labels: Vec<(Bytes, Bytes)>) {
    db.set_value(key, Value::TimeSeries(TimeSeriesData { samples: Vec::new(), retention_ms, labels }), None);
}

pub fn ts_add(db: &Database, key: &[u8], timestamp_ms: i64, value: f64) -> RedisResult<i64> {
    db.mutate_or_insert(
        key,
        || Value::TimeSeries(TimeSeriesData::default()),
        |v| {
            let ts = match v {
                Value::TimeSeries(ts) => ts,
                _ => return Err(RedisError::WrongType),
            };
            let actual_ts = if timestamp_ms < 0 { crate::store::now_ms() } else { timestamp_ms };
            ts.samples.push(TimeSeriesSample { timestamp_ms: actual_ts, value });
            ts.samples.sort_by_key(|s| s.timestamp_ms);
            if ts.retention_ms > 0 {
                let cutoff = crate::store::now_ms() - ts.retention_ms;
                ts.samples.retain(|s| s.timestamp_ms >= cutoff);
            }
            Ok(actual_ts)
        },
    )
}

pub fn ts_range(db: &Database, key: &[u8], from_ms: i64, to_ms: i64) -> RedisResult<Vec<(i64, f64)>> {
    match db.get_opt(key) {
        Some(Value::TimeSeries(ts)) => Ok(ts
            .samples
            .iter()
            .filter(|s| s.timestamp_ms >= from_ms && s.timestamp_ms <= to_ms)
            .map(|s| (s.timestamp_ms, s.value))
            .collect()),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(Vec::new()),
    }
}

pub fn ts_get(db: &Database, key: &[u8]) -> RedisResult<Option<(i64, f64)>> {
    match db.get_opt(key) {
        Some(Value::TimeSeries(ts)) => Ok(ts.samples.last().map(|s| (s.timestamp_ms, s.value))),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(None),
    }
}

fn ts_step(db: &Database, key: &[u8], delta: f64) -> RedisResult<i64> {
    db.mutate_or_insert(
        key,
        || Value::TimeSeries(TimeSeriesData::default()),
        |v| {
            let ts = match v {
                Value::TimeSeries(ts) => ts,
                _ => return Err(RedisError::WrongType),
            };
            let base = ts.samples.last().map(|s| s.value).unwrap_or(0.0);
            let now = crate::store::now_ms();
            ts.samples.push(TimeSeriesSample { timestamp_ms: now, value: base + delta });
            Ok(now)
        },
    )
}

pub fn ts_incrby(db: &Database, key: &[u8], delta: f64) -> RedisResult<i64> {
    ts_step(db, key, delta)
}

pub fn ts_decrby(db: &Database, key: &[u8], delta: f64) -> RedisResult<i64> {
    ts_step(db, key, -delta)
}

pub fn ts_revrange(db: &Database, key: &[u8], from_ms: i64, to_ms: i64) -> RedisResult<Vec<(i64, f64)>> {
    let mut samples = ts_range(db, key, from_ms, to_ms)?;
    samples.reverse();
    Ok(samples)
}

pub fn ts_mrange(db: &Database, keys: &[Bytes], from_ms: i64, to_ms: i64) -> RedisResult<Vec<(Bytes, Vec<(i64, f64)>)>> {
    keys.iter().map(|k| Ok((k.clone(), ts_range(db, k, from_ms, to_ms)?))).collect()
}

pub fn ts_del(db: &Database, key: &[u8], from_ms: i64, to_ms: i64) -> RedisResult<usize> {
    db.mutate_existing(key, |v| {
        let ts = match v {
            Value::TimeSeries(ts) => ts,
            _ => return Err(RedisError::WrongType),
        };
        let before = ts.samples.len();
        ts.samples.retain(|s| s.timestamp_ms < from_ms || s.timestamp_ms > to_ms);
        Ok(before - ts.samples.len())
    })
    .or(Ok(0))
}

pub fn ts_info(db: &Database, key: &[u8]) -> RedisResult<Option<(usize, i64, Vec<(Bytes, Bytes)>)>> {
    match db.get_opt(key) {
        Some(Value::TimeSeries(ts)) => Ok(Some((ts.samples.len(), ts.retention_ms, ts.labels))),
        Some(_) => Err(RedisError::WrongType),
        None => Ok(None),
    }
}

/// JSON documents: whole-document get/set plus top-level field paths
/// (`$.field`, `$` for the root). Nested path expressions beyond one level
/// are out of scope.
pub fn json_set(db: &Database, key: &[u8], path: &str, value: serde_json::Value) -> RedisResult<()> {
    if path == "$" || path == "." {
        db.set_value(key, Value::Json(value), None);
        return Ok(());
    }
    let field = path.trim_start_matches("$.").trim_start_matches('.');
    db.mutate_or_insert(
        key,
        || Value::Json(serde_json::Value::Object(Default::default())),
        |v| {
            let doc = match v {
                Value::Json(j) => j,
                _ => return Err(RedisError::WrongType),
            };
            if let serde_json::Value::Object(map) = doc {
                map.insert(field.to_string(), value);
                Ok(())
            } else {
                Err(RedisError::InvalidArgument("path does not exist".into()))
            }
        },
    )
}

pub fn json_get(db: &Database, key: &[u8], path: &str) -> RedisResult<Option<serde_json::Value>> {
    let doc = match db.get_opt(key) {
        Some(Value::Json(j)) => j,
        Some(_) => return Err(RedisError::WrongType),
        None => return Ok(None),
    };
    if path == "$" || path == "." {
        return Ok(Some(doc));
    }
    let field = path.trim_start_matches("$.").trim_start_matches('.');
    Ok(doc.get(field).cloned())
}

pub fn json_del(db: &Database, key: &[u8], path: &str) -> RedisResult<usize> {
    if path == "$" || path == "." {
        return Ok(db.del(key) as usize);
    }
    let field = path.trim_start_matches("$.").trim_start_matches('.').to_string();
    db.mutate_existing(key, |v| {
        let doc = match v {
            Value::Json(j) => j,
            _ => return Err(RedisError::WrongType),
        };
        if let serde_json::Value::Object(map) = doc {
            Ok(map.remove(&field).map(|_| 1).unwrap_or(0))
        } else {
            Ok(0)
        }
    })
    .or(Ok(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfadd_pfcount_roundtrip() {
        let db = Database::default();
        pfadd(&db, b"hll", &[Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"a")]).unwrap();
        assert_eq!(pfcount(&db, &[Bytes::from_static(b"hll")]).unwrap(), 2);
    }

    #[test]
    fn pfmerge_unions_sources() {
        let db = Database::default();
        pfadd(&db, b"a", &[Bytes::from_static(b"x")]).unwrap();
        pfadd(&db, b"b", &[Bytes::from_static(b"y")]).unwrap();
        pfmerge(&db, b"dest", &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]).unwrap();
        assert_eq!(pfcount(&db, &[Bytes::from_static(b"dest")]).unwrap(), 2);
    }

    #[test]
    fn bloom_add_and_exists() {
        let db = Database::default();
        assert!(bf_add(&db, b"bf", Bytes::from_static(b"x")).unwrap());
        assert!(bf_exists(&db, b"bf", b"x").unwrap());
        assert!(!bf_exists(&db, b"bf", b"y").unwrap());
    }

    #[test]
    fn tdigest_quantile_of_sorted_samples() {
        let db = Database::default();
        tdigest_add(&db, b"td", &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(tdigest_quantile(&db, b"td", 1.0).unwrap(), Some(5.0));
        assert_eq!(tdigest_quantile(&db, b"td", 0.0).unwrap(), Some(1.0));
    }

    #[test]
    fn vsim_ranks_by_cosine_similarity() {
        let db = Database::default();
        vadd(&db, b"v1", vec![1.0, 0.0]).unwrap();
        vadd(&db, b"v2", vec![0.0, 1.0]).unwrap();
        let results = vsim(&db, &[Bytes::from_static(b"v1"), Bytes::from_static(b"v2")], &[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, Bytes::from_static(b"v1"));
    }

    #[test]
    fn json_roundtrip_top_level_field() {
        let db = Database::default();
        json_set(&db, b"doc", "$", serde_json::json!({"a": 1})).unwrap();
        json_set(&db, b"doc", "$.b", serde_json::json!(2)).unwrap();
        assert_eq!(json_get(&db, b"doc", "$.b").unwrap(), Some(serde_json::json!(2)));
        assert_eq!(json_del(&db, b"doc", "$.a").unwrap(), 1);
    }
}
