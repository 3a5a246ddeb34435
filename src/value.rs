//! The tagged value stored under each key, plus the small per-type storage
//! structures that back it.
//!
//! Mirrors the RedisObject tagged union from the original command engine,
//! generalized to the full type surface: lists are ordered, sets unordered,
//! sorted sets ordered by score, and the probabilistic/vector/time-series
//! families round-trip as opaque blobs owned by their own command family.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::streams::StreamData;

/// Wraps a finite `f64` with a total order, so it can live in a `BTreeSet`.
/// Sorted-set commands reject non-finite scores before they ever reach this
/// type, so `partial_cmp` is infallible here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    by_score: BTreeSet<(Score, Bytes)>,
    by_member: HashMap<Bytes, f64>,
}

impl SortedSet {
    pub fn len(&self) -> usize {
        self.by_member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.by_member.get(member).copied()
    }

    /// Inserts or updates `member`'s score. Returns `true` if `member` was
    /// newly added (didn't exist before).
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        if let Some(&old) = self.by_member.get(&member) {
            self.by_score.remove(&(Score(old), member.clone()));
            self.by_score.insert((Score(score), member.clone()));
            self.by_member.insert(member, score);
            false
        } else {
            self.by_score.insert((Score(score), member.clone()));
            self.by_member.insert(member, score);
            true
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.by_member.remove(member)?;
        self.by_score.remove(&(Score(score), Bytes::copy_from_slice(member)));
        Some(score)
    }

    /// 0-based rank in ascending score order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.by_member.get(member)?;
        let key = (Score(score), Bytes::copy_from_slice(member));
        Some(self.by_score.range(..key).count())
    }

    pub fn iter_ascending(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.by_score.iter().map(|(s, m)| (m, s.0))
    }

    pub fn range_by_score(&self, min: f64, min_inclusive: bool, max: f64, max_inclusive: bool) -> Vec<(Bytes, f64)> {
        self.by_score
            .iter()
            .filter(|(s, _)| {
                let above_min = if min_inclusive { s.0 >= min } else { s.0 > min };
                let below_max = if max_inclusive { s.0 <= max } else { s.0 < max };
                above_min && below_max
            })
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        self.by_score
            .iter()
            .skip(start)
            .take(stop.saturating_sub(start) + 1)
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }
}

/// Opaque blob families that behave as single immutable documents under a
/// command-family-specific wire format. Each is type-tagged separately from
/// `String` so WRONGTYPE discipline still applies between e.g. TOPK and SET,
/// even though on the wire real Redis would store some of these as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Bloom,
    Cuckoo,
    TDigest,
    TopK,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesSample {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TimeSeriesData {
    pub samples: Vec<TimeSeriesSample>,
    pub retention_ms: i64,
    pub labels: Vec<(Bytes, Bytes)>,
}

#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
    Stream(StreamData),
    /// Probabilistic-structure blobs (Bloom/Cuckoo/t-digest/TopK): the command
    /// family owns encode/decode of `data`; the store only needs the tag for
    /// WRONGTYPE checks and size accounting.
    Blob(BlobKind, Bytes),
    Vector(Vec<f32>),
    TimeSeries(TimeSeriesData),
    Json(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::Stream(_) => "stream",
            Value::Blob(BlobKind::Bloom, _) => "MBbloom--",
            Value::Blob(BlobKind::Cuckoo, _) => "MBbloomCF",
            Value::Blob(BlobKind::TDigest, _) => "TDIS",
            Value::Blob(BlobKind::TopK, _) => "MBbloomTopK",
            Value::Vector(_) => "vector",
            Value::TimeSeries(_) => "TSDB-TYPE",
            Value::Json(_) => "ReJSON-RL",
        }
    }

    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&VecDeque<Bytes>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashMap<Bytes, Bytes>> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&HashSet<Bytes>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSet> {
        match self {
            Value::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamData> {
        match self {
            Value::Stream(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_set_rank_and_range() {
        let mut z = SortedSet::default();
        z.insert(Bytes::from_static(b"a"), 1.0);
        z.insert(Bytes::from_static(b"b"), 2.0);
        z.insert(Bytes::from_static(b"c"), 1.5);
        assert_eq!(z.rank(b"a"), Some(0));
        assert_eq!(z.rank(b"c"), Some(1));
        assert_eq!(z.rank(b"b"), Some(2));
        let members: Vec<Bytes> = z.iter_ascending().map(|(m, _)| m.clone()).collect();
        assert_eq!(members, vec![Bytes::from_static(b"a"), Bytes::from_static(b"c"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn sorted_set_reinsert_updates_score() {
        let mut z = SortedSet::default();
        assert!(z.insert(Bytes::from_static(b"a"), 1.0));
        assert!(!z.insert(Bytes::from_static(b"a"), 5.0));
        assert_eq!(z.score(b"a"), Some(5.0));
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn type_names_distinguish_blob_kinds() {
        let v1 = Value::Blob(BlobKind::Bloom, Bytes::new());
        let v2 = Value::Blob(BlobKind::TopK, Bytes::new());
        assert_ne!(v1.type_name(), v2.type_name());
    }
}
