//! The stream engine: append-only per-key logs with monotonic ids, range
//! scans, and consumer-group pending-entry bookkeeping.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::{RedisError, RedisResult};

pub type FieldVec = Vec<(Bytes, Bytes)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId { ms: u64::MAX, seq: u64::MAX };

    pub fn format(&self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }

    /// Parses a full `ms-seq` id, a bare `ms` (seq defaults per `default_seq`),
    /// or the special tokens `-`/`+`.
    pub fn parse(s: &str, default_seq: u64) -> Result<StreamId, RedisError> {
        match s {
            "-" => return Ok(StreamId::MIN),
            "+" => return Ok(StreamId::MAX),
            _ => {}
        }
        let mut parts = s.splitn(2, '-');
        let ms_part = parts.next().unwrap_or("");
        let ms: u64 = ms_part
            .parse()
            .map_err(|_| RedisError::InvalidArgument("Invalid stream ID specified as stream command argument".into()))?;
        let seq = match parts.next() {
            Some(seq_part) => seq_part
                .parse()
                .map_err(|_| RedisError::InvalidArgument("Invalid stream ID specified as stream command argument".into()))?,
            None => default_seq,
        };
        Ok(StreamId { ms, seq })
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: FieldVec,
}

#[derive(Debug, Clone)]
pub struct PelEntry {
    pub consumer: Bytes,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Consumer {
    pub pending_ids: HashSet<StreamId>,
    pub seen_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConsumerGroup {
    pub last_delivered_id: StreamId,
    pub consumers: HashMap<Bytes, Consumer>,
    pub pending: BTreeMap<StreamId, PelEntry>,
}

impl ConsumerGroup {
    fn new(start: StreamId) -> Self {
        ConsumerGroup {
            last_delivered_id: start,
            consumers: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    fn consumer_mut(&mut self, name: &Bytes, now_ms: u64) -> &mut Consumer {
        let c = self.consumers.entry(name.clone()).or_default();
        c.seen_time_ms = now_ms;
        c
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamData {
    pub entries: BTreeMap<StreamId, FieldVec>,
    pub last_id: StreamId,
    pub max_deleted_id: StreamId,
    pub entries_added: u64,
    pub groups: HashMap<Bytes, ConsumerGroup>,
}

impl StreamData {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves an XADD id spec (`*`, `ms-*`, or an explicit `ms-seq`) against
    /// `now_ms`, enforcing strict monotonicity.
    pub fn next_id(&self, spec: &str, now_ms: u64) -> RedisResult<StreamId> {
        if spec == "*" {
            return Ok(if now_ms > self.last_id.ms {
                StreamId { ms: now_ms, seq: 0 }
            } else {
                StreamId { ms: self.last_id.ms, seq: self.last_id.seq + 1 }
            });
        }
        if let Some(ms_part) = spec.strip_suffix("-*") {
            let ms: u64 = ms_part
                .parse()
                .map_err(|_| RedisError::InvalidArgument("Invalid stream ID specified as stream command argument".into()))?;
            let seq = if ms == self.last_id.ms { self.last_id.seq + 1 } else { 0 };
            let id = StreamId { ms, seq };
            return self.validate_new_id(id);
        }
        let id = StreamId::parse(spec, 0)?;
        self.validate_new_id(id)
    }

    fn validate_new_id(&self, id: StreamId) -> RedisResult<StreamId> {
        if id <= self.last_id && (self.entries_added > 0 || self.last_id != StreamId::MIN) {
            return Err(RedisError::InvalidStreamId);
        }
        if id == StreamId::MIN && self.entries_added == 0 && self.last_id == StreamId::MIN {
            // 0-0 is only rejected once data exists; an explicit 0-0 on an
            // empty stream without prior XADD is still invalid per Redis.
            return Err(RedisError::InvalidArgument(
                "The ID specified in XADD must be greater than 0-0".into(),
            ));
        }
        Ok(id)
    }

    pub fn xadd(&mut self, id: StreamId, fields: FieldVec) -> StreamId {
        self.entries.insert(id, fields);
        self.last_id = id;
        self.entries_added += 1;
        id
    }

    pub fn xrange(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let mut out: Vec<StreamEntry> = self
            .entries
            .range(start..=end)
            .map(|(id, fields)| StreamEntry { id: *id, fields: fields.clone() })
            .collect();
        if let Some(c) = count {
            out.truncate(c);
        }
        out
    }

    pub fn xrevrange(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let mut out: Vec<StreamEntry> = self
            .entries
            .range(start..=end)
            .rev()
            .map(|(id, fields)| StreamEntry { id: *id, fields: fields.clone() })
            .collect();
        if let Some(c) = count {
            out.truncate(c);
        }
        out
    }

    pub fn xdel(&mut self, ids: &[StreamId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.entries.remove(id).is_some() {
                removed += 1;
                if *id > self.max_deleted_id {
                    self.max_deleted_id = *id;
                }
            }
        }
        removed
    }

    pub fn xtrim_maxlen(&mut self, maxlen: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > maxlen {
            if let Some((&id, _)) = self.entries.iter().next() {
                self.entries.remove(&id);
                if id > self.max_deleted_id {
                    self.max_deleted_id = id;
                }
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    pub fn xtrim_minid(&mut self, min_id: StreamId) -> usize {
        let to_remove: Vec<StreamId> = self.entries.range(..min_id).map(|(id, _)| *id).collect();
        let removed = to_remove.len();
        for id in to_remove {
            self.entries.remove(&id);
            if id > self.max_deleted_id {
                self.max_deleted_id = id;
            }
        }
        removed
    }

    /// `XREAD ... STREAMS key <id>` — entries strictly after `after`, with no
    /// group bookkeeping.
    pub fn xread_after(&self, after: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let mut out: Vec<StreamEntry> = self
            .entries
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .map(|(id, fields)| StreamEntry { id: *id, fields: fields.clone() })
            .collect();
        if let Some(c) = count {
            out.truncate(c);
        }
        out
    }

    pub fn group_create(&mut self, name: Bytes, start: StreamId, mkstream: bool) -> RedisResult<()> {
        let _ = mkstream;
        if self.groups.contains_key(&name) {
            return Err(RedisError::BusyGroup);
        }
        let start_id = if start == StreamId::MAX {
            self.last_id
        } else {
            start
        };
        self.groups.insert(name, ConsumerGroup::new(start_id));
        Ok(())
    }

    pub fn group_destroy(&mut self, name: &[u8]) -> bool {
        self.groups.remove(name).is_some()
    }

    pub fn group_setid(&mut self, name: &[u8], id: StreamId) -> bool {
        let id = if id == StreamId::MAX { self.last_id } else { id };
        if let Some(g) = self.groups.get_mut(name) {
            g.last_delivered_id = id;
            true
        } else {
            false
        }
    }

    pub fn group_delconsumer(&mut self, group: &[u8], consumer: &[u8]) -> Option<usize> {
        let g = self.groups.get_mut(group)?;
        let c = g.consumers.remove(consumer)?;
        let n = c.pending_ids.len();
        for id in &c.pending_ids {
            g.pending.remove(id);
        }
        Some(n)
    }

    pub fn group_createconsumer(&mut self, group: &[u8], consumer: Bytes, now_ms: u64) -> bool {
        match self.groups.get_mut(group) {
            Some(g) => {
                g.consumers.entry(consumer).or_default().seen_time_ms = now_ms;
                true
            }
            None => false,
        }
    }

    /// `XREADGROUP ... STREAMS key >` — delivers fresh entries and advances
    /// `last_delivered_id`.
    pub fn group_read_new(
        &mut self,
        group: &[u8],
        consumer: &Bytes,
        count: Option<usize>,
        now_ms: u64,
    ) -> RedisResult<Vec<StreamEntry>> {
        let entries_snapshot: Vec<(StreamId, FieldVec)>;
        let last_delivered;
        {
            let g = self.groups.get(group).ok_or_else(|| no_group_err(group))?;
            last_delivered = g.last_delivered_id;
            entries_snapshot = self
                .entries
                .range((std::ops::Bound::Excluded(last_delivered), std::ops::Bound::Unbounded))
                .map(|(id, f)| (*id, f.clone()))
                .collect();
        }
        let take = count.unwrap_or(usize::MAX);
        let delivered: Vec<(StreamId, FieldVec)> = entries_snapshot.into_iter().take(take).collect();

        let g = self.groups.get_mut(group).unwrap();
        let mut out = Vec::with_capacity(delivered.len());
        for (id, fields) in delivered {
            g.last_delivered_id = id;
            g.pending.insert(
                id,
                PelEntry { consumer: consumer.clone(), delivery_time_ms: now_ms, delivery_count: 1 },
            );
            g.consumer_mut(consumer, now_ms).pending_ids.insert(id);
            out.push(StreamEntry { id, fields });
        }
        Ok(out)
    }

    /// `XREADGROUP ... STREAMS key <explicit-id>` — replays the consumer's
    /// own PEL with id >= the given id; no bookkeeping mutation.
    pub fn group_read_pending(
        &self,
        group: &[u8],
        consumer: &Bytes,
        from: StreamId,
        count: Option<usize>,
    ) -> RedisResult<Vec<StreamEntry>> {
        let g = self.groups.get(group).ok_or_else(|| no_group_err(group))?;
        let c = match g.consumers.get(consumer) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        let mut ids: Vec<StreamId> = c.pending_ids.iter().copied().filter(|id| *id >= from).collect();
        ids.sort();
        if let Some(c) = count {
            ids.truncate(c);
        }
        Ok(ids
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|f| StreamEntry { id, fields: f.clone() }))
            .collect())
    }

    pub fn xack(&mut self, group: &[u8], ids: &[StreamId]) -> usize {
        let g = match self.groups.get_mut(group) {
            Some(g) => g,
            None => return 0,
        };
        let mut acked = 0;
        for id in ids {
            if let Some(entry) = g.pending.remove(id) {
                if let Some(c) = g.consumers.get_mut(&entry.consumer) {
                    c.pending_ids.remove(id);
                }
                acked += 1;
            }
        }
        acked
    }

    pub fn pending_summary(&self, group: &[u8]) -> RedisResult<PendingSummary> {
        let g = self.groups.get(group).ok_or_else(|| no_group_err(group))?;
        if g.pending.is_empty() {
            return Ok(PendingSummary { total: 0, min: None, max: None, per_consumer: Vec::new() });
        }
        let min = *g.pending.keys().next().unwrap();
        let max = *g.pending.keys().next_back().unwrap();
        let mut counts: HashMap<Bytes, usize> = HashMap::new();
        for entry in g.pending.values() {
            *counts.entry(entry.consumer.clone()).or_insert(0) += 1;
        }
        let mut per_consumer: Vec<(Bytes, usize)> = counts.into_iter().collect();
        per_consumer.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(PendingSummary { total: g.pending.len(), min: Some(min), max: Some(max), per_consumer })
    }

    pub fn pending_extended(
        &self,
        group: &[u8],
        min_idle_ms: Option<u64>,
        start: StreamId,
        end: StreamId,
        count: usize,
        consumer: Option<&[u8]>,
        now_ms: u64,
    ) -> RedisResult<Vec<(StreamId, Bytes, u64, u64)>> {
        let g = self.groups.get(group).ok_or_else(|| no_group_err(group))?;
        let mut out = Vec::new();
        for (id, entry) in g.pending.range(start..=end) {
            if let Some(want) = consumer {
                if entry.consumer.as_ref() != want {
                    continue;
                }
            }
            let idle = now_ms.saturating_sub(entry.delivery_time_ms);
            if let Some(min_idle) = min_idle_ms {
                if idle < min_idle {
                    continue;
                }
            }
            out.push((*id, entry.consumer.clone(), idle, entry.delivery_count));
            if out.len() >= count {
                break;
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn xclaim(
        &mut self,
        group: &[u8],
        target_consumer: &Bytes,
        min_idle_ms: u64,
        ids: &[StreamId],
        idle_override: Option<u64>,
        time_override: Option<u64>,
        retrycount_override: Option<u64>,
        force: bool,
        now_ms: u64,
    ) -> RedisResult<Vec<(StreamId, Option<FieldVec>)>> {
        let has_entry: HashSet<StreamId> = self.entries.keys().copied().collect();
        let g = self.groups.get_mut(group).ok_or_else(|| no_group_err(group))?;
        let mut out = Vec::new();
        for id in ids {
            let eligible = match g.pending.get(id) {
                Some(entry) => now_ms.saturating_sub(entry.delivery_time_ms) >= min_idle_ms,
                None => force && has_entry.contains(id),
            };
            if !eligible {
                continue;
            }
            if !has_entry.contains(id) {
                // Entry was deleted from the stream: drop any existing PEL
                // bookkeeping for it and skip.
                if let Some(old) = g.pending.remove(id) {
                    if let Some(c) = g.consumers.get_mut(&old.consumer) {
                        c.pending_ids.remove(id);
                    }
                }
                continue;
            }
            if let Some(old) = g.pending.get(id) {
                if let Some(c) = g.consumers.get_mut(&old.consumer) {
                    c.pending_ids.remove(id);
                }
            }
            let delivery_time_ms = time_override.unwrap_or_else(|| now_ms.saturating_sub(idle_override.unwrap_or(0)));
            let delivery_count = retrycount_override.unwrap_or_else(|| {
                g.pending.get(id).map(|e| e.delivery_count + 1).unwrap_or(1)
            });
            g.pending.insert(*id, PelEntry { consumer: target_consumer.clone(), delivery_time_ms, delivery_count });
            g.consumer_mut(target_consumer, now_ms).pending_ids.insert(*id);
            out.push((*id, self.entries.get(id).cloned()));
        }
        Ok(out)
    }

    pub fn xautoclaim(
        &mut self,
        group: &[u8],
        target_consumer: &Bytes,
        min_idle_ms: u64,
        start: StreamId,
        count: usize,
        now_ms: u64,
    ) -> RedisResult<(StreamId, Vec<(StreamId, Option<FieldVec>)>, Vec<StreamId>)> {
        let has_entry: HashSet<StreamId> = self.entries.keys().copied().collect();
        let g = self.groups.get_mut(group).ok_or_else(|| no_group_err(group))?;
        let candidate_ids: Vec<StreamId> = g
            .pending
            .range(start..)
            .filter(|(_, e)| now_ms.saturating_sub(e.delivery_time_ms) >= min_idle_ms)
            .map(|(id, _)| *id)
            .take(count)
            .collect();

        let mut claimed = Vec::new();
        let mut deleted = Vec::new();
        let mut cursor = StreamId { ms: 0, seq: 0 };
        for id in candidate_ids {
            cursor = id;
            if !has_entry.contains(&id) {
                if let Some(old) = g.pending.remove(&id) {
                    if let Some(c) = g.consumers.get_mut(&old.consumer) {
                        c.pending_ids.remove(&id);
                    }
                }
                deleted.push(id);
                continue;
            }
            if let Some(old) = g.pending.get(&id) {
                if let Some(c) = g.consumers.get_mut(&old.consumer) {
                    c.pending_ids.remove(&id);
                }
            }
            let delivery_count = g.pending.get(&id).map(|e| e.delivery_count + 1).unwrap_or(1);
            g.pending.insert(id, PelEntry { consumer: target_consumer.clone(), delivery_time_ms: now_ms, delivery_count });
            g.consumer_mut(target_consumer, now_ms).pending_ids.insert(id);
            claimed.push((id, self.entries.get(&id).cloned()));
        }
        let next_cursor = if claimed.len() + deleted.len() < count {
            StreamId::MIN
        } else {
            StreamId { ms: cursor.ms, seq: cursor.seq.wrapping_add(1) }
        };
        Ok((next_cursor, claimed, deleted))
    }
}

pub struct PendingSummary {
    pub total: usize,
    pub min: Option<StreamId>,
    pub max: Option<StreamId>,
    pub per_consumer: Vec<(Bytes, usize)>,
}

fn no_group_err(group: &[u8]) -> RedisError {
    RedisError::NoGroup("key".to_string(), String::from_utf8_lossy(group).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ids() {
        let mut s = StreamData::default();
        let id1 = s.next_id("1-0", 100).unwrap();
        s.xadd(id1, vec![]);
        let id2 = s.next_id("2-0", 100).unwrap();
        s.xadd(id2, vec![]);
        assert!(id1 < id2);
        assert!(s.next_id("1-0", 100).is_err());
        assert!(s.next_id("2-0", 100).is_err());
    }

    #[test]
    fn xrange_bounds() {
        let mut s = StreamData::default();
        for i in 1..=3u64 {
            let id = StreamId { ms: i, seq: 0 };
            s.xadd(id, vec![(Bytes::from_static(b"f"), Bytes::from_static(b"v"))]);
        }
        let all = s.xrange(StreamId::MIN, StreamId::MAX, None);
        assert_eq!(all.len(), 3);
        assert_eq!(s.len(), all.len());
    }

    #[test]
    fn group_delivery_and_ack() {
        let mut s = StreamData::default();
        let id1 = s.next_id("1-0", 10).unwrap();
        s.xadd(id1, vec![]);
        let id2 = s.next_id("2-0", 10).unwrap();
        s.xadd(id2, vec![]);
        s.group_create(Bytes::from_static(b"g"), StreamId::MIN, false).unwrap();
        let consumer = Bytes::from_static(b"c1");
        let delivered = s.group_read_new(b"g", &consumer, None, 100).unwrap();
        assert_eq!(delivered.len(), 2);
        let summary = s.pending_summary(b"g").unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(s.xack(b"g", &[id1]), 1);
        let summary = s.pending_summary(b"g").unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.min, Some(id2));
    }
}
