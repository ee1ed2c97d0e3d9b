use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use compact_str::CompactString;
use msgset_types::message::{Message, StoreSeq};
use parking_lot::Mutex;
use time::OffsetDateTime;

use super::{Eviction, MsgSetStats, StorageBackend};
use crate::error::SeqNotFoundError;

/// In-process, `BTreeMap`-backed per-message-set log. `remove` can leave
/// gaps; `append` never reuses a store_seq, matching spec §4.1.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    log: BTreeMap<StoreSeq, Message>,
    next_seq: StoreSeq,
    bytes: u64,
    // Highest store_seq ever assigned, kept even once its message is
    // removed, so stats.last_seq only advances, never regresses.
    last_seq: StoreSeq,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn append(&self, subject: &str, payload: Bytes, ts: OffsetDateTime) -> (StoreSeq, u64) {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let msg = Message {
            store_seq: seq,
            subject: CompactString::from(subject),
            payload,
            ts,
        };
        let size = msg.metered_size();
        inner.bytes += size;
        inner.last_seq = seq;
        inner.log.insert(seq, msg);
        (seq, size)
    }

    fn lookup(&self, seq: StoreSeq) -> Result<Message, SeqNotFoundError> {
        self.inner
            .lock()
            .log
            .get(&seq)
            .cloned()
            .ok_or(SeqNotFoundError(seq))
    }

    fn remove(&self, seq: StoreSeq) -> Result<u64, SeqNotFoundError> {
        let mut inner = self.inner.lock();
        let msg = inner.log.remove(&seq).ok_or(SeqNotFoundError(seq))?;
        let size = msg.metered_size();
        inner.bytes = inner.bytes.saturating_sub(size);
        Ok(size)
    }

    fn purge(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.log.len();
        inner.log.clear();
        inner.bytes = 0;
        removed
    }

    fn stats(&self) -> MsgSetStats {
        let inner = self.inner.lock();
        MsgSetStats {
            msgs: inner.log.len() as u64,
            bytes: inner.bytes,
            first_seq: inner.log.keys().next().copied().unwrap_or(0),
            last_seq: inner.last_seq,
        }
    }

    fn first_stored_at_or_after(&self, seq: StoreSeq) -> Option<StoreSeq> {
        self.inner
            .lock()
            .log
            .range(seq..)
            .next()
            .map(|(seq, _)| *seq)
    }

    fn seq_at_or_after_time(&self, ts: OffsetDateTime) -> StoreSeq {
        let inner = self.inner.lock();
        inner
            .log
            .values()
            .find(|m| m.ts >= ts)
            .map(|m| m.store_seq)
            .unwrap_or(inner.next_seq + 1)
    }

    fn messages_up_to(&self, limit: StoreSeq) -> Vec<(StoreSeq, CompactString)> {
        self.inner
            .lock()
            .log
            .range(..=limit)
            .map(|(seq, msg)| (*seq, msg.subject.clone()))
            .collect()
    }

    fn apply_retention_limits(
        &self,
        max_bytes: Option<u64>,
        max_msgs: Option<u64>,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Vec<Eviction> {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();

        if let Some(max_age) = max_age {
            let cutoff = now - max_age;
            let stale: Vec<StoreSeq> = inner
                .log
                .range(..)
                .take_while(|(_, m)| m.ts < cutoff)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in stale {
                if let Some(m) = inner.log.remove(&seq) {
                    let freed = m.metered_size();
                    inner.bytes = inner.bytes.saturating_sub(freed);
                    evicted.push(Eviction {
                        store_seq: seq,
                        freed_bytes: freed,
                    });
                }
            }
        }

        if let Some(max_msgs) = max_msgs {
            while inner.log.len() as u64 > max_msgs {
                let Some((&seq, _)) = inner.log.iter().next() else {
                    break;
                };
                let m = inner.log.remove(&seq).expect("seq just observed");
                let freed = m.metered_size();
                inner.bytes = inner.bytes.saturating_sub(freed);
                evicted.push(Eviction {
                    store_seq: seq,
                    freed_bytes: freed,
                });
            }
        }

        if let Some(max_bytes) = max_bytes {
            while inner.bytes > max_bytes {
                let Some((&seq, _)) = inner.log.iter().next() else {
                    break;
                };
                let m = inner.log.remove(&seq).expect("seq just observed");
                let freed = m.metered_size();
                inner.bytes = inner.bytes.saturating_sub(freed);
                evicted.push(Eviction {
                    store_seq: seq,
                    freed_bytes: freed,
                });
            }
        }

        evicted
    }
}
