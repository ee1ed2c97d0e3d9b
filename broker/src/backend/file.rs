use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use msgset_types::message::{Message, StoreSeq};
use time::OffsetDateTime;

use super::{Eviction, MsgSetStats, StorageBackend};
use crate::error::SeqNotFoundError;

/// Durable on-disk format is explicitly out of scope (spec §1); this is
/// the pluggable seam the spec calls for, not a real implementation. It
/// delegates every call to an injected backend so an embedder can supply
/// a real file-backed log without this crate knowing its format.
pub struct FileBackend {
    delegate: Arc<dyn StorageBackend>,
}

impl FileBackend {
    pub fn new(delegate: Arc<dyn StorageBackend>) -> Self {
        Self { delegate }
    }
}

impl StorageBackend for FileBackend {
    fn append(&self, subject: &str, payload: Bytes, ts: OffsetDateTime) -> (StoreSeq, u64) {
        self.delegate.append(subject, payload, ts)
    }

    fn lookup(&self, seq: StoreSeq) -> Result<Message, SeqNotFoundError> {
        self.delegate.lookup(seq)
    }

    fn remove(&self, seq: StoreSeq) -> Result<u64, SeqNotFoundError> {
        self.delegate.remove(seq)
    }

    fn purge(&self) -> usize {
        self.delegate.purge()
    }

    fn stats(&self) -> MsgSetStats {
        self.delegate.stats()
    }

    fn first_stored_at_or_after(&self, seq: StoreSeq) -> Option<StoreSeq> {
        self.delegate.first_stored_at_or_after(seq)
    }

    fn seq_at_or_after_time(&self, ts: OffsetDateTime) -> StoreSeq {
        self.delegate.seq_at_or_after_time(ts)
    }

    fn messages_up_to(&self, limit: StoreSeq) -> Vec<(StoreSeq, compact_str::CompactString)> {
        self.delegate.messages_up_to(limit)
    }

    fn apply_retention_limits(
        &self,
        max_bytes: Option<u64>,
        max_msgs: Option<u64>,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Vec<Eviction> {
        self.delegate
            .apply_retention_limits(max_bytes, max_msgs, max_age, now)
    }
}
