//! Storage backend: append-only per-message-set log, random access by
//! store-seq, purge, byte/message accounting (spec §4.1). Narrow
//! capability set, dynamic dispatch over a sum of backends — no virtual
//! inheritance (spec §9).

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::time::Duration;

use bytes::Bytes;
use msgset_types::message::{Message, StoreSeq};
use time::OffsetDateTime;

use crate::error::SeqNotFoundError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgSetStats {
    pub msgs: u64,
    pub bytes: u64,
    pub first_seq: StoreSeq,
    pub last_seq: StoreSeq,
}

/// One evicted message, reported so the owning message set can notify
/// observables and release account-reserved bytes.
#[derive(Debug, Clone, Copy)]
pub struct Eviction {
    pub store_seq: StoreSeq,
    pub freed_bytes: u64,
}

pub trait StorageBackend: Send + Sync {
    fn append(&self, subject: &str, payload: Bytes, ts: OffsetDateTime) -> (StoreSeq, u64);

    fn lookup(&self, seq: StoreSeq) -> Result<Message, SeqNotFoundError>;

    fn remove(&self, seq: StoreSeq) -> Result<u64, SeqNotFoundError>;

    fn purge(&self) -> usize;

    fn stats(&self) -> MsgSetStats;

    /// The smallest stored store_seq that is `>= seq`, or `None` if the
    /// log has nothing left at or after it. Lets an observable's cursor
    /// skip over gaps left by eviction/ack-triggered deletion.
    fn first_stored_at_or_after(&self, seq: StoreSeq) -> Option<StoreSeq>;

    /// The smallest store_seq whose message has `ts >= ts`, for
    /// `start=by_time` (spec §4.3). `MemoryBackend` answers this with a
    /// linear scan over its `BTreeMap`-ordered log rather than a true
    /// binary search — store_seq order and ts order coincide, so an
    /// order-statistic index keyed by position would be needed to do
    /// better, and at this crate's in-memory scale it isn't worth the
    /// extra structure.
    fn seq_at_or_after_time(&self, ts: OffsetDateTime) -> StoreSeq;

    /// Every currently stored `(store_seq, subject)` pair with
    /// `store_seq <= limit`, ascending. Used by Interest-retention
    /// garbage collection to test per-message eligibility against each
    /// attached observable's partition filter.
    fn messages_up_to(&self, limit: StoreSeq) -> Vec<(StoreSeq, compact_str::CompactString)>;

    /// Evict oldest-first past `max_bytes`/`max_msgs`/`max_age`, returning
    /// every eviction in ascending store_seq order.
    fn apply_retention_limits(
        &self,
        max_bytes: Option<u64>,
        max_msgs: Option<u64>,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Vec<Eviction>;
}
