use bytes::Bytes;
use time::OffsetDateTime;

/// Per-message-set monotonic sequence, assigned at append time. Never zero,
/// never reused.
pub type StoreSeq = u64;

/// Per-observable monotonic sequence, incremented on every delivery
/// including redeliveries. Never reused.
pub type DeliverSeq = u64;

/// Fixed accounting overhead added to a message's payload length when
/// tracking `stats.bytes`, so a stream of empty-payload messages still
/// consumes a reservable amount of account storage.
pub const MESSAGE_OVERHEAD_BYTES: u64 = 16;

#[derive(Debug, Clone)]
pub struct Message {
    pub store_seq: StoreSeq,
    pub subject: compact_str::CompactString,
    pub payload: Bytes,
    pub ts: OffsetDateTime,
}

impl Message {
    pub fn metered_size(&self) -> u64 {
        self.payload.len() as u64 + MESSAGE_OVERHEAD_BYTES
    }
}
