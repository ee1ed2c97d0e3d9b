//! Encoding and decoding of the ack/reply subject (spec §4.5): the
//! wire-visible carrier of `(deliver_count, store_seq, deliver_seq)` so
//! ack routing is stateless at the transport layer.

use msgset_types::message::{DeliverSeq, StoreSeq};

pub const REPLY_PREFIX: &str = "$JS.A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyInfo {
    pub deliver_count: u64,
    pub store_seq: StoreSeq,
    pub deliver_seq: DeliverSeq,
}

/// `$JS.A.<msgset>.<observable>.<deliver_count>.<store_seq>.<deliver_seq>`
pub fn encode(
    msgset: &str,
    observable: &str,
    deliver_count: u64,
    store_seq: StoreSeq,
    deliver_seq: DeliverSeq,
) -> String {
    format!("{REPLY_PREFIX}.{msgset}.{observable}.{deliver_count}.{store_seq}.{deliver_seq}")
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed ack reply subject: {0}")]
pub struct MalformedReplyError(pub String);

/// Full decode, returning the message set and observable names alongside
/// the three numeric fields.
pub fn decode(subject: &str) -> Result<(String, String, ReplyInfo), MalformedReplyError> {
    let err = || MalformedReplyError(subject.to_string());

    let rest = subject.strip_prefix(REPLY_PREFIX).ok_or_else(err)?;
    let rest = rest.strip_prefix('.').ok_or_else(err)?;

    let mut parts = rest.rsplitn(5, '.');
    let deliver_seq = parts.next().ok_or_else(err)?;
    let store_seq = parts.next().ok_or_else(err)?;
    let deliver_count = parts.next().ok_or_else(err)?;
    let observable = parts.next().ok_or_else(err)?;
    let msgset = parts.next().ok_or_else(err)?;
    if parts.next().is_some() {
        return Err(err());
    }

    let parse_u64 = |s: &str| -> Result<u64, MalformedReplyError> {
        if s.is_empty() || (s.len() > 1 && s.starts_with('0')) || !s.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        s.parse().map_err(|_| err())
    };

    Ok((
        msgset.to_string(),
        observable.to_string(),
        ReplyInfo {
            deliver_count: parse_u64(deliver_count)?,
            store_seq: parse_u64(store_seq)?,
            deliver_seq: parse_u64(deliver_seq)?,
        },
    ))
}

/// `SeqFromReply` from spec §4.5: just the `deliver_seq` field.
pub fn seq_from_reply(subject: &str) -> Result<DeliverSeq, MalformedReplyError> {
    decode(subject).map(|(_, _, info)| info.deliver_seq)
}

pub fn reply_info(subject: &str) -> Result<ReplyInfo, MalformedReplyError> {
    decode(subject).map(|(_, _, info)| info)
}
