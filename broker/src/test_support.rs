//! In-memory fake [`Transport`] shared by this crate's unit tests and
//! reused by the `tests/` integration suite's own copy (an external
//! integration test binary cannot see `#[cfg(test)]` items of the crate
//! it tests, so `tests/common.rs` carries an equivalent).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{InboundMessage, InboundStream, Transport};

#[derive(Debug, Clone)]
pub struct Delivered {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Records every publish and lets tests toggle subject interest
/// explicitly, standing in for the real subscriber-interest tracking a
/// transport would maintain.
#[derive(Default)]
pub struct FakeTransport {
    delivered: Mutex<Vec<Delivered>>,
    interested: Mutex<std::collections::HashSet<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_interest(&self, subject: &str, interested: bool) {
        let mut set = self.interested.lock();
        if interested {
            set.insert(subject.to_string());
        } else {
            set.remove(subject);
        }
    }

    pub fn drain(&self) -> Vec<Delivered> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, _subject: &str) -> InboundStream {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    async fn publish(&self, subject: &str, reply: Option<&str>, payload: Bytes) {
        self.delivered.lock().push(Delivered {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            payload,
        });
    }

    fn has_interest(&self, subject: &str) -> bool {
        self.interested.lock().contains(subject)
    }
}

#[allow(dead_code)]
pub fn inbound(subject: &str, reply: Option<&str>, payload: &[u8]) -> InboundMessage {
    InboundMessage {
        subject: subject.to_string(),
        reply: reply.map(str::to_string),
        payload: Bytes::copy_from_slice(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_published_messages() {
        let t = FakeTransport::new();
        t.publish("foo", Some("reply.1"), Bytes::from_static(b"hi")).await;
        let delivered = t.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].subject, "foo");
        assert_eq!(delivered[0].reply.as_deref(), Some("reply.1"));
    }

    #[test]
    fn interest_toggles() {
        let t = FakeTransport::new();
        assert!(!t.has_interest("foo"));
        t.set_interest("foo", true);
        assert!(t.has_interest("foo"));
        t.set_interest("foo", false);
        assert!(!t.has_interest("foo"));
    }
}
