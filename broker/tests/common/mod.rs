//! Shared integration-test helpers: a fake [`Transport`] and a couple of
//! engine-setup shortcuts, mirroring the teacher's
//! `lite/tests/backend/common.rs` (`create_backend`, `test_basin_name`).
//! An integration-test binary can't see the crate's own `#[cfg(test)]`
//! `test_support` module, so this is a standalone equivalent.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use msgset_broker::{Engine, Transport, transport::InboundStream};
use msgset_types::{limits::AccountLimits, names::AccountId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Delivered {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
    pub at: Instant,
}

#[derive(Default)]
pub struct FakeTransport {
    delivered: Mutex<Vec<Delivered>>,
    interested: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_interest(&self, subject: &str) {
        self.interested.lock().insert(subject.to_string());
    }

    pub fn clear_interest(&self, subject: &str) {
        self.interested.lock().remove(subject);
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
            at: Instant::now(),
        });
    }

    fn has_interest(&self, subject: &str) -> bool {
        self.interested.lock().contains(subject)
    }
}

/// An account with unbounded limits, enabled on a fresh [`Engine`] backed
/// by `transport`.
pub fn engine_with_account(transport: Arc<dyn Transport>) -> (Engine, AccountId) {
    let engine = Engine::new(transport, -1, -1);
    let account: AccountId = "acct".parse().unwrap();
    engine.enable_account(account.clone(), AccountLimits::default()).unwrap();
    (engine, account)
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}
