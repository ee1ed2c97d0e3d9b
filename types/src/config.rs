use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{message::StoreSeq, names::ObservableName, subject::Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Stream,
    Interest,
    WorkQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Memory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    None,
    All,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    Instant,
    Original,
}

/// Mutually exclusive starting points for an observable's cursor (spec
/// §3: "start configuration is mutually exclusive across {by_seq,
/// by_time, all, last, new}").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    New,
    All,
    Last,
    BySeq(StoreSeq),
    ByTime(OffsetDateTime),
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self::New
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgSetConfig {
    pub subjects: Vec<Subject>,
    pub retention: RetentionPolicy,
    pub storage: StorageType,
    pub max_age: Option<Duration>,
    pub max_bytes: Option<u64>,
    pub max_msgs: Option<u64>,
    pub replicas: u8,
    pub no_ack: bool,
}

impl Default for MsgSetConfig {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            retention: RetentionPolicy::Stream,
            storage: StorageType::Memory,
            max_age: None,
            max_bytes: None,
            max_msgs: None,
            replicas: 1,
            no_ack: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservableConfig {
    pub durable: Option<ObservableName>,
    pub delivery_subject: Option<Subject>,
    pub partition: Option<Subject>,
    pub ack_policy: AckPolicy,
    pub ack_wait: Duration,
    pub start: StartPolicy,
    pub replay: ReplayPolicy,
}

impl Default for ObservableConfig {
    fn default() -> Self {
        Self {
            durable: None,
            delivery_subject: None,
            partition: None,
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(30),
            start: StartPolicy::New,
            replay: ReplayPolicy::Instant,
        }
    }
}

impl ObservableConfig {
    pub fn is_push(&self) -> bool {
        self.delivery_subject.is_some()
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgset_config_round_trips_through_json() {
        let cfg = MsgSetConfig {
            subjects: vec![Subject::new("foo.*").unwrap()],
            retention: RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MsgSetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retention, RetentionPolicy::WorkQueue);
        assert_eq!(back.subjects, cfg.subjects);
    }

    #[test]
    fn start_policy_by_seq_round_trips() {
        let start = StartPolicy::BySeq(42);
        let json = serde_json::to_string(&start).unwrap();
        let back: StartPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StartPolicy::BySeq(42));
    }
}
