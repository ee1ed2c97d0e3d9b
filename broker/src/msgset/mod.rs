//! Message set: owns subjects, retention policy, and the storage log;
//! broadcasts new arrivals to attached observables (spec §4.2).

use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use msgset_types::{
    config::{AckPolicy, MsgSetConfig, RetentionPolicy},
    message::{Message, StoreSeq},
    names::{MsgSetName, ObservableName},
    subject::Subject,
};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::{
    account::Account,
    backend::{MsgSetStats, StorageBackend},
    error::{
        BrokerError, DeliverySubjectNotLiteralError, DurableObserverActiveError,
        MsgSetNotFoundError, NoInterestAtCreationError, ObservableNotFoundError,
        PartitionedAckAllError, PullRequiresExplicitAckError, ReplicasUnsupportedError,
        SelfIngestionError, WorkQueueObservableShapeError, WorkQueuePartitionOverlapError,
    },
    metrics::Metrics,
    observable::Observable,
    transport::Transport,
};

pub struct MsgSet {
    pub name: MsgSetName,
    config: MsgSetConfig,
    backend: Arc<dyn StorageBackend>,
    account: Arc<Account>,
    metrics: Arc<Metrics>,
    observables: DashMap<ObservableName, Arc<Observable>>,
    new_msg: watch::Sender<StoreSeq>,
    publish_lock: Mutex<()>,
    self_ref: Mutex<Weak<MsgSet>>,
    /// Ephemeral-inactivity check cadence handed to every observable
    /// created on this set; test-overridable via `set_ephemeral_check`
    /// (spec §9 open question).
    ephemeral_check: Mutex<crate::observable::EphemeralCheckConfig>,
}

impl MsgSet {
    pub fn create(
        name: MsgSetName,
        config: MsgSetConfig,
        backend: Arc<dyn StorageBackend>,
        account: Arc<Account>,
        metrics: Arc<Metrics>,
    ) -> Result<Arc<Self>, BrokerError> {
        if config.replicas != 1 {
            return Err(ReplicasUnsupportedError.into());
        }
        let (new_msg, _) = watch::channel(0);
        let set = Arc::new(Self {
            name,
            config,
            backend,
            account,
            metrics,
            observables: DashMap::new(),
            new_msg,
            publish_lock: Mutex::new(()),
            self_ref: Mutex::new(Weak::new()),
            ephemeral_check: Mutex::new(crate::observable::EphemeralCheckConfig::default()),
        });
        *set.self_ref.lock() = Arc::downgrade(&set);
        Ok(set)
    }

    pub fn config(&self) -> &MsgSetConfig {
        &self.config
    }

    /// Test hook to shorten the ephemeral-inactivity check interval/
    /// threshold for observables created after this call (spec §9).
    pub fn set_ephemeral_check(&self, cfg: crate::observable::EphemeralCheckConfig) {
        *self.ephemeral_check.lock() = cfg;
    }

    fn ephemeral_check(&self) -> crate::observable::EphemeralCheckConfig {
        *self.ephemeral_check.lock()
    }

    pub fn stats(&self) -> MsgSetStats {
        self.backend.stats()
    }

    pub fn subjects_match(&self, subject: &str) -> bool {
        self.config.subjects.iter().any(|s| s.matches(subject))
    }

    #[instrument(skip(self, payload), fields(msgset = %self.name))]
    pub fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        ts: OffsetDateTime,
    ) -> Result<StoreSeq, BrokerError> {
        let _guard = self.publish_lock.lock();
        let size = payload.len() as u64 + msgset_types::message::MESSAGE_OVERHEAD_BYTES;
        match self.config.storage {
            msgset_types::config::StorageType::Memory => self.account.reserve_memory(size)?,
            msgset_types::config::StorageType::File => self.account.reserve_storage(size)?,
        }
        let (seq, actual_size) = self.backend.append(subject, payload, ts);
        self.metrics.messages_stored_total.inc();
        self.metrics.bytes_stored_total.inc_by(actual_size);
        let _ = self.new_msg.send(seq);
        debug!(store_seq = seq, "appended message");
        Ok(seq)
    }

    pub fn lookup(&self, seq: StoreSeq) -> Result<Message, crate::error::SeqNotFoundError> {
        self.backend.lookup(seq)
    }

    pub fn first_stored_at_or_after(&self, seq: StoreSeq) -> Option<StoreSeq> {
        self.backend.first_stored_at_or_after(seq)
    }

    pub fn seq_at_or_after_time(&self, ts: OffsetDateTime) -> StoreSeq {
        self.backend.seq_at_or_after_time(ts)
    }

    pub fn subscribe_new_msg(&self) -> watch::Receiver<StoreSeq> {
        self.new_msg.subscribe()
    }

    /// Purge: removes all current messages, resets stats, but store_seq
    /// keeps advancing monotonically for new appends (spec §4.2).
    #[instrument(skip(self), fields(msgset = %self.name))]
    pub fn purge(&self) -> usize {
        let _guard = self.publish_lock.lock();
        let removed_bytes_tracked = self.backend.stats().bytes;
        let removed = self.backend.purge();
        match self.config.storage {
            msgset_types::config::StorageType::Memory => {
                self.account.release_memory(removed_bytes_tracked)
            }
            msgset_types::config::StorageType::File => {
                self.account.release_storage(removed_bytes_tracked)
            }
        }
        self.metrics.messages_evicted_total.inc_by(removed as u64);
        self.metrics.bytes_evicted_total.inc_by(removed_bytes_tracked);
        let new_first = self.backend.stats().last_seq + 1;
        for entry in self.observables.iter() {
            entry.value().advance_past_purge(new_first);
        }
        removed
    }

    fn release_accounted_bytes(&self, bytes: u64) {
        match self.config.storage {
            msgset_types::config::StorageType::Memory => self.account.release_memory(bytes),
            msgset_types::config::StorageType::File => self.account.release_storage(bytes),
        }
    }

    /// Remove one message from the log and release its accounted bytes.
    /// A no-op if already gone (eviction and ack-triggered deletion can
    /// race harmlessly).
    fn remove_and_account(&self, seq: StoreSeq) {
        if let Ok(freed) = self.backend.remove(seq) {
            self.release_accounted_bytes(freed);
            self.metrics.messages_evicted_total.inc();
            self.metrics.bytes_evicted_total.inc_by(freed);
        }
    }

    /// Apply age/size retention trims; called periodically for Stream
    /// message sets (and harmlessly for the others, which typically have
    /// no max_age/max_bytes/max_msgs set).
    pub fn run_retention_trim(&self, now: OffsetDateTime) {
        let evictions = self.backend.apply_retention_limits(
            self.config.max_bytes,
            self.config.max_msgs,
            self.config.max_age,
            now,
        );
        self.metrics
            .messages_evicted_total
            .inc_by(evictions.len() as u64);
        for ev in evictions {
            self.release_accounted_bytes(ev.freed_bytes);
            self.metrics.bytes_evicted_total.inc_by(ev.freed_bytes);
        }
    }

    /// Called by an observable after it acks a store_seq, to let
    /// Interest/WorkQueue retention react.
    pub fn on_observable_ack(&self, store_seq: StoreSeq) {
        match self.config.retention {
            RetentionPolicy::WorkQueue => self.remove_and_account(store_seq),
            RetentionPolicy::Interest => self.gc_interest(),
            RetentionPolicy::Stream => {}
        }
    }

    fn gc_interest(&self) {
        let floor = self
            .observables
            .iter()
            .map(|o| o.value().ack_floor())
            .max()
            .unwrap_or(0);
        if floor == 0 {
            return;
        }
        for (seq, subject) in self.backend.messages_up_to(floor) {
            let eligible = self.observables.iter().all(|o| {
                let o = o.value();
                !o.partition_matches(&subject) || o.ack_floor() >= seq
            });
            if eligible {
                self.remove_and_account(seq);
            }
        }
    }

    pub fn observable(&self, name: &ObservableName) -> Option<Arc<Observable>> {
        self.observables.get(name).map(|e| e.value().clone())
    }

    pub fn list_observables(&self) -> Vec<ObservableName> {
        self.observables.iter().map(|e| e.key().clone()).collect()
    }

    #[instrument(skip(self, cfg, transport), fields(msgset = %self.name, observable = %name))]
    pub fn add_observable(
        self: &Arc<Self>,
        name: ObservableName,
        cfg: msgset_types::config::ObservableConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Observable>, BrokerError> {
        self.validate_observable_config(&name, &cfg, transport.as_ref())?;

        if let Some(existing) = self.observables.get(&name) {
            if existing.value().is_active() {
                return Err(DurableObserverActiveError {
                    msgset: self.name.clone(),
                    observable: name,
                }
                .into());
            }
        }

        self.account.check_observable_limit()?;

        let weak_self = self.self_ref.lock().clone();
        let observable = Observable::create(
            name.clone(),
            cfg,
            weak_self,
            self.backend.clone(),
            transport,
            self.ephemeral_check(),
            self.metrics.clone(),
        );
        if self.observables.insert(name, observable.clone()).is_none() {
            self.account.on_observable_added();
        }
        self.metrics.observables_attached.inc();
        Ok(observable)
    }

    fn validate_observable_config(
        &self,
        name: &ObservableName,
        cfg: &msgset_types::config::ObservableConfig,
        transport: &dyn Transport,
    ) -> Result<(), BrokerError> {
        if let Some(delivery) = &cfg.delivery_subject {
            if !delivery.is_literal() {
                return Err(DeliverySubjectNotLiteralError.into());
            }
            if self.subjects_match(delivery.as_str()) {
                return Err(SelfIngestionError.into());
            }
            if cfg.durable.is_none() && !transport.has_interest(delivery.as_str()) {
                return Err(NoInterestAtCreationError.into());
            }
        } else if cfg.ack_policy != AckPolicy::Explicit {
            return Err(PullRequiresExplicitAckError.into());
        }

        if cfg.partition.is_some() && cfg.ack_policy == AckPolicy::All {
            return Err(PartitionedAckAllError.into());
        }

        if self.config.retention == RetentionPolicy::WorkQueue {
            if cfg.delivery_subject.is_some()
                || !matches!(cfg.start, msgset_types::config::StartPolicy::All)
            {
                return Err(WorkQueueObservableShapeError.into());
            }
            let overlaps = self.observables.iter().any(|entry| {
                if entry.key() == name {
                    return false;
                }
                let existing = entry.value();
                match (existing.partition(), &cfg.partition) {
                    (None, _) | (_, None) => true,
                    (Some(a), Some(b)) => a.overlaps(b),
                }
            });
            if overlaps {
                return Err(WorkQueuePartitionOverlapError.into());
            }
        }

        Ok(())
    }

    /// Admin `rebind` (spec.md:84): re-points a durable observable's
    /// delivery subject while it is Inactive. Re-validates the new
    /// subject the same way `add_observable` validates one at creation
    /// (literal, not self-ingesting).
    pub fn rebind_observable(&self, name: &ObservableName, new_subject: Subject) -> Result<(), BrokerError> {
        if !new_subject.is_literal() {
            return Err(DeliverySubjectNotLiteralError.into());
        }
        if self.subjects_match(new_subject.as_str()) {
            return Err(SelfIngestionError.into());
        }
        let observable = self.observable(name).ok_or_else(|| ObservableNotFoundError {
            msgset: self.name.clone(),
            observable: name.clone(),
        })?;
        observable.rebind(new_subject)
    }

    #[instrument(skip(self), fields(msgset = %self.name, observable = %name))]
    pub async fn delete_observable(&self, name: &ObservableName) -> Result<(), BrokerError> {
        let (_, observable) = self.observables.remove(name).ok_or_else(|| {
            ObservableNotFoundError {
                msgset: self.name.clone(),
                observable: name.clone(),
            }
        })?;
        observable.shutdown().await;
        self.account.on_observable_removed();
        self.metrics.observables_attached.dec();
        Ok(())
    }

    /// Message set teardown deletes all its observables first (spec §5).
    pub async fn delete(&self) {
        let names: Vec<ObservableName> = self.list_observables();
        for name in names {
            let _ = self.delete_observable(&name).await;
        }
    }
}

pub fn not_found(name: MsgSetName) -> BrokerError {
    MsgSetNotFoundError(name).into()
}
