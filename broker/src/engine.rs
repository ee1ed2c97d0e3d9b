//! Admin/request surface (spec §4.6/§6): create/delete/list message sets
//! and observables, enable/disable accounts, the `$JS.*`-style management
//! subjects, and the publish/ack/pull request handlers that tie the
//! message-set and observable engine to the injected [`Transport`].
//!
//! Grounded in the teacher's split between a `Backend` that owns
//! account/stream state and an `ops.rs` trait describing the admin
//! surface over it (`lite/src/backend/{core,ops}.rs`): this crate keeps
//! the split as a single `Engine` type rather than a trait, since there
//! is exactly one implementation and no transport-specific variants to
//! abstract over.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use msgset_types::{
    ack::AckKind,
    config::{MsgSetConfig, ObservableConfig, RetentionPolicy, StorageType},
    limits::AccountLimits,
    names::{AccountId, MsgSetName, ObservableName},
    subject::Subject,
};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::{
    account::{Account, ReservationPool},
    backend::{MemoryBackend, MsgSetStats, StorageBackend},
    error::{
        AccountAlreadyEnabledError, AccountNotEnabledError, BrokerError, MsgSetAlreadyExistsError,
        SubjectOverlapError,
    },
    metrics::Metrics,
    msgset::{self, MsgSet},
    observable::Observable,
    reply,
    transport::Transport,
};

/// Well-known probe subject clients publish to in order to ask "is
/// JetStream enabled on this account?" (spec §4.5/§6).
pub const ENABLED_PROBE_SUBJECT: &str = "$JS.A.INFO";

/// Cadence of the background Stream-retention sweep (spec.md:40/:46/:55).
/// No hard production contract is given upstream, so this picks a value
/// in the same spirit as `EphemeralCheckConfig::default`: frequent enough
/// that a `max_age`/`max_bytes`/`max_msgs` cap is honored promptly,
/// coarse enough not to contend with the publish path.
const DEFAULT_RETENTION_TRIM_INTERVAL: Duration = Duration::from_secs(30);

struct AccountEntry {
    account: Arc<Account>,
    msgsets: DashMap<MsgSetName, Arc<MsgSet>>,
}

/// The admin surface tying accounts, message sets, and observables to
/// one injected [`Transport`]. One `Engine` corresponds to one server.
pub struct Engine {
    transport: Arc<dyn Transport>,
    pool: Arc<ReservationPool>,
    metrics: Arc<Metrics>,
    accounts: Arc<DashMap<AccountId, AccountEntry>>,
    retention_cancel: watch::Sender<bool>,
    retention_trim_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, server_max_memory: i64, server_max_storage: i64) -> Self {
        let accounts = Arc::new(DashMap::new());
        let (retention_cancel, _) = watch::channel(false);

        let bg_accounts = accounts.clone();
        let mut cancel_rx = retention_cancel.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => return,
                    _ = tokio::time::sleep(DEFAULT_RETENTION_TRIM_INTERVAL) => {}
                }
                run_retention_trim_over(&bg_accounts);
            }
        });

        Self {
            transport,
            pool: Arc::new(ReservationPool::new(server_max_memory, server_max_storage)),
            metrics: Arc::new(Metrics::new()),
            accounts,
            retention_cancel,
            retention_trim_handle: Mutex::new(Some(handle)),
        }
    }

    /// Runs one Stream-retention sweep across every account's message
    /// sets immediately, rather than waiting for the background task's
    /// next tick (spec.md:40/:46/:55). The background task already calls
    /// this on its own cadence; an embedder that wants a tighter or
    /// event-driven cadence can call it directly instead.
    pub fn run_retention_trim_all(&self) {
        run_retention_trim_over(&self.accounts);
    }

    /// Cancels the background retention-trim task and waits for it to
    /// exit, mirroring `Observable::shutdown`'s "worker count returns to
    /// baseline" contract (spec §5) for the one background task `Engine`
    /// itself owns. Dropping `Engine` also cancels the task, but without
    /// waiting for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.retention_cancel.send(true);
        let handle = self.retention_trim_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// The engine's prometheus counters. Not wired to an HTTP exporter
    /// (out of scope); callers pull [`Metrics::registry`] themselves.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn is_enabled(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    #[instrument(skip(self, limits), fields(account = %account))]
    pub fn enable_account(&self, account: AccountId, limits: AccountLimits) -> Result<(), BrokerError> {
        if self.accounts.contains_key(&account) {
            return Err(AccountAlreadyEnabledError(account).into());
        }
        let acct = Account::enable(self.pool.clone(), limits)?;
        self.accounts.insert(
            account,
            AccountEntry {
                account: Arc::new(acct),
                msgsets: DashMap::new(),
            },
        );
        Ok(())
    }

    /// Admin `update-limits` (spec §6): re-reserves the account's share of
    /// the server-wide pool against `limits`, leaving the prior limits and
    /// reservation untouched if the new ones don't fit.
    #[instrument(skip(self, limits), fields(account = %account))]
    pub fn update_account_limits(&self, account: &AccountId, limits: AccountLimits) -> Result<(), BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        Ok(entry.account.update_limits(limits)?)
    }

    /// Query an account's configured limits (spec §6: "query reserved
    /// resources and per-account usage").
    pub fn account_limits(&self, account: &AccountId) -> Result<AccountLimits, BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        Ok(entry.account.limits())
    }

    /// Query an account's current usage (spec §6/§4.4).
    pub fn account_usage(&self, account: &AccountId) -> Result<msgset_types::limits::AccountUsage, BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        Ok(entry.account.usage())
    }

    /// Tears down all the account's message sets (and, transitively,
    /// their observables) and releases its reservation (spec §4.4).
    #[instrument(skip(self), fields(account = %account))]
    pub async fn disable_account(&self, account: &AccountId) -> Result<(), BrokerError> {
        let Some((_, entry)) = self.accounts.remove(account) else {
            return Err(AccountNotEnabledError.into());
        };
        let names: Vec<MsgSetName> = entry.msgsets.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, set)) = entry.msgsets.remove(&name) {
                set.delete().await;
            }
        }
        entry.account.disable();
        Ok(())
    }

    /// Creates a message set with an in-process memory backend; callers
    /// wanting file storage should use [`Self::create_msgset_with_backend`].
    pub fn create_msgset(
        &self,
        account: &AccountId,
        name: MsgSetName,
        cfg: MsgSetConfig,
    ) -> Result<Arc<MsgSet>, BrokerError> {
        let backend: Arc<dyn StorageBackend> = match cfg.storage {
            StorageType::Memory => Arc::new(MemoryBackend::new()),
            StorageType::File => {
                Arc::new(crate::backend::FileBackend::new(Arc::new(MemoryBackend::new())))
            }
        };
        self.create_msgset_with_backend(account, name, cfg, backend)
    }

    #[instrument(skip(self, cfg, backend), fields(account = %account, msgset = %name))]
    pub fn create_msgset_with_backend(
        &self,
        account: &AccountId,
        name: MsgSetName,
        cfg: MsgSetConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Arc<MsgSet>, BrokerError> {
        let entry = self
            .accounts
            .get(account)
            .ok_or(AccountNotEnabledError)?;

        if entry.msgsets.contains_key(&name) {
            return Err(MsgSetAlreadyExistsError(name).into());
        }
        let overlap = entry.msgsets.iter().any(|e| {
            cfg.subjects
                .iter()
                .any(|s| e.value().config().subjects.iter().any(|t| s.overlaps(t)))
        });
        if overlap {
            return Err(SubjectOverlapError(name).into());
        }
        entry.account.check_msgset_limit()?;

        let set = MsgSet::create(name.clone(), cfg, backend, entry.account.clone(), self.metrics.clone())?;
        entry.msgsets.insert(name, set.clone());
        entry.account.on_msgset_added();
        info!("message set created");
        Ok(set)
    }

    #[instrument(skip(self), fields(account = %account, msgset = %name))]
    pub async fn delete_msgset(&self, account: &AccountId, name: &MsgSetName) -> Result<(), BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        let (_, set) = entry
            .msgsets
            .remove(name)
            .ok_or_else(|| msgset::not_found(name.clone()))?;
        set.delete().await;
        entry.account.on_msgset_removed();
        Ok(())
    }

    pub fn list_msgsets(&self, account: &AccountId) -> Result<Vec<MsgSetName>, BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        Ok(entry.msgsets.iter().map(|e| e.key().clone()).collect())
    }

    pub fn get_msgset(&self, account: &AccountId, name: &MsgSetName) -> Result<Arc<MsgSet>, BrokerError> {
        let entry = self.accounts.get(account).ok_or(AccountNotEnabledError)?;
        entry
            .msgsets
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| msgset::not_found(name.clone()))
    }

    pub fn stats_msgset(&self, account: &AccountId, name: &MsgSetName) -> Result<MsgSetStats, BrokerError> {
        Ok(self.get_msgset(account, name)?.stats())
    }

    pub fn purge_msgset(&self, account: &AccountId, name: &MsgSetName) -> Result<usize, BrokerError> {
        Ok(self.get_msgset(account, name)?.purge())
    }

    #[instrument(skip(self, cfg), fields(account = %account, msgset = %msgset_name, observable = %observable_name))]
    pub fn add_observable(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
        observable_name: ObservableName,
        cfg: ObservableConfig,
    ) -> Result<Arc<Observable>, BrokerError> {
        let set = self.get_msgset(account, msgset_name)?;
        set.add_observable(observable_name, cfg, self.transport.clone())
    }

    pub async fn delete_observable(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
        observable_name: &ObservableName,
    ) -> Result<(), BrokerError> {
        let set = self.get_msgset(account, msgset_name)?;
        set.delete_observable(observable_name).await
    }

    pub fn list_observables(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
    ) -> Result<Vec<ObservableName>, BrokerError> {
        Ok(self.get_msgset(account, msgset_name)?.list_observables())
    }

    /// Admin `rebind` (spec.md:84): re-point a durable observable's
    /// delivery subject while it's Inactive.
    #[instrument(skip(self), fields(account = %account, msgset = %msgset_name, observable = %observable_name))]
    pub fn rebind_observable(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
        observable_name: &ObservableName,
        new_subject: Subject,
    ) -> Result<(), BrokerError> {
        let set = self.get_msgset(account, msgset_name)?;
        set.rebind_observable(observable_name, new_subject)
    }

    /// The pull endpoint a client publishes to with an optional decimal
    /// batch-size payload (spec §4.5).
    pub fn request_next_msg_subject(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
        observable_name: &ObservableName,
    ) -> String {
        format!("$JS.A.{account}.{msgset_name}.{observable_name}.NEXT")
    }

    /// Handles an inbound publish on a subject that matched one of the
    /// account's message sets: appends it, then replies `+OK`/`-ERR`
    /// unless the set suppresses acks (spec §4.2).
    #[instrument(skip(self, payload), fields(account = %account, subject))]
    pub async fn publish(
        &self,
        account: &AccountId,
        subject: &str,
        reply_to: Option<&str>,
        payload: Bytes,
        ts: OffsetDateTime,
    ) {
        let set = {
            let Some(entry) = self.accounts.get(account) else {
                if let Some(reply_to) = reply_to {
                    self.transport
                        .publish(reply_to, None, Bytes::from_static(b"-ERR account not enabled"))
                        .await;
                }
                return;
            };
            entry
                .msgsets
                .iter()
                .find(|e| e.value().subjects_match(subject))
                .map(|e| e.value().clone())
        };
        let Some(set) = set else {
            if let Some(reply_to) = reply_to {
                self.transport
                    .publish(reply_to, None, Bytes::from_static(b"-ERR no matching message set"))
                    .await;
            }
            return;
        };
        let no_ack = set.config().no_ack;
        match set.publish(subject, payload, ts) {
            Ok(_seq) => {
                if !no_ack {
                    if let Some(reply_to) = reply_to {
                        self.transport.publish(reply_to, None, Bytes::from_static(b"+OK")).await;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "publish rejected");
                if let Some(reply_to) = reply_to {
                    self.transport
                        .publish(reply_to, None, Bytes::from(e.pub_ack_payload()))
                        .await;
                }
            }
        }
    }

    /// Does the account have JetStream enabled? Answers the well-known
    /// probe subject with `+OK` (spec §4.5/§6).
    pub async fn handle_enabled_probe(&self, account: &AccountId, reply_to: &str) {
        if self.is_enabled(account) {
            self.transport.publish(reply_to, None, Bytes::from_static(b"+OK")).await;
        }
    }

    /// Routes an inbound ack (or pull request, see
    /// [`Self::handle_pull_request`]) arriving on an observable's reply
    /// subject (spec §4.3/§4.5). Malformed or unroutable subjects, and
    /// unknown ack-kind payloads, are dropped silently (spec §7).
    #[instrument(skip(self, payload), fields(account = %account))]
    pub async fn handle_ack_reply(
        &self,
        account: &AccountId,
        ack_subject: &str,
        client_reply: Option<String>,
        payload: &[u8],
    ) {
        let Ok((msgset_name, observable_name, info)) = reply::decode(ack_subject) else {
            return;
        };
        let Some(kind) = AckKind::parse(payload) else {
            return;
        };
        let Ok(msgset_name) = msgset_name.parse::<MsgSetName>() else {
            return;
        };
        let Ok(observable_name) = observable_name.parse::<ObservableName>() else {
            return;
        };
        let Ok(set) = self.get_msgset(account, &msgset_name) else {
            return;
        };
        let Some(observable) = set.observable(&observable_name) else {
            return;
        };
        observable.handle_ack(info.deliver_seq, kind, client_reply).await;
    }

    /// Routes an inbound request on an observable's pull endpoint (spec
    /// §4.3). `payload`, when decimal-parseable, is the batch size.
    #[instrument(skip(self, payload), fields(account = %account, msgset = %msgset_name, observable = %observable_name))]
    pub async fn handle_pull_request(
        &self,
        account: &AccountId,
        msgset_name: &MsgSetName,
        observable_name: &ObservableName,
        reply_to: String,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let set = self.get_msgset(account, msgset_name)?;
        let observable = set
            .observable(observable_name)
            .ok_or_else(|| crate::error::ObservableNotFoundError {
                msgset: msgset_name.clone(),
                observable: observable_name.clone(),
            })?;
        let batch = std::str::from_utf8(payload)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(1);
        observable.request_next(reply_to, batch, None).await;
        Ok(())
    }
}

impl Drop for Engine {
    /// Signals the background retention-trim task to exit. Best-effort:
    /// `Drop` can't await the join, but the task checks the cancel signal
    /// at most one sleep interval after this fires.
    fn drop(&mut self) {
        let _ = self.retention_cancel.send(true);
    }
}

/// One Stream-retention sweep across every account's message sets, shared
/// by the background task spawned in [`Engine::new`] and by
/// [`Engine::run_retention_trim_all`].
fn run_retention_trim_over(accounts: &DashMap<AccountId, AccountEntry>) {
    let now = OffsetDateTime::now_utc();
    for entry in accounts.iter() {
        for set in entry.value().msgsets.iter() {
            if set.value().config().retention == RetentionPolicy::Stream {
                set.value().run_retention_trim(now);
            }
        }
    }
    debug!("retention trim sweep complete");
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::test_support::FakeTransport;

    fn msgset_cfg(subjects: &[&str], retention: RetentionPolicy) -> MsgSetConfig {
        MsgSetConfig {
            subjects: subjects.iter().map(|s| Subject::new(*s).unwrap()).collect(),
            retention,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_retention_trim_all_evicts_oversized_stream_without_waiting_for_background_tick() {
        let transport = FakeTransport::new();
        let engine = Engine::new(transport, -1, -1);
        let account: AccountId = "acct".parse().unwrap();
        engine.enable_account(account.clone(), AccountLimits::default()).unwrap();

        let cfg = MsgSetConfig {
            max_msgs: Some(2),
            ..msgset_cfg(&["trim.*"], RetentionPolicy::Stream)
        };
        let msgset_name: MsgSetName = "TRIM".parse().unwrap();
        engine.create_msgset(&account, msgset_name.clone(), cfg).unwrap();
        for i in 0..5u32 {
            engine
                .publish(&account, "trim.a", None, Bytes::from(format!("m{i}")), OffsetDateTime::now_utc())
                .await;
        }
        assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 5);

        engine.run_retention_trim_all();
        assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 2);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn retention_trim_ignores_non_stream_message_sets() {
        let transport = FakeTransport::new();
        let engine = Engine::new(transport, -1, -1);
        let account: AccountId = "acct".parse().unwrap();
        engine.enable_account(account.clone(), AccountLimits::default()).unwrap();

        let cfg = MsgSetConfig {
            max_msgs: Some(1),
            ..msgset_cfg(&["wq.*"], RetentionPolicy::WorkQueue)
        };
        let msgset_name: MsgSetName = "WQ".parse().unwrap();
        engine.create_msgset(&account, msgset_name.clone(), cfg).unwrap();
        for i in 0..3u32 {
            engine
                .publish(&account, "wq.a", None, Bytes::from(format!("m{i}")), OffsetDateTime::now_utc())
                .await;
        }

        engine.run_retention_trim_all();
        assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 3);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn rebind_observable_admin_entry_point_rebinds_durable_observable() {
        let transport = FakeTransport::new();
        let engine = Engine::new(transport.clone(), -1, -1);
        let account: AccountId = "acct".parse().unwrap();
        engine.enable_account(account.clone(), AccountLimits::default()).unwrap();

        let msgset_name: MsgSetName = "REB".parse().unwrap();
        let set = engine.create_msgset(&account, msgset_name.clone(), msgset_cfg(&["reb.*"], RetentionPolicy::Stream)).unwrap();
        set.set_ephemeral_check(crate::observable::EphemeralCheckConfig {
            interval: std::time::Duration::from_millis(20),
            threshold: 1,
        });

        transport.set_interest("out.reb", true);
        let observable_name: ObservableName = "durobs".parse().unwrap();
        let observable = engine
            .add_observable(
                &account,
                &msgset_name,
                observable_name.clone(),
                ObservableConfig {
                    durable: Some(observable_name.clone()),
                    delivery_subject: Some(Subject::new("out.reb").unwrap()),
                    ack_policy: msgset_types::config::AckPolicy::None,
                    start: msgset_types::config::StartPolicy::New,
                    ..Default::default()
                },
            )
            .unwrap();

        // Rebind is rejected while the observable is still active.
        let err = engine
            .rebind_observable(&account, &msgset_name, &observable_name, Subject::new("out.reb2").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);

        transport.set_interest("out.reb", false);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!observable.is_active());

        engine
            .rebind_observable(&account, &msgset_name, &observable_name, Subject::new("out.reb2").unwrap())
            .unwrap();
        assert!(observable.is_active());

        engine.shutdown().await;
    }
}
