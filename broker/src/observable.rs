//! Observable: a per-message-set delivery cursor with independent ack
//! state (spec §4.3, the 35%-share core of this crate). Push delivery,
//! pull delivery, ack/nak/progress/ack-next, ack-wait redelivery, replay
//! pacing, and the ephemeral inactivity lifecycle all live here.
//!
//! Grounded in the teacher's `backend/streamer.rs` actor shape: one
//! spawned task owns the mutable cursor/pending state, woken by a
//! `watch` "new message" signal from the parent message set (the
//! teacher's `follow_tx`) and by its own cancellation `watch` (the
//! teacher's `on_exit` callback). `tokio::sync::Notify` stands in for
//! the teacher's trigger channel where a single immediate nudge (ack
//! received, nak, progress) is all that's needed.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Arc, Weak},
    time::Duration,
};

use msgset_types::{
    ack::AckKind,
    config::{AckPolicy, ObservableConfig, ReplayPolicy, StartPolicy},
    message::{DeliverSeq, Message, StoreSeq},
    names::ObservableName,
    subject::Subject,
};
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
    time::Instant as TokioInstant,
};
use tracing::{debug, instrument, warn};

use crate::{
    backend::StorageBackend,
    error::{BrokerError, RebindRequiresDurableError, RebindWhileActiveError},
    metrics::Metrics,
    msgset::MsgSet,
    reply,
    transport::Transport,
};

/// Production default tolerant of short client reconnects (spec §9 open
/// question: "An implementer should pick a default (seconds)"), with the
/// interval and tick threshold both overridable for tests that want to
/// observe ephemeral teardown without a multi-second wait.
#[derive(Debug, Clone, Copy)]
pub struct EphemeralCheckConfig {
    pub interval: Duration,
    pub threshold: u32,
}

impl Default for EphemeralCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            threshold: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    store_seq: StoreSeq,
    first_delivered_at: TokioInstant,
    deliver_count: u64,
}

#[derive(Debug, Clone)]
struct PullWaiter {
    reply: String,
    remaining: u64,
    expires_at: Option<TokioInstant>,
}

impl PullWaiter {
    fn is_expired(&self, now: TokioInstant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct State {
    next_store_seq: StoreSeq,
    scanned_up_to: StoreSeq,
    next_deliver_seq: DeliverSeq,
    pending: HashMap<DeliverSeq, PendingEntry>,
    /// Explicit-ack-policy bookkeeping: store_seqs delivered at least
    /// once and not yet acked. The ack floor is one less than the
    /// smallest member (spec §8: "a message survives iff some attached
    /// observable has not yet acked past it").
    unacked: BTreeSet<StoreSeq>,
    /// All-ack-policy bookkeeping: acking any store_seq acks everything
    /// up to and including it.
    ack_all_floor: StoreSeq,
    redelivery_queue: VecDeque<(StoreSeq, u64)>,
    waiters: VecDeque<PullWaiter>,
    delivery_subject: Option<Subject>,
    active: bool,
    deleted: bool,
    inactive_ticks: u32,
}

/// One message ready to go out, decoupled from the lock that produced it
/// so delivery (transport I/O, replay pacing) never runs while the
/// observable's state mutex is held.
struct DeliveryJob {
    target: String,
    message: Message,
    deliver_count: u64,
    deliver_seq: DeliverSeq,
}

pub struct Observable {
    pub name: ObservableName,
    durable: Option<ObservableName>,
    partition: Option<Subject>,
    ack_policy: AckPolicy,
    ack_wait: Duration,
    replay: ReplayPolicy,
    msgset: Weak<MsgSet>,
    msgset_name: String,
    backend: Arc<dyn StorageBackend>,
    transport: Arc<dyn Transport>,
    ephemeral_check: EphemeralCheckConfig,
    metrics: Arc<Metrics>,
    state: Mutex<State>,
    wake: Notify,
    cancel_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Observable {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        name: ObservableName,
        cfg: ObservableConfig,
        msgset: Weak<MsgSet>,
        backend: Arc<dyn StorageBackend>,
        transport: Arc<dyn Transport>,
        ephemeral_check: EphemeralCheckConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let stats = backend.stats();
        let next_store_seq = match cfg.start {
            StartPolicy::New => stats.last_seq + 1,
            StartPolicy::Last => {
                if stats.last_seq == 0 {
                    1
                } else {
                    stats.last_seq
                }
            }
            StartPolicy::All => stats.first_seq.max(1),
            StartPolicy::BySeq(n) => n.max(stats.first_seq.max(1)),
            StartPolicy::ByTime(t) => backend.seq_at_or_after_time(t),
        };
        let scanned_up_to = next_store_seq.saturating_sub(1);
        let msgset_name = msgset
            .upgrade()
            .expect("message set is alive during its own observable creation")
            .name
            .to_string();

        let (cancel_tx, _) = watch::channel(false);
        let state = Mutex::new(State {
            next_store_seq,
            scanned_up_to,
            next_deliver_seq: 1,
            pending: HashMap::new(),
            unacked: BTreeSet::new(),
            ack_all_floor: 0,
            redelivery_queue: VecDeque::new(),
            waiters: VecDeque::new(),
            delivery_subject: cfg.delivery_subject.clone(),
            active: true,
            deleted: false,
            inactive_ticks: 0,
        });

        let is_push = cfg.delivery_subject.is_some();
        let observable = Arc::new(Self {
            name,
            durable: cfg.durable,
            partition: cfg.partition,
            ack_policy: cfg.ack_policy,
            ack_wait: cfg.ack_wait,
            replay: cfg.replay,
            msgset,
            msgset_name,
            backend,
            transport,
            ephemeral_check,
            metrics,
            state,
            wake: Notify::new(),
            cancel_tx,
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::new();
        if is_push {
            let obs = observable.clone();
            handles.push(tokio::spawn(async move { obs.run_push().await }));
            let obs = observable.clone();
            handles.push(tokio::spawn(async move { obs.run_interest_checker().await }));
        } else {
            let obs = observable.clone();
            handles.push(tokio::spawn(async move { obs.run_pull().await }));
        }
        *observable.workers.lock() = handles;

        observable
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub fn partition(&self) -> Option<&Subject> {
        self.partition.as_ref()
    }

    pub fn partition_matches(&self, subject: &str) -> bool {
        match &self.partition {
            Some(p) => p.matches(subject),
            None => true,
        }
    }

    /// Spec §8: the floor past which Interest-retention may delete.
    pub fn ack_floor(&self) -> StoreSeq {
        let st = self.state.lock();
        match self.ack_policy {
            AckPolicy::None => st.scanned_up_to,
            AckPolicy::All => st.ack_all_floor,
            AckPolicy::Explicit => st
                .unacked
                .iter()
                .next()
                .map(|&m| m - 1)
                .unwrap_or(st.scanned_up_to),
        }
    }

    /// Spec §4.2 `Purge()`: cursors below the new first_seq advance to
    /// it; pending/redelivery/unacked entries for purged messages are
    /// dropped, since those messages no longer exist to ack or redeliver.
    pub fn advance_past_purge(&self, new_first: StoreSeq) {
        let mut st = self.state.lock();
        if st.next_store_seq < new_first {
            st.next_store_seq = new_first;
            st.scanned_up_to = new_first - 1;
        }
        st.redelivery_queue.retain(|&(seq, _)| seq >= new_first);
        st.pending.retain(|_, e| e.store_seq >= new_first);
        if self.ack_policy == AckPolicy::Explicit {
            st.unacked = st.unacked.split_off(&new_first);
        }
        drop(st);
        self.wake.notify_one();
    }

    /// Durable-only rebind to a new delivery subject while inactive
    /// (spec §4.3/§4.6).
    pub fn rebind(&self, new_subject: Subject) -> Result<(), BrokerError> {
        if self.durable.is_none() {
            return Err(RebindRequiresDurableError.into());
        }
        let mut st = self.state.lock();
        if st.active {
            return Err(RebindWhileActiveError.into());
        }
        st.delivery_subject = Some(new_subject);
        st.active = true;
        st.inactive_ticks = 0;
        drop(st);
        self.wake.notify_one();
        Ok(())
    }

    /// Pull request: deliver up to `batch` messages immediately if any
    /// are available; otherwise park in the FIFO waiter queue to be
    /// served by a later publish (spec §4.3). `expires` models a
    /// client-side request timeout: a waiter past its deadline is
    /// dropped silently instead of served.
    #[instrument(skip(self), fields(observable = %self.name))]
    pub async fn request_next(&self, reply: String, batch: u64, expires: Option<Duration>) {
        let jobs = {
            let mut st = self.state.lock();
            let mut jobs = Vec::new();
            let mut remaining = batch.max(1);
            while remaining > 0 {
                match self.deliver_candidate(&mut st, reply.clone()) {
                    Some(job) => {
                        jobs.push(job);
                        remaining -= 1;
                    }
                    None => break,
                }
            }
            if jobs.is_empty() {
                st.waiters.push_back(PullWaiter {
                    reply,
                    remaining: batch.max(1),
                    expires_at: expires.map(|d| TokioInstant::now() + d),
                });
            }
            jobs
        };
        let mut no_pace = None;
        self.send_jobs(jobs, &mut no_pace).await;
    }

    /// Ack-kind dispatch for the reply-subject routed payload (spec §4.3
    /// table). `client_reply` is the publisher's own reply-to on the ack
    /// message, used by `AckNext` to serve the next message back to it.
    #[instrument(skip(self, client_reply), fields(observable = %self.name, ?kind))]
    pub async fn handle_ack(&self, deliver_seq: DeliverSeq, kind: AckKind, client_reply: Option<String>) {
        match kind {
            AckKind::Ack => self.do_ack(deliver_seq),
            AckKind::Nak => self.do_nak(deliver_seq),
            AckKind::Progress => self.do_progress(deliver_seq),
            AckKind::AckNext => {
                self.do_ack(deliver_seq);
                if let Some(reply) = client_reply {
                    self.request_next(reply, 1, None).await;
                }
            }
        }
    }

    fn do_ack(&self, deliver_seq: DeliverSeq) {
        let store_seq = {
            let mut st = self.state.lock();
            let Some(entry) = st.pending.remove(&deliver_seq) else {
                return;
            };
            match self.ack_policy {
                AckPolicy::Explicit => {
                    st.unacked.remove(&entry.store_seq);
                }
                AckPolicy::All => {
                    st.ack_all_floor = st.ack_all_floor.max(entry.store_seq);
                }
                AckPolicy::None => {}
            }
            entry.store_seq
        };
        debug!(store_seq, deliver_seq, "acked");
        if let Some(msgset) = self.msgset.upgrade() {
            msgset.on_observable_ack(store_seq);
        }
        self.wake.notify_one();
    }

    /// Nak/Progress/AckNext on a store_seq not currently pending is a
    /// no-op and never causes a redelivery (spec §4.3: "cannot nak what
    /// was acked").
    fn do_nak(&self, deliver_seq: DeliverSeq) {
        let mut st = self.state.lock();
        if let Some(entry) = st.pending.remove(&deliver_seq) {
            st.redelivery_queue
                .push_front((entry.store_seq, entry.deliver_count));
            drop(st);
            self.wake.notify_one();
        }
    }

    fn do_progress(&self, deliver_seq: DeliverSeq) {
        let mut st = self.state.lock();
        if let Some(entry) = st.pending.get_mut(&deliver_seq) {
            entry.first_delivered_at = TokioInstant::now();
        }
    }

    fn tick_interval(&self) -> Duration {
        (self.ack_wait / 4).max(Duration::from_millis(5))
    }

    /// Sweep pending entries past `ack_wait`, pushing their store_seq to
    /// the head of the redelivery queue (spec §4.3). `AckPolicy::None`
    /// never tracks pending entries, so there is nothing to sweep.
    fn process_ack_wait_expiries(&self) {
        if self.ack_policy == AckPolicy::None {
            return;
        }
        let now = TokioInstant::now();
        let ack_wait = self.ack_wait;
        let mut st = self.state.lock();
        let expired: Vec<DeliverSeq> = st
            .pending
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.first_delivered_at) >= ack_wait)
            .map(|(&ds, _)| ds)
            .collect();
        if expired.is_empty() {
            return;
        }
        for ds in expired {
            if let Some(entry) = st.pending.remove(&ds) {
                st.redelivery_queue
                    .push_front((entry.store_seq, entry.deliver_count));
            }
        }
        drop(st);
        self.wake.notify_one();
    }

    /// Candidate selection: redelivery queue drained first, else the
    /// cursor scanning forward and skipping non-matching/gap-removed
    /// messages (spec §4.3/§5). Does not mutate state — pure peek.
    fn peek_next_eligible(&self, st: &mut State) -> Option<(StoreSeq, Message)> {
        while let Some(&(seq, _)) = st.redelivery_queue.front() {
            match self.backend.lookup(seq) {
                Ok(msg) => return Some((seq, msg)),
                Err(_) => {
                    st.redelivery_queue.pop_front();
                }
            }
        }
        let msgset = self.msgset.upgrade()?;
        let last_seq = msgset.stats().last_seq;
        while st.next_store_seq <= last_seq {
            let seq = st.next_store_seq;
            match self.backend.lookup(seq) {
                Ok(msg) if self.partition_matches(&msg.subject) => return Some((seq, msg)),
                _ => {
                    st.next_store_seq += 1;
                    st.scanned_up_to = seq;
                }
            }
        }
        None
    }

    /// Commits a candidate produced by `peek_next_eligible`: advances the
    /// cursor (fresh delivery) or pops the redelivery queue, returning
    /// the deliver_count to build on (0 for a fresh delivery).
    fn commit_candidate(&self, st: &mut State, seq: StoreSeq) -> u64 {
        if st.redelivery_queue.front().map(|&(s, _)| s) == Some(seq) {
            self.metrics.redeliveries_total.inc();
            st.redelivery_queue.pop_front().expect("front just matched").1
        } else {
            st.next_store_seq = st.next_store_seq.max(seq + 1);
            st.scanned_up_to = st.scanned_up_to.max(seq);
            0
        }
    }

    /// Peek, commit, and (for ack-tracked policies) register the pending
    /// entry for one candidate, addressed to `target`. `None` if nothing
    /// is eligible right now.
    fn deliver_candidate(&self, st: &mut State, target: String) -> Option<DeliveryJob> {
        let (seq, msg) = self.peek_next_eligible(st)?;
        let base_count = self.commit_candidate(st, seq);
        let deliver_seq = st.next_deliver_seq;
        st.next_deliver_seq += 1;
        let deliver_count = base_count + 1;
        if self.ack_policy != AckPolicy::None {
            st.pending.insert(
                deliver_seq,
                PendingEntry {
                    store_seq: seq,
                    first_delivered_at: TokioInstant::now(),
                    deliver_count,
                },
            );
            if self.ack_policy == AckPolicy::Explicit {
                st.unacked.insert(seq);
            }
        }
        Some(DeliveryJob {
            target,
            message: msg,
            deliver_count,
            deliver_seq,
        })
    }

    fn drain_push(&self) -> Vec<DeliveryJob> {
        let mut st = self.state.lock();
        if !st.active {
            return Vec::new();
        }
        let Some(subject) = st.delivery_subject.clone() else {
            return Vec::new();
        };
        let mut jobs = Vec::new();
        while let Some(job) = self.deliver_candidate(&mut st, subject.as_str().to_string()) {
            jobs.push(job);
        }
        jobs
    }

    fn drain_pull(&self) -> Vec<DeliveryJob> {
        let mut st = self.state.lock();
        let mut jobs = Vec::new();
        loop {
            let now = TokioInstant::now();
            while st.waiters.front().is_some_and(|w| w.is_expired(now)) {
                st.waiters.pop_front();
            }
            let Some(reply) = st.waiters.front().map(|w| w.reply.clone()) else {
                break;
            };
            let Some(job) = self.deliver_candidate(&mut st, reply) else {
                break;
            };
            jobs.push(job);
            let front = st.waiters.front_mut().expect("checked above");
            front.remaining -= 1;
            if front.remaining == 0 {
                st.waiters.pop_front();
            }
        }
        jobs
    }

    /// Publishes every job's message to its target, encoding the ack
    /// reply subject from this observable's live accounting. `pace`
    /// carries the replay-Original state across calls within the same
    /// task; pull delivery never paces (`None`).
    async fn send_jobs(
        &self,
        jobs: Vec<DeliveryJob>,
        pace: &mut Option<(TokioInstant, time::OffsetDateTime)>,
    ) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        for job in jobs {
            if *cancel_rx.borrow() {
                return;
            }
            if self.replay == ReplayPolicy::Original {
                if let Some((sent_at, sent_ts)) = *pace {
                    let gap = job.message.ts - sent_ts;
                    let gap = if gap.is_negative() {
                        Duration::ZERO
                    } else {
                        gap.unsigned_abs()
                    };
                    tokio::select! {
                        _ = tokio::time::sleep_until(sent_at + gap) => {}
                        _ = cancel_rx.changed() => return,
                    }
                }
                *pace = Some((TokioInstant::now(), job.message.ts));
            }
            let reply_subject = reply::encode(
                &self.msgset_name,
                self.name.as_str(),
                job.deliver_count,
                job.message.store_seq,
                job.deliver_seq,
            );
            self.transport
                .publish(&job.target, Some(&reply_subject), job.message.payload.clone())
                .await;
        }
    }

    #[instrument(skip(self), fields(observable = %self.name))]
    async fn run_push(self: Arc<Self>) {
        let Some(msgset) = self.msgset.upgrade() else {
            return;
        };
        let mut new_msg_rx = msgset.subscribe_new_msg();
        drop(msgset);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut pace: Option<(TokioInstant, time::OffsetDateTime)> = None;
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            self.process_ack_wait_expiries();
            let jobs = self.drain_push();
            self.send_jobs(jobs, &mut pace).await;
            tokio::select! {
                _ = cancel_rx.changed() => break,
                _ = new_msg_rx.changed() => {},
                _ = self.wake.notified() => {},
                _ = tokio::time::sleep(self.tick_interval()) => {},
            }
        }
        debug!("push delivery loop exiting");
    }

    #[instrument(skip(self), fields(observable = %self.name))]
    async fn run_pull(self: Arc<Self>) {
        let Some(msgset) = self.msgset.upgrade() else {
            return;
        };
        let mut new_msg_rx = msgset.subscribe_new_msg();
        drop(msgset);
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            self.process_ack_wait_expiries();
            let jobs = self.drain_pull();
            let mut no_pace = None;
            self.send_jobs(jobs, &mut no_pace).await;
            tokio::select! {
                _ = cancel_rx.changed() => break,
                _ = new_msg_rx.changed() => {},
                _ = self.wake.notified() => {},
                _ = tokio::time::sleep(self.tick_interval()) => {},
            }
        }
        debug!("pull delivery loop exiting");
    }

    /// Watches delivery-subject interest for every push observable, not
    /// just ephemeral ones (spec.md:84/:104): a durable observable that
    /// loses interest for `threshold` consecutive ticks is marked
    /// Inactive but kept alive for `rebind`; an ephemeral one is torn
    /// down instead, since nothing durable-shaped is left to rebind it
    /// to. Interest regained on the same subject while Inactive
    /// reactivates a durable observable without requiring an explicit
    /// rebind.
    #[instrument(skip(self), fields(observable = %self.name))]
    async fn run_interest_checker(self: Arc<Self>) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            tokio::select! {
                _ = cancel_rx.changed() => return,
                _ = tokio::time::sleep(self.ephemeral_check.interval) => {}
            }
            let subject = { self.state.lock().delivery_subject.clone() };
            let Some(subject) = subject else { continue };
            let has_interest = self.transport.has_interest(subject.as_str());
            let should_delete = {
                let mut st = self.state.lock();
                if has_interest {
                    st.inactive_ticks = 0;
                    if !st.active {
                        st.active = true;
                        debug!("observable regained interest, reactivated");
                        self.wake.notify_one();
                    }
                    false
                } else if st.active {
                    st.inactive_ticks += 1;
                    if st.inactive_ticks >= self.ephemeral_check.threshold {
                        st.active = false;
                        warn!(durable = self.durable.is_some(), "observable lost interest, marked inactive");
                    }
                    false
                } else {
                    self.durable.is_none()
                }
            };
            if should_delete {
                if let Some(msgset) = self.msgset.upgrade() {
                    let name = self.name.clone();
                    tokio::spawn(async move {
                        let _ = msgset.delete_observable(&name).await;
                    });
                }
                return;
            }
        }
    }

    /// Cancels every worker and awaits their exit, so `Delete` returns
    /// only once the worker population has returned to baseline (spec
    /// §5/§8).
    #[instrument(skip(self), fields(observable = %self.name))]
    pub async fn shutdown(&self) {
        let already_deleted = {
            let mut st = self.state.lock();
            let prev = st.deleted;
            st.deleted = true;
            st.active = false;
            prev
        };
        if already_deleted {
            return;
        }
        let _ = self.cancel_tx.send(true);
        self.wake.notify_waiters();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        debug!("observable workers drained");
    }
}
