//! Account limits & usage tracker (spec §4.4) plus the process-wide
//! reservation pool (spec §9 "Global mutable state"): `init` on enable,
//! `teardown` on disable, guarded by one coarse lock since admin calls —
//! not data-plane traffic — dominate contention on it.

use std::sync::Arc;

use msgset_types::limits::{AccountLimits, AccountUsage, UNBOUNDED};
use parking_lot::Mutex;

use crate::error::{
    AccountMemoryExhaustedError, AccountStorageExhaustedError, MsgSetLimitExceededError,
    ObservableLimitExceededError, PoolExhaustedError,
};

/// `max_memory: 0` resolves to roughly 75% of host RAM per spec §6. This
/// crate has no host-introspection dependency, so the fallback constant
/// below stands in; an embedder that cares about the exact figure should
/// pass an explicit `max_memory` rather than rely on the heuristic.
const HEURISTIC_HOST_MEMORY_FALLBACK: u64 = 8 * 1024 * 1024 * 1024 * 3 / 4;

#[derive(Default)]
struct PoolInner {
    memory_reserved: u64,
    storage_reserved: u64,
}

pub struct ReservationPool {
    memory_total: Option<u64>,
    storage_total: Option<u64>,
    inner: Mutex<PoolInner>,
}

impl ReservationPool {
    pub fn new(memory_total: i64, storage_total: i64) -> Self {
        Self {
            memory_total: (memory_total != UNBOUNDED).then_some(memory_total as u64),
            storage_total: (storage_total != UNBOUNDED).then_some(storage_total as u64),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    fn reserve(&self, memory: u64, storage: u64) -> Result<(), PoolExhaustedError> {
        let mut inner = self.inner.lock();
        if let Some(total) = self.memory_total {
            if inner.memory_reserved + memory > total {
                return Err(PoolExhaustedError);
            }
        }
        if let Some(total) = self.storage_total {
            if inner.storage_reserved + storage > total {
                return Err(PoolExhaustedError);
            }
        }
        inner.memory_reserved += memory;
        inner.storage_reserved += storage;
        Ok(())
    }

    fn release(&self, memory: u64, storage: u64) {
        let mut inner = self.inner.lock();
        inner.memory_reserved = inner.memory_reserved.saturating_sub(memory);
        inner.storage_reserved = inner.storage_reserved.saturating_sub(storage);
    }

    /// Atomically swaps one reservation for another under a single lock
    /// acquisition, so a concurrent reservation elsewhere can't slip into
    /// the gap between releasing the old amount and claiming the new one.
    fn swap(&self, old: Reservation, new: Reservation) -> Result<(), PoolExhaustedError> {
        let mut inner = self.inner.lock();
        let memory_reserved = inner.memory_reserved.saturating_sub(old.memory) + new.memory;
        let storage_reserved = inner.storage_reserved.saturating_sub(old.storage) + new.storage;
        if let Some(total) = self.memory_total {
            if memory_reserved > total {
                return Err(PoolExhaustedError);
            }
        }
        if let Some(total) = self.storage_total {
            if storage_reserved > total {
                return Err(PoolExhaustedError);
            }
        }
        inner.memory_reserved = memory_reserved;
        inner.storage_reserved = storage_reserved;
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Reservation {
    memory: u64,
    storage: u64,
}

fn reservation_for(limits: &AccountLimits) -> Reservation {
    Reservation {
        memory: (limits.max_memory != UNBOUNDED).then_some(limits.max_memory as u64).unwrap_or(0),
        storage: (limits.max_storage != UNBOUNDED).then_some(limits.max_storage as u64).unwrap_or(0),
    }
}

pub struct Account {
    limits: Mutex<AccountLimits>,
    usage: Mutex<AccountUsage>,
    pool: Arc<ReservationPool>,
    reservation: Mutex<Reservation>,
}

impl Account {
    pub fn enable(
        pool: Arc<ReservationPool>,
        mut limits: AccountLimits,
    ) -> Result<Self, PoolExhaustedError> {
        if limits.max_memory == 0 {
            limits.max_memory = HEURISTIC_HOST_MEMORY_FALLBACK as i64;
        }
        // Reservation against the server pool is best-effort against
        // unbounded accounts: an account with max_memory=-1 draws zero
        // from the shared pool but is still bounded by it transitively
        // through the per-append memory_used check below.
        let reservation = reservation_for(&limits);
        pool.reserve(reservation.memory, reservation.storage)?;
        Ok(Self {
            limits: Mutex::new(limits),
            usage: Mutex::new(AccountUsage::default()),
            pool,
            reservation: Mutex::new(reservation),
        })
    }

    pub fn disable(&self) {
        let r = *self.reservation.lock();
        self.pool.release(r.memory, r.storage);
    }

    pub fn limits(&self) -> AccountLimits {
        *self.limits.lock()
    }

    pub fn usage(&self) -> AccountUsage {
        *self.usage.lock()
    }

    /// Admin `update-limits` (spec §6): re-reserves the account's share of
    /// the server-wide pool against the new limits, rolling back to the
    /// old reservation if the new one does not fit.
    pub fn update_limits(&self, mut new_limits: AccountLimits) -> Result<(), PoolExhaustedError> {
        if new_limits.max_memory == 0 {
            new_limits.max_memory = HEURISTIC_HOST_MEMORY_FALLBACK as i64;
        }
        let new_reservation = reservation_for(&new_limits);
        let mut reservation = self.reservation.lock();
        self.pool.swap(*reservation, new_reservation)?;
        *reservation = new_reservation;
        *self.limits.lock() = new_limits;
        Ok(())
    }

    pub fn check_msgset_limit(&self) -> Result<(), MsgSetLimitExceededError> {
        let limits = *self.limits.lock();
        let usage = self.usage.lock();
        if AccountLimits::fits(limits.max_msg_sets, usage.msg_sets_count) {
            Ok(())
        } else {
            Err(MsgSetLimitExceededError)
        }
    }

    pub fn check_observable_limit(&self) -> Result<(), ObservableLimitExceededError> {
        let limits = *self.limits.lock();
        let usage = self.usage.lock();
        if AccountLimits::fits(limits.max_observables, usage.observables_count) {
            Ok(())
        } else {
            Err(ObservableLimitExceededError)
        }
    }

    pub fn on_msgset_added(&self) {
        self.usage.lock().msg_sets_count += 1;
    }

    pub fn on_msgset_removed(&self) {
        let mut usage = self.usage.lock();
        usage.msg_sets_count = usage.msg_sets_count.saturating_sub(1);
    }

    pub fn on_observable_added(&self) {
        self.usage.lock().observables_count += 1;
    }

    pub fn on_observable_removed(&self) {
        let mut usage = self.usage.lock();
        usage.observables_count = usage.observables_count.saturating_sub(1);
    }

    /// Checks and reserves `bytes` for a memory-backed append, atomically
    /// with the caller's log mutation (spec §3: "Each message append/
    /// delete mutates usage atomically with the corresponding log
    /// change" — callers hold the message set's append lock while
    /// calling this).
    pub fn reserve_memory(&self, bytes: u64) -> Result<(), AccountMemoryExhaustedError> {
        let limits = *self.limits.lock();
        let mut usage = self.usage.lock();
        if !AccountLimits::fits(limits.max_memory, usage.memory_used + bytes) {
            return Err(AccountMemoryExhaustedError);
        }
        usage.memory_used += bytes;
        Ok(())
    }

    pub fn reserve_storage(&self, bytes: u64) -> Result<(), AccountStorageExhaustedError> {
        let limits = *self.limits.lock();
        let mut usage = self.usage.lock();
        if !AccountLimits::fits(limits.max_storage, usage.storage_used + bytes) {
            return Err(AccountStorageExhaustedError);
        }
        usage.storage_used += bytes;
        Ok(())
    }

    pub fn release_memory(&self, bytes: u64) {
        let mut usage = self.usage.lock();
        usage.memory_used = usage.memory_used.saturating_sub(bytes);
    }

    pub fn release_storage(&self, bytes: u64) {
        let mut usage = self.usage.lock();
        usage.storage_used = usage.storage_used.saturating_sub(bytes);
    }
}
