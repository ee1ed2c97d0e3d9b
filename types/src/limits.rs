use serde::{Deserialize, Serialize};

/// `-1` in any limit field means unbounded, matching the wire convention
/// the rest of the ecosystem uses for these admin-facing resource caps.
pub const UNBOUNDED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLimits {
    pub max_memory: i64,
    pub max_storage: i64,
    pub max_msg_sets: i64,
    pub max_observables: i64,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            max_memory: UNBOUNDED,
            max_storage: UNBOUNDED,
            max_msg_sets: UNBOUNDED,
            max_observables: UNBOUNDED,
        }
    }
}

impl AccountLimits {
    pub fn fits(limit: i64, used: u64) -> bool {
        limit == UNBOUNDED || used < limit as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUsage {
    pub memory_used: u64,
    pub storage_used: u64,
    pub msg_sets_count: u64,
    pub observables_count: u64,
}
