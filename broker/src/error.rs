//! Error taxonomy for the engine: one small struct per failure condition
//! (teacher style, see `s2-lite`'s `backend/error.rs`), composed into a
//! single `BrokerError` that classifies into the kinds spec'd in §7.

use msgset_types::names::{MsgSetName, ObservableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    InvalidState,
    Transient,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("message set `{0}` not found")]
pub struct MsgSetNotFoundError(pub MsgSetName);

#[derive(Debug, Clone, thiserror::Error)]
#[error("observable `{observable}` not found on message set `{msgset}`")]
pub struct ObservableNotFoundError {
    pub msgset: MsgSetName,
    pub observable: ObservableName,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("no message at store sequence {0}")]
pub struct SeqNotFoundError(pub u64);

#[derive(Debug, Clone, thiserror::Error)]
#[error("message set `{0}` already exists")]
pub struct MsgSetAlreadyExistsError(pub MsgSetName);

#[derive(Debug, Clone, thiserror::Error)]
#[error("durable observable `{observable}` on `{msgset}` already has an active subscriber")]
pub struct DurableObserverActiveError {
    pub msgset: MsgSetName,
    pub observable: ObservableName,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("subjects of `{0}` overlap an existing message set on this account")]
pub struct SubjectOverlapError(pub MsgSetName);

#[derive(Debug, Clone, thiserror::Error)]
#[error("push observables require a literal delivery subject")]
pub struct DeliverySubjectNotLiteralError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("delivery subject is covered by the message set's own subject filter")]
pub struct SelfIngestionError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("a non-durable push observable requires subscriber interest at creation")]
pub struct NoInterestAtCreationError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("pull observables require ack_policy=Explicit")]
pub struct PullRequiresExplicitAckError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("partitioned observables may not use ack_policy=All")]
pub struct PartitionedAckAllError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("start configuration must set exactly one of {{by_seq, by_time, all, last, new}}")]
pub struct StartModeConflictError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("WorkQueue message sets require start=all and no push delivery subject")]
pub struct WorkQueueObservableShapeError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("partition filter overlaps an existing observable on this WorkQueue message set")]
pub struct WorkQueuePartitionOverlapError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("replicas must equal 1")]
pub struct ReplicasUnsupportedError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account memory reservation exhausted")]
pub struct AccountMemoryExhaustedError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account storage reservation exhausted")]
pub struct AccountStorageExhaustedError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account message-set limit reached")]
pub struct MsgSetLimitExceededError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account observable limit reached")]
pub struct ObservableLimitExceededError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("server-wide reservation pool exhausted")]
pub struct PoolExhaustedError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account is not JetStream-enabled")]
pub struct AccountNotEnabledError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot rebind a delivery subject while the observable is active")]
pub struct RebindWhileActiveError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("only a durable observable may be rebound to a new delivery subject")]
pub struct RebindRequiresDurableError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("account `{0}` already enabled")]
pub struct AccountAlreadyEnabledError(pub msgset_types::names::AccountId);

#[derive(Debug, Clone, thiserror::Error)]
#[error("publish rejected: temporary backpressure")]
pub struct TransientPressureError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    MsgSetNotFound(#[from] MsgSetNotFoundError),
    #[error(transparent)]
    ObservableNotFound(#[from] ObservableNotFoundError),
    #[error(transparent)]
    SeqNotFound(#[from] SeqNotFoundError),
    #[error(transparent)]
    MsgSetAlreadyExists(#[from] MsgSetAlreadyExistsError),
    #[error(transparent)]
    DurableObserverActive(#[from] DurableObserverActiveError),
    #[error(transparent)]
    SubjectOverlap(#[from] SubjectOverlapError),
    #[error(transparent)]
    DeliverySubjectNotLiteral(#[from] DeliverySubjectNotLiteralError),
    #[error(transparent)]
    SelfIngestion(#[from] SelfIngestionError),
    #[error(transparent)]
    NoInterestAtCreation(#[from] NoInterestAtCreationError),
    #[error(transparent)]
    PullRequiresExplicitAck(#[from] PullRequiresExplicitAckError),
    #[error(transparent)]
    PartitionedAckAll(#[from] PartitionedAckAllError),
    #[error(transparent)]
    StartModeConflict(#[from] StartModeConflictError),
    #[error(transparent)]
    WorkQueueObservableShape(#[from] WorkQueueObservableShapeError),
    #[error(transparent)]
    WorkQueuePartitionOverlap(#[from] WorkQueuePartitionOverlapError),
    #[error(transparent)]
    ReplicasUnsupported(#[from] ReplicasUnsupportedError),
    #[error(transparent)]
    AccountMemoryExhausted(#[from] AccountMemoryExhaustedError),
    #[error(transparent)]
    AccountStorageExhausted(#[from] AccountStorageExhaustedError),
    #[error(transparent)]
    MsgSetLimitExceeded(#[from] MsgSetLimitExceededError),
    #[error(transparent)]
    ObservableLimitExceeded(#[from] ObservableLimitExceededError),
    #[error(transparent)]
    PoolExhausted(#[from] PoolExhaustedError),
    #[error(transparent)]
    AccountNotEnabled(#[from] AccountNotEnabledError),
    #[error(transparent)]
    RebindWhileActive(#[from] RebindWhileActiveError),
    #[error(transparent)]
    RebindRequiresDurable(#[from] RebindRequiresDurableError),
    #[error(transparent)]
    AccountAlreadyEnabled(#[from] AccountAlreadyEnabledError),
    #[error(transparent)]
    TransientPressure(#[from] TransientPressureError),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        use BrokerError::*;
        match self {
            MsgSetNotFound(_) | ObservableNotFound(_) | SeqNotFound(_) => ErrorKind::NotFound,
            MsgSetAlreadyExists(_) | DurableObserverActive(_) => ErrorKind::AlreadyExists,
            SubjectOverlap(_)
            | DeliverySubjectNotLiteral(_)
            | SelfIngestion(_)
            | NoInterestAtCreation(_)
            | PullRequiresExplicitAck(_)
            | PartitionedAckAll(_)
            | StartModeConflict(_)
            | WorkQueueObservableShape(_)
            | WorkQueuePartitionOverlap(_)
            | ReplicasUnsupported(_) => ErrorKind::ConfigInvalid,
            AccountMemoryExhausted(_)
            | AccountStorageExhausted(_)
            | MsgSetLimitExceeded(_)
            | ObservableLimitExceeded(_)
            | PoolExhausted(_) => ErrorKind::ResourceExhausted,
            AccountNotEnabled(_) | RebindWhileActive(_) | RebindRequiresDurable(_) => {
                ErrorKind::InvalidState
            }
            AccountAlreadyEnabled(_) => ErrorKind::AlreadyExists,
            TransientPressure(_) => ErrorKind::Transient,
        }
    }

    /// The structured payload published to a publisher's reply subject on
    /// a failed append (spec §7: "an error string prefixed to
    /// distinguish" from the `+OK` pub-ack).
    pub fn pub_ack_payload(&self) -> String {
        format!("-ERR {self}")
    }
}
