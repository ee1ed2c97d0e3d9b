//! Persistence-and-delivery engine for a subject-addressed pub/sub bus:
//! message sets (durable, ordered logs) and observables (stateful
//! delivery cursors over them), plus the account-scoped resource
//! accounting and admin surface that keep the two consistent under
//! concurrent publish, pull/push delivery, ack, redelivery, and
//! retention-driven eviction.
//!
//! The pub/sub transport itself — subject matching, client connections,
//! wildcard interest — is out of scope and is the injected [`Transport`]
//! trait; see module docs for the engine's admin entry point,
//! [`engine::Engine`].

pub mod account;
pub mod backend;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod msgset;
pub mod observable;
pub mod reply;
pub mod transport;

pub use account::{Account, ReservationPool};
pub use engine::Engine;
pub use error::{BrokerError, ErrorKind};
pub use metrics::Metrics;
pub use msgset::MsgSet;
pub use observable::Observable;
pub use transport::Transport;

#[cfg(test)]
pub mod test_support;
