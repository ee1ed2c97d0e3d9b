//! Small prometheus-backed counters (SPEC_FULL §2 ambient stack),
//! grounded in the teacher's `lite/src/metrics.rs`. Unlike the teacher
//! this crate does not register against the global default registry —
//! an embedder may run several [`Engine`](crate::Engine)s in one
//! process (tests do) — so each [`Metrics`] owns its own
//! [`prometheus::Registry`] and callers pull it themselves rather than
//! this crate wiring an HTTP `/metrics` exporter, which would be the
//! out-of-scope wire surface.

use prometheus::{IntCounter, IntGauge, Registry};

pub struct Metrics {
    registry: Registry,
    pub messages_stored_total: IntCounter,
    pub bytes_stored_total: IntCounter,
    pub messages_evicted_total: IntCounter,
    pub bytes_evicted_total: IntCounter,
    pub redeliveries_total: IntCounter,
    pub observables_attached: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_stored_total = IntCounter::new(
            "msgset_messages_stored_total",
            "Messages appended across all message sets",
        )
        .expect("static metric descriptor");
        let bytes_stored_total = IntCounter::new(
            "msgset_bytes_stored_total",
            "Payload+overhead bytes appended across all message sets",
        )
        .expect("static metric descriptor");
        let messages_evicted_total = IntCounter::new(
            "msgset_messages_evicted_total",
            "Messages removed by retention trim, ack-triggered deletion, or purge",
        )
        .expect("static metric descriptor");
        let bytes_evicted_total = IntCounter::new(
            "msgset_bytes_evicted_total",
            "Bytes released by retention trim, ack-triggered deletion, or purge",
        )
        .expect("static metric descriptor");
        let redeliveries_total = IntCounter::new(
            "msgset_redeliveries_total",
            "Messages redelivered after an ack_wait timeout or explicit nak",
        )
        .expect("static metric descriptor");
        let observables_attached = IntGauge::new(
            "msgset_observables_attached",
            "Observables currently attached to a message set (not yet deleted)",
        )
        .expect("static metric descriptor");

        for collector in [
            Box::new(messages_stored_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(bytes_stored_total.clone()),
            Box::new(messages_evicted_total.clone()),
            Box::new(bytes_evicted_total.clone()),
            Box::new(redeliveries_total.clone()),
            Box::new(observables_attached.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique and registered once");
        }

        Self {
            registry,
            messages_stored_total,
            bytes_stored_total,
            messages_evicted_total,
            bytes_evicted_total,
            redeliveries_total,
            observables_attached,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = Metrics::new();
        assert_eq!(m.messages_stored_total.get(), 0);
        m.messages_stored_total.inc();
        assert_eq!(m.messages_stored_total.get(), 1);
        assert_eq!(m.registry().gather().len(), 6);
    }
}
