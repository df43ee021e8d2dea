use std::sync::Arc;

use domain::common::entity::AddressFamily;
use domain::common::error::DomainError;
use domain::conntrack::entity::{FlowTuple, FlushReport};
use domain::conntrack::error::ConnTrackError;
use domain::verdict::entity::Mark;
use ports::secondary::conntrack_port::ConnTrackPort;
use ports::secondary::metrics_port::MetricsPort;

/// Outcome of a full invalidation across families and permanent marks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub removed: u64,
    pub flushed: Vec<FlushReport>,
    /// One message per `(family, mark)` flush that failed.
    pub errors: Vec<String>,
}

/// Forgets permanent decisions by deleting the conntrack entries that
/// carry a permanent mark.
///
/// Runs on operator request only. The packet path never calls it.
pub struct DecisionCacheInvalidator {
    conntrack: Arc<dyn ConnTrackPort>,
    families: Vec<AddressFamily>,
    metrics: Arc<dyn MetricsPort>,
}

impl DecisionCacheInvalidator {
    pub fn new(
        conntrack: Arc<dyn ConnTrackPort>,
        families: Vec<AddressFamily>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            conntrack,
            families,
            metrics,
        }
    }

    pub fn families(&self) -> &[AddressFamily] {
        &self.families
    }

    /// Delete every entry marked with a permanent mark, for each
    /// configured family.
    ///
    /// A failing flush does not stop the others. The call only fails when
    /// every flush failed.
    pub fn invalidate_all(&self) -> Result<InvalidationReport, DomainError> {
        let mut report = InvalidationReport::default();
        let mut attempts = 0usize;

        for &family in &self.families {
            for mark in Mark::PERMANENT {
                attempts += 1;
                match self.conntrack.delete_by_mark(family, mark) {
                    Ok(removed) => {
                        report.removed += removed;
                        report.flushed.push(FlushReport {
                            family,
                            mark,
                            removed,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%family, %mark, error = %e, "conntrack flush failed");
                        report.errors.push(format!("{family} {mark}: {e}"));
                    }
                }
            }
        }

        self.metrics.record_decisions_invalidated(report.removed);

        if attempts > 0 && report.errors.len() == attempts {
            return Err(DomainError::Kernel(report.errors.join("; ")));
        }

        tracing::info!(
            removed = report.removed,
            failed = report.errors.len(),
            "permanent decisions invalidated"
        );
        Ok(report)
    }

    /// Delete the entry tracking one flow. Returns `false` when the kernel
    /// had no such entry.
    pub fn invalidate_flow(&self, tuple: &FlowTuple) -> Result<bool, DomainError> {
        match self.conntrack.delete_flow(tuple) {
            Ok(()) => {
                self.metrics.record_decisions_invalidated(1);
                tracing::info!(flow = %tuple, "flow decision invalidated");
                Ok(true)
            }
            Err(ConnTrackError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use ports::secondary::metrics_port::{DecisionMetrics, EventMetrics, QueueMetrics};
    use ports::test_utils::{NoopMetrics, SpyConnTrack};

    #[derive(Default)]
    struct CountingMetrics {
        invalidated: AtomicU64,
    }

    impl QueueMetrics for CountingMetrics {}
    impl EventMetrics for CountingMetrics {}
    impl DecisionMetrics for CountingMetrics {
        fn record_decisions_invalidated(&self, count: u64) {
            self.invalidated.fetch_add(count, Ordering::Relaxed);
        }
    }

    struct MissingFlow;

    impl ConnTrackPort for MissingFlow {
        fn delete_by_mark(&self, _: AddressFamily, _: Mark) -> Result<u64, ConnTrackError> {
            Ok(0)
        }

        fn delete_flow(&self, _: &FlowTuple) -> Result<(), ConnTrackError> {
            Err(ConnTrackError::NotFound)
        }
    }

    fn both() -> Vec<AddressFamily> {
        vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
    }

    #[test]
    fn flushes_every_permanent_mark_per_family() {
        let ct = SpyConnTrack::new();
        ct.insert(AddressFamily::Ipv4, Mark::AcceptAlways, 3);
        ct.insert(AddressFamily::Ipv4, Mark::DropAlways, 2);
        ct.insert(AddressFamily::Ipv6, Mark::BlockAlways, 4);
        ct.insert(AddressFamily::Ipv4, Mark::Accept, 7);
        let metrics = Arc::new(CountingMetrics::default());
        let inv = DecisionCacheInvalidator::new(
            Arc::clone(&ct) as Arc<dyn ConnTrackPort>,
            both(),
            Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        );

        let report = inv.invalidate_all().unwrap();

        assert_eq!(report.removed, 9);
        assert_eq!(report.flushed.len(), 6);
        assert!(report.errors.is_empty());
        assert_eq!(ct.calls().len(), 6);
        assert!(ct.calls().iter().all(|(_, m)| m.is_permanent()));
        // transient-mark entries untouched
        assert_eq!(ct.remaining(), 7);
        assert_eq!(metrics.invalidated.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn one_family_failing_still_flushes_the_other() {
        let ct = SpyConnTrack::new();
        ct.insert(AddressFamily::Ipv4, Mark::BlockAlways, 5);
        ct.fail_family(AddressFamily::Ipv6);
        let inv = DecisionCacheInvalidator::new(
            Arc::clone(&ct) as Arc<dyn ConnTrackPort>,
            both(),
            Arc::new(NoopMetrics),
        );

        let report = inv.invalidate_all().unwrap();

        assert_eq!(report.removed, 5);
        assert_eq!(report.flushed.len(), 3);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].starts_with("ipv6 accept_always(1710)"));
    }

    #[test]
    fn all_flushes_failing_is_an_error() {
        let ct = SpyConnTrack::new();
        ct.fail_family(AddressFamily::Ipv4);
        let inv = DecisionCacheInvalidator::new(
            ct as Arc<dyn ConnTrackPort>,
            vec![AddressFamily::Ipv4],
            Arc::new(NoopMetrics),
        );

        assert!(matches!(inv.invalidate_all(), Err(DomainError::Kernel(_))));
    }

    #[test]
    fn no_families_is_an_empty_success() {
        let inv = DecisionCacheInvalidator::new(
            SpyConnTrack::new() as Arc<dyn ConnTrackPort>,
            vec![],
            Arc::new(NoopMetrics),
        );
        assert_eq!(inv.invalidate_all().unwrap(), InvalidationReport::default());
    }

    #[test]
    fn invalidate_flow_deletes_single_entry() {
        let ct = SpyConnTrack::new();
        let inv = DecisionCacheInvalidator::new(
            Arc::clone(&ct) as Arc<dyn ConnTrackPort>,
            both(),
            Arc::new(NoopMetrics),
        );
        let tuple = FlowTuple::new(
            6,
            "10.0.0.1".parse().unwrap(),
            40000,
            "1.1.1.1".parse().unwrap(),
            443,
        )
        .unwrap();

        assert!(inv.invalidate_flow(&tuple).unwrap());
        assert_eq!(ct.deleted_flows(), vec![tuple]);
    }

    #[test]
    fn invalidate_missing_flow_returns_false() {
        let inv = DecisionCacheInvalidator::new(
            Arc::new(MissingFlow),
            both(),
            Arc::new(NoopMetrics),
        );
        let tuple = FlowTuple::new(
            17,
            "fd00::1".parse().unwrap(),
            5353,
            "fd00::2".parse().unwrap(),
            53,
        )
        .unwrap();
        assert!(!inv.invalidate_flow(&tuple).unwrap());
    }
}
