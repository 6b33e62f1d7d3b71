//! One analysis tick, end to end.
//!
//! ```text
//! active alerts ──► reconcile ─┐
//! latest readings ─► score ────┼─► plan ──► one batched commit ──► apply
//!                   staleness ─┘
//! ```
//!
//! Reads happen first, decisions are pure, and all writes go to the store in
//! a single `commit_tick`. The in-memory alert table only learns about this
//! tick's actions after that commit succeeds, so a failed tick leaves both
//! the store and the table as they were and the next tick simply retries.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::staleness::is_stale_at;
use crate::alert::{AlertAction, AlertLifecycleManager};
use crate::analysis::score_reading;
use crate::logging::{self, Component};
use crate::model::{LatestReading, NodeStatus, Status, StoreError};
use crate::schedule::Clock;
use crate::store::{AnalysisStore, TickBatch};

/// Outcome of one successful tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub nodes_scored: usize,
    pub green: usize,
    pub amber: usize,
    pub red: usize,
    /// New alerts on nodes that had none.
    pub raised: usize,
    /// Severity changes: one resolve plus one insert each.
    pub replaced: usize,
    pub resolved: usize,
    /// Extra active alerts resolved by reconciliation.
    pub healed: usize,
    pub stale_readings: usize,
    /// Nodes holding an active alert after the tick.
    pub active_alerts: usize,
}

impl CycleReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            nodes_scored: 0,
            green: 0,
            amber: 0,
            red: 0,
            raised: 0,
            replaced: 0,
            resolved: 0,
            healed: 0,
            stale_readings: 0,
            active_alerts: 0,
        }
    }

    /// Alert-store writes issued by the tick.
    pub fn alert_writes(&self) -> usize {
        self.raised + 2 * self.replaced + self.resolved + self.healed
    }
}

pub struct Analyzer<S, C> {
    store: S,
    clock: C,
    manager: AlertLifecycleManager,
    stale_after: chrono::Duration,
}

impl<S: AnalysisStore, C: Clock> Analyzer<S, C> {
    pub fn new(store: S, clock: C, stale_after: chrono::Duration) -> Self {
        Self { store, clock, manager: AlertLifecycleManager::new(), stale_after }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn manager(&self) -> &AlertLifecycleManager {
        &self.manager
    }

    /// Runs one tick at the clock's current time and logs its outcome.
    pub fn run_tick(&mut self) -> Result<CycleReport, StoreError> {
        let now = self.clock.now();
        match self.tick_at(now) {
            Ok(report) => {
                logging::log_cycle_summary(&report);
                Ok(report)
            }
            Err(e) => {
                logging::log_store_failure(Component::Analyzer, "analysis tick", &e);
                Err(e)
            }
        }
    }

    fn tick_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let active = self.store.active_alerts()?;
        let latest = self.store.latest_readings()?;

        let mut report = CycleReport::new(now);
        let mut batch = TickBatch {
            duplicates: self.manager.reconcile(active),
            ..TickBatch::default()
        };
        report.healed = batch.duplicates.len();

        for LatestReading { hierarchy_level, reading } in &latest {
            let node_id = reading.node_id.as_str();
            let score = score_reading(&reading.values);

            if is_stale_at(reading, self.stale_after, now) {
                report.stale_readings += 1;
                logging::warn(
                    Component::Analyzer,
                    Some(node_id),
                    &format!(
                        "latest reading is {}s old",
                        now.signed_duration_since(reading.recorded_at).num_seconds()
                    ),
                );
            }

            report.nodes_scored += 1;
            match score.status {
                Status::Green => report.green += 1,
                Status::Amber => report.amber += 1,
                Status::Red => report.red += 1,
            }

            let action = self.manager.plan(node_id, *hierarchy_level, &score, now);
            batch.statuses.push(NodeStatus {
                node_id: node_id.to_string(),
                last_updated: now,
                index: score.index,
                status: score.status,
                reason: score.reason,
                anomaly: score.status.is_degraded(),
            });
            if action != AlertAction::Hold {
                batch.actions.push((node_id.to_string(), action));
            }
        }

        let mut raised_ids = self.store.commit_tick(&batch, now)?.into_iter();

        for (node_id, action) in &batch.actions {
            let raised_id = match action {
                AlertAction::Hold => continue,
                AlertAction::Raise(_) => {
                    report.raised += 1;
                    raised_ids.next()
                }
                AlertAction::Replace { .. } => {
                    report.replaced += 1;
                    raised_ids.next()
                }
                AlertAction::Resolve { .. } => {
                    report.resolved += 1;
                    None
                }
            };
            self.manager.apply(node_id, action, raised_id);
        }

        report.active_alerts = self.manager.active_count();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use crate::model::{HierarchyLevel, NewAlert, NodeRecord, ParameterValues, Reading, Severity};
    use crate::schedule::ManualClock;
    use crate::store::{AlertOp, AlertStore, MemoryStore, ReadingSink};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn pump(id: &str) -> NodeRecord {
        NodeRecord {
            node_id: id.to_string(),
            hierarchy_level: HierarchyLevel::Pump,
            pump: id.to_string(),
            zone: None,
            colony: None,
        }
    }

    fn healthy() -> ParameterValues {
        ParameterValues {
            turbidity: Some(0.5),
            ph: Some(7.2),
            fluoride: Some(0.6),
            coliform: Some(0.0),
            conductivity: Some(450.0),
            temperature: Some(25.0),
            dissolved_oxygen: Some(7.0),
            pressure: Some(3.0),
            flow_rate: Some(12.0),
        }
    }

    fn with_coliform(coliform: f64) -> ParameterValues {
        ParameterValues { coliform: Some(coliform), ..healthy() }
    }

    fn analyzer(nodes: &[&str]) -> (Analyzer<MemoryStore, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryStore::with_nodes(nodes.iter().map(|n| pump(n)));
        (Analyzer::new(store, Arc::clone(&clock), Duration::seconds(60)), clock)
    }

    fn push(
        analyzer: &mut Analyzer<MemoryStore, Arc<ManualClock>>,
        node: &str,
        at: DateTime<Utc>,
        values: ParameterValues,
    ) {
        analyzer
            .store_mut()
            .insert_readings(&[Reading { node_id: node.to_string(), recorded_at: at, values }])
            .unwrap();
    }

    // --- Single node transitions ---

    #[test]
    fn test_coliform_raises_red_and_records_status() {
        let (mut analyzer, _) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), with_coliform(50.0));

        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.red, 1);
        assert_eq!(report.raised, 1);
        assert_eq!(report.active_alerts, 1);

        let status = analyzer.store().status("P1").expect("status row written");
        assert_eq!(status.status, Status::Red);
        assert_eq!(status.index, 0.0);
        assert!(status.anomaly);

        let alerts = analyzer.store().alerts_for("P1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Red);
        assert!(matches!(
            analyzer.manager().state("P1"),
            AlertState::Active { alert_id, .. } if alert_id == alerts[0].alert_id
        ));
    }

    #[test]
    fn test_status_row_is_written_on_hold() {
        let (mut analyzer, clock) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), healthy());
        analyzer.run_tick().unwrap();

        clock.advance(Duration::seconds(5));
        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.alert_writes(), 0);
        let status = analyzer.store().status("P1").unwrap();
        assert_eq!(status.last_updated, t0() + Duration::seconds(5), "status refreshes every tick");
        assert!(!status.anomaly);
    }

    #[test]
    fn test_nodes_without_readings_are_skipped() {
        let (mut analyzer, _) = analyzer(&["P1", "P2"]);
        push(&mut analyzer, "P1", t0(), healthy());
        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.nodes_scored, 1);
        assert!(analyzer.store().status("P2").is_none());
    }

    // --- Store failures ---

    #[test]
    fn test_failed_commit_leaves_table_untouched() {
        let (mut analyzer, clock) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), with_coliform(50.0));
        analyzer.run_tick().unwrap();
        let before = analyzer.manager().state("P1");

        clock.advance(Duration::seconds(5));
        push(&mut analyzer, "P1", clock.now(), healthy());
        analyzer.store_mut().clear_alert_ops();
        analyzer.store_mut().fail_next_commit(StoreError::Timeout("statement timeout".into()));

        assert!(analyzer.run_tick().is_err());
        assert_eq!(analyzer.manager().state("P1"), before, "failed tick must not touch the table");
        assert!(analyzer.store().alert_ops().is_empty());
        assert_eq!(
            analyzer.store().status("P1").unwrap().status,
            Status::Red,
            "status row unchanged"
        );

        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.resolved, 1, "retry resolves the alert");
        assert_eq!(analyzer.manager().state("P1"), AlertState::None);
    }

    #[test]
    fn test_read_outage_aborts_tick() {
        let (mut analyzer, _) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), with_coliform(50.0));
        analyzer.store_mut().fail_next(StoreError::Unavailable("connection refused".into()));

        assert!(analyzer.run_tick().is_err());
        assert!(analyzer.store().alerts().is_empty());
        assert_eq!(analyzer.store().commits(), 0);

        assert_eq!(analyzer.run_tick().unwrap().raised, 1);
    }

    // --- Reconciliation ---

    #[test]
    fn test_duplicate_active_alerts_are_healed() {
        let (mut analyzer, _) = analyzer(&["P1"]);
        let alert = |at| NewAlert {
            node_id: "P1".to_string(),
            hierarchy_level: HierarchyLevel::Pump,
            severity: Severity::Amber,
            index: 70.0,
            reason: "turbidity degraded".to_string(),
            detected_at: at,
        };
        let older = analyzer.store_mut().insert_raw_alert(alert(t0() - Duration::minutes(10)));
        let newer = analyzer.store_mut().insert_raw_alert(alert(t0() - Duration::minutes(5)));
        let amber = ParameterValues { turbidity: Some(5.0), coliform: Some(5.0), ..healthy() };
        push(&mut analyzer, "P1", t0(), amber);

        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.healed, 1);
        assert_eq!(report.amber, 1);
        assert_eq!(report.raised, 0, "the surviving AMBER alert is held");
        assert_eq!(analyzer.store().alert_ops(), &[AlertOp::Resolve { alert_id: older }]);
        assert_eq!(
            analyzer.manager().state("P1"),
            AlertState::Active { alert_id: newer, severity: Severity::Amber }
        );
    }

    #[test]
    fn test_externally_resolved_alert_is_forgotten() {
        let (mut analyzer, clock) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), with_coliform(50.0));
        analyzer.run_tick().unwrap();

        analyzer.store_mut().resolve_all_for_node("P1", t0()).unwrap();
        clock.advance(Duration::seconds(5));
        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.raised, 1, "still RED with no active alert: raise again");
        assert_eq!(analyzer.store().alerts_for("P1").len(), 2);
    }

    // --- Staleness ---

    #[test]
    fn test_stale_readings_are_scored_and_counted() {
        let (mut analyzer, clock) = analyzer(&["P1"]);
        push(&mut analyzer, "P1", t0(), healthy());
        clock.advance(Duration::seconds(61));

        let report = analyzer.run_tick().unwrap();
        assert_eq!(report.stale_readings, 1);
        assert_eq!(report.nodes_scored, 1, "stale readings are still scored");
    }
}
