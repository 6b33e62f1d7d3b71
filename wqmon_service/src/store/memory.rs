//! In-process store.
//!
//! Backs the unit and integration tests and `wqmon demo`. Besides
//! the store contracts it keeps an audit log of every alert write, so tests
//! can assert exactly which writes a tick issued, and it can be told to fail
//! the next call to simulate an outage.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::model::{
    AlertId, AlertRecord, LatestReading, NewAlert, NodeRecord, NodeStatus, Reading, StoreError,
};
use crate::store::{
    AlertStore, AnalysisStore, NodeDirectory, ReadingSink, ReadingSource, StatusSink, TickBatch,
    apply_batch,
};

/// One alert-store write, as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOp {
    Insert { alert_id: AlertId, node_id: String },
    Resolve { alert_id: AlertId },
    ResolveAllForNode { node_id: String, resolved: usize },
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: Vec<NodeRecord>,
    readings: Vec<Reading>,
    latest: BTreeMap<String, Reading>,
    statuses: BTreeMap<String, NodeStatus>,
    /// Every alert ever written, keyed (and so ordered) by id.
    alerts: BTreeMap<AlertId, AlertRecord>,
    active: BTreeSet<AlertId>,
    last_alert_id: AlertId,
    ops: Vec<AlertOp>,
    fail_next: Option<StoreError>,
    fail_commit: Option<StoreError>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: impl IntoIterator<Item = NodeRecord>) -> Self {
        Self { nodes: nodes.into_iter().collect(), ..Self::default() }
    }

    /// Makes the next store call fail with `err`. Calls after that succeed.
    pub fn fail_next(&mut self, err: StoreError) {
        self.fail_next = Some(err);
    }

    /// Makes the next `commit_tick` fail with `err`, after the reads of that
    /// tick have succeeded.
    pub fn fail_next_commit(&mut self, err: StoreError) {
        self.fail_commit = Some(err);
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn status(&self, node_id: &str) -> Option<&NodeStatus> {
        self.statuses.get(node_id)
    }

    /// Full alert history, oldest first.
    pub fn alerts(&self) -> Vec<&AlertRecord> {
        self.alerts.values().collect()
    }

    pub fn alerts_for(&self, node_id: &str) -> Vec<&AlertRecord> {
        self.alerts.values().filter(|a| a.node_id == node_id).collect()
    }

    pub fn alert_ops(&self) -> &[AlertOp] {
        &self.ops
    }

    pub fn clear_alert_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of successful `commit_tick` calls.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Inserts an alert row directly, bypassing the audit log. Stands in
    /// for rows written by someone other than the analyzer.
    pub fn insert_raw_alert(&mut self, alert: NewAlert) -> AlertId {
        self.push_alert(alert)
    }

    fn push_alert(&mut self, alert: NewAlert) -> AlertId {
        self.last_alert_id += 1;
        let record = alert.into_record(self.last_alert_id);
        if record.active {
            self.active.insert(record.alert_id);
        }
        self.alerts.insert(record.alert_id, record);
        self.last_alert_id
    }

    fn mark_resolved(&mut self, alert_id: AlertId, at: DateTime<Utc>) -> bool {
        if !self.active.remove(&alert_id) {
            return false;
        }
        if let Some(alert) = self.alerts.get_mut(&alert_id) {
            alert.active = false;
            alert.resolved_at = Some(at);
        }
        true
    }

    fn active_records(&self) -> impl Iterator<Item = &AlertRecord> {
        self.active.iter().filter_map(|id| self.alerts.get(id))
    }

    fn check_fail(&mut self) -> Result<(), StoreError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl NodeDirectory for MemoryStore {
    fn load_nodes(&mut self) -> Result<Vec<NodeRecord>, StoreError> {
        self.check_fail()?;
        Ok(self.nodes.clone())
    }
}

impl ReadingSink for MemoryStore {
    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize, StoreError> {
        self.check_fail()?;
        for reading in readings {
            // On equal timestamps the later write wins.
            match self.latest.get(&reading.node_id) {
                Some(current) if current.recorded_at > reading.recorded_at => {}
                _ => {
                    self.latest.insert(reading.node_id.clone(), reading.clone());
                }
            }
        }
        self.readings.extend_from_slice(readings);
        Ok(readings.len())
    }
}

impl ReadingSource for MemoryStore {
    fn latest_readings(&mut self) -> Result<Vec<LatestReading>, StoreError> {
        self.check_fail()?;

        // Readings from nodes missing in the directory are dropped, as the
        // SQL join does.
        Ok(self
            .nodes
            .iter()
            .filter_map(|node| {
                self.latest.get(&node.node_id).map(|reading| LatestReading {
                    hierarchy_level: node.hierarchy_level,
                    reading: reading.clone(),
                })
            })
            .collect())
    }
}

impl StatusSink for MemoryStore {
    fn upsert_status(&mut self, status: &NodeStatus) -> Result<(), StoreError> {
        self.check_fail()?;
        self.statuses.insert(status.node_id.clone(), status.clone());
        Ok(())
    }
}

impl AlertStore for MemoryStore {
    fn insert_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError> {
        self.check_fail()?;
        let alert_id = self.push_alert(alert.clone());
        self.ops.push(AlertOp::Insert { alert_id, node_id: alert.node_id.clone() });
        Ok(alert_id)
    }

    fn resolve_alert(&mut self, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_fail()?;
        self.mark_resolved(alert_id, at);
        self.ops.push(AlertOp::Resolve { alert_id });
        Ok(())
    }

    fn resolve_all_for_node(
        &mut self,
        node_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.check_fail()?;
        let ids: Vec<AlertId> = self
            .active_records()
            .filter(|a| a.node_id == node_id)
            .map(|a| a.alert_id)
            .collect();
        let resolved = ids.into_iter().filter(|id| self.mark_resolved(*id, at)).count();
        self.ops.push(AlertOp::ResolveAllForNode { node_id: node_id.to_string(), resolved });
        Ok(resolved)
    }

    fn find_active_alert(&mut self, node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        self.check_fail()?;
        Ok(self
            .active_records()
            .filter(|a| a.node_id == node_id)
            .max_by_key(|a| (a.detected_at, a.alert_id))
            .cloned())
    }

    fn active_alerts(&mut self) -> Result<Vec<AlertRecord>, StoreError> {
        self.check_fail()?;
        Ok(self.active_records().cloned().collect())
    }
}

impl AnalysisStore for MemoryStore {
    /// Applies the batch to a scratch copy and swaps it in only on success,
    /// so a failure half-way leaves nothing behind.
    ///
    /// A batch only resolves active alerts and inserts new ones, so the
    /// scratch copy holds just the active alerts.
    fn commit_tick(
        &mut self,
        batch: &TickBatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<AlertId>, StoreError> {
        self.check_fail()?;
        if let Some(err) = self.fail_commit.take() {
            return Err(err);
        }

        let mut scratch = MemoryStore {
            statuses: self.statuses.clone(),
            alerts: self.active_records().map(|a| (a.alert_id, a.clone())).collect(),
            active: self.active.clone(),
            last_alert_id: self.last_alert_id,
            ..MemoryStore::default()
        };
        let raised = apply_batch(&mut scratch, batch, at)?;

        self.statuses = scratch.statuses;
        self.alerts.extend(scratch.alerts);
        self.active = scratch.active;
        self.last_alert_id = scratch.last_alert_id;
        self.ops.extend(scratch.ops);
        self.commits += 1;
        Ok(raised)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
