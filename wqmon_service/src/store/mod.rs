//! Contracts with the external store.
//!
//! The core never owns a schema or a wire format. It talks to storage
//! through these narrow traits, implemented by `db::PgStore` for PostgreSQL
//! and by `MemoryStore` for tests and offline runs.
//!
//! All methods take `&mut self`: a store is a single connection owned by a
//! single loop, never shared between the analyzer and the simulator.

use chrono::{DateTime, Utc};

use crate::alert::AlertAction;
use crate::model::{
    AlertId, AlertRecord, LatestReading, NewAlert, NodeRecord, NodeStatus, Reading, StoreError,
};

pub mod memory;

pub use memory::{AlertOp, MemoryStore};

/// Read-only node directory.
pub trait NodeDirectory {
    fn load_nodes(&mut self) -> Result<Vec<NodeRecord>, StoreError>;
}

/// Where generated or received readings are written.
pub trait ReadingSink {
    /// Appends readings; returns how many rows were written.
    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize, StoreError>;
}

/// Where each analysis tick gets its input.
pub trait ReadingSource {
    /// The newest reading of every node that has reported at least once.
    fn latest_readings(&mut self) -> Result<Vec<LatestReading>, StoreError>;
}

/// Per-node status rows, overwritten every tick.
pub trait StatusSink {
    fn upsert_status(&mut self, status: &NodeStatus) -> Result<(), StoreError>;
}

/// Append-only alert history.
pub trait AlertStore {
    fn insert_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError>;

    fn resolve_alert(&mut self, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Resolves every active alert of a node; returns how many were resolved.
    fn resolve_all_for_node(
        &mut self,
        node_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    fn find_active_alert(&mut self, node_id: &str) -> Result<Option<AlertRecord>, StoreError>;

    /// Every active alert row, across all nodes.
    fn active_alerts(&mut self) -> Result<Vec<AlertRecord>, StoreError>;
}

/// Everything one analysis tick writes.
#[derive(Debug, Clone, Default)]
pub struct TickBatch {
    pub statuses: Vec<NodeStatus>,
    /// Extra active alerts found by reconciliation, to be resolved.
    pub duplicates: Vec<AlertId>,
    /// Non-hold alert actions, keyed by node.
    pub actions: Vec<(String, AlertAction)>,
}

impl TickBatch {
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.duplicates.is_empty() && self.actions.is_empty()
    }
}

/// The store surface the analyzer needs.
pub trait AnalysisStore: ReadingSource + StatusSink + AlertStore {
    /// Writes a whole tick. Either every write lands or none does.
    ///
    /// Returns the ids of inserted alerts, one per raising action, in
    /// action order.
    fn commit_tick(
        &mut self,
        batch: &TickBatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<AlertId>, StoreError>;
}

/// Applies a batch through the individual store operations, in order:
/// status upserts, duplicate resolutions, then alert actions.
///
/// A GREEN resolution resolves every active alert of the node, so a node
/// that somehow holds a stranded alert heals as soon as it reads GREEN.
pub fn apply_batch<S>(
    store: &mut S,
    batch: &TickBatch,
    at: DateTime<Utc>,
) -> Result<Vec<AlertId>, StoreError>
where
    S: StatusSink + AlertStore + ?Sized,
{
    for status in &batch.statuses {
        store.upsert_status(status)?;
    }
    for alert_id in &batch.duplicates {
        store.resolve_alert(*alert_id, at)?;
    }

    let mut raised = Vec::new();
    for (node_id, action) in &batch.actions {
        match action {
            AlertAction::Hold => {}
            AlertAction::Resolve { .. } => {
                store.resolve_all_for_node(node_id, at)?;
            }
            AlertAction::Raise(alert) => {
                raised.push(store.insert_alert(alert)?);
            }
            AlertAction::Replace { resolve, raise } => {
                store.resolve_alert(*resolve, at)?;
                raised.push(store.insert_alert(raise)?);
            }
        }
    }
    Ok(raised)
}
