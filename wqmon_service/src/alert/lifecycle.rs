//! Per-node alert lifecycle.
//!
//! Each node is in one of two states: no active alert, or exactly one active
//! alert of a given severity. Every analysis tick feeds the node's computed
//! status through this table:
//!
//! | stored state | computed status   | action                                  |
//! |--------------|-------------------|-----------------------------------------|
//! | none         | GREEN             | hold                                    |
//! | none         | AMBER / RED       | raise a new alert                       |
//! | active(S)    | GREEN             | resolve it                              |
//! | active(S)    | S                 | hold (no re-raise, no flapping)         |
//! | active(S)    | S' != S           | resolve old, raise S' at the same time  |
//!
//! A severity change is never an update in place: it always leaves one
//! resolved and one new row, so the alert history stays a complete audit
//! trail.
//!
//! The table here is an in-memory view; the alert store is the durable copy.
//! `reconcile` rebuilds the view from the store at the start of every tick,
//! `plan` decides without side effects, and `apply` updates the view once the
//! store has accepted the tick's writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::logging::{self, Component};
use crate::model::{AlertId, AlertRecord, HierarchyLevel, NewAlert, ScoreResult, Severity};

// ---------------------------------------------------------------------------
// State and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    None,
    Active { alert_id: AlertId, severity: Severity },
}

/// What the alert store must do for one node this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertAction {
    Hold,
    Raise(NewAlert),
    Resolve { alert_id: AlertId },
    Replace { resolve: AlertId, raise: NewAlert },
}

impl AlertAction {
    /// The alert this action inserts, if any.
    pub fn raised(&self) -> Option<&NewAlert> {
        match self {
            AlertAction::Raise(alert) | AlertAction::Replace { raise: alert, .. } => Some(alert),
            AlertAction::Hold | AlertAction::Resolve { .. } => None,
        }
    }

    /// The alert this action resolves, if any.
    pub fn resolved(&self) -> Option<AlertId> {
        match self {
            AlertAction::Resolve { alert_id } | AlertAction::Replace { resolve: alert_id, .. } => {
                Some(*alert_id)
            }
            AlertAction::Hold | AlertAction::Raise(_) => None,
        }
    }

    /// Number of alert-store writes this action costs.
    pub fn store_writes(&self) -> usize {
        usize::from(self.raised().is_some()) + usize::from(self.resolved().is_some())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AlertLifecycleManager {
    table: HashMap<String, AlertState>,
}

impl AlertLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, node_id: &str) -> AlertState {
        self.table.get(node_id).copied().unwrap_or(AlertState::None)
    }

    /// Number of nodes currently holding an active alert.
    pub fn active_count(&self) -> usize {
        self.table
            .values()
            .filter(|s| matches!(s, AlertState::Active { .. }))
            .count()
    }

    /// Rebuilds the table from the store's active alert rows.
    ///
    /// A node with more than one active row violates the one-active-alert
    /// rule (manual edits, an older writer). The most recently detected row
    /// is kept (ties go to the highest id) and the ids of the others are
    /// returned so the caller can resolve them in the same tick.
    pub fn reconcile(&mut self, active: Vec<AlertRecord>) -> Vec<AlertId> {
        let mut by_node: HashMap<String, Vec<AlertRecord>> = HashMap::new();
        for record in active.into_iter().filter(|r| r.active) {
            by_node.entry(record.node_id.clone()).or_default().push(record);
        }

        let mut duplicates = Vec::new();
        let mut table = HashMap::with_capacity(by_node.len());

        for (node_id, mut records) in by_node {
            records.sort_by_key(|r| (r.detected_at, r.alert_id));
            let Some(keep) = records.pop() else { continue };

            if !records.is_empty() {
                logging::warn(
                    Component::Alert,
                    Some(&node_id),
                    &format!(
                        "{} extra active alerts found, keeping #{} and resolving the rest",
                        records.len(),
                        keep.alert_id
                    ),
                );
                duplicates.extend(records.iter().map(|r| r.alert_id));
            }

            table.insert(
                node_id,
                AlertState::Active { alert_id: keep.alert_id, severity: keep.severity },
            );
        }

        for (node_id, state) in &self.table {
            if matches!(state, AlertState::Active { .. }) && !table.contains_key(node_id) {
                logging::debug(
                    Component::Alert,
                    Some(node_id),
                    "active alert was resolved outside the analyzer",
                );
            }
        }

        duplicates.sort_unstable();
        self.table = table;
        duplicates
    }

    /// Decides what the alert store must do for `node_id`, given this tick's
    /// score. Pure: the table is not modified.
    ///
    /// An unchanged severity is a hold even if the index moved, so the
    /// recorded index and reason stay those of the moment of detection.
    pub fn plan(
        &self,
        node_id: &str,
        hierarchy_level: HierarchyLevel,
        score: &ScoreResult,
        now: DateTime<Utc>,
    ) -> AlertAction {
        let new_alert = |severity: Severity| NewAlert {
            node_id: node_id.to_string(),
            hierarchy_level,
            severity,
            index: score.index,
            reason: score.reason.clone(),
            detected_at: now,
        };

        match (self.state(node_id), score.status.severity()) {
            (AlertState::None, None) => AlertAction::Hold,
            (AlertState::None, Some(severity)) => AlertAction::Raise(new_alert(severity)),
            (AlertState::Active { alert_id, .. }, None) => AlertAction::Resolve { alert_id },
            (AlertState::Active { severity: current, .. }, Some(severity))
                if current == severity =>
            {
                AlertAction::Hold
            }
            (AlertState::Active { alert_id, .. }, Some(severity)) => AlertAction::Replace {
                resolve: alert_id,
                raise: new_alert(severity),
            },
        }
    }

    /// Records an action the store has committed.
    ///
    /// `raised_id` is the store-assigned id of the alert the action inserted.
    /// If it is missing the node is left without a known alert until the next
    /// `reconcile` picks the row up from the store.
    pub fn apply(&mut self, node_id: &str, action: &AlertAction, raised_id: Option<AlertId>) {
        let previous = self.state(node_id);

        match action {
            AlertAction::Hold => return,
            AlertAction::Resolve { alert_id } => {
                logging::info(
                    Component::Alert,
                    Some(node_id),
                    &format!("Resolving alert #{}", alert_id),
                );
                self.table.remove(node_id);
                return;
            }
            AlertAction::Raise(alert) | AlertAction::Replace { raise: alert, .. } => {
                match previous {
                    AlertState::Active { severity, .. } => logging::warn(
                        Component::Alert,
                        Some(node_id),
                        &format!(
                            "Alert level {} -> {} ({})",
                            severity, alert.severity, alert.reason
                        ),
                    ),
                    AlertState::None => logging::warn(
                        Component::Alert,
                        Some(node_id),
                        &format!("Raising {} alert ({})", alert.severity, alert.reason),
                    ),
                }

                match raised_id {
                    Some(alert_id) => {
                        self.table.insert(
                            node_id.to_string(),
                            AlertState::Active { alert_id, severity: alert.severity },
                        );
                    }
                    None => {
                        self.table.remove(node_id);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
