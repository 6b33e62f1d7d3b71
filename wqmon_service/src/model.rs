/// Core data types for the water quality monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// the distribution hierarchy, sensor readings, computed scores, node status
/// rows and alert records. It contains no scoring or alert logic and no I/O.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an alert row.
pub type AlertId = i64;

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// Position of a node in the pump → zone → colony distribution tree.
///
/// Stored as a small integer (1 = pump, 2 = zone, 3 = colony) in both the
/// database and the network file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum HierarchyLevel {
    Pump,
    Zone,
    Colony,
}

impl HierarchyLevel {
    pub fn as_i16(self) -> i16 {
        match self {
            HierarchyLevel::Pump => 1,
            HierarchyLevel::Zone => 2,
            HierarchyLevel::Colony => 3,
        }
    }
}

impl TryFrom<i16> for HierarchyLevel {
    type Error = ParseEnumError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HierarchyLevel::Pump),
            2 => Ok(HierarchyLevel::Zone),
            3 => Ok(HierarchyLevel::Colony),
            other => Err(ParseEnumError::new("hierarchy level", other.to_string())),
        }
    }
}

impl From<HierarchyLevel> for i16 {
    fn from(level: HierarchyLevel) -> i16 {
        level.as_i16()
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyLevel::Pump => write!(f, "pump"),
            HierarchyLevel::Zone => write!(f, "zone"),
            HierarchyLevel::Colony => write!(f, "colony"),
        }
    }
}

/// One row of the node directory: identity plus the naming columns the
/// hierarchy is derived from.
///
/// `zone` is only meaningful for levels 2 and 3, `colony` only for level 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub hierarchy_level: HierarchyLevel,
    pub pump: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub colony: Option<String>,
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// The eight scored water quality parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Turbidity,
    Ph,
    Fluoride,
    Coliform,
    Conductivity,
    Temperature,
    DissolvedOxygen,
    Pressure,
}

impl Parameter {
    /// All scored parameters, in the order they are reported in reasons.
    pub const ALL: [Parameter; 8] = [
        Parameter::Turbidity,
        Parameter::Ph,
        Parameter::Fluoride,
        Parameter::Coliform,
        Parameter::Conductivity,
        Parameter::Temperature,
        Parameter::DissolvedOxygen,
        Parameter::Pressure,
    ];

    /// Short name used in reason strings ("do degraded", "ph degraded").
    pub fn key(self) -> &'static str {
        match self {
            Parameter::Turbidity => "turbidity",
            Parameter::Ph => "ph",
            Parameter::Fluoride => "fluoride",
            Parameter::Coliform => "coliform",
            Parameter::Conductivity => "conductivity",
            Parameter::Temperature => "temperature",
            Parameter::DissolvedOxygen => "do",
            Parameter::Pressure => "pressure",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Raw sensor values for one sample. Every field may be absent.
///
/// Flow rate is carried through storage but never scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterValues {
    pub turbidity: Option<f64>,        // NTU
    pub ph: Option<f64>,
    pub fluoride: Option<f64>,         // mg/L
    pub coliform: Option<f64>,         // CFU / 100 mL
    pub conductivity: Option<f64>,     // µS/cm
    pub temperature: Option<f64>,      // °C
    pub dissolved_oxygen: Option<f64>, // mg/L
    pub pressure: Option<f64>,         // bar
    pub flow_rate: Option<f64>,        // L/s
}

impl ParameterValues {
    pub fn get(&self, param: Parameter) -> Option<f64> {
        match param {
            Parameter::Turbidity => self.turbidity,
            Parameter::Ph => self.ph,
            Parameter::Fluoride => self.fluoride,
            Parameter::Coliform => self.coliform,
            Parameter::Conductivity => self.conductivity,
            Parameter::Temperature => self.temperature,
            Parameter::DissolvedOxygen => self.dissolved_oxygen,
            Parameter::Pressure => self.pressure,
        }
    }

    pub fn set(&mut self, param: Parameter, value: Option<f64>) {
        let slot = match param {
            Parameter::Turbidity => &mut self.turbidity,
            Parameter::Ph => &mut self.ph,
            Parameter::Fluoride => &mut self.fluoride,
            Parameter::Coliform => &mut self.coliform,
            Parameter::Conductivity => &mut self.conductivity,
            Parameter::Temperature => &mut self.temperature,
            Parameter::DissolvedOxygen => &mut self.dissolved_oxygen,
            Parameter::Pressure => &mut self.pressure,
        };
        *slot = value;
    }
}

/// A single timestamped sample from one node. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub node_id: String,
    pub recorded_at: DateTime<Utc>,
    pub values: ParameterValues,
}

/// The newest reading of a node, joined with the node's hierarchy level.
///
/// This is what the latest-reading source hands to each analysis tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestReading {
    pub hierarchy_level: HierarchyLevel,
    pub reading: Reading,
}

// ---------------------------------------------------------------------------
// Status and severity
// ---------------------------------------------------------------------------

/// Health classification of a node's latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Green,
    Amber,
    Red,
}

impl Status {
    /// The alert severity this status calls for, `None` for GREEN.
    pub fn severity(self) -> Option<Severity> {
        match self {
            Status::Green => None,
            Status::Amber => Some(Severity::Amber),
            Status::Red => Some(Severity::Red),
        }
    }

    pub fn is_degraded(self) -> bool {
        self != Status::Green
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Green => write!(f, "GREEN"),
            Status::Amber => write!(f, "AMBER"),
            Status::Red => write!(f, "RED"),
        }
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(Status::Green),
            "AMBER" => Ok(Status::Amber),
            "RED" => Ok(Status::Red),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

/// Alert severity, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Amber,
    Red,
}

impl From<Severity> for Status {
    fn from(severity: Severity) -> Status {
        match severity {
            Severity::Amber => Status::Amber,
            Severity::Red => Status::Red,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Status::from(*self).fmt(f)
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AMBER" => Ok(Severity::Amber),
            "RED" => Ok(Severity::Red),
            other => Err(ParseEnumError::new("severity", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring and status output
// ---------------------------------------------------------------------------

/// Output of the score engine for one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Water quality index in [0, 100], rounded to 2 decimals.
    pub index: f64,
    pub status: Status,
    pub reason: String,
}

/// The per-node status row, overwritten every analysis tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub last_updated: DateTime<Utc>,
    pub index: f64,
    pub status: Status,
    pub reason: String,
    pub anomaly: bool,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// An alert row as stored. Append-only history: rows are resolved, never
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub alert_id: AlertId,
    pub node_id: String,
    pub hierarchy_level: HierarchyLevel,
    pub severity: Severity,
    pub index: f64,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// An alert about to be inserted. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAlert {
    pub node_id: String,
    pub hierarchy_level: HierarchyLevel,
    pub severity: Severity,
    pub index: f64,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

impl NewAlert {
    pub fn into_record(self, alert_id: AlertId) -> AlertRecord {
        AlertRecord {
            alert_id,
            node_id: self.node_id,
            hierarchy_level: self.hierarchy_level,
            severity: self.severity,
            index: self.index,
            reason: self.reason,
            detected_at: self.detected_at,
            resolved_at: None,
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A stored string or integer did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// Errors raised by the external store collaborators.
///
/// Any of these aborts the current analysis or simulation tick; the loop
/// retries on the next one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the connection was lost.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A round trip exceeded the configured statement or connect timeout.
    #[error("store timeout: {0}")]
    Timeout(String),
    /// The store rejected a statement.
    #[error("query failed: {0}")]
    Query(String),
    /// A row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}
