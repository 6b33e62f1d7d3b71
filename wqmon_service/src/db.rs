/// PostgreSQL implementation of the store contracts.
///
/// The schema lives in `sql/001_base_schema.sql`. `connect_and_verify`
/// refuses to hand out a connection when any required table is missing, so
/// a daemon pointed at an empty database fails at startup with a clear
/// message instead of on its first tick.
///
/// Every query is written once against `postgres::GenericClient` (see
/// `Sql`), so the same code runs on a plain connection and inside the
/// transaction `commit_tick` opens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::types::FromSql;
use postgres::{Client, GenericClient, NoTls, Row};

use crate::logging::{self, Component};
use crate::model::{
    AlertId, AlertRecord, HierarchyLevel, LatestReading, NewAlert, NodeRecord, NodeStatus,
    ParameterValues, Reading, Severity, StoreError,
};
use crate::store::{
    AlertStore, AnalysisStore, NodeDirectory, ReadingSink, ReadingSource, StatusSink, TickBatch,
    apply_batch,
};

pub const REQUIRED_TABLES: [&str; 4] = ["nodes", "sensor_readings", "node_status", "alerts"];

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("cannot connect to database: {0}")]
    Connect(#[source] postgres::Error),
    #[error("schema check failed: {0}")]
    Query(#[source] postgres::Error),
    #[error("missing tables: {}; apply sql/001_base_schema.sql", .0.join(", "))]
    MissingTables(Vec<String>),
}

/// Opens a connection with `timeout` applied both to connecting and to
/// every statement run on it.
pub fn connect(database_url: &str, timeout: Duration) -> Result<Client, postgres::Error> {
    let mut config: postgres::Config = database_url.parse()?;
    config.connect_timeout(timeout);
    let mut client = config.connect(NoTls)?;
    client.batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))?;
    Ok(client)
}

/// Names from `tables` that do not exist in the current schema.
pub fn missing_tables(
    client: &mut Client,
    tables: &[&str],
) -> Result<Vec<String>, postgres::Error> {
    let rows = client.query(
        "SELECT table_name::TEXT FROM information_schema.tables
         WHERE table_schema = current_schema() AND table_name::TEXT = ANY($1::TEXT[])",
        &[&tables],
    )?;
    let present: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    Ok(tables
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect())
}

/// Connects and checks that every table in `tables` exists.
pub fn connect_and_verify(
    database_url: &str,
    tables: &[&str],
    timeout: Duration,
) -> Result<Client, DbError> {
    let mut client = connect(database_url, timeout).map_err(DbError::Connect)?;
    let missing = missing_tables(&mut client, tables).map_err(DbError::Query)?;
    if !missing.is_empty() {
        return Err(DbError::MissingTables(missing));
    }
    Ok(client)
}

/// Maps a driver error onto the store taxonomy.
pub fn store_error(err: postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::Unavailable(err.to_string());
    }
    if let Some(db) = err.as_db_error() {
        if *db.code() == SqlState::QUERY_CANCELED {
            return StoreError::Timeout(db.message().to_string());
        }
        return StoreError::Query(db.message().to_string());
    }
    let timed_out = std::error::Error::source(&err)
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut);
    if timed_out {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const LATEST_READINGS: &str = "
    SELECT DISTINCT ON (r.node_id)
        r.node_id, n.hierarchy_level, r.recorded_at,
        r.turbidity, r.ph, r.fluoride, r.coliform, r.conductivity,
        r.temperature, r.dissolved_oxygen, r.pressure, r.flow_rate
    FROM sensor_readings r
    JOIN nodes n ON n.node_id = r.node_id
    ORDER BY r.node_id, r.recorded_at DESC, r.reading_id DESC";

const INSERT_READING: &str = "
    INSERT INTO sensor_readings (
        node_id, recorded_at, turbidity, ph, fluoride, coliform, conductivity,
        temperature, dissolved_oxygen, pressure, flow_rate)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const UPSERT_STATUS: &str = "
    INSERT INTO node_status (node_id, last_updated, cwqi, status, reason, anomaly_detected)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (node_id) DO UPDATE SET
        last_updated = EXCLUDED.last_updated,
        cwqi = EXCLUDED.cwqi,
        status = EXCLUDED.status,
        reason = EXCLUDED.reason,
        anomaly_detected = EXCLUDED.anomaly_detected";

const UPSERT_NODE: &str = "
    INSERT INTO nodes (node_id, hierarchy_level, pump, zone, colony)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (node_id) DO UPDATE SET
        hierarchy_level = EXCLUDED.hierarchy_level,
        pump = EXCLUDED.pump,
        zone = EXCLUDED.zone,
        colony = EXCLUDED.colony";

const ALERT_COLUMNS: &str = "alert_id, node_id, hierarchy_level, alert_level, cwqi_value, \
                             reason, detected_at, resolved_at, is_active";

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {}: {}", name, e)))
}

fn alert_from_row(row: &Row) -> Result<AlertRecord, StoreError> {
    let level: i16 = column(row, "hierarchy_level")?;
    let severity: String = column(row, "alert_level")?;
    Ok(AlertRecord {
        alert_id: column(row, "alert_id")?,
        node_id: column(row, "node_id")?,
        hierarchy_level: HierarchyLevel::try_from(level)?,
        severity: severity.parse::<Severity>()?,
        index: column(row, "cwqi_value")?,
        reason: column(row, "reason")?,
        detected_at: column(row, "detected_at")?,
        resolved_at: column(row, "resolved_at")?,
        active: column(row, "is_active")?,
    })
}

/// Store operations over any postgres client or transaction.
pub struct Sql<'c, C: GenericClient>(pub &'c mut C);

impl<C: GenericClient> Sql<'_, C> {
    /// Inserts or refreshes directory rows; returns how many were written.
    pub fn upsert_nodes(&mut self, nodes: &[NodeRecord]) -> Result<usize, StoreError> {
        let stmt = self.0.prepare(UPSERT_NODE).map_err(store_error)?;
        for node in nodes {
            self.0
                .execute(
                    &stmt,
                    &[
                        &node.node_id,
                        &node.hierarchy_level.as_i16(),
                        &node.pump,
                        &node.zone,
                        &node.colony,
                    ],
                )
                .map_err(store_error)?;
        }
        Ok(nodes.len())
    }

    pub fn counts(&mut self) -> Result<DbCounts, StoreError> {
        let row = self
            .0
            .query_one(
                "SELECT
                    (SELECT COUNT(*) FROM nodes),
                    (SELECT COUNT(*) FROM sensor_readings),
                    (SELECT COUNT(*) FROM alerts),
                    (SELECT COUNT(*) FROM alerts WHERE is_active)",
                &[],
            )
            .map_err(store_error)?;
        Ok(DbCounts {
            nodes: row.get(0),
            readings: row.get(1),
            alerts: row.get(2),
            active_alerts: row.get(3),
        })
    }
}

impl<C: GenericClient> NodeDirectory for Sql<'_, C> {
    fn load_nodes(&mut self) -> Result<Vec<NodeRecord>, StoreError> {
        let rows = self
            .0
            .query(
                "SELECT node_id, hierarchy_level, pump, zone, colony
                 FROM nodes ORDER BY hierarchy_level, node_id",
                &[],
            )
            .map_err(store_error)?;

        rows.iter()
            .map(|row| {
                let level: i16 = column(row, "hierarchy_level")?;
                Ok(NodeRecord {
                    node_id: column(row, "node_id")?,
                    hierarchy_level: HierarchyLevel::try_from(level)?,
                    pump: column(row, "pump")?,
                    zone: column(row, "zone")?,
                    colony: column(row, "colony")?,
                })
            })
            .collect()
    }
}

impl<C: GenericClient> ReadingSink for Sql<'_, C> {
    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize, StoreError> {
        let stmt = self.0.prepare(INSERT_READING).map_err(store_error)?;
        for r in readings {
            let v = &r.values;
            self.0
                .execute(
                    &stmt,
                    &[
                        &r.node_id,
                        &r.recorded_at,
                        &v.turbidity,
                        &v.ph,
                        &v.fluoride,
                        &v.coliform,
                        &v.conductivity,
                        &v.temperature,
                        &v.dissolved_oxygen,
                        &v.pressure,
                        &v.flow_rate,
                    ],
                )
                .map_err(store_error)?;
        }
        Ok(readings.len())
    }
}

impl<C: GenericClient> ReadingSource for Sql<'_, C> {
    fn latest_readings(&mut self) -> Result<Vec<LatestReading>, StoreError> {
        let rows = self.0.query(LATEST_READINGS, &[]).map_err(store_error)?;
        rows.iter()
            .map(|row| {
                let level: i16 = column(row, "hierarchy_level")?;
                Ok(LatestReading {
                    hierarchy_level: HierarchyLevel::try_from(level)?,
                    reading: Reading {
                        node_id: column(row, "node_id")?,
                        recorded_at: column(row, "recorded_at")?,
                        values: ParameterValues {
                            turbidity: column(row, "turbidity")?,
                            ph: column(row, "ph")?,
                            fluoride: column(row, "fluoride")?,
                            coliform: column(row, "coliform")?,
                            conductivity: column(row, "conductivity")?,
                            temperature: column(row, "temperature")?,
                            dissolved_oxygen: column(row, "dissolved_oxygen")?,
                            pressure: column(row, "pressure")?,
                            flow_rate: column(row, "flow_rate")?,
                        },
                    },
                })
            })
            .collect()
    }
}

impl<C: GenericClient> StatusSink for Sql<'_, C> {
    fn upsert_status(&mut self, status: &NodeStatus) -> Result<(), StoreError> {
        self.0
            .execute(
                UPSERT_STATUS,
                &[
                    &status.node_id,
                    &status.last_updated,
                    &status.index,
                    &status.status.to_string(),
                    &status.reason,
                    &status.anomaly,
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }
}

impl<C: GenericClient> AlertStore for Sql<'_, C> {
    fn insert_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError> {
        let row = self
            .0
            .query_one(
                "INSERT INTO alerts
                    (node_id, hierarchy_level, alert_level, cwqi_value, reason, detected_at, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                 RETURNING alert_id",
                &[
                    &alert.node_id,
                    &alert.hierarchy_level.as_i16(),
                    &alert.severity.to_string(),
                    &alert.index,
                    &alert.reason,
                    &alert.detected_at,
                ],
            )
            .map_err(store_error)?;
        column(&row, "alert_id")
    }

    fn resolve_alert(&mut self, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.0
            .execute(
                "UPDATE alerts SET is_active = FALSE, resolved_at = $2
                 WHERE alert_id = $1 AND is_active",
                &[&alert_id, &at],
            )
            .map_err(store_error)?;
        Ok(())
    }

    fn resolve_all_for_node(
        &mut self,
        node_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let n = self
            .0
            .execute(
                "UPDATE alerts SET is_active = FALSE, resolved_at = $2
                 WHERE node_id = $1 AND is_active",
                &[&node_id, &at],
            )
            .map_err(store_error)?;
        Ok(n as usize)
    }

    fn find_active_alert(&mut self, node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM alerts WHERE node_id = $1 AND is_active
             ORDER BY detected_at DESC, alert_id DESC LIMIT 1",
            ALERT_COLUMNS
        );
        let row = self.0.query_opt(query.as_str(), &[&node_id]).map_err(store_error)?;
        row.as_ref().map(alert_from_row).transpose()
    }

    fn active_alerts(&mut self) -> Result<Vec<AlertRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM alerts WHERE is_active ORDER BY node_id, detected_at",
            ALERT_COLUMNS
        );
        let rows = self.0.query(query.as_str(), &[]).map_err(store_error)?;
        rows.iter().map(alert_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Row counts reported by `wqmon check-db`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DbCounts {
    pub nodes: i64,
    pub readings: i64,
    pub alerts: i64,
    pub active_alerts: i64,
}

/// A store backed by one PostgreSQL connection.
///
/// A lost connection is dropped; the next call reconnects. One loop owns
/// one `PgStore`.
pub struct PgStore {
    database_url: String,
    timeout: Duration,
    client: Option<Client>,
}

impl PgStore {
    /// Connects eagerly and verifies the schema.
    pub fn open(database_url: &str, timeout: Duration) -> Result<Self, DbError> {
        let client = connect_and_verify(database_url, &REQUIRED_TABLES, timeout)?;
        Ok(Self { database_url: database_url.to_string(), timeout, client: Some(client) })
    }

    fn client(&mut self) -> Result<&mut Client, StoreError> {
        if self.client.as_ref().is_none_or(|c| c.is_closed()) {
            logging::info(Component::Store, None, "connecting to database");
            self.client = Some(connect(&self.database_url, self.timeout).map_err(store_error)?);
        }
        self.client
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("no connection".to_string()))
    }

    fn with_client<T>(
        &mut self,
        op: impl FnOnce(&mut Client) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = op(self.client()?);
        if let Err(StoreError::Unavailable(_)) = &result {
            self.client = None;
        }
        result
    }

    pub fn upsert_nodes(&mut self, nodes: &[NodeRecord]) -> Result<usize, StoreError> {
        self.with_client(|c| {
            let mut tx = c.transaction().map_err(store_error)?;
            let n = Sql(&mut tx).upsert_nodes(nodes)?;
            tx.commit().map_err(store_error)?;
            Ok(n)
        })
    }

    pub fn counts(&mut self) -> Result<DbCounts, StoreError> {
        self.with_client(|c| Sql(c).counts())
    }
}

impl NodeDirectory for PgStore {
    fn load_nodes(&mut self) -> Result<Vec<NodeRecord>, StoreError> {
        self.with_client(|c| Sql(c).load_nodes())
    }
}

impl ReadingSink for PgStore {
    /// All readings of one call land in a single transaction.
    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize, StoreError> {
        self.with_client(|c| {
            let mut tx = c.transaction().map_err(store_error)?;
            let n = Sql(&mut tx).insert_readings(readings)?;
            tx.commit().map_err(store_error)?;
            Ok(n)
        })
    }
}

impl ReadingSource for PgStore {
    fn latest_readings(&mut self) -> Result<Vec<LatestReading>, StoreError> {
        self.with_client(|c| Sql(c).latest_readings())
    }
}

impl StatusSink for PgStore {
    fn upsert_status(&mut self, status: &NodeStatus) -> Result<(), StoreError> {
        self.with_client(|c| Sql(c).upsert_status(status))
    }
}

impl AlertStore for PgStore {
    fn insert_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError> {
        self.with_client(|c| Sql(c).insert_alert(alert))
    }

    fn resolve_alert(&mut self, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_client(|c| Sql(c).resolve_alert(alert_id, at))
    }

    fn resolve_all_for_node(
        &mut self,
        node_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.with_client(|c| Sql(c).resolve_all_for_node(node_id, at))
    }

    fn find_active_alert(&mut self, node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        self.with_client(|c| Sql(c).find_active_alert(node_id))
    }

    fn active_alerts(&mut self) -> Result<Vec<AlertRecord>, StoreError> {
        self.with_client(|c| Sql(c).active_alerts())
    }
}

impl AnalysisStore for PgStore {
    /// Runs the whole batch in one transaction. Dropping the transaction on
    /// an error rolls it back.
    fn commit_tick(
        &mut self,
        batch: &TickBatch,
        at: DateTime<Utc>,
    ) -> Result<Vec<AlertId>, StoreError> {
        self.with_client(|c| {
            let mut tx = c.transaction().map_err(store_error)?;
            let raised = apply_batch(&mut Sql(&mut tx), batch, at)?;
            tx.commit().map_err(store_error)?;
            Ok(raised)
        })
    }
}
