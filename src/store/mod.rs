//! SQLite-backed persistence for Sparkplug topology and metric history.
//!
//! Grounded on the teacher's `SqlStorage` (`src/storage/sql_storage.rs`):
//! a single connection behind `Arc<Mutex<Connection>>`, schema created with
//! sequential `CREATE TABLE IF NOT EXISTS` statements, transactions for
//! multi-statement writes. The schema itself and the `get`/`set` dispatch
//! semantics are carried over from `original_source/src/storage.py`,
//! including the decision to keep one sample table per metric datatype
//! (MetricString/MetricInt/MetricFloat/MetricBoolean) rather than a single
//! polymorphic value column.
//!
//! Name-pattern lookups (`group_by_name`, `node_by_name`, `device_by_name`)
//! use parameterized `LIKE` queries. The original builds these by string
//! concatenation of the caller-supplied name directly into the SQL text,
//! which is vulnerable to SQL injection; this store binds the pattern as a
//! parameter instead.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::codec::{MetricDatatype, MetricValue};
use crate::error::{HostError, Result};

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub group_id: i64,
    pub group_name: String,
}

#[derive(Debug, Clone)]
pub struct NodeRow {
    pub edge_node_id: i64,
    pub group_id: i64,
    pub edge_node_name: String,
    pub status: String,
    pub birth_timestamp: Option<i64>,
    pub death_timestamp: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub device_id: i64,
    pub edge_node_id: i64,
    pub device_name: String,
    pub status: String,
    pub birth_timestamp: Option<i64>,
    pub death_timestamp: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MetricRow {
    pub metric_id: i64,
    pub device_id: i64,
    pub metric_name: String,
    pub metric_type: String,
}

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub value: MetricValue,
    pub timestamp: i64,
}

/// Persistent store for Sparkplug topology and metric history, backed by a
/// single SQLite connection behind a mutex. Reads also take the lock:
/// `rusqlite::Connection` is not `Sync`, and this host does not need
/// concurrent reader throughput to justify a connection pool.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        info!("opening sparkplug store at {:?}", db_path.as_ref());

        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HostError::Store(format!("failed to create database directory: {e}")))?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| HostError::Store(format!("failed to open database: {e}")))?;
        Self::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        debug!("initializing store schema");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS Groups (
                group_id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_name TEXT NOT NULL,
                UNIQUE(group_name) ON CONFLICT IGNORE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS EdgeNode (
                edge_node_id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER REFERENCES Groups,
                edge_node_name TEXT,
                edge_node_status TEXT,
                edge_node_birth_timestamp INTEGER,
                edge_node_death_timestamp INTEGER,
                UNIQUE(group_id, edge_node_name) ON CONFLICT IGNORE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Device (
                device_id INTEGER PRIMARY KEY AUTOINCREMENT,
                edge_node_id INTEGER REFERENCES EdgeNode,
                device_name TEXT,
                device_status TEXT,
                device_birth_timestamp INTEGER,
                device_death_timestamp INTEGER,
                UNIQUE(edge_node_id, device_name) ON CONFLICT IGNORE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Metric (
                metric_id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id INTEGER REFERENCES Device,
                metric_name TEXT,
                metric_type TEXT,
                UNIQUE(device_id, metric_name) ON CONFLICT IGNORE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS MetricString (
                metric_id INTEGER REFERENCES Metric,
                metric_value TEXT NOT NULL,
                metric_timestamp INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS MetricInt (
                metric_id INTEGER REFERENCES Metric,
                metric_value INTEGER NOT NULL,
                metric_timestamp INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS MetricFloat (
                metric_id INTEGER REFERENCES Metric,
                metric_value REAL NOT NULL,
                metric_timestamp INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS MetricBoolean (
                metric_id INTEGER REFERENCES Metric,
                metric_value INTEGER NOT NULL,
                metric_timestamp INTEGER
            )",
            [],
        )?;

        debug!("store schema ready");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_group(&self, group_name: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO Groups (group_name) VALUES (?1)",
            params![group_name],
        )?;
        conn.query_row(
            "SELECT group_id FROM Groups WHERE group_name = ?1",
            params![group_name],
            |row| row.get(0),
        )
        .map_err(HostError::from)
    }

    pub fn insert_node(
        &self,
        group_name: &str,
        edge_node_name: &str,
        status: &str,
        birth_timestamp: Option<i64>,
        death_timestamp: Option<i64>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO EdgeNode
                (group_id, edge_node_name, edge_node_status, edge_node_birth_timestamp, edge_node_death_timestamp)
             VALUES ((SELECT group_id FROM Groups WHERE group_name = ?1), ?2, ?3, ?4, ?5)",
            params![group_name, edge_node_name, status, birth_timestamp, death_timestamp],
        )?;
        // A rebirth re-uses the same (group_id, edge_node_name) row via the UNIQUE
        // constraint above, so the INSERT OR IGNORE above silently drops the new
        // status/timestamps on every rebirth after the first; refresh them here.
        conn.execute(
            "UPDATE EdgeNode SET edge_node_status = ?3,
                edge_node_birth_timestamp = ?4, edge_node_death_timestamp = ?5
             WHERE edge_node_name = ?2 AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?1)",
            params![group_name, edge_node_name, status, birth_timestamp, death_timestamp],
        )?;
        conn.query_row(
            "SELECT edge_node_id FROM EdgeNode
             WHERE edge_node_name = ?1 AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?2)",
            params![edge_node_name, group_name],
            |row| row.get(0),
        )
        .map_err(HostError::from)
    }

    pub fn insert_device(
        &self,
        group_name: &str,
        edge_node_name: &str,
        device_name: &str,
        status: &str,
        birth_timestamp: Option<i64>,
        death_timestamp: Option<i64>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO Device
                (edge_node_id, device_name, device_status, device_birth_timestamp, device_death_timestamp)
             VALUES (
                (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?1
                    AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?2)),
                ?3, ?4, ?5, ?6)",
            params![edge_node_name, group_name, device_name, status, birth_timestamp, death_timestamp],
        )?;
        // Same rebirth-refresh reasoning as insert_node.
        conn.execute(
            "UPDATE Device SET device_status = ?4,
                device_birth_timestamp = ?5, device_death_timestamp = ?6
             WHERE device_name = ?3
                AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?1
                    AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?2))",
            params![edge_node_name, group_name, device_name, status, birth_timestamp, death_timestamp],
        )?;
        conn.query_row(
            "SELECT device_id FROM Device WHERE device_name = ?1
             AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?2
                AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?3))",
            params![device_name, edge_node_name, group_name],
            |row| row.get(0),
        )
        .map_err(HostError::from)
    }

    pub fn insert_metric(
        &self,
        group_name: &str,
        edge_node_name: &str,
        device_name: &str,
        metric_name: &str,
        metric_type: &str,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO Metric (device_id, metric_name, metric_type)
             VALUES (
                (SELECT device_id FROM Device WHERE device_name = ?1
                    AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?2
                        AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?3))),
                ?4, ?5)",
            params![device_name, edge_node_name, group_name, metric_name, metric_type],
        )?;
        // Same rebirth-refresh reasoning as insert_node; a birth certificate can
        // legitimately redeclare a metric's datatype.
        conn.execute(
            "UPDATE Metric SET metric_type = ?5
             WHERE metric_name = ?4
                AND device_id = (SELECT device_id FROM Device WHERE device_name = ?1
                    AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?2
                        AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?3)))",
            params![device_name, edge_node_name, group_name, metric_name, metric_type],
        )?;
        conn.query_row(
            "SELECT metric_id FROM Metric WHERE metric_name = ?1
             AND device_id = (SELECT device_id FROM Device WHERE device_name = ?2
                AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?3
                    AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?4)))",
            params![metric_name, device_name, edge_node_name, group_name],
            |row| row.get(0),
        )
        .map_err(HostError::from)
    }

    /// Looks up a metric_id for an already-birthed metric without creating
    /// one, unlike `insert_metric`. Used when applying a DATA message, which
    /// must refer to a metric a birth certificate already established.
    pub fn metric_id_if_known(
        &self,
        group_name: &str,
        edge_node_name: &str,
        device_name: &str,
        metric_name: &str,
    ) -> Result<Option<i64>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT metric_id FROM Metric WHERE metric_name = ?1
             AND device_id = (SELECT device_id FROM Device WHERE device_name = ?2
                AND edge_node_id = (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name = ?3
                    AND group_id = (SELECT group_id FROM Groups WHERE group_name = ?4)))",
            params![metric_name, device_name, edge_node_name, group_name],
            |row| row.get(0),
        )
        .optional()
        .map_err(HostError::from)
    }

    pub fn append_metric_sample(&self, metric_id: i64, value: &MetricValue, timestamp: i64) -> Result<()> {
        let conn = self.lock();
        let table = metric_table_name(value.datatype());
        let (sql_value, sql): (rusqlite::types::Value, String) = match value {
            MetricValue::String(v) => (v.clone().into(), format!(
                "INSERT INTO {table} (metric_id, metric_value, metric_timestamp) VALUES (?1, ?2, ?3)"
            )),
            MetricValue::Int64(v) => (
                (*v).into(),
                format!("INSERT INTO {table} (metric_id, metric_value, metric_timestamp) VALUES (?1, ?2, ?3)"),
            ),
            MetricValue::Double(v) => (
                (*v).into(),
                format!("INSERT INTO {table} (metric_id, metric_value, metric_timestamp) VALUES (?1, ?2, ?3)"),
            ),
            MetricValue::Boolean(v) => (
                (*v as i64).into(),
                format!("INSERT INTO {table} (metric_id, metric_value, metric_timestamp) VALUES (?1, ?2, ?3)"),
            ),
        };
        conn.execute(&sql, params![metric_id, sql_value, timestamp])?;
        Ok(())
    }

    pub fn group_id_by_name(&self, pattern: &str) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT group_id FROM Groups WHERE group_name LIKE ?1")?;
        let like = format!("%{pattern}%");
        let rows = stmt.query_map(params![like], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn node_id_by_name(&self, group_name: Option<&str>, edge_node_name: &str) -> Result<Vec<i64>> {
        let conn = self.lock();
        let like_node = format!("%{edge_node_name}%");
        let ids = if let Some(group_name) = group_name {
            let like_group = format!("%{group_name}%");
            let mut stmt = conn.prepare(
                "SELECT edge_node_id FROM EdgeNode WHERE edge_node_name LIKE ?1
                 AND group_id IN (SELECT group_id FROM Groups WHERE group_name LIKE ?2)",
            )?;
            stmt.query_map(params![like_node, like_group], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?
        } else {
            let mut stmt = conn.prepare("SELECT edge_node_id FROM EdgeNode WHERE edge_node_name LIKE ?1")?;
            stmt.query_map(params![like_node], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?
        };
        Ok(ids)
    }

    pub fn device_id_by_name(
        &self,
        group_name: Option<&str>,
        edge_node_name: Option<&str>,
        device_name: &str,
    ) -> Result<Vec<i64>> {
        let conn = self.lock();
        let like_device = format!("%{device_name}%");
        let ids = match (group_name, edge_node_name) {
            (Some(group_name), Some(edge_node_name)) => {
                let like_node = format!("%{edge_node_name}%");
                let like_group = format!("%{group_name}%");
                let mut stmt = conn.prepare(
                    "SELECT device_id FROM Device WHERE device_name LIKE ?1
                     AND edge_node_id IN (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name LIKE ?2
                        AND group_id IN (SELECT group_id FROM Groups WHERE group_name LIKE ?3))",
                )?;
                stmt.query_map(params![like_device, like_node, like_group], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?
            }
            (None, Some(edge_node_name)) => {
                let like_node = format!("%{edge_node_name}%");
                let mut stmt = conn.prepare(
                    "SELECT device_id FROM Device WHERE device_name LIKE ?1
                     AND edge_node_id IN (SELECT edge_node_id FROM EdgeNode WHERE edge_node_name LIKE ?2)",
                )?;
                stmt.query_map(params![like_device, like_node], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?
            }
            _ => {
                let mut stmt = conn.prepare("SELECT device_id FROM Device WHERE device_name LIKE ?1")?;
                stmt.query_map(params![like_device], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?
            }
        };
        Ok(ids)
    }

    pub fn all_group_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT group_id FROM Groups")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn all_node_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT edge_node_id FROM EdgeNode")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn all_device_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT device_id FROM Device")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn group(&self, group_id: i64) -> Result<GroupRow> {
        let conn = self.lock();
        conn.query_row(
            "SELECT group_id, group_name FROM Groups WHERE group_id = ?1",
            params![group_id],
            |row| {
                Ok(GroupRow {
                    group_id: row.get(0)?,
                    group_name: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HostError::NotFound(format!("group {group_id}")))
    }

    pub fn node(&self, edge_node_id: i64) -> Result<NodeRow> {
        let conn = self.lock();
        conn.query_row(
            "SELECT edge_node_id, group_id, edge_node_name, edge_node_status,
                    edge_node_birth_timestamp, edge_node_death_timestamp
             FROM EdgeNode WHERE edge_node_id = ?1",
            params![edge_node_id],
            |row| {
                Ok(NodeRow {
                    edge_node_id: row.get(0)?,
                    group_id: row.get(1)?,
                    edge_node_name: row.get(2)?,
                    status: row.get(3)?,
                    birth_timestamp: row.get(4)?,
                    death_timestamp: row.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HostError::NotFound(format!("edge node {edge_node_id}")))
    }

    pub fn device(&self, device_id: i64) -> Result<DeviceRow> {
        let conn = self.lock();
        conn.query_row(
            "SELECT device_id, edge_node_id, device_name, device_status,
                    device_birth_timestamp, device_death_timestamp
             FROM Device WHERE device_id = ?1",
            params![device_id],
            |row| {
                Ok(DeviceRow {
                    device_id: row.get(0)?,
                    edge_node_id: row.get(1)?,
                    device_name: row.get(2)?,
                    status: row.get(3)?,
                    birth_timestamp: row.get(4)?,
                    death_timestamp: row.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HostError::NotFound(format!("device {device_id}")))
    }

    pub fn metric(&self, metric_id: i64) -> Result<MetricRow> {
        let conn = self.lock();
        conn.query_row(
            "SELECT metric_id, device_id, metric_name, metric_type FROM Metric WHERE metric_id = ?1",
            params![metric_id],
            |row| {
                Ok(MetricRow {
                    metric_id: row.get(0)?,
                    device_id: row.get(1)?,
                    metric_name: row.get(2)?,
                    metric_type: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HostError::NotFound(format!("metric {metric_id}")))
    }

    pub fn nodes_in_group(&self, group_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT edge_node_id FROM EdgeNode WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn devices_in_group(&self, group_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id FROM Device WHERE edge_node_id IN
                (SELECT edge_node_id FROM EdgeNode WHERE group_id = ?1)",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn devices_on_node(&self, edge_node_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT device_id FROM Device WHERE edge_node_id = ?1")?;
        let rows = stmt.query_map(params![edge_node_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn metrics_on_device(&self, device_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT metric_id FROM Metric WHERE device_id = ?1")?;
        let rows = stmt.query_map(params![device_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(HostError::from)
    }

    pub fn set_node_status(&self, edge_node_id: i64, status: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE EdgeNode SET edge_node_status = ?1 WHERE edge_node_id = ?2",
            params![status, edge_node_id],
        )?;
        Ok(())
    }

    pub fn set_node_death_timestamp(&self, edge_node_id: i64, ts: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE EdgeNode SET edge_node_death_timestamp = ?1 WHERE edge_node_id = ?2",
            params![ts, edge_node_id],
        )?;
        Ok(())
    }

    pub fn set_device_status(&self, device_id: i64, status: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE Device SET device_status = ?1 WHERE device_id = ?2",
            params![status, device_id],
        )?;
        Ok(())
    }

    pub fn set_device_death_timestamp(&self, device_id: i64, ts: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE Device SET device_death_timestamp = ?1 WHERE device_id = ?2",
            params![ts, device_id],
        )?;
        Ok(())
    }

    /// Most recent sample for a metric.
    pub fn metric_value(&self, metric_id: i64) -> Result<Option<MetricSample>> {
        let conn = self.lock();
        let metric_type: String = conn.query_row(
            "SELECT metric_type FROM Metric WHERE metric_id = ?1",
            params![metric_id],
            |row| row.get(0),
        )?;
        let table = metric_table_name_str(&metric_type);
        let sql = format!(
            "SELECT metric_value, metric_timestamp FROM {table}
             WHERE metric_id = ?1 ORDER BY metric_timestamp DESC LIMIT 1"
        );
        conn.query_row(&sql, params![metric_id], |row| row_to_sample(row, &metric_type))
            .optional()
            .map_err(HostError::from)
    }

    /// Full sample history for a metric, oldest first.
    pub fn metric_values(&self, metric_id: i64) -> Result<Vec<MetricSample>> {
        let conn = self.lock();
        let metric_type: String = conn.query_row(
            "SELECT metric_type FROM Metric WHERE metric_id = ?1",
            params![metric_id],
            |row| row.get(0),
        )?;
        let table = metric_table_name_str(&metric_type);
        let sql = format!(
            "SELECT metric_value, metric_timestamp FROM {table}
             WHERE metric_id = ?1 ORDER BY metric_timestamp ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![metric_id], |row| row_to_sample(row, &metric_type))?;
        rows.collect::<rusqlite::Result<Vec<MetricSample>>>().map_err(HostError::from)
    }
}

fn metric_table_name(datatype: MetricDatatype) -> &'static str {
    match datatype {
        MetricDatatype::Int64 => "MetricInt",
        MetricDatatype::Double => "MetricFloat",
        MetricDatatype::Boolean => "MetricBoolean",
        MetricDatatype::String => "MetricString",
    }
}

fn metric_table_name_str(metric_type: &str) -> &'static str {
    match metric_type {
        "int" => "MetricInt",
        "float" => "MetricFloat",
        "boolean" => "MetricBoolean",
        "string" => "MetricString",
        _ => "MetricString",
    }
}

/// The `metric_type` string stored in the `Metric` table for a given datatype.
pub fn metric_type_name(datatype: MetricDatatype) -> &'static str {
    match datatype {
        MetricDatatype::Int64 => "int",
        MetricDatatype::Double => "float",
        MetricDatatype::Boolean => "boolean",
        MetricDatatype::String => "string",
    }
}

fn row_to_sample(row: &rusqlite::Row<'_>, metric_type: &str) -> rusqlite::Result<MetricSample> {
    let timestamp: i64 = row.get(1)?;
    let value = match metric_type {
        "int" => MetricValue::Int64(row.get(0)?),
        "float" => MetricValue::Double(row.get(0)?),
        "boolean" => MetricValue::Boolean(row.get::<_, i64>(0)? != 0),
        _ => MetricValue::String(row.get(0)?),
    };
    Ok(MetricSample { value, timestamp })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("store.db")).expect("open store");
        (store, dir)
    }

    #[test]
    fn insert_group_is_idempotent() {
        let (store, _dir) = open_tmp();
        let a = store.insert_group("plant1").unwrap();
        let b = store.insert_group("plant1").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.all_group_ids().unwrap(), vec![a]);
    }

    #[test]
    fn rebirth_updates_the_same_row_instead_of_duplicating_it() {
        let (store, _dir) = open_tmp();
        store.insert_group("plant1").unwrap();
        let node_a = store.insert_node("plant1", "edge1", "ONLINE", Some(100), None).unwrap();
        let device_a = store
            .insert_device("plant1", "edge1", "pump1", "ONLINE", Some(100), None)
            .unwrap();
        let metric_a = store
            .insert_metric("plant1", "edge1", "pump1", "temperature", metric_type_name(MetricDatatype::Double))
            .unwrap();

        let node_b = store.insert_node("plant1", "edge1", "ONLINE", Some(200), None).unwrap();
        let device_b = store
            .insert_device("plant1", "edge1", "pump1", "ONLINE", Some(200), None)
            .unwrap();
        let metric_b = store
            .insert_metric("plant1", "edge1", "pump1", "temperature", metric_type_name(MetricDatatype::Double))
            .unwrap();

        assert_eq!(node_a, node_b);
        assert_eq!(device_a, device_b);
        assert_eq!(metric_a, metric_b);
        assert_eq!(store.all_node_ids().unwrap(), vec![node_a]);
        assert_eq!(store.all_device_ids().unwrap(), vec![device_a]);

        let node = store.node(node_b).unwrap();
        assert_eq!(node.birth_timestamp, Some(200));
        let device = store.device(device_b).unwrap();
        assert_eq!(device.birth_timestamp, Some(200));
    }

    #[test]
    fn full_topology_insert_and_lookup() {
        let (store, _dir) = open_tmp();
        store.insert_group("plant1").unwrap();
        let node_id = store.insert_node("plant1", "edge1", "online", Some(100), None).unwrap();
        let device_id = store
            .insert_device("plant1", "edge1", "pump1", "online", Some(100), None)
            .unwrap();
        let metric_id = store
            .insert_metric("plant1", "edge1", "pump1", "temperature", metric_type_name(MetricDatatype::Double))
            .unwrap();

        assert_eq!(store.node(node_id).unwrap().edge_node_name, "edge1");
        assert_eq!(store.device(device_id).unwrap().device_name, "pump1");
        assert_eq!(store.metric(metric_id).unwrap().metric_name, "temperature");

        let found = store.device_id_by_name(Some("plant1"), Some("edge1"), "pump").unwrap();
        assert_eq!(found, vec![device_id]);
    }

    #[test]
    fn metric_samples_preserve_order_and_return_latest() {
        let (store, _dir) = open_tmp();
        store.insert_group("g").unwrap();
        store.insert_node("g", "n", "online", Some(0), None).unwrap();
        store.insert_device("g", "n", "d", "online", Some(0), None).unwrap();
        let metric_id = store
            .insert_metric("g", "n", "d", "temperature", metric_type_name(MetricDatatype::Double))
            .unwrap();

        store.append_metric_sample(metric_id, &MetricValue::Double(1.0), 100).unwrap();
        store.append_metric_sample(metric_id, &MetricValue::Double(2.0), 200).unwrap();

        let latest = store.metric_value(metric_id).unwrap().unwrap();
        assert_eq!(latest.value, MetricValue::Double(2.0));
        assert_eq!(latest.timestamp, 200);

        let history = store.metric_values(metric_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, 100);
        assert_eq!(history[1].timestamp, 200);
    }

    #[test]
    fn name_pattern_lookup_does_not_interpret_sql_metacharacters() {
        let (store, _dir) = open_tmp();
        store.insert_group("plant1").unwrap();
        store.insert_node("plant1", "edge1", "online", Some(0), None).unwrap();

        let found = store.node_id_by_name(None, "' OR '1'='1").unwrap();
        assert!(found.is_empty());
    }
}
