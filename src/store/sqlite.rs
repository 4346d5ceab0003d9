use super::{DurableNodeId, HistoryEntry, Location, NewNode, NodeRecord, NodeStore, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = include_str!("../../sql/01_tracker_schema.sql");

/// SQLite implementation of `NodeStore`
///
/// Statements are short single-row writes, so they run inline on the
/// connection mutex. The mutex is never held across an await.
///
/// Unsigned counters are stored as INTEGER; a value above `i64::MAX` is
/// rejected with `StoreError::Database` rather than wrapped.
pub struct SqliteNodeStore {
    conn: Mutex<Connection>,
}

impl SqliteNodeStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite store initialized (journal_mode={})", journal_mode);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn history_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        durable_node_id: row.get(0)?,
        timestamp: row.get(1)?,
        avg_block_time: row.get(2)?,
        avg_propagation_time: row.get(3)?,
        peer_count: row.get(4)?,
        transactions_in_queue: row.get(5)?,
        best_block_number: row.get(6)?,
        best_block_hash: row.get(7)?,
        blocks_processed: row.get(8)?,
        uptime: row.get(9)?,
    })
}

#[async_trait]
impl NodeStore for SqliteNodeStore {
    async fn create_node(&self, node: &NewNode) -> Result<DurableNodeId, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO nodes
             (node_name, node_implementation, node_version, address, network_id,
              last_startup_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.node_name,
                node.node_implementation,
                node.node_version,
                node.address,
                node.network_id,
                node.last_startup_time,
                now_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn find_node(&self, durable_id: DurableNodeId) -> Result<Option<NodeRecord>, StoreError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT n.id, n.node_name, n.node_implementation, n.node_version,
                        n.address, n.network_id, n.last_startup_time,
                        l.lat, l.lng, l.city
                 FROM nodes n
                 LEFT JOIN locations l ON l.node_id = n.id
                 WHERE n.id = ?1",
                [durable_id],
                |row| {
                    let lat: Option<f64> = row.get(7)?;
                    let lng: Option<f64> = row.get(8)?;
                    let city: Option<String> = row.get(9)?;
                    let location = match (lat, lng, city) {
                        (Some(lat), Some(lng), Some(city)) => Some(Location { lat, lng, city }),
                        _ => None,
                    };
                    Ok(NodeRecord {
                        durable_id: row.get(0)?,
                        node_name: row.get(1)?,
                        node_implementation: row.get(2)?,
                        node_version: row.get(3)?,
                        address: row.get(4)?,
                        network_id: row.get(5)?,
                        last_startup_time: row.get(6)?,
                        location,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn upsert_location(
        &self,
        durable_id: DurableNodeId,
        location: &Location,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let exists = conn
            .prepare("SELECT 1 FROM nodes WHERE id = ?1")?
            .exists([durable_id])?;
        if !exists {
            return Err(StoreError::NotFound(durable_id));
        }

        conn.execute(
            "INSERT INTO locations (node_id, lat, lng, city, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(node_id) DO UPDATE SET
                lat = excluded.lat,
                lng = excluded.lng,
                city = excluded.city,
                updated_at = excluded.updated_at",
            params![durable_id, location.lat, location.lng, location.city, now_millis()],
        )?;
        Ok(())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO node_history
             (node_id, timestamp, avg_block_time, avg_propagation_time, peer_count,
              transactions_in_queue, best_block_number, best_block_hash,
              blocks_processed, uptime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.durable_node_id,
                entry.timestamp,
                entry.avg_block_time,
                entry.avg_propagation_time,
                entry.peer_count,
                entry.transactions_in_queue,
                entry.best_block_number,
                entry.best_block_hash,
                entry.blocks_processed,
                entry.uptime,
            ],
        )?;
        Ok(())
    }

    async fn latest_durable_id(&self) -> Result<DurableNodeId, StoreError> {
        let conn = self.conn();
        let latest: i64 =
            conn.query_row("SELECT COALESCE(MAX(id), 0) FROM nodes", [], |row| row.get(0))?;
        Ok(latest)
    }

    async fn history_for(&self, durable_id: DurableNodeId) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT node_id, timestamp, avg_block_time, avg_propagation_time, peer_count,
                    transactions_in_queue, best_block_number, best_block_hash,
                    blocks_processed, uptime
             FROM node_history
             WHERE node_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map([durable_id], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
