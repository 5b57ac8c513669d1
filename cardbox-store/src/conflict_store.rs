//! Durable storage for conflict records.
//!
//! Uses a separate SQLite file so conflict state survives process crashes
//! independently of the entity tables. One row per conflict id; all
//! timestamps are stored as ISO-8601 text.

use crate::error::{StorageError, StorageResult};
use cardbox_types::{
    ConflictId, ConflictSeverity, ConflictState, ConflictStatus, ConflictType, EntityId,
    EntityRecord, EntityType, Resolution,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Persistent store for conflict records backed by SQLite.
pub struct ConflictStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictStore {
    /// Opens (or creates) a conflict store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StorageError::Database(format!("failed to open conflict store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory conflict store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Database(format!("failed to open in-memory conflict store: {e}"))
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                conflict_type TEXT NOT NULL,
                status TEXT NOT NULL,
                severity TEXT NOT NULL,
                local_data TEXT,
                remote_data TEXT,
                local_version INTEGER NOT NULL,
                remote_version INTEGER NOT NULL,
                local_timestamp TEXT,
                remote_timestamp TEXT,
                detected_at TEXT NOT NULL,
                status_changed_at TEXT NOT NULL,
                detection_time_ms INTEGER NOT NULL,
                resolution_time_ms INTEGER,
                retry_count INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                resolution TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conflicts_entity
                ON conflicts (entity_type, entity_id);
            ",
        )
        .map_err(|e| StorageError::Database(format!("failed to init conflict schema: {e}")))?;
        Ok(())
    }

    /// Saves (inserts or replaces) a conflict record.
    pub fn save(&self, conflict: &ConflictState) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let local_data = conflict
            .local_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let remote_data = conflict
            .remote_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let resolution = conflict
            .resolution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT OR REPLACE INTO conflicts (
                id, entity_type, entity_id, conflict_type, status, severity,
                local_data, remote_data, local_version, remote_version,
                local_timestamp, remote_timestamp, detected_at,
                status_changed_at, detection_time_ms, resolution_time_ms,
                retry_count, max_retries, resolution
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                conflict.id.to_string(),
                conflict.entity_type.as_str(),
                conflict.entity_id.as_str(),
                conflict.conflict_type.as_str(),
                conflict.status.as_str(),
                conflict.severity.as_str(),
                local_data,
                remote_data,
                conflict.local_version as i64,
                conflict.remote_version as i64,
                conflict.local_timestamp.map(|t| t.to_rfc3339()),
                conflict.remote_timestamp.map(|t| t.to_rfc3339()),
                conflict.detected_at.to_rfc3339(),
                conflict.status_changed_at.to_rfc3339(),
                conflict.detection_time_ms as i64,
                conflict.resolution_time_ms.map(|t| t as i64),
                conflict.retry_count as i64,
                conflict.max_retries as i64,
                resolution,
            ],
        )
        .map_err(|e| StorageError::Database(format!("failed to save conflict: {e}")))?;
        Ok(())
    }

    /// Loads one conflict by id.
    pub fn load(&self, id: &ConflictId) -> StorageResult<Option<ConflictState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM conflicts WHERE id = ?1")
            .map_err(|e| StorageError::Database(format!("failed to prepare load: {e}")))?;
        let mut rows = stmt
            .query_map(params![id.to_string()], row_to_raw)
            .map_err(|e| StorageError::Database(format!("failed to query conflict: {e}")))?;
        match rows.next() {
            Some(row) => {
                let raw = row.map_err(|e| StorageError::Database(e.to_string()))?;
                Ok(Some(raw_to_conflict(raw)?))
            }
            None => Ok(None),
        }
    }

    /// Loads all persisted conflicts.
    pub fn load_all(&self) -> StorageResult<Vec<ConflictState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM conflicts ORDER BY detected_at")
            .map_err(|e| StorageError::Database(format!("failed to prepare load_all: {e}")))?;
        let rows = stmt
            .query_map([], row_to_raw)
            .map_err(|e| StorageError::Database(format!("failed to query conflicts: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StorageError::Database(e.to_string()))?;
            result.push(raw_to_conflict(raw)?);
        }
        Ok(result)
    }

    /// Deletes one conflict by id. Returns whether a row was removed.
    pub fn delete(&self, id: &ConflictId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn
            .execute(
                "DELETE FROM conflicts WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| StorageError::Database(format!("failed to delete conflict: {e}")))?;
        Ok(n > 0)
    }

    /// Deletes terminal conflicts detected before `cutoff`.
    /// Returns the number of rows removed.
    pub fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn
            .execute(
                "DELETE FROM conflicts
                 WHERE status IN ('resolved', 'failed') AND detected_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| StorageError::Database(format!("failed to clean up conflicts: {e}")))?;
        Ok(n)
    }

    /// Returns the number of persisted conflicts.
    pub fn count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conflicts", [], |row| row.get(0))
            .map_err(|e| StorageError::Database(format!("failed to count conflicts: {e}")))?;
        Ok(count as usize)
    }
}

/// Intermediate row shape so rusqlite's closure stays error-free and the
/// fallible decoding happens in one place.
struct RawRow {
    id: String,
    entity_type: String,
    entity_id: String,
    conflict_type: String,
    status: String,
    severity: String,
    local_data: Option<String>,
    remote_data: Option<String>,
    local_version: i64,
    remote_version: i64,
    local_timestamp: Option<String>,
    remote_timestamp: Option<String>,
    detected_at: String,
    status_changed_at: String,
    detection_time_ms: i64,
    resolution_time_ms: Option<i64>,
    retry_count: i64,
    max_retries: i64,
    resolution: Option<String>,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        conflict_type: row.get(3)?,
        status: row.get(4)?,
        severity: row.get(5)?,
        local_data: row.get(6)?,
        remote_data: row.get(7)?,
        local_version: row.get(8)?,
        remote_version: row.get(9)?,
        local_timestamp: row.get(10)?,
        remote_timestamp: row.get(11)?,
        detected_at: row.get(12)?,
        status_changed_at: row.get(13)?,
        detection_time_ms: row.get(14)?,
        resolution_time_ms: row.get(15)?,
        retry_count: row.get(16)?,
        max_retries: row.get(17)?,
        resolution: row.get(18)?,
    })
}

fn raw_to_conflict(raw: RawRow) -> StorageResult<ConflictState> {
    let corrupt = |detail: String| StorageError::CorruptRecord {
        id: raw.id.clone(),
        detail,
    };

    let id = ConflictId::parse(&raw.id).map_err(|e| corrupt(format!("bad id: {e}")))?;
    let entity_type = EntityType::from_str(&raw.entity_type)
        .map_err(|e| corrupt(format!("bad entity_type: {e}")))?;
    let conflict_type =
        parse_conflict_type(&raw.conflict_type).ok_or_else(|| corrupt("bad conflict_type".into()))?;
    let status = parse_status(&raw.status).ok_or_else(|| corrupt("bad status".into()))?;
    let severity = parse_severity(&raw.severity).ok_or_else(|| corrupt("bad severity".into()))?;

    let local_data: Option<EntityRecord> = raw
        .local_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| corrupt(format!("bad local_data: {e}")))?;
    let remote_data: Option<EntityRecord> = raw
        .remote_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| corrupt(format!("bad remote_data: {e}")))?;
    let resolution: Option<Resolution> = raw
        .resolution
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| corrupt(format!("bad resolution: {e}")))?;

    let detected_at = parse_rfc3339(&raw.detected_at)
        .ok_or_else(|| corrupt("bad detected_at".into()))?;
    let status_changed_at = parse_rfc3339(&raw.status_changed_at)
        .ok_or_else(|| corrupt("bad status_changed_at".into()))?;
    let local_timestamp = match raw.local_timestamp.as_deref() {
        Some(s) => Some(parse_rfc3339(s).ok_or_else(|| corrupt("bad local_timestamp".into()))?),
        None => None,
    };
    let remote_timestamp = match raw.remote_timestamp.as_deref() {
        Some(s) => Some(parse_rfc3339(s).ok_or_else(|| corrupt("bad remote_timestamp".into()))?),
        None => None,
    };

    Ok(ConflictState {
        id,
        entity_type,
        entity_id: EntityId::new(raw.entity_id),
        conflict_type,
        status,
        severity,
        local_data,
        remote_data,
        local_version: raw.local_version as u64,
        remote_version: raw.remote_version as u64,
        local_timestamp,
        remote_timestamp,
        detected_at,
        status_changed_at,
        detection_time_ms: raw.detection_time_ms as u64,
        resolution_time_ms: raw.resolution_time_ms.map(|t| t as u64),
        retry_count: raw.retry_count as u32,
        max_retries: raw.max_retries as u32,
        resolution,
        persisted: true,
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_conflict_type(s: &str) -> Option<ConflictType> {
    match s {
        "version" => Some(ConflictType::Version),
        "content" => Some(ConflictType::Content),
        "structure" => Some(ConflictType::Structure),
        "delete" => Some(ConflictType::Delete),
        "field" => Some(ConflictType::Field),
        _ => None,
    }
}

fn parse_status(s: &str) -> Option<ConflictStatus> {
    match s {
        "pending" => Some(ConflictStatus::Pending),
        "detecting" => Some(ConflictStatus::Detecting),
        "resolving" => Some(ConflictStatus::Resolving),
        "resolved" => Some(ConflictStatus::Resolved),
        "failed" => Some(ConflictStatus::Failed),
        _ => None,
    }
}

fn parse_severity(s: &str) -> Option<ConflictSeverity> {
    match s {
        "low" => Some(ConflictSeverity::Low),
        "medium" => Some(ConflictSeverity::Medium),
        "high" => Some(ConflictSeverity::High),
        "critical" => Some(ConflictSeverity::Critical),
        _ => None,
    }
}
