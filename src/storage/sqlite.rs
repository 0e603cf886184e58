//! SQLite storage backend

use super::traits::{GraphStore, OpenStore, StorageResult};
use crate::graph::{ManagedObject, ObjectId};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite-backed object store
///
/// One table of objects keyed by (context, object id). Each row carries the
/// entity and resource identifier as columns for inspection, and the full
/// object as JSON. Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                context TEXT NOT NULL,
                id TEXT NOT NULL,
                entity TEXT NOT NULL,
                resource_id TEXT,
                object_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (context, id)
            );

            CREATE INDEX IF NOT EXISTS idx_objects_entity
                ON objects(context, entity, resource_id);

            -- Concurrent reads while a merge persists
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    fn save_object(&self, context: &str, object: &ManagedObject) -> StorageResult<()> {
        let json = serde_json::to_string(object)?;
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO objects (context, id, entity, resource_id, object_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(context, id) DO UPDATE SET
                entity = excluded.entity,
                resource_id = excluded.resource_id,
                object_json = excluded.object_json,
                updated_at = excluded.updated_at
            "#,
            params![
                context,
                object.id.to_string(),
                object.entity,
                object.resource_id.as_ref().map(|r| r.as_str().to_string()),
                json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_object(&self, context: &str, id: &ObjectId) -> StorageResult<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM objects WHERE context = ?1 AND id = ?2",
            params![context, id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn load_objects(&self, context: &str) -> StorageResult<Vec<ManagedObject>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT object_json FROM objects WHERE context = ?1 ORDER BY rowid")?;
        let rows = stmt
            .query_map(params![context], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut objects = Vec::with_capacity(rows.len());
        for json in rows {
            objects.push(serde_json::from_str(&json)?);
        }
        Ok(objects)
    }

    fn clear_context(&self, context: &str) -> StorageResult<usize> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM objects WHERE context = ?1", params![context])?;
        Ok(rows)
    }

    fn list_contexts(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT context FROM objects ORDER BY context")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
