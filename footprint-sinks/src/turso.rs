//! Turso/libSQL implementation of the primary activity store.
//!
//! The store can live in a local embedded file or in memory. It holds a
//! single connection for its whole lifetime, which keeps an in-memory
//! database alive between calls.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use footprint_core::{ActivityRecord, PreWriteHook, RecordStore, StoreError, WriteHooks, WriteKind};
use libsql::{Builder, Connection, Database};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// SQL schema for the activity records table.
const SCHEMA_ACTIVITY: &str = r#"
CREATE TABLE IF NOT EXISTS activity_records (
    key TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    resource_path TEXT NOT NULL,
    verb TEXT NOT NULL,
    duration_ms REAL NOT NULL,
    occurred_at TEXT NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    created_by TEXT,
    updated_by TEXT
)
"#;

/// SQL index for time-ordered queries.
const INDEX_ACTIVITY_TIME: &str = r#"
CREATE INDEX IF NOT EXISTS idx_activity_occurred_at
ON activity_records(occurred_at)
"#;

const SELECT_COLUMNS: &str = "SELECT id, actor_id, resource_path, verb, duration_ms, occurred_at, created_at, updated_at, created_by, updated_by FROM activity_records";

/// libSQL-backed store for [`ActivityRecord`]s.
#[derive(Clone)]
pub struct TursoActivityStore {
    // The database must outlive its connection.
    _db: Arc<Database>,
    conn: Connection,
    hooks: WriteHooks,
}

impl TursoActivityStore {
    /// Open (or create) a local embedded database at `path`.
    pub async fn new_local(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        Self::open(db).await
    }

    /// Create an in-memory store (for testing and throwaway setups).
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::open(db).await
    }

    async fn open(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        let store = Self {
            _db: Arc::new(db),
            conn,
            hooks: WriteHooks::new(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Replace the pre-write hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: WriteHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Add a pre-write hook.
    pub fn register_hook(&mut self, hook: Arc<dyn PreWriteHook>) {
        self.hooks.register(hook);
    }

    /// Ensure the database schema exists.
    async fn ensure_schema(&self) -> Result<()> {
        self.conn.execute(SCHEMA_ACTIVITY, ()).await?;
        self.conn.execute(INDEX_ACTIVITY_TIME, ()).await?;
        Ok(())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM activity_records", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    /// Most recent records first, by occurrence time.
    #[instrument(skip(self), level = "debug")]
    pub async fn recent(&self, limit: u32) -> Result<Vec<ActivityRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("{SELECT_COLUMNS} ORDER BY occurred_at DESC LIMIT ?"),
                [limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Parse a record from a database row.
    fn parse_record(row: &libsql::Row) -> Result<ActivityRecord> {
        let id_str: String = row.get(0)?;
        let actor_id: String = row.get(1)?;
        let resource_path: String = row.get(2)?;
        let verb: String = row.get(3)?;
        let duration_ms: f64 = row.get(4)?;
        let occurred_at_str: String = row.get(5)?;
        let created_at_str: Option<String> = row.get(6)?;
        let updated_at_str: Option<String> = row.get(7)?;
        let created_by: Option<String> = row.get(8)?;
        let updated_by: Option<String> = row.get(9)?;

        let id = id_str
            .parse()
            .map_err(|_| Error::InvalidData(format!("invalid record id: {}", id_str)))?;

        Ok(ActivityRecord {
            id,
            actor_id,
            resource_path,
            verb,
            duration_ms,
            occurred_at: parse_datetime(&occurred_at_str)?,
            created_at: created_at_str.as_deref().map(parse_datetime).transpose()?,
            updated_at: updated_at_str.as_deref().map(parse_datetime).transpose()?,
            created_by,
            updated_by,
        })
    }

    async fn write_insert(&self, key: &str, record: &ActivityRecord) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "INSERT OR IGNORE INTO activity_records (key, id, actor_id, resource_path, verb, duration_ms, occurred_at, created_at, updated_at, created_by, updated_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    key,
                    record.id.to_string(),
                    record.actor_id.clone(),
                    record.resource_path.clone(),
                    record.verb.clone(),
                    record.duration_ms,
                    format_datetime(record.occurred_at),
                    record.created_at.map(format_datetime),
                    record.updated_at.map(format_datetime),
                    record.created_by.clone(),
                    record.updated_by.clone()
                ],
            )
            .await?)
    }

    /// Update everything but the creation fields. Returns the stored
    /// `created_at` / `created_by`, or `None` if `key` is unknown.
    async fn write_update(
        &self,
        key: &str,
        record: &ActivityRecord,
    ) -> Result<Option<(Option<DateTime<Utc>>, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE activity_records SET id = ?, actor_id = ?, resource_path = ?, verb = ?, duration_ms = ?, occurred_at = ?, updated_at = ?, updated_by = ? WHERE key = ? RETURNING created_at, created_by",
                libsql::params![
                    record.id.to_string(),
                    record.actor_id.clone(),
                    record.resource_path.clone(),
                    record.verb.clone(),
                    record.duration_ms,
                    format_datetime(record.occurred_at),
                    record.updated_at.map(format_datetime),
                    record.updated_by.clone(),
                    key
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let created_at: Option<String> = row.get(0)?;
                let created_by: Option<String> = row.get(1)?;
                Ok(Some((
                    created_at.as_deref().map(parse_datetime).transpose()?,
                    created_by,
                )))
            }
            None => Ok(None),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<ActivityRecord>> {
        let mut rows = self
            .conn
            .query(&format!("{SELECT_COLUMNS} WHERE key = ?"), [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::parse_record(&row)?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl RecordStore<ActivityRecord> for TursoActivityStore {
    #[instrument(skip(self, record), level = "debug")]
    async fn insert(
        &self,
        key: &str,
        mut record: ActivityRecord,
    ) -> std::result::Result<ActivityRecord, StoreError> {
        self.hooks.prepare(WriteKind::Insert, &mut record, Utc::now());

        if self.write_insert(key, &record).await? == 0 {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        debug!(key, actor_id = %record.actor_id, "Inserted activity record");
        Ok(record)
    }

    #[instrument(skip(self, record), level = "debug")]
    async fn update(
        &self,
        key: &str,
        mut record: ActivityRecord,
    ) -> std::result::Result<ActivityRecord, StoreError> {
        self.hooks.prepare(WriteKind::Update, &mut record, Utc::now());

        let Some((created_at, created_by)) = self.write_update(key, &record).await? else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        record.created_at = created_at;
        record.created_by = created_by;
        debug!(key, actor_id = %record.actor_id, "Updated activity record");
        Ok(record)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> std::result::Result<Option<ActivityRecord>, StoreError> {
        Ok(self.read(key).await?)
    }
}

/// Format a datetime for storage.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a datetime from storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidData(format!("invalid datetime: {}", s)))
}
