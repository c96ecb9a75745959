//! Durable content storage: the single mutation path for the snapshot.
//!
//! Every successfully validated field is written twice in one
//! transaction: as an individually addressable row (cheap point reads,
//! debugging) and merged into the aggregate snapshot row that serves the
//! public read path. Writes are plain assignments, so re-applying a batch
//! is a no-op and concurrent batches resolve by field-level
//! last-write-wins. There is deliberately no version check on the
//! snapshot; edits are human-paced and availability wins over strict
//! consistency here.
//!
//! ## Storage
//! SQLite behind a mutex, WAL mode, shared between the gateway handlers.

use crate::content::sanitize::sanitize;
use crate::content::validate::validate;
use crate::ledger::{FieldChange, FieldType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One field's fate inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOutcome {
    pub field_name: String,
    pub saved: bool,
    /// The stored (sanitized) value when saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of persisting one batch. Partial success is a normal outcome:
/// `success` is true only when nothing failed, and the counts always
/// satisfy `saved_count + failed_count == total_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub saved_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub errors: Vec<String>,
    pub per_field: Vec<FieldOutcome>,
}

/// An individually addressable stored field.
#[derive(Debug, Clone)]
pub struct StoredField {
    pub field_name: String,
    pub field_value: String,
    pub field_type: FieldType,
    pub updated_at: u64,
}

/// The aggregate snapshot: the canonical read path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub values: BTreeMap<String, String>,
    pub last_updated: Option<u64>,
    pub field_count: usize,
}

/// Thread-safe durable store for the content snapshot.
#[derive(Debug)]
pub struct ContentStore {
    conn: Mutex<rusqlite::Connection>,
}

impl ContentStore {
    /// Create an in-memory store (for tests).
    pub fn new() -> Self {
        let conn = rusqlite::Connection::open_in_memory()
            .expect("Failed to open in-memory SQLite for content store");
        Self::init_tables(&conn);
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open a file-backed store for production use.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::init_tables(&conn);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &rusqlite::Connection) {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content_fields (
                field_name TEXT PRIMARY KEY,
                field_value TEXT NOT NULL,
                field_type TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS content_snapshot (
                key TEXT PRIMARY KEY,
                values_json TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                field_count INTEGER NOT NULL
            );",
        )
        .expect("Failed to initialize content store tables");
    }

    /// Validate, sanitize, and persist a batch of changes.
    ///
    /// A field that fails validation is recorded and skipped; it never
    /// aborts the batch. `last_updated` moves only when at least one
    /// field lands. Storage errors roll the whole transaction back.
    pub fn save_batch(&self, changes: &[FieldChange]) -> anyhow::Result<BatchResult> {
        let mut per_field = Vec::with_capacity(changes.len());
        let mut errors = Vec::new();
        let mut accepted: Vec<(String, String, FieldType)> = Vec::new();

        for change in changes {
            match validate(change) {
                Ok(()) => {
                    let clean = sanitize(&change.field_value, change.field_type);
                    per_field.push(FieldOutcome {
                        field_name: change.field_name.clone(),
                        saved: true,
                        value: Some(clean.clone()),
                        error: None,
                    });
                    accepted.push((change.field_name.clone(), clean, change.field_type));
                }
                Err(e) => {
                    tracing::debug!(field = %change.field_name, error = %e, "field failed validation");
                    errors.push(format!("{}: {e}", change.field_name));
                    per_field.push(FieldOutcome {
                        field_name: change.field_name.clone(),
                        saved: false,
                        value: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if !accepted.is_empty() {
            let now = epoch_secs();
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO content_fields
                     (field_name, field_value, field_type, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (name, value, field_type) in &accepted {
                    stmt.execute(rusqlite::params![
                        name,
                        value,
                        field_type.as_str(),
                        now as i64
                    ])?;
                }
            }

            // Merge into the aggregate snapshot row.
            let mut values = Self::snapshot_values(&tx)?;
            for (name, value, _) in &accepted {
                values.insert(name.clone(), value.clone());
            }
            let values_json = serde_json::to_string(&values)?;
            tx.execute(
                "INSERT OR REPLACE INTO content_snapshot
                 (key, values_json, last_updated, field_count)
                 VALUES ('current', ?1, ?2, ?3)",
                rusqlite::params![values_json, now as i64, values.len()],
            )?;

            tx.commit()?;
        }

        let saved_count = accepted.len();
        let failed_count = changes.len() - saved_count;
        tracing::info!(
            saved = saved_count,
            failed = failed_count,
            "persisted content batch"
        );

        Ok(BatchResult {
            success: failed_count == 0,
            saved_count,
            failed_count,
            total_count: changes.len(),
            errors,
            per_field,
        })
    }

    fn snapshot_values(conn: &rusqlite::Connection) -> anyhow::Result<BTreeMap<String, String>> {
        let row: Result<String, _> = conn.query_row(
            "SELECT values_json FROM content_snapshot WHERE key = 'current'",
            [],
            |row| row.get(0),
        );
        match row {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// The canonical aggregate snapshot. Empty when nothing was ever saved.
    pub fn snapshot(&self) -> anyhow::Result<ContentSnapshot> {
        let conn = self.conn.lock();
        let row: Result<(String, i64, i64), _> = conn.query_row(
            "SELECT values_json, last_updated, field_count FROM content_snapshot WHERE key = 'current'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        );
        match row {
            Ok((json, last_updated, field_count)) => Ok(ContentSnapshot {
                values: serde_json::from_str(&json)?,
                last_updated: Some(last_updated as u64),
                field_count: field_count as usize,
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ContentSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Point read of one stored field.
    pub fn field(&self, field_name: &str) -> anyhow::Result<Option<StoredField>> {
        let conn = self.conn.lock();
        let row: Result<(String, String, i64), _> = conn.query_row(
            "SELECT field_value, field_type, updated_at FROM content_fields WHERE field_name = ?1",
            rusqlite::params![field_name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        );
        match row {
            Ok((value, type_str, updated_at)) => Ok(Some(StoredField {
                field_name: field_name.to_string(),
                field_value: value,
                field_type: FieldType::parse(&type_str).unwrap_or(FieldType::Text),
                updated_at: updated_at as u64,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────
