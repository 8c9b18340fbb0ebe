//! SQLite-backed visit record store.
//!
//! One row per visit id with upsert semantics. Derived fields (name,
//! document id, validity window) are a queryable cache over `raw_content`:
//! a one-time reprocess pass runs when the schema version advances, and an
//! incremental backfill repairs rows with missing derived fields on every
//! open. Both reuse the field extractor, so parsing-rule changes repair old
//! data without re-capturing it from the remote portal.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::info;

use super::StoreResult;
use crate::extract::FieldExtractor;
use crate::models::{VisitRecord, MISSING_FIELD, UNKNOWN_NAME};

/// Current derived-field schema version, persisted via `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Cap on `search_by_terms` results.
pub const SEARCH_RESULT_LIMIT: usize = 50;

/// Durable keyed storage of one record per sequential visit id.
pub struct VisitStore {
    conn: Mutex<Connection>,
    extractor: FieldExtractor,
}

impl VisitStore {
    /// Open (or create) the store, applying schema evolution and the
    /// incremental backfill pass.
    pub fn open(db_path: &Path, extractor: FieldExtractor) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 30000;
        "#,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            extractor,
        };
        store.init_tables()?;
        store.migrate()?;
        let backfilled = store.backfill_missing()?;
        if backfilled > 0 {
            info!("backfilled derived fields for {} records", backfilled);
        }
        Ok(store)
    }

    /// Create the visits table and indexes, adding derived-field columns to
    /// databases that predate them.
    fn init_tables(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                visit_id INTEGER PRIMARY KEY,
                name TEXT,
                document_id TEXT,
                validity_window TEXT,
                raw_content TEXT,
                source_url TEXT,
                captured_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        )?;

        let mut stmt = conn.prepare("PRAGMA table_info(visits)")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        for column in ["name", "document_id", "validity_window"] {
            if !columns.iter().any(|c| c == column) {
                conn.execute(&format!("ALTER TABLE visits ADD COLUMN {column} TEXT"), [])?;
            }
        }

        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_visits_name ON visits(name);
            CREATE INDEX IF NOT EXISTS idx_visits_document_id ON visits(document_id);
            CREATE INDEX IF NOT EXISTS idx_visits_validity_window ON visits(validity_window);
        "#,
        )?;

        Ok(())
    }

    /// One-time full reprocess, gated by the persisted schema version so it
    /// never runs twice for the same extraction shape.
    fn migrate(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            let updated = Self::rederive(&conn, &self.extractor, false)?;
            if updated > 0 {
                info!(
                    "reprocessed {} records for schema version {}",
                    updated, SCHEMA_VERSION
                );
            }
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Write or overwrite the record keyed by its id.
    pub fn upsert(&self, record: &VisitRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT OR REPLACE INTO visits
               (visit_id, name, document_id, validity_window, raw_content, source_url, captured_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                record.id,
                record.name,
                record.document_id,
                record.validity_window,
                record.raw_content,
                record.source_url,
                record.captured_at,
            ],
        )?;
        Ok(())
    }

    /// Highest persisted id, or 0 when the store is empty.
    pub fn max_id(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row("SELECT MAX(visit_id) FROM visits", [], |row| {
            row.get(0)
        })?;
        Ok(max.unwrap_or(0))
    }

    /// Fetch one record by id.
    pub fn get(&self, id: i64) -> StoreResult<Option<VisitRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"SELECT visit_id, name, document_id, validity_window, raw_content, source_url, captured_at
                   FROM visits WHERE visit_id = ?"#,
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Number of stored records.
    pub fn count(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM visits", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Records whose name or document id contains every term, newest-id
    /// first, capped at [`SEARCH_RESULT_LIMIT`]. An empty term list returns
    /// no results.
    pub fn search_by_terms(&self, terms: &[String]) -> StoreResult<Vec<VisitRecord>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT visit_id, name, document_id, validity_window, raw_content, source_url, captured_at FROM visits WHERE ",
        );
        let conditions: Vec<&str> = terms
            .iter()
            .map(|_| "(name LIKE ? OR document_id LIKE ?)")
            .collect();
        sql.push_str(&conditions.join(" AND "));
        sql.push_str(&format!(
            " ORDER BY visit_id DESC LIMIT {SEARCH_RESULT_LIMIT}"
        ));

        let patterns: Vec<String> = terms
            .iter()
            .flat_map(|t| {
                let pattern = format!("%{t}%");
                [pattern.clone(), pattern]
            })
            .collect();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(patterns.iter()), Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Recompute derived fields for records missing them. Idempotent; runs on
    /// every open.
    pub fn backfill_missing(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        Self::rederive(&conn, &self.extractor, true)
    }

    /// Recompute derived fields for every stored record from raw content.
    pub fn reprocess_all(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        Self::rederive(&conn, &self.extractor, false)
    }

    fn rederive(
        conn: &Connection,
        extractor: &FieldExtractor,
        only_missing: bool,
    ) -> StoreResult<usize> {
        let sql = if only_missing {
            "SELECT visit_id, raw_content FROM visits
             WHERE name IS NULL OR document_id IS NULL OR validity_window IS NULL"
        } else {
            "SELECT visit_id, raw_content FROM visits"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<(i64, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut updated = 0;
        for (id, raw_content) in rows {
            let fields = extractor.extract(raw_content.as_deref().unwrap_or(""));
            conn.execute(
                "UPDATE visits SET name = ?, document_id = ?, validity_window = ? WHERE visit_id = ?",
                params![fields.name, fields.document_id, fields.validity_window, id],
            )?;
            updated += 1;
        }
        Ok(updated)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<VisitRecord> {
        Ok(VisitRecord {
            id: row.get(0)?,
            name: row
                .get::<_, Option<String>>(1)?
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            document_id: row
                .get::<_, Option<String>>(2)?
                .unwrap_or_else(|| MISSING_FIELD.to_string()),
            validity_window: row
                .get::<_, Option<String>>(3)?
                .unwrap_or_else(|| MISSING_FIELD.to_string()),
            raw_content: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            source_url: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            captured_at: row.get(6)?,
        })
    }
}
