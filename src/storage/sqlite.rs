//! SQLite ledger implementation

use crate::state::FailureReason;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Ledger, StorageError, StorageResult};
use crate::storage::{FailureEntry, FrontierEntry, RunRecord, RunStatus, RunTotals};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, \
     tasks_succeeded, records_admitted, duplicates_discarded, permanent_failures";

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Opens or creates the ledger database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteLedger)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory ledger
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
        totals: RunTotals {
            tasks_succeeded: row.get::<_, i64>(5)? as u64,
            records_admitted: row.get::<_, i64>(6)? as u64,
            duplicates_discarded: row.get::<_, i64>(7)? as u64,
            permanent_failures: row.get::<_, i64>(8)? as u64,
        },
    })
}

impl Ledger for SqliteLedger {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        totals: &RunTotals,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, tasks_succeeded = ?3,
                records_admitted = ?4, duplicates_discarded = ?5, permanent_failures = ?6
             WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                totals.tasks_succeeded as i64,
                totals.records_admitted as i64,
                totals.duplicates_discarded as i64,
                totals.permanent_failures as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Failures =====

    fn record_failure(&mut self, run_id: i64, failure: &FailureEntry) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO failures (run_id, locator, reason, detail, attempts, depth, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                failure.locator,
                failure.reason.to_db_string(),
                failure.detail,
                failure.attempts,
                failure.depth,
                failure.failed_at
            ],
        )?;
        Ok(())
    }

    fn failure_summary(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT reason, COUNT(*) FROM failures GROUP BY reason ORDER BY COUNT(*) DESC, reason",
        )?;
        let summary = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summary)
    }

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<FailureEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT locator, reason, detail, attempts, depth, failed_at
             FROM failures ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(locator, reason, detail, attempts, depth, failed_at)| {
                Some(FailureEntry {
                    locator,
                    reason: FailureReason::from_db_string(&reason)?,
                    detail,
                    attempts,
                    depth,
                    failed_at,
                })
            })
            .collect())
    }

    // ===== Frontier =====

    fn save_frontier(&mut self, run_id: i64, entries: &[FrontierEntry]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM frontier", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO frontier (locator, priority, depth, attempts, saved_run)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.locator,
                    entry.priority,
                    entry.depth,
                    entry.attempts,
                    run_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT locator, priority, depth, attempts FROM frontier
             ORDER BY priority DESC, depth ASC, locator",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(FrontierEntry {
                    locator: row.get(0)?,
                    priority: row.get(1)?,
                    depth: row.get(2)?,
                    attempts: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn clear_frontier(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM frontier", [])?;
        Ok(())
    }
}
