//! Persisted per-file processing state. This is what makes ingestion
//! resumable: any path left `pending`/`in_progress`/`failed` is re-enqueued
//! by the startup heal pass.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::EngineResult;
use crate::types::{ProcessingStatus, ProgressRow};

use super::Db;

impl Db {
    /// `pending → in_progress` (or a fresh row straight to in_progress).
    /// Restarts the row when a file is picked up again.
    pub fn progress_start(&self, path: &str, hash: &str) -> EngineResult<()> {
        let now = Utc::now().timestamp();
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO processing_progress(path, hash, status, extraction_method, started_at, completed_at, error_message)
                 VALUES (?1, ?2, 'in_progress', '', ?3, NULL, NULL)
                 ON CONFLICT(path) DO UPDATE SET
                   hash = excluded.hash,
                   status = 'in_progress',
                   started_at = excluded.started_at,
                   completed_at = NULL,
                   error_message = NULL",
                params![path, hash, now],
            )?;
            Ok(())
        })
    }

    pub fn progress_complete(&self, path: &str, hash: &str, method: &str) -> EngineResult<()> {
        let now = Utc::now().timestamp();
        self.with_conn(|c| {
            c.execute(
                "UPDATE processing_progress
                 SET hash = ?2, status = 'completed', extraction_method = ?3,
                     completed_at = ?4, error_message = NULL
                 WHERE path = ?1",
                params![path, hash, method, now],
            )?;
            Ok(())
        })
    }

    pub fn progress_fail(&self, path: &str, error: &str) -> EngineResult<()> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE processing_progress
                 SET status = 'failed', completed_at = NULL, error_message = ?2
                 WHERE path = ?1",
                params![path, error],
            )?;
            Ok(())
        })
    }

    pub fn progress_reject(&self, path: &str, hash: &str, reason: &str) -> EngineResult<()> {
        let now = Utc::now().timestamp();
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO processing_progress(path, hash, status, extraction_method, started_at, completed_at, error_message)
                 VALUES (?1, ?2, 'rejected', '', ?3, NULL, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                   hash = excluded.hash, status = 'rejected',
                   completed_at = NULL, error_message = excluded.error_message",
                params![path, hash, now, reason],
            )?;
            Ok(())
        })
    }

    pub fn progress_get(&self, path: &str) -> EngineResult<Option<ProgressRow>> {
        self.with_conn(|c| {
            Ok(c.query_row(
                "SELECT path, hash, status, extraction_method, started_at, completed_at, error_message
                 FROM processing_progress WHERE path = ?1",
                params![path],
                row_to_progress,
            )
            .optional()?)
        })
    }

    pub fn progress_delete(&self, path: &str) -> EngineResult<()> {
        self.with_conn(|c| {
            c.execute("DELETE FROM processing_progress WHERE path = ?1", params![path])?;
            Ok(())
        })
    }

    /// Rows whose status marks them as not (or not successfully) finished.
    pub fn progress_unfinished(&self) -> EngineResult<Vec<ProgressRow>> {
        self.progress_with_status(&["pending", "in_progress", "failed"])
    }

    pub fn progress_with_status(&self, statuses: &[&str]) -> EngineResult<Vec<ProgressRow>> {
        self.with_conn(|c| {
            let placeholders = statuses
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT path, hash, status, extraction_method, started_at, completed_at, error_message
                 FROM processing_progress WHERE status IN ({placeholders})"
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(statuses.iter().copied()),
                row_to_progress,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Completed progress rows with no matching document row (orphaned files).
    pub fn progress_completed_without_document(&self) -> EngineResult<Vec<ProgressRow>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT p.path, p.hash, p.status, p.extraction_method, p.started_at, p.completed_at, p.error_message
                 FROM processing_progress p
                 WHERE p.status = 'completed'
                   AND p.path NOT IN (SELECT path FROM documents)",
            )?;
            let rows = stmt.query_map([], row_to_progress)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_progress(r: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRow> {
    let status_str: String = r.get(2)?;
    Ok(ProgressRow {
        path: r.get(0)?,
        hash: r.get(1)?,
        status: ProcessingStatus::parse(&status_str).unwrap_or(ProcessingStatus::Failed),
        extraction_method: r.get(3)?,
        started_at: r.get(4)?,
        completed_at: r.get(5)?,
        error_message: r.get(6)?,
    })
}
