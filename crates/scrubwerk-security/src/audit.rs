// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only SQLite log of every sanitization run.
//
// Schema:
//   audit_log(
//     id            INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp     TEXT    NOT NULL,   -- RFC 3339
//     action        TEXT    NOT NULL,   -- e.g. "strip", "protect"
//     original_hash TEXT    NOT NULL,   -- 16-hex SHA-256 prefix of the input
//     output_hash   TEXT,               -- 16-hex SHA-256 prefix of the output
//     file_type     TEXT    NOT NULL,   -- detected container format
//     success       INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details       TEXT                -- JSON audit summary (counts/flags only)
//   )
//
// Filenames are deliberately absent: a filename can itself be PHI.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, params};
use scrubwerk_core::error::ScrubError;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT    NOT NULL,
    action        TEXT    NOT NULL,
    original_hash TEXT    NOT NULL,
    output_hash   TEXT,
    file_type     TEXT    NOT NULL,
    success       INTEGER NOT NULL,
    details       TEXT
);
CREATE INDEX IF NOT EXISTS audit_log_original ON audit_log (original_hash);
CREATE INDEX IF NOT EXISTS audit_log_output ON audit_log (output_hash);";

/// Convert a `rusqlite::Error` into a `ScrubError::Database`.
fn db_err(e: rusqlite::Error) -> ScrubError {
    ScrubError::Database(e.to_string())
}

/// What gets written for one run. Built by the caller from its audit summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub original_hash: String,
    pub output_hash: Option<String>,
    pub file_type: String,
    pub success: bool,
    /// Serialized audit summary. Must already be PHI-free.
    pub details: Option<serde_json::Value>,
}

/// A stored row, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub original_hash: String,
    pub output_hash: Option<String>,
    pub file_type: String,
    pub success: bool,
    pub details: Option<String>,
}

/// Append-only audit log backed by a SQLite database.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`, in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScrubError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("audit log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self, ScrubError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self { conn })
    }

    /// Append one record.
    #[instrument(skip(self, record), fields(action = %record.action, original = %record.original_hash, success = record.success))]
    pub fn record(&self, record: &AuditRecord) -> Result<(), ScrubError> {
        let timestamp = Utc::now().to_rfc3339();
        let details = record
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO audit_log
                    (timestamp, action, original_hash, output_hash, file_type, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    timestamp,
                    record.action,
                    record.original_hash,
                    record.output_hash,
                    record.file_type,
                    record.success as i32,
                    details
                ],
            )
            .map_err(db_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// Every run whose input *or* output carried `hash`, oldest first.
    pub fn entries_for_hash(&self, hash: &str) -> Result<Vec<AuditEntry>, ScrubError> {
        self.query(
            "SELECT id, timestamp, action, original_hash, output_hash, file_type, success, details
             FROM audit_log
             WHERE original_hash = ?1 OR output_hash = ?1
             ORDER BY id ASC",
            params![hash],
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, ScrubError> {
        self.query(
            "SELECT id, timestamp, action, original_hash, output_hash, file_type, success, details
             FROM audit_log
             ORDER BY id DESC
             LIMIT ?1",
            params![limit],
        )
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<u64, ScrubError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Number of runs recorded as failed.
    pub fn failure_count(&self) -> Result<u64, ScrubError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM audit_log WHERE success = 0",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditEntry>, ScrubError> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: row.get(2)?,
                    original_hash: row.get(3)?,
                    output_hash: row.get(4)?,
                    file_type: row.get(5)?,
                    success: row.get::<_, i32>(6)? != 0,
                    details: row.get(7)?,
                })
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_log() -> AuditLog {
        AuditLog::open_in_memory().expect("open in-memory audit log")
    }

    fn record(action: &str, original: &str, output: Option<&str>, success: bool) -> AuditRecord {
        AuditRecord {
            action: action.into(),
            original_hash: original.into(),
            output_hash: output.map(str::to_owned),
            file_type: "jpeg".into(),
            success,
            details: None,
        }
    }

    #[test]
    fn record_and_count() {
        let log = make_log();
        assert_eq!(log.count().unwrap(), 0);
        log.record(&record("strip", "aaaa", Some("bbbb"), true)).unwrap();
        log.record(&record("protect", "aaaa", Some("cccc"), true)).unwrap();
        assert_eq!(log.count().unwrap(), 2);
        assert_eq!(log.failure_count().unwrap(), 0);
    }

    #[test]
    fn lookup_matches_either_hash() {
        let log = make_log();
        log.record(&record("strip", "in01", Some("out1"), true)).unwrap();
        log.record(&record("strip", "in02", Some("out2"), true)).unwrap();
        log.record(&record("protect", "out1", None, false)).unwrap();

        let entries = log.entries_for_hash("out1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "strip");
        assert_eq!(entries[1].action, "protect");
        assert!(!entries[1].success);
        assert_eq!(log.failure_count().unwrap(), 1);
    }

    #[test]
    fn recent_entries_ordering() {
        let log = make_log();
        for i in 0..5 {
            log.record(&record("strip", &format!("hash{i}"), None, true))
                .unwrap();
        }
        let recent = log.recent_entries(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id > recent[1].id);
        assert!(recent[1].id > recent[2].id);
    }

    #[test]
    fn details_are_stored_as_json() {
        let log = make_log();
        let mut entry = record("strip", "feed", Some("beef"), true);
        entry.details = Some(serde_json::json!({ "total_fields_removed": 3, "had_gps": true }));
        log.record(&entry).unwrap();

        let stored = log.entries_for_hash("feed").unwrap();
        let details: serde_json::Value =
            serde_json::from_str(stored[0].details.as_deref().unwrap()).unwrap();
        assert_eq!(details["total_fields_removed"], 3);
        assert_eq!(details["had_gps"], true);
    }

    #[test]
    fn persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sqlite");
        {
            let log = AuditLog::open(&path).unwrap();
            log.record(&record("strip", "disk", None, true)).unwrap();
        }
        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
