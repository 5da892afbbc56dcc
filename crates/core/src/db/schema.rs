//! Database schema definitions and migration runner.
//!
//! Migrations are applied in order; the SQLite `user_version` pragma records
//! which ones have run.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// `(version, description, sql)`, versions starting at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS conflicts (
            id            TEXT PRIMARY KEY,
            repo_root     TEXT NOT NULL,
            source_ref    TEXT NOT NULL,
            target_ref    TEXT NOT NULL,
            file_path     TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            risk_level    TEXT NOT NULL,
            document      TEXT NOT NULL,
            detected_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_refs ON conflicts (source_ref, target_ref);

        CREATE TABLE IF NOT EXISTS analyses (
            conflict_id     TEXT PRIMARY KEY REFERENCES conflicts (id) ON DELETE CASCADE,
            risk_level      TEXT NOT NULL,
            alignment_score REAL NOT NULL,
            document        TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS strategies (
            id                TEXT PRIMARY KEY,
            conflict_id       TEXT NOT NULL REFERENCES conflicts (id) ON DELETE CASCADE,
            position          INTEGER NOT NULL,
            strategy_type     TEXT NOT NULL,
            requires_approval INTEGER NOT NULL,
            document          TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_strategies_conflict ON strategies (conflict_id, position);

        CREATE TABLE IF NOT EXISTS plans (
            id          TEXT PRIMARY KEY,
            conflict_id TEXT NOT NULL,
            strategy_id TEXT NOT NULL,
            status      TEXT NOT NULL,
            next_step   INTEGER NOT NULL,
            document    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_plans_conflict ON plans (conflict_id, updated_at);

        CREATE TABLE IF NOT EXISTS audit_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            action     TEXT NOT NULL,
            subject    TEXT,
            details    TEXT,
            success    INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        "#,
    ),
    (
        2,
        "scan history",
        r#"
        CREATE TABLE IF NOT EXISTS scans (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_root      TEXT NOT NULL,
            source_ref     TEXT NOT NULL,
            target_ref     TEXT NOT NULL,
            conflict_count INTEGER NOT NULL,
            overall_risk   TEXT NOT NULL,
            risk_score     REAL NOT NULL,
            scanned_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scans_scanned_at ON scans (scanned_at);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
