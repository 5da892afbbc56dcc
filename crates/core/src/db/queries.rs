//! Typed query helpers for the MergeGuard database.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{AnalysisResult, Conflict, ResolutionPlan, ResolutionStrategy};
use crate::scan::ScanReport;

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A conflict together with the repository it was detected in.
#[derive(Debug, Clone)]
pub struct StoredConflict {
    pub conflict: Conflict,
    pub repo_root: String,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub subject: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

/// A row from the `scans` table.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub id: i64,
    pub repo_root: String,
    pub source_ref: String,
    pub target_ref: String,
    pub conflict_count: i64,
    pub overall_risk: String,
    pub risk_score: f64,
    pub scanned_at: String,
}

fn decode<T: DeserializeOwned>(document: &str) -> Result<T, DatabaseError> {
    Ok(serde_json::from_str(document)?)
}

fn not_found(entity: &str, id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Writers usable inside a transaction
// ---------------------------------------------------------------------------

fn upsert_conflict(conn: &Connection, conflict: &Conflict, repo_root: &str) -> Result<(), DatabaseError> {
    let document = serde_json::to_string(conflict)?;
    conn.execute(
        "INSERT INTO conflicts (id, repo_root, source_ref, target_ref, file_path, conflict_type,
                                risk_level, document, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            repo_root = excluded.repo_root,
            conflict_type = excluded.conflict_type,
            risk_level = excluded.risk_level,
            document = excluded.document,
            detected_at = excluded.detected_at",
        params![
            conflict.id,
            repo_root,
            conflict.source_ref,
            conflict.target_ref,
            conflict.primary_path(),
            conflict.conflict_type.as_str(),
            conflict.risk_level.as_str(),
            document,
            conflict.detected_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn upsert_analysis(conn: &Connection, analysis: &AnalysisResult) -> Result<(), DatabaseError> {
    let document = serde_json::to_string(analysis)?;
    conn.execute(
        "INSERT INTO analyses (conflict_id, risk_level, alignment_score, document, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(conflict_id) DO UPDATE SET
            risk_level = excluded.risk_level,
            alignment_score = excluded.alignment_score,
            document = excluded.document,
            created_at = excluded.created_at",
        params![
            analysis.conflict_id,
            analysis.risk_level.as_str(),
            analysis.alignment_score,
            document,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn replace_strategies(
    conn: &Connection,
    conflict_id: &str,
    strategies: &[ResolutionStrategy],
) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM strategies WHERE conflict_id = ?1", params![conflict_id])?;
    let now = Utc::now().to_rfc3339();
    for (position, strategy) in strategies.iter().enumerate() {
        let document = serde_json::to_string(strategy)?;
        conn.execute(
            "INSERT INTO strategies (id, conflict_id, position, strategy_type, requires_approval,
                                     document, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                strategy.id,
                conflict_id,
                position as i64,
                strategy.strategy_type.as_str(),
                strategy.requires_approval,
                document,
                now,
            ],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- scans ----------------------------------------------------------------

    /// Persist every conflict, analysis and strategy of a scan in one
    /// transaction. Returns the scan row id.
    pub fn save_scan(&self, repo_root: &str, report: &ScanReport) -> Result<i64, DatabaseError> {
        self.transaction(|conn| {
            for entry in &report.conflicts {
                upsert_conflict(conn, &entry.conflict, repo_root)?;
                upsert_analysis(conn, &entry.analysis)?;
                replace_strategies(conn, &entry.conflict.id, &entry.strategies)?;
            }
            conn.execute(
                "INSERT INTO scans (repo_root, source_ref, target_ref, conflict_count, overall_risk,
                                    risk_score, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    repo_root,
                    report.source,
                    report.target,
                    report.conflicts.len() as i64,
                    report.risk.overall_risk.as_str(),
                    report.risk.risk_score,
                    report.scanned_at.to_rfc3339(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, conflicts = report.conflicts.len(), "scan saved");
            Ok(id)
        })
    }

    pub fn list_scans(&self, limit: u32) -> Result<Vec<ScanEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, repo_root, source_ref, target_ref, conflict_count, overall_risk, risk_score,
                    scanned_at
             FROM scans ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(ScanEntry {
                id: row.get(0)?,
                repo_root: row.get(1)?,
                source_ref: row.get(2)?,
                target_ref: row.get(3)?,
                conflict_count: row.get(4)?,
                overall_risk: row.get(5)?,
                risk_score: row.get(6)?,
                scanned_at: row.get(7)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // -- conflicts ------------------------------------------------------------

    pub fn save_conflict(&self, conflict: &Conflict, repo_root: &str) -> Result<(), DatabaseError> {
        upsert_conflict(&self.conn(), conflict, repo_root)
    }

    /// Find a conflict by full id or unique prefix.
    pub fn find_conflict(&self, prefix: &str) -> Result<StoredConflict, DatabaseError> {
        let conn = self.conn();
        let pattern = format!("{}%", prefix.replace(['%', '_'], ""));
        let mut stmt = conn.prepare(
            "SELECT document, repo_root FROM conflicts WHERE id LIKE ?1 ORDER BY id LIMIT 2",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        match rows.as_slice() {
            [] => Err(not_found("conflict", prefix)),
            [(document, repo_root)] => Ok(StoredConflict {
                conflict: decode(document)?,
                repo_root: repo_root.clone(),
            }),
            _ => {
                let matches: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM conflicts WHERE id LIKE ?1",
                    params![pattern],
                    |row| row.get(0),
                )?;
                Err(DatabaseError::Ambiguous {
                    entity: "conflict".into(),
                    prefix: prefix.to_string(),
                    matches: matches as usize,
                })
            }
        }
    }

    /// Conflicts most recently detected first.
    pub fn list_conflicts(&self, limit: u32) -> Result<Vec<Conflict>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT document FROM conflicts ORDER BY detected_at DESC, id LIMIT ?1")?;
        let documents: Vec<String> = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        documents.iter().map(|d| decode(d)).collect()
    }

    // -- analyses -------------------------------------------------------------

    pub fn get_analysis(&self, conflict_id: &str) -> Result<Option<AnalysisResult>, DatabaseError> {
        let conn = self.conn();
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM analyses WHERE conflict_id = ?1",
                params![conflict_id],
                |row| row.get(0),
            )
            .optional()?;
        document.map(|d| decode(&d)).transpose()
    }

    // -- strategies -----------------------------------------------------------

    /// Strategies for a conflict, primary first.
    pub fn list_strategies(&self, conflict_id: &str) -> Result<Vec<ResolutionStrategy>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT document FROM strategies WHERE conflict_id = ?1 ORDER BY position")?;
        let documents: Vec<String> = stmt
            .query_map(params![conflict_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        documents.iter().map(|d| decode(d)).collect()
    }

    /// Look up a strategy by full id or by its `s<n>` suffix.
    pub fn find_strategy(&self, conflict_id: &str, id: &str) -> Result<ResolutionStrategy, DatabaseError> {
        self.list_strategies(conflict_id)?
            .into_iter()
            .find(|s| s.id == id || s.id.ends_with(&format!("-{}", id)))
            .ok_or_else(|| not_found("strategy", id))
    }

    // -- plans ----------------------------------------------------------------

    pub fn save_plan(&self, plan: &ResolutionPlan) -> Result<(), DatabaseError> {
        let document = serde_json::to_string(plan)?;
        self.conn().execute(
            "INSERT INTO plans (id, conflict_id, strategy_id, status, next_step, document,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                next_step = excluded.next_step,
                document = excluded.document,
                updated_at = excluded.updated_at",
            params![
                plan.id,
                plan.conflict_id,
                plan.strategy_id,
                plan.status().as_str(),
                plan.next_step as i64,
                document,
                plan.created_at.to_rfc3339(),
                plan.updated_at.to_rfc3339(),
            ],
        )?;
        debug!(plan = %plan.id, status = %plan.status(), "plan saved");
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> Result<ResolutionPlan, DatabaseError> {
        let conn = self.conn();
        let document: Option<String> = conn
            .query_row("SELECT document FROM plans WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        match document {
            Some(d) => decode(&d),
            None => Err(not_found("plan", id)),
        }
    }

    /// Most recently updated plan of a conflict that is still in progress.
    pub fn active_plan(&self, conflict_id: &str) -> Result<Option<ResolutionPlan>, DatabaseError> {
        let conn = self.conn();
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM plans WHERE conflict_id = ?1 AND status = 'in_progress'
                 ORDER BY updated_at DESC LIMIT 1",
                params![conflict_id],
                |row| row.get(0),
            )
            .optional()?;
        document.map(|d| decode(&d)).transpose()
    }

    // -- audit_log ------------------------------------------------------------

    pub fn insert_audit_log(
        &self,
        action: &str,
        subject: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, subject, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, subject, details, success, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, subject, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(AuditLogEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                subject: row.get(2)?,
                details: row.get(3)?,
                success: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::analysis::RiskReport;
    use crate::models::{
        ConflictTypeExtended, ExecutionStatus, ResolutionStep, RiskLevel, StepAction, StrategyType,
    };
    use crate::scan::ConflictReport;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn entry(path: &str) -> ConflictReport {
        let conflict = Conflict::new("feature", "main", path, ConflictTypeExtended::Content, vec![]);
        let analysis = AnalysisResult {
            conflict_id: conflict.id.clone(),
            complexity_score: 0.3,
            alignment_score: 0.7,
            risk_level: RiskLevel::Low,
            estimated_resolution_time_minutes: 4,
            is_auto_resolvable: true,
            recommended_strategy_type: StrategyType::AcceptIncoming,
            root_cause: "edits".into(),
            confidence_score: 0.8,
            semantic_findings: vec![],
            compliance_score: Some(0.9),
        };
        let strategies = (1..=2)
            .map(|n| ResolutionStrategy {
                id: format!("{}-s{}", conflict.short_id(), n),
                conflict_id: conflict.id.clone(),
                name: format!("strategy {}", n),
                strategy_type: StrategyType::AcceptIncoming,
                steps: vec![ResolutionStep::new(
                    "add",
                    "stage",
                    StepAction::GitAdd { path: path.into() },
                )],
                estimated_time_minutes: 1,
                risk_assessment: RiskLevel::Low,
                requires_approval: false,
                confidence: 0.5,
                ai_generated: false,
                model_used: None,
            })
            .collect();
        ConflictReport {
            conflict,
            analysis,
            strategies,
        }
    }

    fn report(entries: Vec<ConflictReport>) -> ScanReport {
        ScanReport {
            source: "feature".into(),
            target: "main".into(),
            conflicts: entries,
            risk: RiskReport {
                total_conflicts: 0,
                by_severity: BTreeMap::new(),
                by_type: BTreeMap::new(),
                critical_files: vec![],
                risk_score: 0.1,
                overall_risk: RiskLevel::Low,
                mitigation_strategies: vec![],
                recommendations: vec![],
            },
            dependency_cycles: vec![],
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_scan_and_lookup() {
        let db = db();
        let e = entry("src/app.py");
        let id = e.conflict.id.clone();
        db.save_scan("/repo", &report(vec![e])).unwrap();
        // Re-saving the same scan replaces strategies instead of duplicating.
        db.save_scan("/repo", &report(vec![entry("src/app.py")])).unwrap();

        let stored = db.find_conflict(&id[..6]).unwrap();
        assert_eq!(stored.conflict.id, id);
        assert_eq!(stored.repo_root, "/repo");
        assert_eq!(db.get_analysis(&id).unwrap().unwrap().compliance_score, Some(0.9));

        let strategies = db.list_strategies(&id).unwrap();
        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].name, "strategy 1");
        assert_eq!(db.find_strategy(&id, "s2").unwrap().name, "strategy 2");
        assert!(db.find_strategy(&id, "s9").is_err());
        assert_eq!(db.list_scans(10).unwrap().len(), 2);
    }

    #[test]
    fn test_find_conflict_errors() {
        let db = db();
        assert!(matches!(db.find_conflict("abc"), Err(DatabaseError::NotFound { .. })));
        db.save_scan("/repo", &report(vec![entry("a.py"), entry("b.py")])).unwrap();
        assert!(matches!(
            db.find_conflict(""),
            Err(DatabaseError::Ambiguous { matches: 2, .. })
        ));
    }

    #[test]
    fn test_plan_roundtrip_and_active_lookup() {
        let db = db();
        let e = entry("a.py");
        let mut plan = ResolutionPlan::new(&e.conflict.id, &e.strategies[0].id, e.strategies[0].steps.clone());
        db.save_plan(&plan).unwrap();
        assert!(db.active_plan(&e.conflict.id).unwrap().is_none());

        plan.transition(ExecutionStatus::InProgress).unwrap();
        db.save_plan(&plan).unwrap();
        let active = db.active_plan(&e.conflict.id).unwrap().unwrap();
        assert_eq!(active.id, plan.id);
        assert_eq!(active.status(), ExecutionStatus::InProgress);

        assert!(db.get_plan("nope").is_err());
    }

    #[test]
    fn test_audit_log() {
        let db = db();
        db.insert_audit_log("resolve", Some("abc"), Some("completed"), true).unwrap();
        db.insert_audit_log("resolve", Some("def"), None, false).unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subject.as_deref(), Some("def"));
        assert!(!entries[0].success);
    }
}
