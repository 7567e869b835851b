//! # Checkpoints & Feature Workspaces
//!
//! Team-awareness bookkeeping used by the session supervisor: resumable
//! checkpoints (with expiry) and which session owns which feature branch.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Default checkpoint lifetime.
pub const CHECKPOINT_TTL_HOURS: i64 = 72;

/// A resumable snapshot of session progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    pub label: String,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Which session works which feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWorkspace {
    pub feature: String,
    pub project: String,
    pub session_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Manager for checkpoints and feature workspaces.
pub struct WorkspaceStore {
    db: CoordDb,
}

impl WorkspaceStore {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Save a checkpoint, replacing any previous one with the same id.
    pub fn save_checkpoint(
        &self,
        id: &str,
        session_id: &str,
        label: &str,
        state: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.db.lock()?;
        let now = Utc::now();
        let expires = now + Duration::hours(CHECKPOINT_TTL_HOURS);

        conn.execute(
            r#"
            INSERT OR REPLACE INTO checkpoints (id, session_id, label, state_json, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id,
                session_id,
                label,
                serde_json::to_string(state)?,
                now.to_rfc3339(),
                expires.to_rfc3339(),
            ],
        )
        .context("Failed to save checkpoint")?;

        Ok(())
    }

    /// Latest unexpired checkpoint for a session.
    pub fn latest_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        let checkpoint = conn
            .query_row(
                r#"
                SELECT id, session_id, label, state_json, created_at, expires_at
                FROM checkpoints
                WHERE session_id = ?1 AND (expires_at IS NULL OR expires_at >= ?2)
                ORDER BY created_at DESC
                LIMIT 1
                "#,
                params![session_id, now],
                |row| Ok(Self::row_to_checkpoint(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(checkpoint)
    }

    /// Record which session owns a feature. Upserts on (feature, project).
    pub fn assign_feature(
        &self,
        feature: &str,
        project: &str,
        session_id: &str,
        branch: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO feature_workspaces (feature, project, session_id, branch, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)
            ON CONFLICT(feature, project) DO UPDATE SET
                session_id = excluded.session_id,
                branch = excluded.branch,
                status = 'active',
                updated_at = excluded.updated_at
            "#,
            params![feature, project, session_id, branch, now],
        )
        .context("Failed to assign feature workspace")?;

        Ok(())
    }

    /// Active workspaces in a project.
    pub fn active_features(&self, project: &str) -> Result<Vec<FeatureWorkspace>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT feature, project, session_id, branch, status, created_at, updated_at
            FROM feature_workspaces
            WHERE project = ?1 AND status = 'active'
            ORDER BY updated_at DESC
            "#,
        )?;

        let workspaces = stmt
            .query_map(params![project], |row| Ok(Self::row_to_workspace(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list feature workspaces")?;

        Ok(workspaces)
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
        let state_json: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;
        let expires_at_str: Option<String> = row.get(5)?;

        Ok(Checkpoint {
            id: row.get(0)?,
            session_id: row.get(1)?,
            label: row.get(2)?,
            state: serde_json::from_str(&state_json).unwrap_or_default(),
            created_at: parse_ts(&created_at_str),
            expires_at: expires_at_str.as_deref().map(parse_ts),
        })
    }

    fn row_to_workspace(row: &rusqlite::Row) -> rusqlite::Result<FeatureWorkspace> {
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        Ok(FeatureWorkspace {
            feature: row.get(0)?,
            project: row.get(1)?,
            session_id: row.get(2)?,
            branch: row.get(3)?,
            status: row.get(4)?,
            created_at: parse_ts(&created_at_str),
            updated_at: parse_ts(&updated_at_str),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
