//! # Session Supervisor
//!
//! Heartbeats live sessions and exposes the "who else is working" view for
//! cross-session awareness. A session is active while its last heartbeat is
//! within five minutes; anything older is stale and eventually swept.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Heartbeat window for the active-session view.
pub const ACTIVE_WINDOW_SECS: i64 = 300;

/// Stale sessions older than this are removed by the sweep.
pub const SESSION_SWEEP_AGE_HOURS: i64 = 24;

/// One session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project: String,
    #[serde(default)]
    pub working_on: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub active_files: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub next_action: Option<String>,
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() <= ACTIVE_WINDOW_SECS
    }
}

/// Mutable session fields carried by a heartbeat.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate<'a> {
    pub project: Option<&'a str>,
    pub working_on: Option<&'a str>,
    pub current_phase: Option<&'a str>,
    pub active_files: Option<&'a [String]>,
    pub blocked_by: Option<&'a [String]>,
    pub next_action: Option<&'a str>,
}

/// Manager for the sessions table.
pub struct SessionSupervisor {
    db: CoordDb,
}

impl SessionSupervisor {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Record a heartbeat, creating the session on its first event.
    /// Fields in `update` overwrite stored values; absent fields are kept.
    pub fn heartbeat(&self, id: &str, update: SessionUpdate<'_>) -> Result<()> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        let active_files_json = update
            .active_files
            .map(serde_json::to_string)
            .transpose()?;
        let blocked_by_json = update.blocked_by.map(serde_json::to_string).transpose()?;

        conn.execute(
            r#"
            INSERT INTO sessions (id, project, working_on, started_at, last_heartbeat,
                                  current_phase, active_files_json, blocked_by_json, next_action)
            VALUES (?1, COALESCE(?2, ''), ?3, ?7, ?7, ?4, COALESCE(?5, '[]'), COALESCE(?6, '[]'), ?8)
            ON CONFLICT(id) DO UPDATE SET
                last_heartbeat = ?7,
                project = COALESCE(?2, sessions.project),
                working_on = COALESCE(?3, sessions.working_on),
                current_phase = COALESCE(?4, sessions.current_phase),
                active_files_json = COALESCE(?5, sessions.active_files_json),
                blocked_by_json = COALESCE(?6, sessions.blocked_by_json),
                next_action = COALESCE(?8, sessions.next_action)
            "#,
            params![
                id,
                update.project,
                update.working_on,
                update.current_phase,
                active_files_json,
                blocked_by_json,
                now,
                update.next_action,
            ],
        )
        .context("Failed to heartbeat session")?;

        Ok(())
    }

    /// Load one session by id.
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.db.lock()?;

        let session = conn
            .query_row(
                r#"
                SELECT id, project, working_on, started_at, last_heartbeat,
                       current_phase, active_files_json, blocked_by_json, next_action
                FROM sessions WHERE id = ?1
                "#,
                params![id],
                |row| Ok(Self::row_to_session(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(session)
    }

    /// Sessions with a heartbeat in the last five minutes, optionally scoped
    /// to a project.
    pub fn list_active(&self, project: Option<&str>) -> Result<Vec<Session>> {
        let conn = self.db.lock()?;
        let cutoff = (Utc::now() - Duration::seconds(ACTIVE_WINDOW_SECS)).to_rfc3339();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, project, working_on, started_at, last_heartbeat,
                   current_phase, active_files_json, blocked_by_json, next_action
            FROM sessions
            WHERE last_heartbeat >= ?1 AND (?2 IS NULL OR project = ?2)
            ORDER BY last_heartbeat DESC
            "#,
        )?;

        let sessions = stmt
            .query_map(params![cutoff, project], |row| {
                Ok(Self::row_to_session(row)?)
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list active sessions")?;

        Ok(sessions)
    }

    /// Remove sessions whose heartbeat is older than the sweep age, plus
    /// expired checkpoints. Returns (sessions, checkpoints) removed.
    pub fn sweep_stale(&self) -> Result<(usize, usize)> {
        let conn = self.db.lock()?;
        let now = Utc::now();
        let cutoff = (now - Duration::hours(SESSION_SWEEP_AGE_HOURS)).to_rfc3339();

        let sessions = conn.execute(
            "DELETE FROM sessions WHERE last_heartbeat < ?1",
            params![cutoff],
        )?;

        let checkpoints = conn.execute(
            "DELETE FROM checkpoints WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now.to_rfc3339()],
        )?;

        if sessions > 0 || checkpoints > 0 {
            tracing::debug!(
                "swept {} stale session(s), {} expired checkpoint(s)",
                sessions,
                checkpoints
            );
        }

        Ok((sessions, checkpoints))
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let started_at_str: String = row.get(3)?;
        let heartbeat_str: String = row.get(4)?;
        let active_files_json: String = row.get(6)?;
        let blocked_by_json: String = row.get(7)?;

        Ok(Session {
            id: row.get(0)?,
            project: row.get(1)?,
            working_on: row.get(2)?,
            started_at: parse_ts(&started_at_str),
            last_heartbeat: parse_ts(&heartbeat_str),
            current_phase: row.get(5)?,
            active_files: serde_json::from_str(&active_files_json).unwrap_or_default(),
            blocked_by: serde_json::from_str(&blocked_by_json).unwrap_or_default(),
            next_action: row.get(8)?,
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
