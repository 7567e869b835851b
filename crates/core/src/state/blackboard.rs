//! # Blackboard
//!
//! At-least-once broadcast channel keyed by swarm id. Append-only: every
//! post is a new row, and progress metrics fold through DISTINCT senders so
//! duplicate deliveries never double-count. Ordering is `(created_at, id)`;
//! consumers may assume a sender's `started` precedes its `done` but nothing
//! across senders.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Default number of broadcasts returned by a read.
pub const DEFAULT_READ_LIMIT: usize = 10;

/// Well-known broadcast tags. Patterns may define their own beyond these.
pub mod tag {
    pub const STARTED: &str = "started";
    pub const DONE: &str = "done";
    pub const STATE_TRANSFER: &str = "state_transfer";
    pub const TASK_SPAWNED: &str = "task_spawned";
    pub const FINDING: &str = "finding";
    pub const VERDICT: &str = "verdict";
    pub const PASS: &str = "pass";
    pub const CRITIQUE: &str = "critique";
}

/// One broadcast row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub swarm_id: String,
    pub sender_agent: String,
    pub broadcast_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Manager for the broadcasts table.
pub struct Blackboard {
    db: CoordDb,
}

impl Blackboard {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Append a broadcast. Returns the new row id.
    pub fn post(
        &self,
        swarm_id: &str,
        sender: &str,
        broadcast_type: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.db.lock()?;
        let payload_json = serde_json::to_string(payload)?;

        conn.execute(
            r#"
            INSERT INTO broadcasts (swarm_id, sender_agent, broadcast_type, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                swarm_id,
                sender,
                broadcast_type,
                payload_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to post broadcast")?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent broadcasts for a swarm, newest first. `since` filters to
    /// rows after a known id (read-position tracking); `exclude_sender`
    /// drops a reader's own posts.
    pub fn read(
        &self,
        swarm_id: &str,
        since: Option<i64>,
        exclude_sender: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Broadcast>> {
        let conn = self.db.lock()?;
        let limit = limit.unwrap_or(DEFAULT_READ_LIMIT);

        let mut stmt = conn.prepare(
            r#"
            SELECT id, swarm_id, sender_agent, broadcast_type, payload_json, created_at
            FROM broadcasts
            WHERE swarm_id = ?1
              AND (?2 IS NULL OR id > ?2)
              AND (?3 IS NULL OR sender_agent != ?3)
            ORDER BY created_at DESC, id DESC
            LIMIT ?4
            "#,
        )?;

        let broadcasts = stmt
            .query_map(
                params![swarm_id, since, exclude_sender, limit as i64],
                |row| Ok(Self::row_to_broadcast(row)?),
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read broadcasts")?;

        Ok(broadcasts)
    }

    /// Latest broadcast of a given type, newest first by `(created_at, id)`.
    pub fn latest_of_type(&self, swarm_id: &str, broadcast_type: &str) -> Result<Option<Broadcast>> {
        let conn = self.db.lock()?;

        let result = conn
            .query_row(
                r#"
                SELECT id, swarm_id, sender_agent, broadcast_type, payload_json, created_at
                FROM broadcasts
                WHERE swarm_id = ?1 AND broadcast_type = ?2
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                params![swarm_id, broadcast_type],
                |row| Ok(Self::row_to_broadcast(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(result)
    }

    /// All broadcasts of a type for a swarm, oldest first.
    pub fn list_of_type(&self, swarm_id: &str, broadcast_type: &str) -> Result<Vec<Broadcast>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, swarm_id, sender_agent, broadcast_type, payload_json, created_at
            FROM broadcasts
            WHERE swarm_id = ?1 AND broadcast_type = ?2
            ORDER BY created_at ASC, id ASC
            "#,
        )?;

        let broadcasts = stmt
            .query_map(params![swarm_id, broadcast_type], |row| {
                Ok(Self::row_to_broadcast(row)?)
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list broadcasts")?;

        Ok(broadcasts)
    }

    /// Count of distinct senders that posted a given type. The de-duplicated
    /// progress metric: duplicate `done` rows from one sender count once.
    pub fn count_distinct_senders(&self, swarm_id: &str, broadcast_type: &str) -> Result<i64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(DISTINCT sender_agent)
            FROM broadcasts
            WHERE swarm_id = ?1 AND broadcast_type = ?2
            "#,
            params![swarm_id, broadcast_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count of distinct senders that posted anything to the swarm.
    pub fn count_participants(&self, swarm_id: &str) -> Result<i64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT sender_agent) FROM broadcasts WHERE swarm_id = ?1",
            params![swarm_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total broadcast rows of one type for a swarm.
    pub fn count_any_of_type(&self, swarm_id: &str, broadcast_type: &str) -> Result<i64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM broadcasts WHERE swarm_id = ?1 AND broadcast_type = ?2",
            params![swarm_id, broadcast_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total broadcast rows for a swarm.
    pub fn count_any(&self, swarm_id: &str) -> Result<i64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM broadcasts WHERE swarm_id = ?1",
            params![swarm_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_broadcast(row: &rusqlite::Row) -> rusqlite::Result<Broadcast> {
        let payload_json: String = row.get(4)?;
        let created_at_str: String = row.get(5)?;

        Ok(Broadcast {
            id: row.get(0)?,
            swarm_id: row.get(1)?,
            sender_agent: row.get(2)?,
            broadcast_type: row.get(3)?,
            payload: serde_json::from_str(&payload_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
