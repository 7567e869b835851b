//! # Agent Registry
//!
//! Tracks every running agent: id, session, pattern, parent, PID, status,
//! timestamps. The source of truth for "who is running" and the admission
//! signal for fan-out-capping patterns.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Running agents older than this are presumed leaked and swept.
pub const LEAK_MAX_AGE_HOURS: i64 = 24;

/// Terminal status of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Running,
        }
    }
}

/// Where an agent was launched from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    #[default]
    Cli,
    Server,
}

impl AgentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Server => "server",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "server" => Self::Server,
            _ => Self::Cli,
        }
    }
}

/// A registered agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub parent_agent_id: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub ppid: Option<i64>,
    pub spawned_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub source: AgentSource,
}

/// What to register for a new agent.
#[derive(Debug, Clone, Default)]
pub struct AgentSpawn<'a> {
    pub pattern: Option<&'a str>,
    pub parent_agent_id: Option<&'a str>,
    pub pid: Option<i64>,
    pub ppid: Option<i64>,
    pub source: AgentSource,
}

/// Manager for the agents table.
pub struct AgentRegistry {
    db: CoordDb,
}

impl AgentRegistry {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Register an agent as running. Idempotent on id: a duplicate register
    /// keeps one row, last writer winning on the non-key fields.
    pub fn register(&self, id: &str, session_id: &str, spawn: AgentSpawn<'_>) -> Result<()> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO agents (id, session_id, pattern, parent_agent_id, pid, ppid,
                                spawned_at, completed_at, status, error_message, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 'running', NULL, ?8)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                pattern = excluded.pattern,
                parent_agent_id = excluded.parent_agent_id,
                pid = excluded.pid,
                ppid = excluded.ppid,
                completed_at = NULL,
                status = 'running',
                error_message = NULL,
                source = excluded.source
            "#,
            params![
                id,
                session_id,
                spawn.pattern,
                spawn.parent_agent_id,
                spawn.pid,
                spawn.ppid,
                now,
                spawn.source.as_str(),
            ],
        )
        .context("Failed to register agent")?;

        Ok(())
    }

    /// Mark an agent terminal. The first call wins: a second `complete` and
    /// a `complete` for an unknown id are both no-ops (agents may terminate
    /// via a path that skips the registry).
    pub fn complete(&self, id: &str, status: AgentStatus, error: Option<&str>) -> Result<bool> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            r#"
            UPDATE agents
            SET status = ?1, completed_at = ?2, error_message = ?3
            WHERE id = ?4 AND status = 'running'
            "#,
            params![status.as_str(), now, error, id],
        )?;

        Ok(affected > 0)
    }

    /// Number of agents currently running. The admission signal for
    /// resource-aware patterns.
    pub fn count_running(&self) -> Result<i64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM agents WHERE status = 'running'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Running agents, optionally scoped to a session.
    pub fn list_running(&self, session_id: Option<&str>) -> Result<Vec<Agent>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, pattern, parent_agent_id, pid, ppid,
                   spawned_at, completed_at, status, error_message, source
            FROM agents
            WHERE status = 'running' AND (?1 IS NULL OR session_id = ?1)
            ORDER BY spawned_at DESC
            "#,
        )?;

        let agents = stmt
            .query_map(params![session_id], |row| Ok(Self::row_to_agent(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list running agents")?;

        Ok(agents)
    }

    /// Load one agent by id.
    pub fn get(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.db.lock()?;

        let agent = conn
            .query_row(
                r#"
                SELECT id, session_id, pattern, parent_agent_id, pid, ppid,
                       spawned_at, completed_at, status, error_message, source
                FROM agents WHERE id = ?1
                "#,
                params![id],
                |row| Ok(Self::row_to_agent(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(agent)
    }

    /// Direct children of an agent that are still running.
    pub fn list_running_children(&self, parent_id: &str) -> Result<Vec<Agent>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, pattern, parent_agent_id, pid, ppid,
                   spawned_at, completed_at, status, error_message, source
            FROM agents
            WHERE status = 'running' AND parent_agent_id = ?1
            ORDER BY spawned_at DESC
            "#,
        )?;

        let agents = stmt
            .query_map(params![parent_id], |row| Ok(Self::row_to_agent(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list child agents")?;

        Ok(agents)
    }

    /// All descendants of an agent that are still running, resolved by
    /// repeated parent queries (ids only, no in-memory object graph).
    pub fn list_running_descendants(&self, root_id: &str) -> Result<Vec<Agent>> {
        let mut frontier = vec![root_id.to_string()];
        let mut descendants = Vec::new();

        while let Some(parent) = frontier.pop() {
            for child in self.list_running_children(&parent)? {
                frontier.push(child.id.clone());
                descendants.push(child);
            }
        }

        Ok(descendants)
    }

    /// Garbage-collect rows stuck in `running` past `max_age`. Returns the
    /// number of presumed-leaked agents marked cancelled.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        let conn = self.db.lock()?;
        let now = Utc::now();
        let cutoff = (now - max_age).to_rfc3339();

        let affected = conn.execute(
            r#"
            UPDATE agents
            SET status = 'cancelled', completed_at = ?1,
                error_message = 'swept: presumed leaked'
            WHERE status = 'running' AND spawned_at < ?2
            "#,
            params![now.to_rfc3339(), cutoff],
        )?;

        if affected > 0 {
            tracing::info!("swept {} leaked agent(s)", affected);
        }
        Ok(affected)
    }

    fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
        let spawned_at_str: String = row.get(6)?;
        let completed_at_str: Option<String> = row.get(7)?;
        let status: String = row.get(8)?;
        let source: String = row.get(10)?;

        Ok(Agent {
            id: row.get(0)?,
            session_id: row.get(1)?,
            pattern: row.get(2)?,
            parent_agent_id: row.get(3)?,
            pid: row.get(4)?,
            ppid: row.get(5)?,
            spawned_at: parse_ts(&spawned_at_str),
            completed_at: completed_at_str.as_deref().map(parse_ts),
            status: AgentStatus::from_str(&status),
            error_message: row.get(9)?,
            source: AgentSource::from_str(&source),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open_db(path: &str) -> CoordDb {
        let _ = fs::remove_file(path);
        CoordDb::open_at(path).unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let path = ".waggle/test_agents_register.db";
        let db = open_db(path);
        let registry = AgentRegistry::new(&db);

        registry
            .register("a1", "s1", AgentSpawn::default())
            .unwrap();
        registry
            .register(
                "a1",
                "s2",
                AgentSpawn {
                    pattern: Some("swarm"),
                    ..Default::default()
                },
            )
            .unwrap();

        // One row, last writer wins on non-key fields
        assert_eq!(registry.count_running().unwrap(), 1);
        let agent = registry.get("a1").unwrap().unwrap();
        assert_eq!(agent.session_id, "s2");
        assert_eq!(agent.pattern.as_deref(), Some("swarm"));

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_complete_first_writer_wins() {
        let path = ".waggle/test_agents_complete.db";
        let db = open_db(path);
        let registry = AgentRegistry::new(&db);

        registry
            .register("a1", "s1", AgentSpawn::default())
            .unwrap();

        assert!(registry
            .complete("a1", AgentStatus::Completed, None)
            .unwrap());
        let first = registry.get("a1").unwrap().unwrap();
        let first_completed = first.completed_at.unwrap();

        // Second complete is a no-op
        assert!(!registry
            .complete("a1", AgentStatus::Failed, Some("late"))
            .unwrap());
        let second = registry.get("a1").unwrap().unwrap();
        assert_eq!(second.status, AgentStatus::Completed);
        assert_eq!(second.completed_at.unwrap(), first_completed);
        assert!(second.error_message.is_none());

        // Unknown id is a no-op too
        assert!(!registry
            .complete("ghost", AgentStatus::Completed, None)
            .unwrap());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_descendants_walk() {
        let path = ".waggle/test_agents_tree.db";
        let db = open_db(path);
        let registry = AgentRegistry::new(&db);

        registry
            .register("root", "s1", AgentSpawn::default())
            .unwrap();
        registry
            .register(
                "child",
                "s1",
                AgentSpawn {
                    parent_agent_id: Some("root"),
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .register(
                "grandchild",
                "s1",
                AgentSpawn {
                    parent_agent_id: Some("child"),
                    ..Default::default()
                },
            )
            .unwrap();

        let descendants = registry.list_running_descendants("root").unwrap();
        assert_eq!(descendants.len(), 2);

        registry
            .complete("grandchild", AgentStatus::Completed, None)
            .unwrap();
        let descendants = registry.list_running_descendants("root").unwrap();
        assert_eq!(descendants.len(), 1);
        assert_eq!(descendants[0].id, "child");

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_sweep_marks_leaked_agents() {
        let path = ".waggle/test_agents_sweep.db";
        let db = open_db(path);
        let registry = AgentRegistry::new(&db);

        registry
            .register("old", "s1", AgentSpawn::default())
            .unwrap();

        // Backdate the spawn to look leaked
        {
            let conn = db.lock().unwrap();
            let stale = (Utc::now() - Duration::hours(30)).to_rfc3339();
            conn.execute(
                "UPDATE agents SET spawned_at = ?1 WHERE id = 'old'",
                params![stale],
            )
            .unwrap();
        }

        let swept = registry.sweep(Duration::hours(LEAK_MAX_AGE_HOURS)).unwrap();
        assert_eq!(swept, 1);
        let agent = registry.get("old").unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Cancelled);

        drop(db);
        let _ = fs::remove_file(path);
    }
}
