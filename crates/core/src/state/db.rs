//! # Coordination Database
//!
//! Single SQLite database backing the whole runtime: agents, sessions,
//! file claims, broadcasts, pipeline artifacts, circuit state, findings,
//! checkpoints and feature workspaces all live in `.waggle/coordination.db`.
//!
//! Every hook invocation is a short-lived process, so cross-process
//! concurrency comes from WAL plus a busy timeout; in-process sharing goes
//! through one connection behind a mutex with a bounded wait. A caller that
//! cannot get the connection inside the budget gets `StoreUnavailable`
//! instead of hanging the host CLI.

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RuntimeError;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Default database location, relative to the project root.
pub const DEFAULT_DB_PATH: &str = ".waggle/coordination.db";

/// Environment variable overriding the database location.
pub const DB_ENV_VAR: &str = "WAGGLE_DB";

/// Wait budget for both the connection guard and SQLite's busy handler.
pub const STORE_WAIT_BUDGET: Duration = Duration::from_secs(5);

/// Shared handle to the coordination database.
#[derive(Clone)]
pub struct CoordDb {
    conn: Arc<Mutex<Connection>>,
}

impl CoordDb {
    /// Open the database at the configured location (`WAGGLE_DB` or the
    /// default path under the project root).
    pub fn open() -> Result<Self> {
        let path = std::env::var(DB_ENV_VAR).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self::open_at(path)
    }

    /// Open the database at a specific path (useful for testing).
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn =
            Connection::open(path.as_ref()).context("Failed to open coordination database")?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL")?;
        conn.busy_timeout(STORE_WAIT_BUDGET)
            .context("Failed to set busy timeout")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Acquire the shared connection within the wait budget.
    ///
    /// Returns `StoreUnavailable` when another caller holds it past the
    /// budget; the dispatcher folds that into an empty hook reply.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.try_lock_for(STORE_WAIT_BUDGET).ok_or_else(|| {
            RuntimeError::StoreUnavailable {
                waited_ms: STORE_WAIT_BUDGET.as_millis() as u64,
            }
            .into()
        })
    }

    /// Run schema migrations. Idempotent; safe to call from every process.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        let version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // Sessions: one row per top-level CLI session, kept alive by heartbeats
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL DEFAULT '',
                working_on TEXT,
                started_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                current_phase TEXT,
                active_files_json TEXT NOT NULL DEFAULT '[]',
                blocked_by_json TEXT NOT NULL DEFAULT '[]',
                next_action TEXT
            )
            "#,
            [],
        )?;

        // Agents: lifecycle registry, one row per agent id
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                pattern TEXT,
                parent_agent_id TEXT,
                pid INTEGER,
                ppid INTEGER,
                spawned_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                error_message TEXT,
                source TEXT NOT NULL DEFAULT 'cli'
            )
            "#,
            [],
        )?;

        // Broadcasts: append-only blackboard, JSON payloads
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS broadcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                swarm_id TEXT NOT NULL,
                sender_agent TEXT NOT NULL,
                broadcast_type TEXT NOT NULL,
                payload_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // File claims: project-scoped exclusive locks with TTL
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS file_claims (
                file_path TEXT NOT NULL,
                project TEXT NOT NULL,
                session_id TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                PRIMARY KEY (file_path, project)
            )
            "#,
            [],
        )?;

        // Pipeline artifacts: stage outputs consumed downstream
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id TEXT NOT NULL,
                stage_index INTEGER NOT NULL,
                artifact_type TEXT NOT NULL,
                artifact_path TEXT,
                artifact_content TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Circuit state: one row per breaker id
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS circuit_state (
                cb_id TEXT PRIMARY KEY,
                state TEXT NOT NULL DEFAULT 'closed',
                failure_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                current_threshold INTEGER NOT NULL,
                window_start TEXT NOT NULL,
                last_failure_at TEXT,
                last_success_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Findings: cross-session research notes
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                finding TEXT NOT NULL,
                relevant_to_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Checkpoints: resumable session snapshots with expiry
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                label TEXT NOT NULL,
                state_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                expires_at TEXT
            )
            "#,
            [],
        )?;

        // Feature workspaces: which session works which feature branch
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS feature_workspaces (
                feature TEXT NOT NULL,
                project TEXT NOT NULL,
                session_id TEXT NOT NULL,
                branch TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (feature, project)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_broadcasts_swarm ON broadcasts(swarm_id, created_at, id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_broadcasts_type ON broadcasts(swarm_id, broadcast_type)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agents_session ON agents(session_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_agent_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_heartbeat ON sessions(last_heartbeat)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_pipeline ON pipeline_artifacts(pipeline_id, stage_index)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_expiry ON checkpoints(expires_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_findings_topic ON findings(topic)",
            [],
        )?;

        tracing::info!(
            "coordination db initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }

    /// Row counts per table, for the health subcommand.
    pub fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.lock()?;
        let tables = [
            "sessions",
            "agents",
            "broadcasts",
            "file_claims",
            "pipeline_artifacts",
            "circuit_state",
            "findings",
            "checkpoints",
            "feature_workspaces",
        ];

        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            counts.push((table.to_string(), count));
        }
        Ok(counts)
    }
}
