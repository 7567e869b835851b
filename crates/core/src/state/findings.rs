//! # Findings
//!
//! Cross-session research notes: a session records what it learned about a
//! topic so later sessions can pick it up without re-deriving it.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// One research note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub session_id: String,
    pub topic: String,
    pub finding: String,
    #[serde(default)]
    pub relevant_to: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Manager for the findings table.
pub struct FindingStore {
    db: CoordDb,
}

impl FindingStore {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    pub fn record(
        &self,
        session_id: &str,
        topic: &str,
        finding: &str,
        relevant_to: &[String],
    ) -> Result<i64> {
        let conn = self.db.lock()?;

        conn.execute(
            r#"
            INSERT INTO findings (session_id, topic, finding, relevant_to_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session_id,
                topic,
                finding,
                serde_json::to_string(relevant_to)?,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to record finding")?;

        Ok(conn.last_insert_rowid())
    }

    /// Recent findings on a topic, newest first.
    pub fn by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Finding>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, topic, finding, relevant_to_json, created_at
            FROM findings
            WHERE topic = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;

        let findings = stmt
            .query_map(params![topic, limit as i64], |row| {
                Ok(Self::row_to_finding(row)?)
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list findings")?;

        Ok(findings)
    }

    fn row_to_finding(row: &rusqlite::Row) -> rusqlite::Result<Finding> {
        let relevant_to_json: String = row.get(4)?;
        let created_at_str: String = row.get(5)?;

        Ok(Finding {
            id: row.get(0)?,
            session_id: row.get(1)?,
            topic: row.get(2)?,
            finding: row.get(3)?,
            relevant_to: serde_json::from_str(&relevant_to_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
