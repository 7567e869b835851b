//! # Pipeline Artifacts
//!
//! Stage outputs persisted between pipeline agents. A later stage reads
//! everything upstream of its own index, ordered by stage then recency.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// One persisted stage output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub id: i64,
    pub pipeline_id: String,
    pub stage_index: i64,
    pub artifact_type: String,
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub artifact_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Manager for the pipeline_artifacts table.
pub struct ArtifactStore {
    db: CoordDb,
}

impl ArtifactStore {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Persist a stage output. Either a path or literal content (or both).
    pub fn record(
        &self,
        pipeline_id: &str,
        stage_index: i64,
        artifact_type: &str,
        artifact_path: Option<&str>,
        artifact_content: Option<&str>,
    ) -> Result<i64> {
        let conn = self.db.lock()?;

        conn.execute(
            r#"
            INSERT INTO pipeline_artifacts
                (pipeline_id, stage_index, artifact_type, artifact_path, artifact_content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                pipeline_id,
                stage_index,
                artifact_type,
                artifact_path,
                artifact_content,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to record pipeline artifact")?;

        Ok(conn.last_insert_rowid())
    }

    /// Artifacts from stages strictly before `stage_index`, ordered by
    /// `(stage_index asc, created_at desc)` so each stage's newest output
    /// leads its group.
    pub fn upstream_of(&self, pipeline_id: &str, stage_index: i64) -> Result<Vec<PipelineArtifact>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, pipeline_id, stage_index, artifact_type, artifact_path, artifact_content, created_at
            FROM pipeline_artifacts
            WHERE pipeline_id = ?1 AND stage_index < ?2
            ORDER BY stage_index ASC, created_at DESC, id DESC
            "#,
        )?;

        let artifacts = stmt
            .query_map(params![pipeline_id, stage_index], |row| {
                Ok(Self::row_to_artifact(row)?)
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read upstream artifacts")?;

        Ok(artifacts)
    }

    /// Distinct stage indexes that have produced at least one artifact.
    pub fn stages_with_output(&self, pipeline_id: &str) -> Result<Vec<i64>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT stage_index FROM pipeline_artifacts
            WHERE pipeline_id = ?1
            ORDER BY stage_index ASC
            "#,
        )?;

        let stages = stmt
            .query_map(params![pipeline_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list producing stages")?;

        Ok(stages)
    }

    fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<PipelineArtifact> {
        let created_at_str: String = row.get(6)?;

        Ok(PipelineArtifact {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            stage_index: row.get(2)?,
            artifact_type: row.get(3)?,
            artifact_path: row.get(4)?,
            artifact_content: row.get(5)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
