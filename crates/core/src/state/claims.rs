//! # File Claim Arbiter
//!
//! Project-scoped exclusive locks on file paths with TTL. Take-over is a
//! single conditional upsert that returns the stored owner, so two racing
//! sessions resolve in the database: exactly one sees its own id come back.
//! Expired claims are transparently taken over by the same statement.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Default claim lifetime when the caller does not specify one.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 1800;

/// A stored claim row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileClaim {
    pub file_path: String,
    pub project: String,
    pub session_id: String,
    pub claimed_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl FileClaim {
    /// A claim is live while `now - claimed_at <= ttl`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        (now - self.claimed_at).num_seconds() <= self.ttl_seconds
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub owned: bool,
    pub owner: String,
}

/// Result of a claim check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClaimStatus {
    Free { claimed: bool },
    Held { claimed: bool, by: String },
}

impl ClaimStatus {
    fn free() -> Self {
        Self::Free { claimed: false }
    }

    fn held(by: String) -> Self {
        Self::Held { claimed: true, by }
    }
}

/// Manager for the file_claims table.
pub struct FileClaimArbiter {
    db: CoordDb,
}

impl FileClaimArbiter {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Attempt to claim a file for a session.
    ///
    /// The upsert's conditional arm fires only when the requester already
    /// owns the claim (refresh) or the stored claim has outlived its TTL
    /// (take-over). A live claim by another session leaves the row untouched
    /// and the current owner is reported back.
    pub fn claim(
        &self,
        file_path: &str,
        project: &str,
        session_id: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<ClaimOutcome> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();
        let ttl = ttl_seconds.unwrap_or(DEFAULT_CLAIM_TTL_SECS);

        let stored: Option<String> = conn
            .query_row(
                r#"
                INSERT INTO file_claims (file_path, project, session_id, claimed_at, ttl_seconds)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(file_path, project) DO UPDATE SET
                    session_id = excluded.session_id,
                    claimed_at = excluded.claimed_at,
                    ttl_seconds = excluded.ttl_seconds
                WHERE file_claims.session_id = excluded.session_id
                   OR (julianday(excluded.claimed_at) - julianday(file_claims.claimed_at)) * 86400.0
                      > CAST(file_claims.ttl_seconds AS REAL)
                RETURNING session_id
                "#,
                params![file_path, project, session_id, now, ttl],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("Failed to claim file")?;

        match stored {
            Some(owner) => Ok(ClaimOutcome {
                owned: owner == session_id,
                owner,
            }),
            // Conflict with a live claim held by someone else
            None => {
                let owner: String = conn.query_row(
                    "SELECT session_id FROM file_claims WHERE file_path = ?1 AND project = ?2",
                    params![file_path, project],
                    |row| row.get(0),
                )?;
                Ok(ClaimOutcome {
                    owned: false,
                    owner,
                })
            }
        }
    }

    /// Check whether someone other than `me` holds a live claim.
    pub fn check(&self, file_path: &str, project: &str, me: &str) -> Result<ClaimStatus> {
        let claim = self.get(file_path, project)?;

        match claim {
            Some(claim) if claim.is_live(Utc::now()) && claim.session_id != me => {
                Ok(ClaimStatus::held(claim.session_id))
            }
            _ => Ok(ClaimStatus::free()),
        }
    }

    /// Release a claim. Deletes only when `session_id` is the owner.
    pub fn release(&self, file_path: &str, project: &str, session_id: &str) -> Result<bool> {
        let conn = self.db.lock()?;

        let affected = conn.execute(
            "DELETE FROM file_claims WHERE file_path = ?1 AND project = ?2 AND session_id = ?3",
            params![file_path, project, session_id],
        )?;

        Ok(affected > 0)
    }

    /// Load one claim row regardless of liveness.
    pub fn get(&self, file_path: &str, project: &str) -> Result<Option<FileClaim>> {
        let conn = self.db.lock()?;

        let claim = conn
            .query_row(
                r#"
                SELECT file_path, project, session_id, claimed_at, ttl_seconds
                FROM file_claims
                WHERE file_path = ?1 AND project = ?2
                "#,
                params![file_path, project],
                |row| Ok(Self::row_to_claim(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(claim)
    }

    /// Live claims held by other sessions in a project, for contention
    /// warnings in the cross-session awareness hook.
    pub fn list_live_by_others(&self, project: &str, me: &str) -> Result<Vec<FileClaim>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT file_path, project, session_id, claimed_at, ttl_seconds
            FROM file_claims
            WHERE project = ?1 AND session_id != ?2
            ORDER BY claimed_at DESC
            "#,
        )?;

        let now = Utc::now();
        let claims = stmt
            .query_map(params![project, me], |row| Ok(Self::row_to_claim(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list claims")?
            .into_iter()
            .filter(|c| c.is_live(now))
            .collect();

        Ok(claims)
    }

    /// Drop rows whose TTL has elapsed. Returns the number removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            r#"
            DELETE FROM file_claims
            WHERE (julianday(?1) - julianday(claimed_at)) * 86400.0 > CAST(ttl_seconds AS REAL)
            "#,
            params![now],
        )?;

        Ok(affected)
    }

    fn row_to_claim(row: &rusqlite::Row) -> rusqlite::Result<FileClaim> {
        let claimed_at_str: String = row.get(3)?;

        Ok(FileClaim {
            file_path: row.get(0)?,
            project: row.get(1)?,
            session_id: row.get(2)?,
            claimed_at: DateTime::parse_from_rfc3339(&claimed_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            ttl_seconds: row.get(4)?,
        })
    }
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
    fn test_claim_race_has_one_winner() {
        let path = ".waggle/test_claims_race.db";
        let db = open_db(path);
        let arbiter = FileClaimArbiter::new(&db);

        let first = arbiter.claim("src/x.py", "p", "S1", None).unwrap();
        assert!(first.owned);
        assert_eq!(first.owner, "S1");

        let second = arbiter.claim("src/x.py", "p", "S2", None).unwrap();
        assert!(!second.owned);
        assert_eq!(second.owner, "S1");

        // The loser sees the winner on check
        let status = arbiter.check("src/x.py", "p", "S2").unwrap();
        assert_eq!(
            status,
            ClaimStatus::Held {
                claimed: true,
                by: "S1".to_string()
            }
        );

        // The owner sees it as free for itself
        let status = arbiter.check("src/x.py", "p", "S1").unwrap();
        assert_eq!(status, ClaimStatus::Free { claimed: false });

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_expired_claim_is_taken_over() {
        let path = ".waggle/test_claims_ttl.db";
        let db = open_db(path);
        let arbiter = FileClaimArbiter::new(&db);

        // S1 claims with a TTL that is already in the past
        arbiter.claim("src/x.py", "p", "S1", Some(1)).unwrap();
        {
            let conn = db.lock().unwrap();
            let stale = (Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
            conn.execute(
                "UPDATE file_claims SET claimed_at = ?1 WHERE file_path = 'src/x.py'",
                params![stale],
            )
            .unwrap();
        }

        let takeover = arbiter.claim("src/x.py", "p", "S2", None).unwrap();
        assert!(takeover.owned);
        assert_eq!(takeover.owner, "S2");

        let status = arbiter.check("src/x.py", "p", "S1").unwrap();
        assert_eq!(
            status,
            ClaimStatus::Held {
                claimed: true,
                by: "S2".to_string()
            }
        );

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_owner_refresh_keeps_claim() {
        let path = ".waggle/test_claims_refresh.db";
        let db = open_db(path);
        let arbiter = FileClaimArbiter::new(&db);

        arbiter.claim("a.rs", "p", "S1", Some(600)).unwrap();
        let refreshed = arbiter.claim("a.rs", "p", "S1", Some(900)).unwrap();
        assert!(refreshed.owned);

        let claim = arbiter.get("a.rs", "p").unwrap().unwrap();
        assert_eq!(claim.ttl_seconds, 900);

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_release_checks_ownership() {
        let path = ".waggle/test_claims_release.db";
        let db = open_db(path);
        let arbiter = FileClaimArbiter::new(&db);

        arbiter.claim("a.rs", "p", "S1", None).unwrap();

        // Non-owner cannot release
        assert!(!arbiter.release("a.rs", "p", "S2").unwrap());
        assert!(arbiter.get("a.rs", "p").unwrap().is_some());

        assert!(arbiter.release("a.rs", "p", "S1").unwrap());
        assert!(arbiter.get("a.rs", "p").unwrap().is_none());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_sweep_expired() {
        let path = ".waggle/test_claims_sweep.db";
        let db = open_db(path);
        let arbiter = FileClaimArbiter::new(&db);

        arbiter.claim("a.rs", "p", "S1", Some(600)).unwrap();
        arbiter.claim("b.rs", "p", "S1", Some(1)).unwrap();
        {
            let conn = db.lock().unwrap();
            let stale = (Utc::now() - chrono::Duration::seconds(120)).to_rfc3339();
            conn.execute(
                "UPDATE file_claims SET claimed_at = ?1 WHERE file_path = 'b.rs'",
                params![stale],
            )
            .unwrap();
        }

        assert_eq!(arbiter.sweep_expired().unwrap(), 1);
        assert!(arbiter.get("a.rs", "p").unwrap().is_some());
        assert!(arbiter.get("b.rs", "p").unwrap().is_none());

        drop(db);
        let _ = fs::remove_file(path);
    }
}
