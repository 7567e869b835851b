//! # Adaptive Circuit Breaker State
//!
//! One row per breaker id, updated by a single transactional
//! read-modify-write per classified tool outcome. The threshold adapts to
//! the observed failure rate inside a sliding window; the state machine is
//! closed → open on threshold breach, open → half-open on a success, and
//! half-open → closed on a further success, which also starts a fresh
//! window (any failure while half-open reopens). Recovery is strictly
//! success-driven: there is no timed re-test from open.
//!
//! Adaptation needs a meaningful rate, so the threshold is recomputed only
//! once the window holds both outcome kinds; a cold window of straight
//! failures trips at the configured threshold unchanged. Downward steps
//! floor and upward steps ceil so the threshold can actually reach both
//! bounds through integer arithmetic.

use super::db::CoordDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};
use serde::{Deserialize, Serialize};

/// Breaker lifecycle phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitPhase {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "half-open" => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Classified result of a monitored tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Tuning knobs, overridable per breaker via `CB_*` environment variables.
#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
    pub initial_threshold: i64,
    pub min_threshold: i64,
    pub max_threshold: i64,
    pub adaptation_rate: f64,
    pub window_secs: i64,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            initial_threshold: 3,
            min_threshold: 1,
            max_threshold: 10,
            adaptation_rate: 0.2,
            window_secs: 60,
        }
    }
}

/// One breaker row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub cb_id: String,
    pub state: CircuitPhase,
    pub failure_count: i64,
    pub success_count: i64,
    pub current_threshold: i64,
    pub window_start: DateTime<Utc>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CircuitState {
    fn fresh(cb_id: &str, params: &BreakerParams, now: DateTime<Utc>) -> Self {
        Self {
            cb_id: cb_id.to_string(),
            state: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            current_threshold: params.initial_threshold,
            window_start: now,
            last_failure_at: None,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Failure share of the current window, or `None` while the window is
    /// empty.
    pub fn failure_rate(&self) -> Option<f64> {
        let total = self.failure_count + self.success_count;
        if total == 0 {
            None
        } else {
            Some(self.failure_count as f64 / total as f64)
        }
    }

    /// Human-readable summary for the coordinator's Stop message.
    pub fn summary(&self) -> String {
        let rate = self
            .failure_rate()
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        let last_failure = self
            .last_failure_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let last_success = self
            .last_success_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        format!(
            "Circuit '{}': state={}, failures={}, successes={}, failure_rate={}, \
             adaptive_threshold={}, last_failure={}, last_success={}",
            self.cb_id,
            self.state.as_str(),
            self.failure_count,
            self.success_count,
            rate,
            self.current_threshold,
            last_failure,
            last_success,
        )
    }
}

/// Recompute the adaptive threshold after an outcome has been counted.
///
/// The window must contain both failures and successes for the rate to mean
/// anything; otherwise the threshold is left alone.
pub fn recompute_threshold(
    current: i64,
    failures: i64,
    successes: i64,
    params: &BreakerParams,
) -> i64 {
    if failures == 0 || successes == 0 {
        return current.clamp(params.min_threshold, params.max_threshold);
    }

    let rate = failures as f64 / (failures + successes) as f64;
    let current_f = current as f64;

    let new = if rate > 0.5 {
        (current_f - params.adaptation_rate * current_f).floor()
    } else {
        (current_f + params.adaptation_rate * (1.0 - rate) * current_f).ceil()
    };

    (new as i64).clamp(params.min_threshold, params.max_threshold)
}

/// Apply one classified outcome to a breaker state. Pure; the store wraps
/// this in a transaction.
pub fn apply_outcome(
    mut state: CircuitState,
    outcome: Outcome,
    now: DateTime<Utc>,
    params: &BreakerParams,
) -> CircuitState {
    // Expired window: start counting fresh before applying the update
    if (now - state.window_start).num_seconds() > params.window_secs {
        state.failure_count = 0;
        state.success_count = 0;
        state.window_start = now;
    }

    match outcome {
        Outcome::Failure => {
            state.failure_count += 1;
            state.last_failure_at = Some(now);
            state.current_threshold = recompute_threshold(
                state.current_threshold,
                state.failure_count,
                state.success_count,
                params,
            );

            state.state = match state.state {
                CircuitPhase::Closed if state.failure_count >= state.current_threshold => {
                    CircuitPhase::Open
                }
                CircuitPhase::Closed => CircuitPhase::Closed,
                CircuitPhase::HalfOpen => CircuitPhase::Open,
                CircuitPhase::Open => CircuitPhase::Open,
            };
        }
        Outcome::Success => {
            state.success_count += 1;
            state.last_success_at = Some(now);
            state.current_threshold = recompute_threshold(
                state.current_threshold,
                state.failure_count,
                state.success_count,
                params,
            );

            state.state = match state.state {
                CircuitPhase::Open => CircuitPhase::HalfOpen,
                CircuitPhase::HalfOpen => {
                    // Recovery starts a fresh window; the next incident
                    // trips at the configured threshold, not an inherited
                    // failure rate
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.window_start = now;
                    CircuitPhase::Closed
                }
                CircuitPhase::Closed => CircuitPhase::Closed,
            };
        }
    }

    state.updated_at = now;
    state
}

/// Manager for the circuit_state table.
pub struct CircuitStore {
    db: CoordDb,
}

impl CircuitStore {
    pub fn new(db: &CoordDb) -> Self {
        Self { db: db.clone() }
    }

    /// Record one outcome in a single transaction and return the updated
    /// state. Creates the row with the configured initial threshold on the
    /// breaker's first event.
    pub fn apply(
        &self,
        cb_id: &str,
        outcome: Outcome,
        params: &BreakerParams,
    ) -> Result<CircuitState> {
        let mut conn = self.db.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin circuit transaction")?;
        let now = Utc::now();

        let current = tx
            .query_row(
                r#"
                SELECT cb_id, state, failure_count, success_count, current_threshold,
                       window_start, last_failure_at, last_success_at, created_at, updated_at
                FROM circuit_state WHERE cb_id = ?1
                "#,
                params![cb_id],
                |row| Ok(Self::row_to_state(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
            .unwrap_or_else(|| CircuitState::fresh(cb_id, params, now));

        let updated = apply_outcome(current, outcome, now, params);

        tx.execute(
            r#"
            INSERT INTO circuit_state (cb_id, state, failure_count, success_count,
                                       current_threshold, window_start, last_failure_at,
                                       last_success_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(cb_id) DO UPDATE SET
                state = excluded.state,
                failure_count = excluded.failure_count,
                success_count = excluded.success_count,
                current_threshold = excluded.current_threshold,
                window_start = excluded.window_start,
                last_failure_at = excluded.last_failure_at,
                last_success_at = excluded.last_success_at,
                updated_at = excluded.updated_at
            "#,
            params![
                updated.cb_id,
                updated.state.as_str(),
                updated.failure_count,
                updated.success_count,
                updated.current_threshold,
                updated.window_start.to_rfc3339(),
                updated.last_failure_at.map(|t| t.to_rfc3339()),
                updated.last_success_at.map(|t| t.to_rfc3339()),
                updated.created_at.to_rfc3339(),
                updated.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to persist circuit state")?;

        tx.commit()?;
        Ok(updated)
    }

    /// Load a breaker's current state.
    pub fn get(&self, cb_id: &str) -> Result<Option<CircuitState>> {
        let conn = self.db.lock()?;

        let state = conn
            .query_row(
                r#"
                SELECT cb_id, state, failure_count, success_count, current_threshold,
                       window_start, last_failure_at, last_success_at, created_at, updated_at
                FROM circuit_state WHERE cb_id = ?1
                "#,
                params![cb_id],
                |row| Ok(Self::row_to_state(row)?),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(state)
    }

    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<CircuitState> {
        let state: String = row.get(1)?;
        let window_start_str: String = row.get(5)?;
        let last_failure_str: Option<String> = row.get(6)?;
        let last_success_str: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        Ok(CircuitState {
            cb_id: row.get(0)?,
            state: CircuitPhase::from_str(&state),
            failure_count: row.get(2)?,
            success_count: row.get(3)?,
            current_threshold: row.get(4)?,
            window_start: parse_ts(&window_start_str),
            last_failure_at: last_failure_str.as_deref().map(parse_ts),
            last_success_at: last_success_str.as_deref().map(parse_ts),
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
