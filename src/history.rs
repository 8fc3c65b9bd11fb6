// Session history ledger in SQLite. Written from booth events; failures here
// are logged by the caller and never affect a running session.

use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::HistoryError;
use crate::session::{ReprintSource, SessionEvent, SessionOutcome};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub shot_count: i64,
    pub captured_count: i64,
    pub composed_path: Option<String>,
    pub outcome: String,
    pub copies_printed: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), HistoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| HistoryError::Migration(e.to_string()))
}

/// Apply one booth event to the ledger.
pub async fn record(pool: &SqlitePool, event: &SessionEvent) -> Result<(), HistoryError> {
    let now = Utc::now().to_rfc3339();

    match event {
        SessionEvent::Started {
            session_id,
            shot_count,
        } => {
            sqlx::query(
                r#"
                INSERT INTO session (id, shot_count, outcome, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    shot_count = excluded.shot_count,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(session_id)
            .bind(*shot_count as i64)
            .bind(SessionOutcome::Captured.as_str())
            .bind(&now)
            .execute(pool)
            .await?;
        }
        SessionEvent::Finished {
            session_id,
            captured_count,
            composed_path,
            outcome,
        } => {
            sqlx::query(
                r#"
                UPDATE session SET
                    captured_count = ?2,
                    composed_path = ?3,
                    outcome = ?4,
                    updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(session_id)
            .bind(*captured_count as i64)
            .bind(composed_path.as_ref().map(|p| p.display().to_string()))
            .bind(outcome.as_str())
            .bind(&now)
            .execute(pool)
            .await?;
        }
        SessionEvent::Discarded { session_id } => {
            sqlx::query(
                r#"
                UPDATE session SET outcome = ?2, updated_at = ?3
                WHERE id = ?1 AND outcome = ?4
                "#,
            )
            .bind(session_id)
            .bind(SessionOutcome::Discarded.as_str())
            .bind(&now)
            .bind(SessionOutcome::Composed.as_str())
            .execute(pool)
            .await?;
        }
        SessionEvent::Printed {
            session_id,
            copies,
            success,
        } => {
            let (outcome, added) = if *success {
                (SessionOutcome::Printed, *copies as i64)
            } else {
                (SessionOutcome::PrintFailed, 0)
            };
            sqlx::query(
                r#"
                UPDATE session SET
                    outcome = ?2,
                    copies_printed = copies_printed + ?3,
                    updated_at = ?4
                WHERE id = ?1
                "#,
            )
            .bind(session_id)
            .bind(outcome.as_str())
            .bind(added)
            .bind(&now)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Most recent sessions first.
pub async fn recent(pool: &SqlitePool, limit: u32) -> Result<Vec<SessionRecord>, HistoryError> {
    let records = sqlx::query_as::<_, SessionRecord>(
        r#"
        SELECT
            id, shot_count, captured_count, composed_path, outcome,
            copies_printed, created_at, updated_at
        FROM session
        ORDER BY created_at DESC, id DESC
        LIMIT ?1
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Latest composed print whose file is still on disk.
pub async fn last_printable(pool: &SqlitePool) -> Result<Option<ReprintSource>, HistoryError> {
    let candidates: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT id, composed_path
        FROM session
        WHERE composed_path IS NOT NULL AND outcome != ?1
        ORDER BY created_at DESC, id DESC
        LIMIT 10
        "#,
    )
    .bind(SessionOutcome::Error.as_str())
    .fetch_all(pool)
    .await?;

    Ok(candidates
        .into_iter()
        .map(|(session_id, path)| ReprintSource {
            session_id,
            path: PathBuf::from(path),
        })
        .find(|source| source.path.is_file()))
}

/// Drain booth events into the ledger until the sender side closes.
pub async fn run_writer(pool: SqlitePool, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match record(&pool, &event).await {
            Ok(()) => debug!("Recorded {:?}", event),
            Err(e) => warn!("Failed to record session history: {}", e),
        }
    }
    debug!("History writer stopped");
}
