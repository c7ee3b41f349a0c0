use super::MeetingStore;
use crate::domain::{KeyNote, Meeting, MeetingStatus, Segment, Task};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

/// `MeetingStore` backed by Postgres via `sqlx`. One short-lived connection
/// is borrowed from the pool per call, matching the "each worker opens its
/// own short-lived session per task" policy (SPEC_FULL.md §5).
#[derive(Clone)]
pub struct PostgresMeetingStore {
    pool: PgPool,
}

impl PostgresMeetingStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(PostgresMeetingStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PostgresMeetingStore { pool }
    }

    fn row_to_meeting(row: &sqlx::postgres::PgRow) -> std::result::Result<Meeting, sqlx::Error> {
        let segments_json: Option<serde_json::Value> = row.try_get("segments")?;
        let key_notes_json: Option<serde_json::Value> = row.try_get("key_notes")?;
        Ok(Meeting {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            audio_url: row.try_get("audio_url")?,
            duration_seconds: row.try_get("duration_seconds")?,
            status: row.try_get("status")?,
            transcript: row.try_get("transcript")?,
            segments: segments_json.and_then(|v| serde_json::from_value(v).ok()),
            summary: row.try_get("summary")?,
            key_notes: key_notes_json.and_then(|v| serde_json::from_value(v).ok()),
            progress: crate::domain::ProgressCounters {
                transcribe_total: row.try_get("transcribe_total")?,
                transcribe_done: row.try_get("transcribe_done")?,
                summarize_total: row.try_get("summarize_total")?,
                summarize_done: row.try_get("summarize_done")?,
            },
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MeetingStore for PostgresMeetingStore {
    async fn find(&self, meeting_id: Uuid) -> Result<Option<Meeting>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, title, description, audio_url, duration_seconds,
                   status, transcript, segments, summary, key_notes,
                   transcribe_total, transcribe_done, summarize_total, summarize_done,
                   error_message, created_at, updated_at
            FROM meetings
            WHERE id = $1
            "#,
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_meeting(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        meeting_id: Uuid,
        status: MeetingStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE meetings
            SET status = $1, error_message = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(error_message)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::PipelineError::NotFound(meeting_id));
        }
        Ok(())
    }

    async fn set_transcribe_progress(&self, meeting_id: Uuid, total: i32, done: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meetings
            SET transcribe_total = $1, transcribe_done = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(total)
        .bind(done)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_transcription(
        &self,
        meeting_id: Uuid,
        transcript: String,
        segments: Vec<Segment>,
    ) -> Result<()> {
        let segments_json = serde_json::to_value(&segments)?;
        sqlx::query(
            r#"
            UPDATE meetings
            SET transcript = $1, segments = $2, status = $3, updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(transcript)
        .bind(segments_json)
        .bind(MeetingStatus::Transcribed)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_summary(&self, meeting_id: Uuid, summary: String) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meetings
            SET summary = $1, status = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(summary)
        .bind(MeetingStatus::Summarized)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_key_notes(&self, meeting_id: Uuid, key_notes: Vec<KeyNote>) -> Result<()> {
        let key_notes_json = serde_json::to_value(&key_notes)?;
        sqlx::query(
            r#"
            UPDATE meetings
            SET key_notes = $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(key_notes_json)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, meeting_id, title, description, assignee, due_date, priority, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(task.id)
            .bind(task.meeting_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(&task.assignee)
            .bind(&task.due_date)
            .bind(task.priority)
            .bind(task.status)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_summarize_progress(&self, meeting_id: Uuid, total: i32, done: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE meetings
            SET summarize_total = $1, summarize_done = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(total)
        .bind(done)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_summarize_done(&self, meeting_id: Uuid) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE meetings
            SET summarize_done = summarize_done + 1, updated_at = now()
            WHERE id = $1
            RETURNING summarize_done
            "#,
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;

        Ok(row.try_get("summarize_done")?)
    }
}
