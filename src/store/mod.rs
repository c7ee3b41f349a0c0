//! The relational store: owns `Meeting` and `Task` (SPEC_FULL.md §3).
//!
//! `MeetingStore` is the seam every pipeline stage programs against; the
//! concrete `PostgresMeetingStore` is the only implementation that talks to
//! a real database. Queries use sqlx's runtime-checked API (`query`/
//! `query_as` with explicit `.bind()` calls) rather than the `query!`
//! compile-time macro, since the macro requires a live database reachable
//! at build time and this crate is never built against one here.

mod postgres;

pub use postgres::PostgresMeetingStore;

use crate::domain::{Meeting, MeetingStatus, Segment, Task};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn find(&self, meeting_id: Uuid) -> Result<Option<Meeting>>;

    /// Sets status, clearing/filling `error_message` as appropriate, and
    /// bumps `updated_at`. Does not touch any other column.
    async fn set_status(
        &self,
        meeting_id: Uuid,
        status: MeetingStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Sets `transcribe_total`/`transcribe_done` (§4.1 step 7). Per the
    /// Open Question recorded in DESIGN.md, only `transcribe_total` is ever
    /// driven away from its default by this pipeline.
    async fn set_transcribe_progress(&self, meeting_id: Uuid, total: i32, done: i32) -> Result<()>;

    /// Persists the finalized transcript and segment list, and transitions
    /// status to `Transcribed` (§4.3 step 5) in a single call so the two
    /// never observably diverge.
    async fn complete_transcription(
        &self,
        meeting_id: Uuid,
        transcript: String,
        segments: Vec<Segment>,
    ) -> Result<()>;

    async fn set_summary(&self, meeting_id: Uuid, summary: String) -> Result<()>;

    async fn set_key_notes(
        &self,
        meeting_id: Uuid,
        key_notes: Vec<crate::domain::KeyNote>,
    ) -> Result<()>;

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<()>;

    /// Sets `summarize_total`/`summarize_done` (§4.4 step 1). Used as the
    /// completion barrier for the two fire-and-forget enrichment stages:
    /// `summarize_total` is set to 2 once, and each stage's completion bumps
    /// `summarize_done` via `increment_summarize_done` — when it reaches the
    /// total, the meeting advances to `completed` (§4.3: "`completed` is
    /// reached once both key-note extraction and task extraction have
    /// persisted their results").
    async fn set_summarize_progress(&self, meeting_id: Uuid, total: i32, done: i32) -> Result<()>;

    /// Atomically increments `summarize_done` and returns its new value.
    async fn increment_summarize_done(&self, meeting_id: Uuid) -> Result<i32>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory `MeetingStore` used by pipeline-stage unit tests and by
    //! the cross-stage integration tests under `tests/`. Mirrors this
    //! codebase's existing `MockTranscriber` shape: shared interior state
    //! behind a `Mutex`, no I/O.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct FakeMeetingStore {
        meetings: Mutex<HashMap<Uuid, Meeting>>,
        tasks: Mutex<Vec<Task>>,
    }

    impl FakeMeetingStore {
        pub fn new() -> Self {
            FakeMeetingStore {
                meetings: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }
        }

        pub fn insert(&self, meeting: Meeting) {
            self.meetings.lock().unwrap().insert(meeting.id, meeting);
        }

        pub fn tasks_for(&self, meeting_id: Uuid) -> Vec<Task> {
            self.tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.meeting_id == meeting_id)
                .cloned()
                .collect()
        }
    }

    impl Default for FakeMeetingStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl MeetingStore for FakeMeetingStore {
        async fn find(&self, meeting_id: Uuid) -> Result<Option<Meeting>> {
            Ok(self.meetings.lock().unwrap().get(&meeting_id).cloned())
        }

        async fn set_status(
            &self,
            meeting_id: Uuid,
            status: MeetingStatus,
            error_message: Option<String>,
        ) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.status = status;
            meeting.error_message = error_message;
            meeting.updated_at = chrono::Utc::now();
            Ok(())
        }

        async fn set_transcribe_progress(
            &self,
            meeting_id: Uuid,
            total: i32,
            done: i32,
        ) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.progress.transcribe_total = total;
            meeting.progress.transcribe_done = done;
            Ok(())
        }

        async fn complete_transcription(
            &self,
            meeting_id: Uuid,
            transcript: String,
            segments: Vec<Segment>,
        ) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.transcript = Some(transcript);
            meeting.segments = Some(segments);
            meeting.status = MeetingStatus::Transcribed;
            meeting.updated_at = chrono::Utc::now();
            Ok(())
        }

        async fn set_summary(&self, meeting_id: Uuid, summary: String) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.summary = Some(summary);
            meeting.status = MeetingStatus::Summarized;
            Ok(())
        }

        async fn set_key_notes(
            &self,
            meeting_id: Uuid,
            key_notes: Vec<crate::domain::KeyNote>,
        ) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.key_notes = Some(key_notes);
            Ok(())
        }

        async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
            self.tasks.lock().unwrap().extend_from_slice(tasks);
            Ok(())
        }

        async fn set_summarize_progress(&self, meeting_id: Uuid, total: i32, done: i32) -> Result<()> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.progress.summarize_total = total;
            meeting.progress.summarize_done = done;
            Ok(())
        }

        async fn increment_summarize_done(&self, meeting_id: Uuid) -> Result<i32> {
            let mut meetings = self.meetings.lock().unwrap();
            let meeting = meetings
                .get_mut(&meeting_id)
                .ok_or(crate::error::PipelineError::NotFound(meeting_id))?;
            meeting.progress.summarize_done += 1;
            Ok(meeting.progress.summarize_done)
        }
    }
}
