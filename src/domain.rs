//! Core data model shared by every worker role: `Meeting` and `Task` are
//! persistent (owned by the meeting store); `ChunkResult` is cache-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A meeting's position in the pipeline state machine. Values match the
/// relational store's native enum exactly, including the legacy
/// `summarized`/`transcribe_failed`/`summarize_failed` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "meeting_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Created,
    Processing,
    Transcribing,
    Transcribed,
    TranscribeFailed,
    Summarizing,
    Summarized,
    SummarizeFailed,
    Completed,
}

impl MeetingStatus {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MeetingStatus::Completed
                | MeetingStatus::TranscribeFailed
                | MeetingStatus::SummarizeFailed
        )
    }

    /// The dispatcher accepts only these two starting points (§4.1).
    pub fn can_dispatch_transcription(self) -> bool {
        matches!(
            self,
            MeetingStatus::Processing | MeetingStatus::TranscribeFailed
        )
    }

    /// A meeting has already cleared the merge barrier once it reaches this
    /// status or anything past it; used by the merger's idempotence check.
    pub fn is_at_or_past_transcribed(self) -> bool {
        !matches!(
            self,
            MeetingStatus::Created | MeetingStatus::Processing | MeetingStatus::Transcribing
        )
    }
}

/// Priority an extracted action item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

/// Status of an extracted action item, independent of meeting status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Category a key note is classified under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NoteCategory {
    Decision,
    Task,
    KeyPoint,
    Risk,
    Question,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyNote {
    pub category: NoteCategory,
    pub note: String,
}

/// A `(start, end, text)` triple produced by a transcription provider.
/// Timestamps are chunk-local until offset-adjusted by the chunk worker
/// (§4.2 step 3), after which they are global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    /// Construct a segment, trimming text and validating the invariants
    /// from §3: non-negative start, end >= start, non-empty trimmed text.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if start < 0.0 || end < start || trimmed.is_empty() {
            return None;
        }
        Some(Segment {
            start,
            end,
            text: trimmed.to_string(),
        })
    }

    /// Offset adjustment (§4.2 step 3, GLOSSARY): add the chunk's global
    /// start time to a chunk-local segment.
    pub fn offset_by(&self, offset_seconds: f64) -> Segment {
        Segment {
            start: self.start + offset_seconds,
            end: self.end + offset_seconds,
            text: self.text.clone(),
        }
    }
}

/// Progress counters tracked on a meeting. `transcribe_done`/`summarize_done`
/// are part of the schema but, per the Open Question in SPEC_FULL.md §9,
/// are never incremented by this pipeline — preserved as-is from the source
/// system rather than wired up speculatively.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub transcribe_total: i32,
    pub transcribe_done: i32,
    pub summarize_total: i32,
    pub summarize_done: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: String,
    pub duration_seconds: Option<f64>,
    pub status: MeetingStatus,
    pub transcript: Option<String>,
    pub segments: Option<Vec<Segment>>,
    pub summary: Option<String>,
    pub key_notes: Option<Vec<KeyNote>>,
    pub progress: ProgressCounters,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// §3 invariant: `transcribe_done <= transcribe_total` at every commit.
    pub fn progress_invariant_holds(&self) -> bool {
        self.progress.transcribe_done <= self.progress.transcribe_total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    /// Free-text, not a structured date: the source system never parses
    /// this field either (see SPEC_FULL.md §3).
    pub due_date: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Outcome of transcribing a single chunk, as stored in the cache keyed by
/// `chunks:<meeting_id>:<chunk_id>` (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: i32,
    pub status: ChunkStatus,
    pub error: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Success,
    Failed,
}

impl ChunkResult {
    pub fn success(chunk_id: i32, segments: Vec<Segment>) -> Self {
        ChunkResult {
            chunk_id,
            status: ChunkStatus::Success,
            error: None,
            segments,
        }
    }

    pub fn failed(chunk_id: i32, error: impl Into<String>) -> Self {
        ChunkResult {
            chunk_id,
            status: ChunkStatus::Failed,
            error: Some(error.into()),
            segments: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChunkStatus::Success
    }
}
