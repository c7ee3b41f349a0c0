//! Message payloads for each queue/routing-key pair in SPEC_FULL.md §6.
//! JSON-serialized on the wire, matching the broker's declared contract.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const QUEUE_TRANSCRIBE: &str = "audio.transcribe";
pub const QUEUE_SUMMARIZE: &str = "audio.summarize";

pub const ROUTING_TRANSCRIBE_START: &str = "audio.transcribe.start";
pub const ROUTING_TRANSCRIBE_CHUNK: &str = "audio.transcribe.chunk";
pub const ROUTING_TRANSCRIBE_MERGE: &str = "audio.transcribe.merge";
pub const ROUTING_SUMMARIZE_GENERATE: &str = "audio.summarize.generate";
pub const ROUTING_EXTRACT_KEY_NOTES: &str = "extract_key_notes_task";
pub const ROUTING_GENERATE_TASKS: &str = "generate_tasks_task";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTranscribeMessage {
    pub meeting_id: Uuid,
    pub audio_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub meeting_id: Uuid,
    pub chunk_id: i32,
    pub chunk_path: String,
    pub total_chunks: i32,
    pub offset_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeMessage {
    pub meeting_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeMessage {
    pub meeting_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractKeyNotesMessage {
    pub meeting_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateTasksMessage {
    pub meeting_id: Uuid,
}

/// Deterministic message id for a chunk message (§4.1 step 8, §6).
pub fn chunk_message_id(meeting_id: Uuid, chunk_id: i32) -> String {
    format!("chunk_{meeting_id}_{chunk_id}")
}

/// Deterministic message id for a merge message (§4.2 step 6, §6). Two
/// chunk workers racing to finish last both compute the same id.
pub fn merge_message_id(meeting_id: Uuid) -> String {
    format!("merge_{meeting_id}")
}
