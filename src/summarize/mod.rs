//! Map-reduce summarization and best-effort structured extraction
//! (SPEC_FULL.md §4.4). Prompt template content itself is treated as an
//! opaque detail (§1 Non-goals: "LLM prompt content"); what's specified
//! here is the control flow around it — when to map-then-reduce, and how
//! to degrade a malformed LLM response into an empty result rather than a
//! failure.

use crate::domain::{KeyNote, NoteCategory, Task, TaskPriority, TaskStatus};
use crate::error::Result;
use crate::llm::LlmClient;
use tracing::warn;
use uuid::Uuid;

/// Splits `text` into fixed-size character slices of at most `chunk_size`
/// characters each (§4.4 step 2: `[T[0:S], T[S:2S], ...]`).
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|slice| slice.iter().collect())
        .collect()
}

fn single_chunk_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following meeting transcript in clear prose:\n\n{transcript}"
    )
}

fn map_prompt(slice: &str) -> String {
    format!("Summarize this portion of a meeting transcript:\n\n{slice}")
}

fn reduce_prompt(partials: &[String]) -> String {
    format!(
        "Combine these partial summaries of one meeting into a single coherent summary:\n\n{}",
        partials.join("\n\n")
    )
}

/// Produces the meeting summary per §4.4 step 2: single-chunk prompt when
/// the transcript fits within `summary_chunk_size`, otherwise map each
/// fixed-size slice then always reduce the partials (even for exactly two
/// chunks — "the reduce step is always executed when |chunks| > 1").
pub async fn summarize_transcript(
    llm: &dyn LlmClient,
    transcript: &str,
    summary_chunk_size: usize,
) -> Result<String> {
    if transcript.chars().count() <= summary_chunk_size {
        return llm.generate(&single_chunk_prompt(transcript)).await;
    }

    let slices = chunk_text(transcript, summary_chunk_size);
    let mut partials = Vec::with_capacity(slices.len());
    for slice in &slices {
        partials.push(llm.generate(&map_prompt(slice)).await?);
    }

    llm.generate(&reduce_prompt(&partials)).await
}

pub fn key_notes_prompt(summary: &str) -> String {
    format!(
        "Extract key notes from this meeting summary as a JSON array of \
         objects with \"category\" (one of Decision, Task, KeyPoint, Risk, \
         Question) and \"note\" fields:\n\n{summary}"
    )
}

pub fn tasks_prompt(summary: &str) -> String {
    format!(
        "Extract action items from this meeting summary as a JSON array \
         of objects with \"title\", optional \"description\", \"assignee\", \
         \"due_date\", and \"priority\" (high, medium, or low) fields:\n\n{summary}"
    )
}

#[derive(Debug, serde::Deserialize)]
struct KeyNoteResponse {
    category: String,
    note: String,
}

fn parse_category(raw: &str) -> Option<NoteCategory> {
    match raw.to_lowercase().as_str() {
        "decision" => Some(NoteCategory::Decision),
        "task" => Some(NoteCategory::Task),
        "keypoint" | "key_point" | "key point" => Some(NoteCategory::KeyPoint),
        "risk" => Some(NoteCategory::Risk),
        "question" => Some(NoteCategory::Question),
        _ => None,
    }
}

/// Parses the LLM's JSON array of `{category, note}` objects. Any decode
/// failure, or a response that isn't a JSON array at all, degrades to an
/// empty list rather than a failure (§4.4: "on JSON decode error, persist
/// empty list (not a failure)").
pub fn parse_key_notes(raw_response: &str) -> Vec<KeyNote> {
    let parsed: Vec<KeyNoteResponse> = match serde_json::from_str(extract_json_array(raw_response)) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("key-notes LLM response was not valid JSON, persisting empty list: {}", e);
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter_map(|item| {
            let category = parse_category(&item.category)?;
            Some(KeyNote { category, note: item.note })
        })
        .collect()
}

#[derive(Debug, serde::Deserialize)]
struct TaskResponse {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

fn parse_priority(raw: Option<&str>) -> TaskPriority {
    match raw.map(|s| s.to_lowercase()).as_deref() {
        Some("high") => TaskPriority::High,
        Some("low") => TaskPriority::Low,
        _ => TaskPriority::Medium,
    }
}

/// Parses the LLM's JSON array of task descriptors into `Task` rows ready
/// for a single batch insert, generating an id and defaulting status to
/// `pending` for each (§4.4). Decode failure yields zero tasks, logged as a
/// warning rather than surfaced as a failure.
pub fn parse_tasks(raw_response: &str, meeting_id: Uuid, created_at: chrono::DateTime<chrono::Utc>) -> Vec<Task> {
    let parsed: Vec<TaskResponse> = match serde_json::from_str(extract_json_array(raw_response)) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("tasks LLM response was not valid JSON, persisting zero tasks: {}", e);
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .map(|item| Task {
            id: Uuid::new_v4(),
            meeting_id,
            title: item.title,
            description: item.description,
            assignee: item.assignee,
            due_date: item.due_date,
            priority: parse_priority(item.priority.as_deref()),
            status: TaskStatus::Pending,
            created_at,
        })
        .collect()
}

/// LLMs routinely wrap a requested JSON array in prose or a markdown code
/// fence; take the outermost `[...]` span rather than demanding the whole
/// response be bare JSON.
fn extract_json_array(raw: &str) -> &str {
    match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw,
    }
}
