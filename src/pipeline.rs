//! Pipeline stage functions (SPEC_FULL.md §4.1-4.4): the dispatcher, chunk
//! worker, merger, and summarizer bodies invoked by each worker role's
//! consumer loop in `main`. Each function takes its dependencies as trait
//! objects so it can run against either the real Postgres/Redis/AMQP stack
//! or the in-memory fakes under test.

use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio;
use crate::broker::messages::{
    chunk_message_id, merge_message_id, ChunkMessage, ExtractKeyNotesMessage,
    GenerateTasksMessage, MergeMessage, StartTranscribeMessage, SummarizeMessage,
    QUEUE_SUMMARIZE, QUEUE_TRANSCRIBE, ROUTING_EXTRACT_KEY_NOTES, ROUTING_GENERATE_TASKS,
    ROUTING_SUMMARIZE_GENERATE, ROUTING_TRANSCRIBE_CHUNK, ROUTING_TRANSCRIBE_MERGE,
};
use crate::broker::{publish_json, Broker};
use crate::cache::ChunkCache;
use crate::config::Settings;
use crate::domain::{ChunkResult, MeetingStatus, Segment};
use crate::error::{PipelineError, Result};
use crate::llm::LlmClient;
use crate::store::MeetingStore;
use crate::streaming;
use crate::summarize;
use crate::transcribe::Transcriber;

/// Dispatch-acknowledgement return payload (§4.1 step 9), useful for
/// testing without inspecting broker/store side effects directly.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchAck {
    pub meeting_id: Uuid,
    pub total_chunks: i32,
}

/// §4.1. Preconditions (meeting exists, status permits transcription) are
/// checked before any mutation; failures there are returned unchanged and
/// never mark the meeting `transcribe_failed`, matching §7's "Not-found"/
/// "InvalidState" categories (no retry is useful, no state is touched).
/// Any error from that point on marks the meeting `transcribe_failed`
/// before propagating, so the broker's retry-vs-terminal-fail decision
/// still has an error to inspect via `is_retriable`.
pub async fn dispatch_transcription(
    store: &dyn MeetingStore,
    broker: &dyn Broker,
    settings: &Settings,
    message: StartTranscribeMessage,
) -> Result<DispatchAck> {
    let meeting = store
        .find(message.meeting_id)
        .await?
        .ok_or(PipelineError::NotFound(message.meeting_id))?;

    if !meeting.status.can_dispatch_transcription() {
        return Err(PipelineError::InvalidState {
            meeting_id: meeting.id,
            current: meeting.status,
            required: "processing or transcribe_failed",
        });
    }

    match dispatch_transcription_inner(store, broker, settings, &message).await {
        Ok(ack) => Ok(ack),
        Err(e) => {
            warn!("dispatch failed for meeting {}: {}", message.meeting_id, e);
            let _ = store
                .set_status(
                    message.meeting_id,
                    MeetingStatus::TranscribeFailed,
                    Some(e.to_string()),
                )
                .await;
            Err(e)
        }
    }
}

async fn dispatch_transcription_inner(
    store: &dyn MeetingStore,
    broker: &dyn Broker,
    settings: &Settings,
    message: &StartTranscribeMessage,
) -> Result<DispatchAck> {
    store
        .set_status(message.meeting_id, MeetingStatus::Transcribing, None)
        .await?;

    let staging_dir = settings.upload_root.join(message.meeting_id.to_string());
    tokio::fs::create_dir_all(&staging_dir).await?;

    let mut stream = streaming::open_stream(&message.audio_url, settings).await?;
    let raw_audio = streaming::buffer_all(&mut *stream).await?;

    let (_duration_ms, chunks) =
        audio::split_audio(&raw_audio, &staging_dir, settings.chunk_duration_ms()).await?;
    let total_chunks = chunks.len() as i32;

    store
        .set_transcribe_progress(message.meeting_id, total_chunks, 0)
        .await?;

    for chunk in &chunks {
        let chunk_message = ChunkMessage {
            meeting_id: message.meeting_id,
            chunk_id: chunk.index,
            chunk_path: chunk.path.to_string_lossy().into_owned(),
            total_chunks,
            offset_seconds: chunk.start_ms as f64 / 1000.0,
        };
        let message_id = chunk_message_id(message.meeting_id, chunk.index);
        publish_json(
            broker,
            QUEUE_TRANSCRIBE,
            ROUTING_TRANSCRIBE_CHUNK,
            Some(&message_id),
            &chunk_message,
        )
        .await?;
    }

    Ok(DispatchAck {
        meeting_id: message.meeting_id,
        total_chunks,
    })
}

/// §4.2. The failed-chunk path still writes its result and runs the
/// completion-count check before propagating the transcription error — a
/// permanently failed chunk must still count toward the barrier so the
/// merger is invoked rather than stalling the meeting forever (§9).
pub async fn process_chunk(
    cache: &dyn ChunkCache,
    broker: &dyn Broker,
    transcriber: &dyn Transcriber,
    message: ChunkMessage,
) -> Result<()> {
    let (result, transcribe_error) = match transcriber.transcribe(Path::new(&message.chunk_path)).await {
        Ok(segments) => {
            let adjusted: Vec<Segment> = segments
                .into_iter()
                .map(|s| s.offset_by(message.offset_seconds))
                .collect();
            (ChunkResult::success(message.chunk_id, adjusted), None)
        }
        Err(e) => (ChunkResult::failed(message.chunk_id, e.to_string()), Some(e)),
    };

    cache.save_chunk(message.meeting_id, &result).await?;

    let count = cache.count_chunks(message.meeting_id).await?;
    if count as i32 == message.total_chunks {
        let merge_message = MergeMessage {
            meeting_id: message.meeting_id,
        };
        let message_id = merge_message_id(message.meeting_id);
        publish_json(
            broker,
            QUEUE_TRANSCRIBE,
            ROUTING_TRANSCRIBE_MERGE,
            Some(&message_id),
            &merge_message,
        )
        .await?;
    }

    if let Some(e) = transcribe_error {
        return Err(e);
    }
    Ok(())
}

/// §4.3. The idempotence check is the single most important correctness
/// property of the pipeline (§5): a second merger invocation for a meeting
/// already at or past `transcribed` is a no-op, which is what collapses a
/// duplicate merge message (§8 scenario S3) into a single effective merge.
pub async fn finalize_merge(
    store: &dyn MeetingStore,
    cache: &dyn ChunkCache,
    broker: &dyn Broker,
    settings: &Settings,
    message: MergeMessage,
) -> Result<()> {
    let meeting = store
        .find(message.meeting_id)
        .await?
        .ok_or(PipelineError::NotFound(message.meeting_id))?;

    if meeting.status.is_at_or_past_transcribed() {
        debug!(
            "merge for meeting {} is a no-op; status is already {:?}",
            message.meeting_id, meeting.status
        );
        return Ok(());
    }

    let chunks = cache.get_all_chunks(message.meeting_id).await?;
    let staging_dir = settings.upload_root.join(message.meeting_id.to_string());

    if chunks.is_empty() {
        store
            .set_status(
                message.meeting_id,
                MeetingStatus::TranscribeFailed,
                Some("No chunks found".to_string()),
            )
            .await?;
        cleanup_merge_artifacts(cache, &staging_dir, message.meeting_id).await;
        return Ok(());
    }

    let failed: Vec<&ChunkResult> = chunks.iter().filter(|c| !c.is_success()).collect();
    if !failed.is_empty() {
        let detail = failed
            .iter()
            .take(3)
            .map(|c| format!("chunk {}: {}", c.chunk_id, c.error.as_deref().unwrap_or("unknown error")))
            .collect::<Vec<_>>()
            .join("; ");
        store
            .set_status(
                message.meeting_id,
                MeetingStatus::TranscribeFailed,
                Some(format!("chunk failures: {detail}")),
            )
            .await?;
        cleanup_merge_artifacts(cache, &staging_dir, message.meeting_id).await;
        return Ok(());
    }

    let mut segments: Vec<Segment> = Vec::new();
    for chunk in &chunks {
        segments.extend(chunk.segments.iter().cloned());
    }
    let transcript = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    store
        .complete_transcription(message.meeting_id, transcript, segments)
        .await?;

    cleanup_merge_artifacts(cache, &staging_dir, message.meeting_id).await;

    let summarize_message = SummarizeMessage {
        meeting_id: message.meeting_id,
    };
    publish_json(
        broker,
        QUEUE_SUMMARIZE,
        ROUTING_SUMMARIZE_GENERATE,
        None,
        &summarize_message,
    )
    .await?;

    Ok(())
}

/// Shared cleanup for every terminal path out of `finalize_merge` (§4.3 step
/// 6, §8 Invariant 7): no `chunks:<meeting>:*` cache keys and no staging
/// directory may survive a meeting reaching `transcribed` *or*
/// `transcribe_failed`. Errors are logged, not propagated — the meeting's
/// terminal status has already been committed by the caller.
async fn cleanup_merge_artifacts(cache: &dyn ChunkCache, staging_dir: &Path, meeting_id: Uuid) {
    if let Err(e) = audio::remove_staging_dir(staging_dir).await {
        warn!("failed to remove staging dir for meeting {}: {}", meeting_id, e);
    }
    if let Err(e) = cache.delete_chunks(meeting_id).await {
        warn!("failed to delete cache chunks for meeting {}: {}", meeting_id, e);
    }
}

/// §4.4 steps 1-3, plus the fire-and-forget enqueue of step 4. Enqueue
/// failures for the two enrichment messages are logged, not propagated:
/// `summarized` has already been committed, and those two stages are
/// best-effort enrichment of an already-successful summarization.
pub async fn summarize_meeting(
    store: &dyn MeetingStore,
    broker: &dyn Broker,
    llm: &dyn LlmClient,
    settings: &Settings,
    message: SummarizeMessage,
) -> Result<()> {
    let meeting = store
        .find(message.meeting_id)
        .await?
        .ok_or(PipelineError::NotFound(message.meeting_id))?;

    if meeting.status != MeetingStatus::Transcribed {
        return Err(PipelineError::InvalidState {
            meeting_id: meeting.id,
            current: meeting.status,
            required: "transcribed",
        });
    }
    let transcript = meeting.transcript.filter(|t| !t.is_empty()).ok_or_else(|| {
        PipelineError::InvalidState {
            meeting_id: meeting.id,
            current: meeting.status,
            required: "transcribed with a non-empty transcript",
        }
    })?;

    store
        .set_status(message.meeting_id, MeetingStatus::Summarizing, None)
        .await?;
    store
        .set_summarize_progress(message.meeting_id, 2, 0)
        .await?;

    match summarize::summarize_transcript(llm, &transcript, settings.summary_chunk_size).await {
        Ok(summary) => {
            store.set_summary(message.meeting_id, summary).await?;
        }
        Err(e) => {
            store
                .set_status(
                    message.meeting_id,
                    MeetingStatus::SummarizeFailed,
                    Some(e.to_string()),
                )
                .await?;
            return Err(e);
        }
    }

    let key_notes_message = ExtractKeyNotesMessage {
        meeting_id: message.meeting_id,
    };
    if let Err(e) = publish_json(
        broker,
        QUEUE_SUMMARIZE,
        ROUTING_EXTRACT_KEY_NOTES,
        None,
        &key_notes_message,
    )
    .await
    {
        warn!(
            "failed to enqueue key-notes extraction for meeting {}: {}",
            message.meeting_id, e
        );
    }

    let tasks_message = GenerateTasksMessage {
        meeting_id: message.meeting_id,
    };
    if let Err(e) = publish_json(
        broker,
        QUEUE_SUMMARIZE,
        ROUTING_GENERATE_TASKS,
        None,
        &tasks_message,
    )
    .await
    {
        warn!(
            "failed to enqueue task generation for meeting {}: {}",
            message.meeting_id, e
        );
    }

    Ok(())
}

/// Advances a meeting to `completed` once both enrichment stages have
/// persisted their results. `summarize_total`/`summarize_done` (otherwise
/// unused columns, see the transcribe-progress Open Question in
/// SPEC_FULL.md §9) serve as the completion barrier here, since the two
/// enrichment stages run as independent fire-and-forget messages with no
/// other coordination mechanism described in §4.4.
async fn advance_past_summarized_if_both_done(store: &dyn MeetingStore, meeting_id: Uuid) {
    match store.increment_summarize_done(meeting_id).await {
        Ok(done) if done >= 2 => {
            if let Err(e) = store
                .set_status(meeting_id, MeetingStatus::Completed, None)
                .await
            {
                warn!("failed to mark meeting {} completed: {}", meeting_id, e);
            }
        }
        Ok(_) => {}
        Err(e) => warn!(
            "failed to bump summarize progress for meeting {}: {}",
            meeting_id, e
        ),
    }
}

/// §4.4 key-notes task: a JSON decode failure degrades to an empty list
/// rather than a failure; any other failure (LLM call, store write) is
/// caught broadly and logged as a warning, never failing the meeting
/// (`summarized` was already committed by `summarize_meeting`).
pub async fn extract_key_notes(
    store: &dyn MeetingStore,
    llm: &dyn LlmClient,
    message: ExtractKeyNotesMessage,
) -> Result<()> {
    let meeting = match store.find(message.meeting_id).await {
        Ok(Some(m)) => m,
        Ok(None) => {
            warn!(
                "key-notes extraction skipped: meeting {} not found",
                message.meeting_id
            );
            return Ok(());
        }
        Err(e) => {
            warn!(
                "key-notes extraction failed to load meeting {}: {}",
                message.meeting_id, e
            );
            return Ok(());
        }
    };

    let summary = match meeting.summary.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => {
            warn!(
                "key-notes extraction skipped: meeting {} has no summary",
                message.meeting_id
            );
            return Ok(());
        }
    };

    let response = match llm.generate(&summarize::key_notes_prompt(summary)).await {
        Ok(r) => r,
        Err(e) => {
            warn!(
                "key-notes LLM call failed for meeting {}: {}",
                message.meeting_id, e
            );
            return Ok(());
        }
    };

    let notes = summarize::parse_key_notes(&response);
    if let Err(e) = store.set_key_notes(message.meeting_id, notes).await {
        warn!(
            "failed to persist key notes for meeting {}: {}",
            message.meeting_id, e
        );
        return Ok(());
    }

    advance_past_summarized_if_both_done(store, message.meeting_id).await;
    Ok(())
}

/// §4.4 tasks extraction: same best-effort semantics as `extract_key_notes`.
pub async fn generate_tasks(
    store: &dyn MeetingStore,
    llm: &dyn LlmClient,
    message: GenerateTasksMessage,
) -> Result<()> {
    let meeting = match store.find(message.meeting_id).await {
        Ok(Some(m)) => m,
        Ok(None) => {
            warn!(
                "task generation skipped: meeting {} not found",
                message.meeting_id
            );
            return Ok(());
        }
        Err(e) => {
            warn!(
                "task generation failed to load meeting {}: {}",
                message.meeting_id, e
            );
            return Ok(());
        }
    };

    let summary = match meeting.summary.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => {
            warn!(
                "task generation skipped: meeting {} has no summary",
                message.meeting_id
            );
            return Ok(());
        }
    };

    let response = match llm.generate(&summarize::tasks_prompt(summary)).await {
        Ok(r) => r,
        Err(e) => {
            warn!(
                "task generation LLM call failed for meeting {}: {}",
                message.meeting_id, e
            );
            return Ok(());
        }
    };

    let tasks = summarize::parse_tasks(&response, message.meeting_id, chrono::Utc::now());
    if let Err(e) = store.insert_tasks(&tasks).await {
        warn!(
            "failed to persist tasks for meeting {}: {}",
            message.meeting_id, e
        );
        return Ok(());
    }

    advance_past_summarized_if_both_done(store, message.meeting_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::fake::FakeBroker;
    use crate::cache::fake::FakeChunkCache;
    use crate::config::TranscriptionProvider;
    use crate::domain::{Meeting, ProgressCounters};
    use crate::llm::fake::FakeLlmClient;
    use crate::store::fake::FakeMeetingStore;
    use crate::transcribe::fake::FakeTranscriber;
    use tempfile::tempdir;

    fn settings_with_upload_root(upload_root: std::path::PathBuf) -> Settings {
        Settings {
            database_url: "postgres://localhost/scribeline".into(),
            broker_url: "amqp://localhost".into(),
            cache_url: "redis://localhost".into(),
            object_store_endpoint: None,
            object_store_access_key: None,
            object_store_secret_key: None,
            upload_root,
            chunk_duration_minutes: 10,
            summary_chunk_size: 20_000,
            transcription_provider: TranscriptionProvider::Remote,
            whisper_model_path: None,
            whisper_language: "auto".into(),
            llm_api_key: Some("key".into()),
            llm_model: "gpt-4o-mini".into(),
            llm_api_base: None,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            prefetch_multiplier: 1,
            max_tasks_per_child: 100,
            log_level: "info".into(),
            max_upload_size_mb: 500,
            max_duration_hours: 10,
            allowed_extensions: vec!["mp3".into()],
        }
    }

    fn sample_meeting(id: Uuid, status: MeetingStatus) -> Meeting {
        let now = chrono::Utc::now();
        Meeting {
            id,
            owner_id: Uuid::new_v4(),
            title: "Standup".into(),
            description: None,
            audio_url: "s3://bucket/key.mp3".into(),
            duration_seconds: None,
            status,
            transcript: None,
            segments: None,
            summary: None,
            key_notes: None,
            progress: ProgressCounters::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_meeting_in_wrong_status() {
        let store = FakeMeetingStore::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribing));
        let broker = FakeBroker::new();
        let settings = settings_with_upload_root(tempdir().unwrap().into_path());

        let result = dispatch_transcription(
            &store,
            &broker,
            &settings,
            StartTranscribeMessage {
                meeting_id,
                audio_url: "s3://bucket/key.mp3".into(),
            },
        )
        .await;

        assert!(matches!(result, Err(PipelineError::InvalidState { .. })));
        // No state mutation on a precondition failure.
        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Transcribing);
    }

    #[tokio::test]
    async fn process_chunk_offsets_segments_and_triggers_merge_on_last_chunk() {
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        let transcriber = FakeTranscriber::succeeding(vec![Segment::new(0.0, 2.0, "hello").unwrap()]);

        process_chunk(
            &cache,
            &broker,
            &transcriber,
            ChunkMessage {
                meeting_id,
                chunk_id: 0,
                chunk_path: "/tmp/chunk_0.mp3".into(),
                total_chunks: 1,
                offset_seconds: 600.0,
            },
        )
        .await
        .unwrap();

        let chunks = cache.get_all_chunks(meeting_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].segments[0].start, 600.0);
        assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 1);
    }

    #[tokio::test]
    async fn process_chunk_counts_failed_chunk_toward_barrier() {
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        let transcriber = FakeTranscriber::failing("boom");

        let result = process_chunk(
            &cache,
            &broker,
            &transcriber,
            ChunkMessage {
                meeting_id,
                chunk_id: 0,
                chunk_path: "/tmp/chunk_0.mp3".into(),
                total_chunks: 1,
                offset_seconds: 0.0,
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 1);
        let chunks = cache.get_all_chunks(meeting_id).await.unwrap();
        assert!(!chunks[0].is_success());
    }

    #[tokio::test]
    async fn finalize_merge_is_idempotent_for_already_transcribed_meeting() {
        let store = FakeMeetingStore::new();
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribed));
        let settings = settings_with_upload_root(tempdir().unwrap().into_path());

        finalize_merge(
            &store,
            &cache,
            &broker,
            &settings,
            MergeMessage { meeting_id },
        )
        .await
        .unwrap();

        // No summarize message published, no cache/store interaction beyond the read.
        assert_eq!(broker.count_with_routing_key(ROUTING_SUMMARIZE_GENERATE), 0);
    }

    #[tokio::test]
    async fn finalize_merge_races_collapse_to_single_summarize_publish() {
        // S3: two chunk-worker merge triggers racing for the same meeting.
        // The second merger call observes `transcribed` and no-ops.
        let store = FakeMeetingStore::new();
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribing));
        cache
            .save_chunk(meeting_id, &ChunkResult::success(0, vec![Segment::new(0.0, 1.0, "hi").unwrap()]))
            .await
            .unwrap();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(1, vec![Segment::new(1.0, 2.0, "there").unwrap()]))
            .await
            .unwrap();
        let settings = settings_with_upload_root(tempdir().unwrap().into_path());

        finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
            .await
            .unwrap();
        finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
            .await
            .unwrap();

        assert_eq!(broker.count_with_routing_key(ROUTING_SUMMARIZE_GENERATE), 1);
        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Transcribed);
        assert_eq!(meeting.transcript.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn finalize_merge_fails_meeting_on_failed_chunk() {
        let store = FakeMeetingStore::new();
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribing));
        cache
            .save_chunk(meeting_id, &ChunkResult::success(0, vec![Segment::new(0.0, 1.0, "hi").unwrap()]))
            .await
            .unwrap();
        cache
            .save_chunk(meeting_id, &ChunkResult::failed(1, "provider timeout"))
            .await
            .unwrap();
        let settings = settings_with_upload_root(tempdir().unwrap().into_path());

        finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
            .await
            .unwrap();

        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::TranscribeFailed);
        assert_eq!(broker.count_with_routing_key(ROUTING_SUMMARIZE_GENERATE), 0);
        // §8 Invariant 7: cleanup still runs on the failed-chunk terminal path.
        assert_eq!(cache.count_chunks(meeting_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn finalize_merge_cleans_up_staging_dir_and_cache_on_no_chunks_found() {
        let store = FakeMeetingStore::new();
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribing));
        let upload_root = tempdir().unwrap().into_path();
        let settings = settings_with_upload_root(upload_root.clone());
        let staging_dir = upload_root.join(meeting_id.to_string());
        std::fs::create_dir_all(&staging_dir).unwrap();

        finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
            .await
            .unwrap();

        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::TranscribeFailed);
        assert!(!staging_dir.exists());
    }

    #[tokio::test]
    async fn finalize_merge_cleans_up_staging_dir_on_failed_chunk() {
        let store = FakeMeetingStore::new();
        let cache = FakeChunkCache::new();
        let broker = FakeBroker::new();
        let meeting_id = Uuid::new_v4();
        store.insert(sample_meeting(meeting_id, MeetingStatus::Transcribing));
        cache
            .save_chunk(meeting_id, &ChunkResult::failed(0, "provider timeout"))
            .await
            .unwrap();
        let upload_root = tempdir().unwrap().into_path();
        let settings = settings_with_upload_root(upload_root.clone());
        let staging_dir = upload_root.join(meeting_id.to_string());
        std::fs::create_dir_all(&staging_dir).unwrap();

        finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
            .await
            .unwrap();

        assert!(!staging_dir.exists());
        assert_eq!(cache.count_chunks(meeting_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn summarize_meeting_below_threshold_enqueues_both_enrichment_messages() {
        let store = FakeMeetingStore::new();
        let broker = FakeBroker::new();
        let llm = FakeLlmClient::with_responses(vec!["a summary"]);
        let meeting_id = Uuid::new_v4();
        let mut meeting = sample_meeting(meeting_id, MeetingStatus::Transcribed);
        meeting.transcript = Some("short transcript".into());
        store.insert(meeting);
        let settings = settings_with_upload_root(tempdir().unwrap().into_path());

        summarize_meeting(&store, &broker, &llm, &settings, SummarizeMessage { meeting_id })
            .await
            .unwrap();

        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Summarized);
        assert_eq!(meeting.summary.as_deref(), Some("a summary"));
        assert_eq!(broker.count_with_routing_key(ROUTING_EXTRACT_KEY_NOTES), 1);
        assert_eq!(broker.count_with_routing_key(ROUTING_GENERATE_TASKS), 1);
    }

    #[tokio::test]
    async fn extract_key_notes_swallows_malformed_json_without_failing() {
        let store = FakeMeetingStore::new();
        let llm = FakeLlmClient::with_responses(vec!["not json"]);
        let meeting_id = Uuid::new_v4();
        let mut meeting = sample_meeting(meeting_id, MeetingStatus::Summarizing);
        meeting.summary = Some("a meeting summary".into());
        store.insert(meeting);

        let result = extract_key_notes(&store, &llm, ExtractKeyNotesMessage { meeting_id }).await;

        assert!(result.is_ok());
        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.key_notes, Some(vec![]));
    }

    #[tokio::test]
    async fn both_enrichment_stages_completing_marks_meeting_completed() {
        let store = FakeMeetingStore::new();
        let llm = FakeLlmClient::with_responses(vec![
            r#"[{"category": "Decision", "note": "Ship it"}]"#,
            r#"[{"title": "Follow up"}]"#,
        ]);
        let meeting_id = Uuid::new_v4();
        let mut meeting = sample_meeting(meeting_id, MeetingStatus::Summarized);
        meeting.summary = Some("a meeting summary".into());
        meeting.progress.summarize_total = 2;
        store.insert(meeting);

        extract_key_notes(&store, &llm, ExtractKeyNotesMessage { meeting_id })
            .await
            .unwrap();
        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Summarized);

        generate_tasks(&store, &llm, GenerateTasksMessage { meeting_id })
            .await
            .unwrap();
        let meeting = store.find(meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Completed);
    }
}
