//! Cross-stage integration tests for the transcription-and-summarization
//! pipeline. Each test wires the in-memory fakes together (no live broker,
//! cache, or database) and exercises two or more pipeline stages in
//! sequence, the way `tests/integration_tests.rs` in the teacher repo
//! exercised its own multi-component flows without external services.
//!
//! The completion-barrier idempotence test (`race_of_two_last_chunks_*`)
//! covers SPEC_FULL.md §5's "single most important correctness property":
//! two chunk workers racing to finish last must still produce exactly one
//! effective merge.

use scribeline::broker::fake::FakeBroker;
use scribeline::broker::messages::{
    ChunkMessage, ExtractKeyNotesMessage, GenerateTasksMessage, MergeMessage,
    ROUTING_EXTRACT_KEY_NOTES, ROUTING_GENERATE_TASKS, ROUTING_SUMMARIZE_GENERATE,
    ROUTING_TRANSCRIBE_MERGE, SummarizeMessage,
};
use scribeline::cache::fake::FakeChunkCache;
use scribeline::cache::ChunkCache;
use scribeline::config::{Settings, TranscriptionProvider};
use scribeline::domain::{Meeting, MeetingStatus, ProgressCounters, Segment};
use scribeline::llm::fake::FakeLlmClient;
use scribeline::store::fake::FakeMeetingStore;
use scribeline::store::MeetingStore;
use scribeline::transcribe::fake::FakeTranscriber;
use scribeline::{pipeline, PipelineError};

use std::path::PathBuf;
use uuid::Uuid;

fn settings() -> Settings {
    Settings {
        database_url: "postgres://localhost/scribeline".into(),
        broker_url: "amqp://localhost".into(),
        cache_url: "redis://localhost".into(),
        object_store_endpoint: None,
        object_store_access_key: None,
        object_store_secret_key: None,
        upload_root: std::env::temp_dir().join("scribeline-integration-tests"),
        chunk_duration_minutes: 10,
        summary_chunk_size: 20_000,
        transcription_provider: TranscriptionProvider::Remote,
        whisper_model_path: None,
        whisper_language: "auto".into(),
        llm_api_key: Some("test-key".into()),
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

fn meeting(id: Uuid, status: MeetingStatus) -> Meeting {
    let now = chrono::Utc::now();
    Meeting {
        id,
        owner_id: Uuid::new_v4(),
        title: "Quarterly planning".into(),
        description: None,
        audio_url: "s3://recordings/quarterly.mp3".into(),
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

fn chunk_message(meeting_id: Uuid, chunk_id: i32, total_chunks: i32, offset_seconds: f64) -> ChunkMessage {
    ChunkMessage {
        meeting_id,
        chunk_id,
        chunk_path: PathBuf::from(format!("/tmp/chunk_{chunk_id}.mp3"))
            .to_string_lossy()
            .into_owned(),
        total_chunks,
        offset_seconds,
    }
}

// ============================================================================
// S1: three chunks, all succeed, barrier fires exactly once
// ============================================================================

#[tokio::test]
async fn all_chunks_succeeding_triggers_single_merge_and_correct_transcript() {
    let store = FakeMeetingStore::new();
    let cache = FakeChunkCache::new();
    let broker = FakeBroker::new();
    let settings = settings();
    let meeting_id = Uuid::new_v4();
    store.insert(meeting(meeting_id, MeetingStatus::Transcribing));

    let transcriber_0 = FakeTranscriber::succeeding(vec![Segment::new(0.0, 5.0, "Good morning everyone.").unwrap()]);
    let transcriber_1 = FakeTranscriber::succeeding(vec![Segment::new(0.0, 4.0, "Let's review the roadmap.").unwrap()]);
    let transcriber_2 = FakeTranscriber::succeeding(vec![Segment::new(0.0, 3.0, "Thanks, see you next week.").unwrap()]);

    pipeline::process_chunk(&cache, &broker, &transcriber_0, chunk_message(meeting_id, 0, 3, 0.0))
        .await
        .unwrap();
    pipeline::process_chunk(&cache, &broker, &transcriber_1, chunk_message(meeting_id, 1, 3, 600.0))
        .await
        .unwrap();
    assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 0);

    pipeline::process_chunk(&cache, &broker, &transcriber_2, chunk_message(meeting_id, 2, 3, 1200.0))
        .await
        .unwrap();
    assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 1);

    pipeline::finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
        .await
        .unwrap();

    let merged = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(merged.status, MeetingStatus::Transcribed);
    assert_eq!(
        merged.transcript.as_deref(),
        Some("Good morning everyone. Let's review the roadmap. Thanks, see you next week.")
    );
    let segments = merged.segments.unwrap();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1].start, 600.0);
    assert_eq!(segments[2].start, 1200.0);
    // Cleanup: no chunk entries survive a successful merge (§8 invariant 7).
    assert_eq!(cache.count_chunks(meeting_id).await.unwrap(), 0);
}

// ============================================================================
// S2: one chunk fails permanently; merger fails the meeting and never
// publishes a summarize message.
// ============================================================================

#[tokio::test]
async fn one_permanently_failed_chunk_fails_the_meeting_without_summarizing() {
    let store = FakeMeetingStore::new();
    let cache = FakeChunkCache::new();
    let broker = FakeBroker::new();
    let settings = settings();
    let meeting_id = Uuid::new_v4();
    store.insert(meeting(meeting_id, MeetingStatus::Transcribing));

    let ok_transcriber = FakeTranscriber::succeeding(vec![Segment::new(0.0, 2.0, "Hello.").unwrap()]);
    let failing_transcriber = FakeTranscriber::failing("provider timed out");

    pipeline::process_chunk(&cache, &broker, &ok_transcriber, chunk_message(meeting_id, 0, 3, 0.0))
        .await
        .unwrap();

    let chunk_1_result = pipeline::process_chunk(
        &cache,
        &broker,
        &failing_transcriber,
        chunk_message(meeting_id, 1, 3, 600.0),
    )
    .await;
    assert!(matches!(chunk_1_result, Err(PipelineError::TranscriptionFailed(_))));

    pipeline::process_chunk(&cache, &broker, &ok_transcriber, chunk_message(meeting_id, 2, 3, 1200.0))
        .await
        .unwrap();

    // All three chunks recorded (one failed) -> barrier fires exactly once.
    assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 1);

    pipeline::finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
        .await
        .unwrap();

    let failed = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(failed.status, MeetingStatus::TranscribeFailed);
    assert!(failed.error_message.unwrap().contains("chunk 1"));
    assert_eq!(broker.count_with_routing_key(ROUTING_SUMMARIZE_GENERATE), 0);
}

// ============================================================================
// S3: two chunk workers both observe the completion count and both publish
// a merge message; the merger's idempotence check collapses the second
// invocation into a no-op.
// ============================================================================

#[tokio::test]
async fn race_of_two_last_chunks_collapses_to_one_effective_merge() {
    let store = FakeMeetingStore::new();
    let cache = FakeChunkCache::new();
    let broker = FakeBroker::new();
    let settings = settings();
    let meeting_id = Uuid::new_v4();
    store.insert(meeting(meeting_id, MeetingStatus::Transcribing));

    let transcriber = FakeTranscriber::succeeding(vec![Segment::new(0.0, 1.0, "hi").unwrap()]);

    // Two chunk workers finish "simultaneously": both see count == total and
    // both enqueue a merge message with the same deterministic id.
    pipeline::process_chunk(&cache, &broker, &transcriber, chunk_message(meeting_id, 0, 2, 0.0))
        .await
        .unwrap();
    pipeline::process_chunk(&cache, &broker, &transcriber, chunk_message(meeting_id, 1, 2, 600.0))
        .await
        .unwrap();
    assert_eq!(broker.count_with_routing_key(ROUTING_TRANSCRIBE_MERGE), 1);

    // Simulate the broker delivering two merge messages for the meeting (no
    // broker-side dedup available) — the merger itself must be idempotent.
    pipeline::finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
        .await
        .unwrap();
    pipeline::finalize_merge(&store, &cache, &broker, &settings, MergeMessage { meeting_id })
        .await
        .unwrap();

    assert_eq!(broker.count_with_routing_key(ROUTING_SUMMARIZE_GENERATE), 1);
    let merged = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(merged.status, MeetingStatus::Transcribed);
}

// ============================================================================
// S4 + full downstream flow: transcript below the summary threshold, both
// enrichment stages complete, meeting reaches `completed`.
// ============================================================================

#[tokio::test]
async fn full_pipeline_from_transcribed_to_completed() {
    let store = FakeMeetingStore::new();
    let broker = FakeBroker::new();
    let settings = settings();
    let meeting_id = Uuid::new_v4();
    let mut m = meeting(meeting_id, MeetingStatus::Transcribed);
    m.transcript = Some("Good morning everyone. Let's review the roadmap.".into());
    store.insert(m);

    let llm = FakeLlmClient::with_responses(vec![
        "The team reviewed the roadmap and aligned on next steps.",
        r#"[{"category": "Decision", "note": "Ship the roadmap by Friday"}]"#,
        r#"[{"title": "Send roadmap doc to stakeholders", "priority": "high"}]"#,
    ]);

    pipeline::summarize_meeting(&store, &broker, &llm, &settings, SummarizeMessage { meeting_id })
        .await
        .unwrap();

    let summarized = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(summarized.status, MeetingStatus::Summarized);
    assert_eq!(
        summarized.summary.as_deref(),
        Some("The team reviewed the roadmap and aligned on next steps.")
    );
    assert_eq!(broker.count_with_routing_key(ROUTING_EXTRACT_KEY_NOTES), 1);
    assert_eq!(broker.count_with_routing_key(ROUTING_GENERATE_TASKS), 1);

    pipeline::extract_key_notes(&store, &llm, ExtractKeyNotesMessage { meeting_id })
        .await
        .unwrap();
    let after_notes = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(after_notes.status, MeetingStatus::Summarized);
    assert_eq!(after_notes.key_notes.as_ref().unwrap().len(), 1);

    pipeline::generate_tasks(&store, &llm, GenerateTasksMessage { meeting_id })
        .await
        .unwrap();
    let completed = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(completed.status, MeetingStatus::Completed);
    assert_eq!(store.tasks_for(meeting_id).len(), 1);
}

// ============================================================================
// S5: malformed JSON from the LLM degrades key notes to an empty list
// instead of failing the meeting; the pipeline still reaches `completed`.
// ============================================================================

#[tokio::test]
async fn malformed_key_notes_json_degrades_to_empty_list_not_a_failure() {
    let store = FakeMeetingStore::new();
    let mut m = meeting(Uuid::new_v4(), MeetingStatus::Summarized);
    m.summary = Some("a meeting summary".into());
    m.progress.summarize_total = 2;
    let meeting_id = m.id;
    store.insert(m);

    let llm = FakeLlmClient::with_responses(vec!["Sure! Here are some thoughts, but no JSON at all."]);

    let result = pipeline::extract_key_notes(&store, &llm, ExtractKeyNotesMessage { meeting_id }).await;

    assert!(result.is_ok());
    let after = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(after.key_notes, Some(vec![]));
    assert_ne!(after.status, MeetingStatus::SummarizeFailed);
}

// ============================================================================
// Dispatcher precondition: a meeting not in a dispatchable status is
// rejected without being retried, and without mutating its status.
// ============================================================================

#[tokio::test]
async fn dispatch_is_rejected_for_a_meeting_mid_transcription() {
    let store = FakeMeetingStore::new();
    let broker = FakeBroker::new();
    let settings = settings();
    let meeting_id = Uuid::new_v4();
    store.insert(meeting(meeting_id, MeetingStatus::Summarizing));

    let result = pipeline::dispatch_transcription(
        &store,
        &broker,
        &settings,
        scribeline::broker::messages::StartTranscribeMessage {
            meeting_id,
            audio_url: "s3://recordings/quarterly.mp3".into(),
        },
    )
    .await;

    assert!(matches!(result, Err(PipelineError::InvalidState { .. })));
    let unchanged = store.find(meeting_id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, MeetingStatus::Summarizing);
    assert!(broker.published().is_empty());
}

// ============================================================================
// A re-dispatch from `transcribe_failed` is accepted (§4.1 precondition).
// ============================================================================

#[tokio::test]
async fn redispatch_from_transcribe_failed_status_is_a_valid_precondition() {
    let store = FakeMeetingStore::new();
    let meeting_id = Uuid::new_v4();
    store.insert(meeting(meeting_id, MeetingStatus::TranscribeFailed));

    let m = store.find(meeting_id).await.unwrap().unwrap();
    assert!(m.status.can_dispatch_transcription());
}
