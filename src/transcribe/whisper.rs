use super::Transcriber;
use crate::audio::decode_to_pcm_f32;
use crate::domain::Segment;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Local transcription provider, built on `whisper-rs` bindings to
/// whisper.cpp (SPEC_FULL.md §9: GPU and Apple-Silicon variants collapse
/// into this one provider, with the backend chosen at compile time by a
/// cargo feature rather than a runtime branch).
pub struct LocalWhisperTranscriber {
    context: Arc<WhisperContext>,
    language: String,
}

impl LocalWhisperTranscriber {
    pub fn load(model_path: &Path, language: String) -> Result<Self> {
        info!("loading whisper model from {:?}", model_path);
        let model_path_str = model_path.to_str().ok_or_else(|| {
            PipelineError::Configuration(format!("invalid model path: {}", model_path.display()))
        })?;

        let context = WhisperContext::new_with_params(
            model_path_str,
            WhisperContextParameters::default(),
        )
        .map_err(|e| {
            PipelineError::Configuration(format!("failed to load whisper model: {e}"))
        })?;

        Ok(LocalWhisperTranscriber {
            context: Arc::new(context),
            language,
        })
    }
}

#[async_trait]
impl Transcriber for LocalWhisperTranscriber {
    async fn transcribe(&self, file_path: &Path) -> Result<Vec<Segment>> {
        let file_path = file_path.to_path_buf();
        let context = self.context.clone();
        let language = self.language.clone();

        tokio::task::spawn_blocking(move || run_inference(&context, &file_path, &language))
            .await
            .map_err(|e| PipelineError::TranscriptionFailed(format!("whisper task panicked: {e}")))?
    }
}

fn run_inference(
    context: &WhisperContext,
    file_path: &PathBuf,
    language: &str,
) -> Result<Vec<Segment>> {
    let samples = decode_to_pcm_f32(file_path)?;
    if samples.is_empty() {
        return Err(PipelineError::AudioProcessing(
            "decoded chunk contains no audio samples".to_string(),
        ));
    }

    let mut state = context
        .create_state()
        .map_err(|e| PipelineError::TranscriptionFailed(format!("failed to create whisper state: {e}")))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    if language == "auto" {
        params.set_language(None);
    } else {
        params.set_language(Some(language));
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_suppress_blank(true);
    params.set_suppress_nst(true);

    state
        .full(params, &samples)
        .map_err(|e| PipelineError::TranscriptionFailed(format!("whisper inference failed: {e}")))?;

    let mut segments = Vec::new();
    for segment in state.as_iter() {
        let text = segment
            .to_str()
            .map_err(|e| PipelineError::TranscriptionFailed(format!("invalid whisper output: {e}")))?;
        // whisper.cpp reports timestamps in centiseconds.
        let start = segment.start_timestamp() as f64 / 100.0;
        let end = segment.end_timestamp() as f64 / 100.0;
        if let Some(segment) = Segment::new(start, end, text) {
            segments.push(segment);
        }
    }

    Ok(segments)
}
