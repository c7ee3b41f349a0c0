use super::Transcriber;
use crate::domain::Segment;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

const MAX_FILE_SIZE: usize = 200 * 1024 * 1024;
const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Remote transcription provider, reached over HTTP against an
/// OpenAI-Whisper-compatible `audio/transcriptions` endpoint (SPEC_FULL.md
/// §9 "the remote-API variant is kept as a second, always-available
/// provider reached over HTTP"). Shares its model id, API key, and base URL
/// with the summarizer's LLM provider, since both are the same externally
/// hosted model in this deployment.
pub struct RemoteTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl RemoteTranscriber {
    pub fn new(api_key: String, model: String, api_base: Option<String>) -> Self {
        RemoteTranscriber {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }

    fn mime_type(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("opus") => "audio/opus",
            Some("aac") => "audio/aac",
            Some("wma") => "audio/x-ms-wma",
            Some("aiff") => "audio/aiff",
            _ => "application/octet-stream",
        }
    }

    async fn build_form(&self, file_path: &Path) -> Result<Form> {
        let bytes = fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chunk.mp3")
            .to_string();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(Self::mime_type(file_path))?;

        Ok(Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json"))
    }

    async fn call_with_retry(&self, file_path: &Path) -> Result<RemoteTranscriptionResponse> {
        let url = format!("{}/audio/transcriptions", self.api_base);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                debug!("retrying remote transcription after {}ms", delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let form = self.build_form(file_path).await?;
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.json().await?);
                }
                Ok(resp) if resp.status().as_u16() >= 500 || resp.status().as_u16() == 429 => {
                    let status = resp.status();
                    warn!("remote transcription retriable failure: {}", status);
                    last_error = Some(PipelineError::TranscriptionFailed(format!(
                        "remote transcription failed with status {status}"
                    )));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(PipelineError::TranscriptionFailed(format!(
                        "remote transcription failed with non-retriable status {status}: {body}"
                    )));
                }
                Err(e) => {
                    warn!("remote transcription transport error: {}", e);
                    last_error = Some(PipelineError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::TranscriptionFailed("exhausted retries against remote provider".into())
        }))
    }
}

#[async_trait]
impl Transcriber for RemoteTranscriber {
    async fn transcribe(&self, file_path: &Path) -> Result<Vec<Segment>> {
        let metadata = fs::metadata(file_path).await?;
        if metadata.len() as usize > MAX_FILE_SIZE {
            return Err(PipelineError::TranscriptionFailed(format!(
                "file too large for remote provider: {} bytes (max {})",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let response = self.call_with_retry(file_path).await?;
        Ok(parse_response(response))
    }
}

fn parse_response(response: RemoteTranscriptionResponse) -> Vec<Segment> {
    if let Some(segments) = response.segments {
        return segments
            .into_iter()
            .filter_map(|s| Segment::new(s.start, s.end, s.text))
            .collect();
    }
    parse_timestamped_text(&response.text)
}

/// Fallback for providers that only return free text with inline `[MM:SS]`
/// or `[HH:MM:SS]` markers rather than a structured `segments` array.
fn parse_timestamped_text(text: &str) -> Vec<Segment> {
    let timestamp_re = Regex::new(r"\[(\d{1,2}):(\d{2})(?::(\d{2}))?\]\s*([^\[]+)")
        .expect("static timestamp regex is valid");

    let mut starts = Vec::new();
    let mut texts = Vec::new();
    for cap in timestamp_re.captures_iter(text) {
        let first: u64 = cap.get(1).unwrap().as_str().parse().unwrap_or(0);
        let second: u64 = cap.get(2).unwrap().as_str().parse().unwrap_or(0);
        let start_secs = match cap.get(3) {
            Some(third) => {
                let third: u64 = third.as_str().parse().unwrap_or(0);
                first * 3600 + second * 60 + third
            }
            None => first * 60 + second,
        };
        let raw_text = cap.get(4).map(|m| m.as_str().trim()).unwrap_or("");
        if !raw_text.is_empty() {
            starts.push(start_secs as f64);
            texts.push(raw_text.to_string());
        }
    }

    if starts.is_empty() {
        return Segment::new(0.0, 0.0, text.trim()).into_iter().collect();
    }

    let mut segments = Vec::with_capacity(starts.len());
    for i in 0..starts.len() {
        let end = starts.get(i + 1).copied().unwrap_or(starts[i]);
        if let Some(segment) = Segment::new(starts[i], end.max(starts[i]), texts[i].clone()) {
            segments.push(segment);
        }
    }
    segments
}

#[derive(Debug, Deserialize)]
struct RemoteTranscriptionResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<RemoteSegment>>,
}

#[derive(Debug, Deserialize)]
struct RemoteSegment {
    start: f64,
    end: f64,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_segments() {
        let response = RemoteTranscriptionResponse {
            text: "ignored".to_string(),
            segments: Some(vec![
                RemoteSegment { start: 0.0, end: 2.0, text: "Hello world.".into() },
                RemoteSegment { start: 2.5, end: 4.0, text: "How are you?".into() },
            ]),
        };
        let segments = parse_response(response);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[1].text, "How are you?");
    }

    #[test]
    fn falls_back_to_bracket_timestamps() {
        let text = "[00:00] Hello world.\n[00:05] How are you doing today?";
        let segments = parse_timestamped_text(text);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[1].start, 5.0);
    }

    #[test]
    fn falls_back_to_single_segment_when_no_timestamps() {
        let segments = parse_timestamped_text("just plain text");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0.0);
    }
}
