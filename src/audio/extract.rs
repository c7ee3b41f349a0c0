use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::error::{PipelineError, Result};

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg").arg("-version").output().map_err(|e| {
        PipelineError::AudioProcessing(format!(
            "ffmpeg not found; please install ffmpeg and ensure it is in PATH: {e}"
        ))
    })?;

    if !output.status.success() {
        return Err(PipelineError::AudioProcessing("ffmpeg check failed".to_string()));
    }

    debug!("ffmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe").arg("-version").output().map_err(|e| {
        PipelineError::AudioProcessing(format!(
            "ffprobe not found; please install ffmpeg (includes ffprobe): {e}"
        ))
    })?;

    if !output.status.success() {
        return Err(PipelineError::AudioProcessing("ffprobe check failed".to_string()));
    }

    debug!("ffprobe is available");
    Ok(())
}

/// Get audio duration using FFprobe.
pub fn get_audio_duration(input: &Path) -> Result<Duration> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|e| PipelineError::AudioProcessing(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::AudioProcessing(format!("ffprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
        PipelineError::AudioProcessing(format!(
            "failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })?;

    Ok(Duration::from_secs_f64(duration_secs))
}

/// Export the half-open millisecond range `[start_ms, end_ms)` of `input`
/// to `output` as an mp3 file, via `ffmpeg -ss/-t`.
pub fn export_range_mp3(input: &Path, output: &Path, start_ms: i64, end_ms: i64) -> Result<()> {
    check_ffmpeg()?;

    if end_ms <= start_ms {
        return Err(PipelineError::AudioProcessing(
            "chunk range end must be after start".to_string(),
        ));
    }

    let start_secs = format!("{:.3}", start_ms as f64 / 1000.0);
    let duration_secs = format!("{:.3}", (end_ms - start_ms) as f64 / 1000.0);

    debug!(
        "exporting range [{}, {}) of {} to {}",
        start_ms,
        end_ms,
        input.display(),
        output.display()
    );

    let status = Command::new("ffmpeg")
        .args(["-y", "-ss"])
        .arg(&start_secs)
        .args(["-t"])
        .arg(&duration_secs)
        .args(["-i"])
        .arg(input)
        .args(["-vn", "-acodec", "libmp3lame", "-ar", "16000", "-ac", "1"])
        .arg(output)
        .status()
        .map_err(|e| PipelineError::AudioProcessing(format!("failed to run ffmpeg: {e}")))?;

    if !status.success() {
        return Err(PipelineError::AudioProcessing(
            "ffmpeg segment export failed".to_string(),
        ));
    }

    Ok(())
}

/// Decodes `input` to mono 16 kHz 32-bit float PCM, the sample format
/// `whisper-rs` requires, via `ffmpeg -f f32le`. Used only by the local
/// transcription provider; the remote provider sends the encoded file
/// as-is over HTTP.
pub fn decode_to_pcm_f32(input: &Path) -> Result<Vec<f32>> {
    check_ffmpeg()?;

    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(input)
        .args(["-f", "f32le", "-ac", "1", "-ar", "16000", "-"])
        .output()
        .map_err(|e| PipelineError::AudioProcessing(format!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::AudioProcessing(format!(
            "ffmpeg pcm decode failed: {stderr}"
        )));
    }

    Ok(output
        .stdout
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
