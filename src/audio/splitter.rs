//! Fixed-duration audio splitter (SPEC_FULL.md §4.6). Decodes the complete
//! source audio, reports total duration, and exports contiguous time-range
//! slices to mp3 files. Built on the same `ffmpeg`/`ffprobe` subprocess
//! primitives the rest of this module already uses for duration probing and
//! segment export, rather than introducing a second in-process decode path.

use super::extract::{check_ffprobe, export_range_mp3, get_audio_duration};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ChunkFile {
    pub index: i32,
    pub path: PathBuf,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// `N = ceil(D / C)` (§4.1 step 5), returning the half-open millisecond
/// range for each chunk index. The final chunk is shorter than `C` when
/// `D` is not a multiple of it.
pub fn compute_chunk_ranges(duration_ms: i64, chunk_duration_ms: i64) -> Vec<(i64, i64)> {
    if duration_ms <= 0 || chunk_duration_ms <= 0 {
        return Vec::new();
    }
    let n = (duration_ms + chunk_duration_ms - 1) / chunk_duration_ms;
    (0..n)
        .map(|i| {
            let start = i * chunk_duration_ms;
            let end = ((i + 1) * chunk_duration_ms).min(duration_ms);
            (start, end)
        })
        .collect()
}

/// Writes `raw_audio` to a staging input file, decodes its duration, and
/// exports one mp3 file per fixed-duration chunk into `staging_dir`. On any
/// failure, already-written chunk files are deleted and the staging
/// directory is removed if it is left empty, before the error propagates
/// (§4.6).
pub async fn split_audio(
    raw_audio: &[u8],
    staging_dir: &Path,
    chunk_duration_ms: i64,
) -> Result<(i64, Vec<ChunkFile>)> {
    check_ffprobe()?;

    tokio::fs::create_dir_all(staging_dir).await?;

    let source_path = staging_dir.join("source_input");
    tokio::fs::write(&source_path, raw_audio).await?;

    match split_audio_inner(&source_path, staging_dir, chunk_duration_ms).await {
        Ok(result) => Ok(result),
        Err(e) => {
            cleanup_partial(staging_dir, &source_path).await;
            Err(e)
        }
    }
}

async fn split_audio_inner(
    source_path: &Path,
    staging_dir: &Path,
    chunk_duration_ms: i64,
) -> Result<(i64, Vec<ChunkFile>)> {
    let duration = get_audio_duration(source_path)?;
    let duration_ms = duration.as_millis() as i64;

    let ranges = compute_chunk_ranges(duration_ms, chunk_duration_ms);
    info!(
        "splitting {} ms of audio into {} chunk(s) of {} ms",
        duration_ms,
        ranges.len(),
        chunk_duration_ms
    );

    let mut chunks = Vec::with_capacity(ranges.len());
    for (index, (start_ms, end_ms)) in ranges.into_iter().enumerate() {
        let chunk_path = staging_dir.join(format!("chunk_{index}.mp3"));
        export_range_mp3(source_path, &chunk_path, start_ms, end_ms)?;
        chunks.push(ChunkFile {
            index: index as i32,
            path: chunk_path,
            start_ms,
            end_ms,
        });
    }

    Ok((duration_ms, chunks))
}

async fn cleanup_partial(staging_dir: &Path, source_path: &Path) {
    let _ = tokio::fs::remove_file(source_path).await;

    let mut entries = match tokio::fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("chunk_"))
            .unwrap_or(false)
        {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("failed to clean up partial chunk file {:?}: {}", path, e);
            }
        }
    }

    if is_dir_empty(staging_dir).await {
        let _ = tokio::fs::remove_dir(staging_dir).await;
    }
}

async fn is_dir_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Recursively removes a meeting's staging directory (§4.3 step 6).
pub async fn remove_staging_dir(staging_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(staging_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::Io(e)),
    }
}
