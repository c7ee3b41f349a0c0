//! Pluggable byte-source abstraction over object storage and HTTP(S)
//! (SPEC_FULL.md §4.5). Both variants expose a lazy, finite, non-restartable
//! chunk sequence; the dispatcher buffers the whole thing into memory before
//! handing it to the audio decoder (§4.1 step 4).

mod http;
mod s3;

pub use http::HttpByteStream;
pub use s3::S3ByteStream;

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ByteStream: Send {
    /// Returns the next chunk of bytes, or `None` once the stream is
    /// exhausted. Not restartable: calling again after `None` is undefined
    /// behavior left to the implementation (both variants here just keep
    /// returning `None`).
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Drains a `ByteStream` to completion, per §4.1 step 4 ("buffer streamed
/// bytes into memory and hand to the audio decoder").
pub async fn buffer_all(stream: &mut dyn ByteStream) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next_chunk().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

enum ParsedUrl {
    S3 { bucket: String, key: String },
    Http(String),
}

fn parse_url(audio_url: &str) -> Result<ParsedUrl> {
    if let Some(rest) = audio_url.strip_prefix("s3://") {
        let mut parts = rest.splitn(2, '/');
        let bucket = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Streaming(format!("invalid s3 url: {audio_url}")))?;
        let key = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Streaming(format!("invalid s3 url: {audio_url}")))?;
        return Ok(ParsedUrl::S3 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    if audio_url.starts_with("http://") || audio_url.starts_with("https://") {
        return Ok(ParsedUrl::Http(audio_url.to_string()));
    }

    Err(PipelineError::Streaming(format!(
        "unsupported object-store url scheme: {audio_url}"
    )))
}

/// Opens the correct `ByteStream` variant for a source URL, dispatching on
/// scheme as described in §4.5.
pub async fn open_stream(audio_url: &str, settings: &Settings) -> Result<Box<dyn ByteStream>> {
    match parse_url(audio_url)? {
        ParsedUrl::S3 { bucket, key } => {
            let stream = S3ByteStream::open(&bucket, &key, settings).await?;
            Ok(Box::new(stream))
        }
        ParsedUrl::Http(url) => {
            let stream = HttpByteStream::open(&url).await?;
            Ok(Box::new(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_url() {
        match parse_url("s3://my-bucket/path/to/audio.mp3").unwrap() {
            ParsedUrl::S3 { bucket, key } => {
                assert_eq!(bucket, "my-bucket");
                assert_eq!(key, "path/to/audio.mp3");
            }
            _ => panic!("expected S3 variant"),
        }
    }

    #[test]
    fn parses_http_url() {
        match parse_url("https://example.com/audio.mp3").unwrap() {
            ParsedUrl::Http(url) => assert_eq!(url, "https://example.com/audio.mp3"),
            _ => panic!("expected Http variant"),
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_url("ftp://example.com/audio.mp3").is_err());
    }

    #[test]
    fn rejects_s3_url_missing_key() {
        assert!(parse_url("s3://bucket-only").is_err());
    }
}
