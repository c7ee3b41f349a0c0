use super::ByteStream;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_FACTOR: f64 = 2.0;
const OVERALL_TIMEOUT_SECS: u64 = 300;

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        429 | 500 | 502 | 503 | 504
    )
}

/// HTTP(S) streaming GET, retried on transport errors and the status codes
/// in SPEC_FULL.md §4.5 (GET only — this reader never issues any other
/// method). Once a response is established, its body is drained lazily via
/// `next_chunk`.
pub struct HttpByteStream {
    response: reqwest::Response,
}

impl HttpByteStream {
    pub async fn open(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(OVERALL_TIMEOUT_SECS))
            .build()?;

        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_secs_f64(BACKOFF_FACTOR.powi(attempt as i32));
                debug!("retrying HTTP GET {} after {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }

            match client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(HttpByteStream { response });
                }
                Ok(response) if is_retriable_status(response.status()) => {
                    warn!(
                        "HTTP GET {} returned retriable status {}, attempt {}",
                        url,
                        response.status(),
                        attempt + 1
                    );
                    last_error = Some(PipelineError::Streaming(format!(
                        "HTTP GET failed with status {}",
                        response.status()
                    )));
                }
                Ok(response) => {
                    return Err(PipelineError::Streaming(format!(
                        "HTTP GET failed with non-retriable status {}",
                        response.status()
                    )));
                }
                Err(e) => {
                    warn!("HTTP GET {} transport error, attempt {}: {}", url, attempt + 1, e);
                    last_error = Some(PipelineError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or(PipelineError::NetworkRetryExhausted(format!(
            "exhausted retries for {url}"
        ))))
        .map_err(|_| {
            PipelineError::NetworkRetryExhausted(format!(
                "exhausted {MAX_ATTEMPTS} retries for {url}"
            ))
        })
    }
}

#[async_trait]
impl ByteStream for HttpByteStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(PipelineError::Http(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_status_codes() {
        assert!(is_retriable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retriable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retriable_status(StatusCode::NOT_FOUND));
        assert!(!is_retriable_status(StatusCode::FORBIDDEN));
    }
}
