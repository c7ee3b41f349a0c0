use super::ByteStream;
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;

async fn build_client(settings: &Settings) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let (Some(access_key), Some(secret_key)) = (
        settings.object_store_access_key.as_ref(),
        settings.object_store_secret_key.as_ref(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "scribeline");
        loader = loader.credentials_provider(credentials);
    }

    let sdk_config = loader.load().await;
    let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = settings.object_store_endpoint.as_ref() {
        s3_config = s3_config.endpoint_url(endpoint);
    }
    Client::from_conf(s3_config.build())
}

/// Native-protocol S3 object reader, retried on throttling and other
/// errors with the `2^attempt`-second backoff from SPEC_FULL.md §4.5.
/// Once opened, the body is drained lazily via `next_chunk`.
pub struct S3ByteStream {
    body: SdkByteStream,
}

impl S3ByteStream {
    pub async fn open(bucket: &str, key: &str, settings: &Settings) -> Result<Self> {
        let client = build_client(settings).await;

        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt));
                debug!("retrying s3://{}/{} after {:?}", bucket, key, delay);
                tokio::time::sleep(delay).await;
            }

            match client.get_object().bucket(bucket).key(key).send().await {
                Ok(output) => return Ok(S3ByteStream { body: output.body }),
                Err(e) => {
                    let message = e.to_string();
                    let throttled = message.to_lowercase().contains("slow down")
                        || message.to_lowercase().contains("throttl");
                    if throttled {
                        warn!("s3 throttled get_object for s3://{}/{}: {}", bucket, key, message);
                    } else {
                        warn!(
                            "s3 get_object failed for s3://{}/{} (attempt {}): {}",
                            bucket,
                            key,
                            attempt + 1,
                            message
                        );
                    }
                    last_error = Some(message);
                }
            }
        }

        Err(PipelineError::NetworkRetryExhausted(format!(
            "exhausted {} retries for s3://{}/{}: {}",
            MAX_ATTEMPTS,
            bucket,
            key,
            last_error.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl ByteStream for S3ByteStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.body.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes.to_vec())),
            Some(Err(e)) => Err(PipelineError::Streaming(e.to_string())),
            None => Ok(None),
        }
    }
}
