//! Worker entrypoint (SPEC_FULL.md §9 "Inversion of cyclic dependencies"):
//! one binary, one role per process, selected by `--role` at startup. Each
//! role builds its own dependency graph once here and hands it to a
//! broker-consumer loop; there is no shared mutable global state beyond the
//! broker/cache/store client pools, which own their own connection
//! lifetimes by design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scribeline::broker::{ack_or_warn, LapinBroker};
use scribeline::broker::messages::{
    ChunkMessage, ExtractKeyNotesMessage, GenerateTasksMessage, MergeMessage,
    StartTranscribeMessage, SummarizeMessage, QUEUE_SUMMARIZE, QUEUE_TRANSCRIBE,
    ROUTING_EXTRACT_KEY_NOTES, ROUTING_GENERATE_TASKS, ROUTING_SUMMARIZE_GENERATE,
    ROUTING_TRANSCRIBE_CHUNK, ROUTING_TRANSCRIBE_MERGE, ROUTING_TRANSCRIBE_START,
};
use scribeline::cache::{ChunkCache, RedisChunkCache};
use scribeline::config::{Settings, WorkerRole};
use scribeline::error::Result;
use scribeline::llm::{LlmClient, OpenAiLlmClient};
use scribeline::pipeline;
use scribeline::store::{MeetingStore, PostgresMeetingStore};
use scribeline::transcribe::{create_transcriber, Transcriber};

/// Fixed per-queue backoff policy named explicitly in SPEC_FULL.md (dispatch
/// retries at 60s, chunk-transcription retries at 30s), distinct from the
/// generic `RETRY_DELAY_SECONDS` setting other stages fall back to.
const DISPATCH_RETRY_BACKOFF: Duration = Duration::from_secs(60);
const CHUNK_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "scribeline")]
#[command(about = "Distributed meeting transcription and summarization pipeline worker")]
struct Cli {
    /// Which pipeline stage this process runs: dispatcher, chunk-worker, merger, summarizer.
    #[arg(long, env = "WORKER_ROLE")]
    role: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_logging(&settings.log_level);

    let role: WorkerRole = cli
        .role
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal; finishing in-flight message then exiting");
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .ok();

    let broker = Arc::new(LapinBroker::connect(&settings.broker_url).await?);
    let settings = Arc::new(settings);

    let result = match role {
        WorkerRole::Dispatcher => {
            let store = Arc::new(PostgresMeetingStore::connect(&settings.database_url).await?);
            run_dispatcher(broker, store, settings, shutdown).await
        }
        WorkerRole::ChunkWorker => {
            let cache = Arc::new(RedisChunkCache::connect(&settings.cache_url).await?);
            let transcriber: Arc<dyn Transcriber> = Arc::from(create_transcriber(&settings)?);
            run_chunk_worker(broker, cache, transcriber, settings, shutdown).await
        }
        WorkerRole::Merger => {
            let store = Arc::new(PostgresMeetingStore::connect(&settings.database_url).await?);
            let cache = Arc::new(RedisChunkCache::connect(&settings.cache_url).await?);
            run_merger(broker, store, cache, settings, shutdown).await
        }
        WorkerRole::Summarizer => {
            let store = Arc::new(PostgresMeetingStore::connect(&settings.database_url).await?);
            let llm: Arc<dyn LlmClient> = Arc::new(OpenAiLlmClient::new(
                settings
                    .llm_api_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("LLM_API_KEY is required for the summarizer role"))?,
                settings.llm_model.clone(),
                settings.llm_api_base.clone(),
            ));
            run_summarizer(broker, store, llm, settings, shutdown).await
        }
    };

    if let Err(e) = &result {
        error!("worker loop for role {:?} exited with error: {}", role, e);
    }
    Ok(result?)
}

async fn run_dispatcher(
    broker: Arc<LapinBroker>,
    store: Arc<PostgresMeetingStore>,
    settings: Arc<Settings>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let queue = "q.transcribe.start";
    broker
        .declare_role_queue(QUEUE_TRANSCRIBE, queue, &[ROUTING_TRANSCRIBE_START])
        .await?;
    let mut consumer = broker
        .consume(queue, settings.prefetch_multiplier as u16, "dispatcher")
        .await?;

    info!("dispatcher consuming {}", queue);
    while !shutdown.load(Ordering::SeqCst) {
        let Some(delivery) = consumer.next().await else {
            break;
        };
        let delivery = delivery.map_err(scribeline::error::PipelineError::Amqp)?;

        let message: StartTranscribeMessage = match serde_json::from_slice(&delivery.data) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed start-transcribe message: {}", e);
                broker.reject(&delivery).await?;
                continue;
            }
        };

        match pipeline::dispatch_transcription(&*store, &*broker, &settings, message).await {
            Ok(ack) => {
                info!("dispatched {} chunks for meeting {}", ack.total_chunks, ack.meeting_id);
                ack_or_warn(&broker, &delivery, queue).await;
            }
            Err(e) if e.is_retriable() => {
                requeue_or_drop(&broker, &delivery, QUEUE_TRANSCRIBE, queue, settings.max_retries, DISPATCH_RETRY_BACKOFF, &e).await;
            }
            Err(e) => {
                warn!("dispatch failed terminally on {}: {}", queue, e);
                ack_or_warn(&broker, &delivery, queue).await;
            }
        }
    }
    Ok(())
}

async fn run_chunk_worker(
    broker: Arc<LapinBroker>,
    cache: Arc<RedisChunkCache>,
    transcriber: Arc<dyn Transcriber>,
    settings: Arc<Settings>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let queue = "q.transcribe.chunk";
    broker
        .declare_role_queue(QUEUE_TRANSCRIBE, queue, &[ROUTING_TRANSCRIBE_CHUNK])
        .await?;
    let mut consumer = broker
        .consume(queue, settings.prefetch_multiplier as u16, "chunk-worker")
        .await?;

    info!("chunk worker consuming {}", queue);
    while !shutdown.load(Ordering::SeqCst) {
        let Some(delivery) = consumer.next().await else {
            break;
        };
        let delivery = delivery.map_err(scribeline::error::PipelineError::Amqp)?;

        let message: ChunkMessage = match serde_json::from_slice(&delivery.data) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed chunk message: {}", e);
                broker.reject(&delivery).await?;
                continue;
            }
        };

        match pipeline::process_chunk(&*cache, &*broker, &*transcriber, message).await {
            Ok(()) => ack_or_warn(&broker, &delivery, queue).await,
            Err(e) if e.is_retriable() => {
                requeue_or_drop(&broker, &delivery, QUEUE_TRANSCRIBE, queue, settings.max_retries, CHUNK_RETRY_BACKOFF, &e).await;
            }
            Err(e) => {
                warn!("chunk transcription failed terminally on {}: {}", queue, e);
                ack_or_warn(&broker, &delivery, queue).await;
            }
        }
    }
    Ok(())
}

async fn run_merger(
    broker: Arc<LapinBroker>,
    store: Arc<PostgresMeetingStore>,
    cache: Arc<RedisChunkCache>,
    settings: Arc<Settings>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let queue = "q.transcribe.merge";
    broker
        .declare_role_queue(QUEUE_TRANSCRIBE, queue, &[ROUTING_TRANSCRIBE_MERGE])
        .await?;
    let mut consumer = broker
        .consume(queue, settings.prefetch_multiplier as u16, "merger")
        .await?;

    info!("merger consuming {}", queue);
    while !shutdown.load(Ordering::SeqCst) {
        let Some(delivery) = consumer.next().await else {
            break;
        };
        let delivery = delivery.map_err(scribeline::error::PipelineError::Amqp)?;

        let message: MergeMessage = match serde_json::from_slice(&delivery.data) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed merge message: {}", e);
                broker.reject(&delivery).await?;
                continue;
            }
        };

        match pipeline::finalize_merge(&*store, &*cache, &*broker, &settings, message).await {
            Ok(()) => ack_or_warn(&broker, &delivery, queue).await,
            Err(e) if e.is_retriable() => {
                requeue_or_drop(
                    &broker,
                    &delivery,
                    QUEUE_TRANSCRIBE,
                    queue,
                    settings.max_retries,
                    settings.retry_delay(),
                    &e,
                )
                .await;
            }
            Err(e) => {
                warn!("merge failed terminally on {}: {}", queue, e);
                ack_or_warn(&broker, &delivery, queue).await;
            }
        }
    }
    Ok(())
}

async fn run_summarizer(
    broker: Arc<LapinBroker>,
    store: Arc<PostgresMeetingStore>,
    llm: Arc<dyn LlmClient>,
    settings: Arc<Settings>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let queue = "q.summarize.work";
    broker
        .declare_role_queue(
            QUEUE_SUMMARIZE,
            queue,
            &[ROUTING_SUMMARIZE_GENERATE, ROUTING_EXTRACT_KEY_NOTES, ROUTING_GENERATE_TASKS],
        )
        .await?;
    let mut consumer = broker
        .consume(queue, settings.prefetch_multiplier as u16, "summarizer")
        .await?;

    info!("summarizer consuming {}", queue);
    while !shutdown.load(Ordering::SeqCst) {
        let Some(delivery) = consumer.next().await else {
            break;
        };
        let delivery = delivery.map_err(scribeline::error::PipelineError::Amqp)?;

        let outcome = match delivery.routing_key.as_str() {
            ROUTING_SUMMARIZE_GENERATE => {
                dispatch_json(&delivery.data, |m: SummarizeMessage| {
                    pipeline::summarize_meeting(&*store, &*broker, &*llm, &settings, m)
                })
                .await
            }
            ROUTING_EXTRACT_KEY_NOTES => {
                dispatch_json(&delivery.data, |m: ExtractKeyNotesMessage| {
                    pipeline::extract_key_notes(&*store, &*llm, m)
                })
                .await
            }
            ROUTING_GENERATE_TASKS => {
                dispatch_json(&delivery.data, |m: GenerateTasksMessage| {
                    pipeline::generate_tasks(&*store, &*llm, m)
                })
                .await
            }
            other => {
                warn!("summarizer received unknown routing key {}, dropping", other);
                broker.reject(&delivery).await?;
                continue;
            }
        };

        match outcome {
            Ok(()) => ack_or_warn(&broker, &delivery, queue).await,
            Err(DispatchError::Malformed(e)) => {
                warn!("dropping malformed message on {}: {}", queue, e);
                broker.reject(&delivery).await?;
            }
            Err(DispatchError::Pipeline(e)) if e.is_retriable() => {
                requeue_or_drop(
                    &broker,
                    &delivery,
                    QUEUE_SUMMARIZE,
                    queue,
                    settings.max_retries,
                    settings.retry_delay(),
                    &e,
                )
                .await;
            }
            Err(DispatchError::Pipeline(e)) => {
                warn!("summarize stage failed terminally on {}: {}", queue, e);
                ack_or_warn(&broker, &delivery, queue).await;
            }
        }
    }
    Ok(())
}

enum DispatchError {
    Malformed(serde_json::Error),
    Pipeline(scribeline::error::PipelineError),
}

async fn dispatch_json<M, Fut>(
    payload: &[u8],
    handler: impl FnOnce(M) -> Fut,
) -> std::result::Result<(), DispatchError>
where
    M: serde::de::DeserializeOwned,
    Fut: std::future::Future<Output = Result<()>>,
{
    let message: M = serde_json::from_slice(payload).map_err(DispatchError::Malformed)?;
    handler(message).await.map_err(DispatchError::Pipeline)
}

/// Shared retry-or-drop tail for every consumer loop: attempts a
/// requeue-by-republish (SPEC_FULL.md §5, §7) and logs either outcome. The
/// original delivery is always acked afterward — either a retried copy now
/// exists on the queue, or retries are exhausted and the pipeline stage has
/// already persisted the corresponding terminal failure.
async fn requeue_or_drop(
    broker: &LapinBroker,
    delivery: &lapin::message::Delivery,
    exchange: &str,
    queue: &str,
    max_retries: u32,
    backoff: Duration,
    error: &scribeline::error::PipelineError,
) {
    match broker.retry_or_exhaust(delivery, exchange, max_retries, backoff).await {
        Ok(true) => warn!("requeued failed message on {} after error: {}", queue, error),
        Ok(false) => warn!("exhausted retries on {}, dropping after error: {}", queue, error),
        Err(e) => warn!("failed to requeue message on {}: {} (original error: {})", queue, e, error),
    }
    ack_or_warn(broker, delivery, queue).await;
}
