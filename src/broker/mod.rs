//! The message broker seam. A `Broker` publishes JSON payloads to a named
//! queue under a routing key, optionally carrying a deterministic message
//! id (SPEC_FULL.md §6). AMQP itself has no cross-publish dedup guarantee,
//! which is why the merge-barrier idempotence in §5 is enforced by the
//! merger's own status check rather than relied upon here.

pub mod messages;

mod lapin_broker;

pub use lapin_broker::{ack_or_warn, LapinBroker};

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish_raw(
        &self,
        queue: &str,
        routing_key: &str,
        message_id: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<()>;
}

/// Convenience wrapper used by every pipeline stage: serialize to JSON, then
/// publish. Kept as a free function rather than a trait default method so
/// the trait stays object-safe.
pub async fn publish_json<B, M>(
    broker: &B,
    queue: &str,
    routing_key: &str,
    message_id: Option<&str>,
    message: &M,
) -> Result<()>
where
    B: Broker + ?Sized,
    M: Serialize + Sync,
{
    let payload = serde_json::to_vec(message)?;
    broker.publish_raw(queue, routing_key, message_id, payload).await
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! In-memory `Broker` recording every publish, used by pipeline-stage
    //! and integration tests to assert on what was enqueued without a live
    //! AMQP connection.
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Published {
        pub queue: String,
        pub routing_key: String,
        pub message_id: Option<String>,
        pub payload: Vec<u8>,
    }

    #[derive(Default)]
    pub struct FakeBroker {
        published: Mutex<Vec<Published>>,
    }

    impl FakeBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }

        pub fn count_with_routing_key(&self, routing_key: &str) -> usize {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.routing_key == routing_key)
                .count()
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn publish_raw(
            &self,
            queue: &str,
            routing_key: &str,
            message_id: Option<&str>,
            payload: Vec<u8>,
        ) -> Result<()> {
            self.published.lock().unwrap().push(Published {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
                message_id: message_id.map(String::from),
                payload,
            });
            Ok(())
        }
    }
}
