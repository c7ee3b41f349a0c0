//! The LLM provider seam used by the summarizer (SPEC_FULL.md §4.4): a
//! single-operation capability, `generate(prompt) -> String`, with its
//! retry policy folded into the concrete client rather than exposed to
//! callers.

mod openai;

pub use openai::OpenAiLlmClient;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory `LlmClient` for summarizer unit tests. Returns whatever
    //! canned response was configured, or echoes the prompt back so a test
    //! that doesn't care about content still gets a deterministic string.
    use super::*;
    use std::sync::Mutex;

    pub struct FakeLlmClient {
        responses: Mutex<Vec<String>>,
        pub prompts_seen: Mutex<Vec<String>>,
    }

    impl FakeLlmClient {
        /// Responses are returned in order, one per call; the last one
        /// configured is reused once the list is exhausted.
        pub fn with_responses(responses: Vec<impl Into<String>>) -> Self {
            FakeLlmClient {
                responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
                prompts_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlmClient {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts_seen.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses.first().cloned().unwrap_or_default())
            }
        }
    }
}
