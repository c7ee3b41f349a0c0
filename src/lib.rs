pub mod audio;
pub mod broker;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod streaming;
pub mod summarize;
pub mod transcribe;

pub use config::Settings;
pub use error::{PipelineError, Result};
