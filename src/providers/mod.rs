//! Provider adapters and the capability interfaces they implement.
//!
//! The registry and stream iterator only ever see these traits; vendor
//! types stay inside one adapter module per provider.

use std::sync::Arc;

use thiserror::Error;

pub mod anthropic;
pub mod openai;

use crate::batch::{BatchJob, BatchPage, BatchRequestItem, BatchResult};
use crate::config::ConfigTarget;
use crate::core::entities::{GenerateTextOptions, GenerateTextResult};
use crate::stream::StreamIterator;

/// A named feature a model may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    TextGeneration,
    Streaming,
    ToolCalling,
    Vision,
    Audio,
    Batch,
    StructuredOutput,
    Reasoning,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::TextGeneration => "text-generation",
            Capability::Streaming => "streaming",
            Capability::ToolCalling => "tool-calling",
            Capability::Vision => "vision",
            Capability::Audio => "audio",
            Capability::Batch => "batch",
            Capability::StructuredOutput => "structured-output",
            Capability::Reasoning => "reasoning",
        };
        f.write_str(s)
    }
}

/// What one adapter instance can do.
#[derive(Clone, Copy, Debug, Default)]
pub struct Capabilities {
    pub text: bool,
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
    pub audio: bool,
    pub batch: bool,
    pub structured_output: bool,
    pub reasoning: bool,
}

impl Capabilities {
    pub fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::TextGeneration => self.text,
            Capability::Streaming => self.streaming,
            Capability::ToolCalling => self.tools,
            Capability::Vision => self.vision,
            Capability::Audio => self.audio,
            Capability::Batch => self.batch,
            Capability::StructuredOutput => self.structured_output,
            Capability::Reasoning => self.reasoning,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("missing model name")]
    MissingModel,
    #[error("auth error: {0}")]
    Auth(String),
    #[error("rate_limited")]
    RateLimited,
    #[error("upstream_timeout")]
    Timeout,
    #[error("upstream_error: {0}")]
    Upstream(String),
    #[error("invalid_request: {0}")]
    Invalid(String),
    #[error("response mapping failed: {0}")]
    Mapping(String),
    #[error("capability not supported: {0}")]
    Unsupported(Capability),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Upstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Mapping(e.to_string())
    }
}

/// The unified model interface. One implementation per vendor.
///
/// Batch methods default to [`ProviderError::Unsupported`] so adapters
/// without a vendor batch API stay honest about their capability set.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider tag this adapter is registered under, e.g. "openai".
    fn provider(&self) -> &'static str;

    /// Vendor-side model identifier, e.g. "gpt-4o".
    fn model_id(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Synchronous generation: build the vendor request, invoke, map back.
    async fn generate_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<GenerateTextResult, ProviderError>;

    /// Start a streaming generation. Fails only if the stream could not be
    /// initiated; mid-flight failures arrive as a terminal
    /// [`crate::stream::StreamEvent::Error`] on the iterator.
    async fn stream_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<StreamIterator, ProviderError>;

    /// Serialize the items into the vendor's batch payload, upload it, and
    /// register a job. Returns immediately with a pending/processing job.
    async fn submit_batch(
        &self,
        items: Vec<BatchRequestItem>,
    ) -> Result<BatchJob, ProviderError> {
        let _ = items;
        Err(ProviderError::Unsupported(Capability::Batch))
    }

    /// Refresh a job's status from the vendor.
    async fn get_batch_job(&self, id: &str) -> Result<BatchJob, ProviderError> {
        let _ = id;
        Err(ProviderError::Unsupported(Capability::Batch))
    }

    async fn list_batch_jobs(&self, page: BatchPage) -> Result<Vec<BatchJob>, ProviderError> {
        let _ = page;
        Err(ProviderError::Unsupported(Capability::Batch))
    }

    async fn cancel_batch_job(&self, id: &str) -> Result<BatchJob, ProviderError> {
        let _ = id;
        Err(ProviderError::Unsupported(Capability::Batch))
    }

    /// Download and parse the job's output. Per-line failures become
    /// item-scoped [`BatchResult`] errors; only transport or missing-output
    /// failures abort the whole call.
    async fn download_batch_results(
        &self,
        job: &BatchJob,
    ) -> Result<Vec<BatchResult>, ProviderError> {
        let _ = job;
        Err(ProviderError::Unsupported(Capability::Batch))
    }

    /// Release any held resources. HTTP-only adapters have nothing to do.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Builds model instances for one provider string.
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Validate the target and construct an adapter. May perform network
    /// validation; the registry never holds its lock across this call.
    async fn create(
        &self,
        target: &ConfigTarget,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_supports_matches_fields() {
        let caps = Capabilities {
            text: true,
            streaming: true,
            batch: false,
            ..Default::default()
        };
        assert!(caps.supports(Capability::TextGeneration));
        assert!(caps.supports(Capability::Streaming));
        assert!(!caps.supports(Capability::Batch));
        assert!(!caps.supports(Capability::Vision));
    }

    #[test]
    fn json_error_maps_to_mapping() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            ProviderError::from(json_err),
            ProviderError::Mapping(_)
        ));
    }
}
