//! Provider-agnostic language-model abstraction layer.
//!
//! A [`registry::Registry`] holds named model instances built by
//! per-provider factories. Every model speaks the same unified protocol:
//! synchronous generation, pull-based streaming with cancellation, and
//! vendor-tracked batch jobs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use llm_bridge::config::ConfigTarget;
//! use llm_bridge::core::entities::{GenerateTextOptions, Message};
//! use llm_bridge::providers::openai::OpenAiFactory;
//! use llm_bridge::registry::Registry;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let registry = Registry::new();
//!     registry.register_factory(Arc::new(OpenAiFactory));
//!
//!     let model = registry
//!         .add_model(
//!             "default",
//!             ConfigTarget::new("openai", "gpt-4o").with_api_key("sk-..."),
//!         )
//!         .await?;
//!
//!     let result = model
//!         .generate_text(GenerateTextOptions {
//!             messages: vec![Message::user("Hello!")],
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("{}", result.text());
//!
//!     let mut stream = model
//!         .stream_text(GenerateTextOptions {
//!             messages: vec![Message::user("Hello again!")],
//!             ..Default::default()
//!         })
//!         .await?;
//!     while let Some(event) = stream.next().await {
//!         // deltas, then exactly one MessageDone or Error
//!     }
//!
//!     registry.close().await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod core;
pub mod metrics;
pub mod observability;
pub mod providers;
pub mod registry;
pub mod stream;

pub use crate::batch::{BatchJob, BatchPage, BatchRequestItem, BatchResult, BatchStatus};
pub use crate::config::{ConfigTarget, RegistryConfig};
pub use crate::core::entities::{
    ContentBlock, GenerateTextOptions, GenerateTextResult, Message, Role, StopReason, Usage,
};
pub use crate::providers::{
    Capabilities, Capability, LanguageModel, ProviderError, ProviderFactory,
};
pub use crate::registry::{Registry, RegistryError};
pub use crate::stream::{StreamEvent, StreamIterator};
