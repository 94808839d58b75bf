//! Anthropic-style adapter: Messages API generation and streaming.
//!
//! No vendor batch API is wired up, so the batch methods keep their
//! unsupported defaults and `capabilities().batch` stays false. Tool
//! results ride in user messages (vendor requirement), one result per
//! message. The thinking budget passes through natively instead of being
//! collapsed to an effort tier.

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigTarget;
use crate::core::entities::{
    ContentBlock, GenerateTextOptions, GenerateTextResult, MediaSource, Role, StopReason,
    ToolCall, ToolChoice, Usage,
};
use crate::metrics;
use crate::providers::{Capabilities, LanguageModel, ProviderError, ProviderFactory};
use crate::stream::{StreamEvent, StreamIterator, STREAM_CHANNEL_CAPACITY};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicFactory;

#[async_trait::async_trait]
impl ProviderFactory for AnthropicFactory {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn create(
        &self,
        target: &ConfigTarget,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let api_key = target
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        if target.model.is_empty() {
            return Err(ProviderError::MissingModel);
        }
        let timeout = target
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        let base_url = target
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        tracing::info!(model = %target.model, base_url = %base_url, "anthropic model created");
        Ok(Arc::new(AnthropicModel {
            client,
            api_key,
            base_url,
            model: target.model.clone(),
        }))
    }
}

pub struct AnthropicModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicModel {
    fn map_stop_reason(reason: &str) -> StopReason {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::Stop,
        }
    }

    fn error_for_status(status: StatusCode, body: String) -> ProviderError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
            StatusCode::BAD_REQUEST => ProviderError::Invalid(body),
            _ => ProviderError::Upstream(format!("status {}: {}", status, body)),
        }
    }

    fn map_content_part(block: &ContentBlock) -> Option<Value> {
        match block {
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image { source, mime } => match source {
                MediaSource::Url { url } => Some(json!({
                    "type": "image",
                    "source": {"type": "url", "url": url},
                })),
                MediaSource::Base64 { data } => Some(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": mime.as_deref().unwrap_or("image/png"),
                        "data": data,
                    },
                })),
            },
            // No audio input on this vendor; degrade to a marker.
            ContentBlock::Audio { source, .. } => {
                let label = match source {
                    MediaSource::Url { url } => format!("[audio: {}]", url),
                    MediaSource::Base64 { .. } => "[inline audio]".to_string(),
                };
                Some(json!({"type": "text", "text": label}))
            }
            ContentBlock::ToolCall(_) | ContentBlock::ToolResult { .. } => None,
        }
    }

    /// Vendor message mapping. System prompts go top-level (returned
    /// separately); assistant tool calls become `tool_use` blocks; each
    /// tool result becomes its own `user` message with one `tool_result`
    /// block.
    fn map_messages(opts: &GenerateTextOptions) -> Result<(Option<String>, Vec<Value>), ProviderError> {
        let mut system = opts.system.clone();
        let mut out = Vec::new();
        for msg in &opts.messages {
            msg.validate().map_err(ProviderError::Invalid)?;
            match msg.role {
                Role::System => {
                    // Fold trailing system messages into the top-level prompt.
                    let text = msg.text();
                    system = Some(match system {
                        Some(existing) => format!("{}\n{}", existing, text),
                        None => text,
                    });
                }
                Role::User => {
                    let parts: Vec<Value> =
                        msg.content.iter().filter_map(Self::map_content_part).collect();
                    if !parts.is_empty() {
                        out.push(json!({"role": "user", "content": parts}));
                    }
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    let text = msg.text();
                    if !text.is_empty() {
                        parts.push(json!({"type": "text", "text": text}));
                    }
                    for block in &msg.content {
                        if let ContentBlock::ToolCall(call) = block {
                            parts.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                    }
                    if !parts.is_empty() {
                        out.push(json!({"role": "assistant", "content": parts}));
                    }
                }
                Role::Tool => {
                    for block in &msg.content {
                        if let ContentBlock::ToolResult {
                            tool_call_id,
                            content,
                        } = block
                        {
                            out.push(json!({
                                "role": "user",
                                "content": [{
                                    "type": "tool_result",
                                    "tool_use_id": tool_call_id,
                                    "content": content,
                                }],
                            }));
                        }
                    }
                }
            }
        }
        Ok((system, out))
    }

    fn build_request(&self, opts: &GenerateTextOptions, stream: bool) -> Result<Value, ProviderError> {
        let (system, messages) = Self::map_messages(opts)?;
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = opts.top_p {
            body["top_p"] = json!(t);
        }
        if let Some(stop) = &opts.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = &opts.tools {
            let tools_json: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools_json);
        }
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::None => json!({"type": "none"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Tool { name } => json!({"type": "tool", "name": name}),
            };
        }
        if let Some(budget) = opts.reasoning_budget_tokens {
            // This vendor takes a raw budget; no effort-tier collapse.
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }
        if stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }

    fn usage_from(v: &Value) -> Usage {
        let input = v["input_tokens"].as_u64().unwrap_or(0);
        let output = v["output_tokens"].as_u64().unwrap_or(0);
        Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }

    fn map_response(raw_request: Value, v: Value) -> Result<GenerateTextResult, ProviderError> {
        let mut content = Vec::new();
        if let Some(blocks) = v["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or_default() {
                    "text" => {
                        if let Some(text) = block["text"].as_str() {
                            content.push(ContentBlock::text(text));
                        }
                    }
                    "tool_use" => {
                        content.push(ContentBlock::ToolCall(ToolCall {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: block["input"].clone(),
                        }));
                    }
                    // thinking blocks and future kinds stay in raw_response
                    _ => {}
                }
            }
        }
        let stop_reason = v["stop_reason"]
            .as_str()
            .map(Self::map_stop_reason)
            .unwrap_or(StopReason::EndTurn);
        let usage = Self::usage_from(&v["usage"]);
        Ok(GenerateTextResult {
            content,
            usage,
            stop_reason,
            raw_request: Some(raw_request),
            raw_response: Some(v),
        })
    }
}

/// Event-name dispatch for the Messages stream: input usage arrives on
/// `message_start`, deltas on `content_block_delta`, stop reason and
/// output usage on `message_delta`, and `message_stop` ends the stream.
#[derive(Default)]
struct StreamState {
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl StreamState {
    fn on_event(&mut self, event: &str, data: &str) -> (Vec<StreamEvent>, bool) {
        let mut events = Vec::new();
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable stream chunk");
                return (events, false);
            }
        };
        match event {
            "message_start" => {
                self.usage = AnthropicModel::usage_from(&v["message"]["usage"]);
            }
            "content_block_start" => {
                if v.pointer("/content_block/type").and_then(|x| x.as_str()) == Some("tool_use") {
                    let index = v["index"].as_u64().unwrap_or(0) as u32;
                    let id = v
                        .pointer("/content_block/id")
                        .and_then(|x| x.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = v
                        .pointer("/content_block/name")
                        .and_then(|x| x.as_str())
                        .unwrap_or_default()
                        .to_string();
                    events.push(StreamEvent::ToolCallDelta {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments_delta: String::new(),
                    });
                }
            }
            "content_block_delta" => match v.pointer("/delta/type").and_then(|x| x.as_str()) {
                Some("text_delta") => {
                    if let Some(text) = v.pointer("/delta/text").and_then(|x| x.as_str()) {
                        if !text.is_empty() {
                            events.push(StreamEvent::ContentDelta { text: text.into() });
                        }
                    }
                }
                Some("input_json_delta") => {
                    let index = v["index"].as_u64().unwrap_or(0) as u32;
                    let partial = v
                        .pointer("/delta/partial_json")
                        .and_then(|x| x.as_str())
                        .unwrap_or_default();
                    events.push(StreamEvent::ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments_delta: partial.to_string(),
                    });
                }
                _ => {}
            },
            "message_delta" => {
                if let Some(reason) = v.pointer("/delta/stop_reason").and_then(|x| x.as_str()) {
                    self.stop_reason = Some(AnthropicModel::map_stop_reason(reason));
                }
                let output = v.pointer("/usage/output_tokens").and_then(|x| x.as_u64());
                if let Some(output) = output {
                    self.usage.output_tokens = output;
                    self.usage.total_tokens = self.usage.input_tokens + output;
                }
            }
            "message_stop" => return (events, true),
            _ => {}
        }
        (events, false)
    }

    fn finish_event(&self) -> StreamEvent {
        StreamEvent::MessageDone {
            usage: self.usage,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicModel {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            text: true,
            streaming: true,
            tools: true,
            vision: true,
            audio: false,
            batch: false,
            structured_output: false,
            reasoning: true,
        }
    }

    async fn generate_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<GenerateTextResult, ProviderError> {
        let body = self.build_request(&opts, false)?;
        let url = format!("{}/v1/messages", self.base_url);
        let timer = metrics::GENERATION_DURATION
            .with_label_values(&["anthropic", &self.model, "false"])
            .start_timer();
        let resp = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await;
        timer.observe_duration();
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                metrics::record_generation("anthropic", &self.model, "error");
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            metrics::record_generation("anthropic", &self.model, "error");
            return Err(Self::error_for_status(status, text));
        }
        let v: Value = resp.json().await?;
        let result = Self::map_response(body, v)?;
        metrics::record_generation("anthropic", &self.model, "ok");
        metrics::record_usage("anthropic", &self.model, &result.usage);
        Ok(result)
    }

    async fn stream_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<StreamIterator, ProviderError> {
        let body = self.build_request(&opts, true)?;
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, text));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let worker_token = cancel.clone();
        let model = self.model.clone();
        let mut chunks = resp.bytes_stream().eventsource();

        metrics::ACTIVE_STREAMS.inc();
        tokio::spawn(async move {
            let mut state = StreamState::default();
            let terminal = 'pump: loop {
                let next = tokio::select! {
                    _ = worker_token.cancelled() => break 'pump None,
                    next = chunks.next() => next,
                };
                match next {
                    None => break 'pump Some(state.finish_event()),
                    Some(Err(e)) => {
                        break 'pump Some(StreamEvent::Error {
                            error: ProviderError::Upstream(e.to_string()),
                        })
                    }
                    Some(Ok(chunk)) => {
                        if chunk.event == "error" {
                            break 'pump Some(StreamEvent::Error {
                                error: ProviderError::Upstream(chunk.data),
                            });
                        }
                        let (events, done) = state.on_event(&chunk.event, &chunk.data);
                        for event in events {
                            tokio::select! {
                                _ = worker_token.cancelled() => break 'pump None,
                                sent = tx.send(event) => {
                                    if sent.is_err() {
                                        break 'pump None;
                                    }
                                }
                            }
                        }
                        if done {
                            break 'pump Some(state.finish_event());
                        }
                    }
                }
            };
            match terminal {
                Some(event) => {
                    if let StreamEvent::MessageDone { usage, .. } = &event {
                        metrics::record_generation("anthropic", &model, "ok");
                        metrics::record_usage("anthropic", &model, usage);
                    } else {
                        metrics::record_generation("anthropic", &model, "error");
                    }
                    tokio::select! {
                        _ = worker_token.cancelled() => {}
                        _ = tx.send(event) => {}
                    }
                }
                None => {
                    tracing::debug!(model = %model, "stream worker cancelled");
                }
            }
            metrics::ACTIVE_STREAMS.dec();
        });

        Ok(StreamIterator::new(rx, cancel))
    }
}
