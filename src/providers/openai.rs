//! OpenAI-style adapter: synchronous generation, SSE streaming, and the
//! file-based batch lifecycle (upload → /batches → output file download).

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{
    map_vendor_status, BatchJob, BatchPage, BatchRequestItem, BatchResult, BatchStatus,
    BatchStorage,
};
use crate::config::ConfigTarget;
use crate::core::entities::{
    ContentBlock, GenerateTextOptions, GenerateTextResult, MediaSource, ReasoningEffort,
    ResponseFormat, Role, StopReason, ToolCall, ToolChoice, Usage,
};
use crate::metrics;
use crate::providers::{
    Capabilities, LanguageModel, ProviderError, ProviderFactory,
};
use crate::stream::{StreamEvent, StreamIterator, STREAM_CHANNEL_CAPACITY};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Endpoint each batch input line targets.
const BATCH_ENDPOINT: &str = "/v1/chat/completions";
const BATCH_COMPLETION_WINDOW: &str = "24h";

/// Vendor batch status → normalized status. Unknown strings fall back to
/// pending in [`map_vendor_status`].
const BATCH_STATUS_TABLE: &[(&str, BatchStatus)] = &[
    ("validating", BatchStatus::Pending),
    ("in_progress", BatchStatus::Processing),
    ("finalizing", BatchStatus::Processing),
    ("cancelling", BatchStatus::Processing),
    ("completed", BatchStatus::Completed),
    ("failed", BatchStatus::Failed),
    ("expired", BatchStatus::Failed),
    ("cancelled", BatchStatus::Cancelled),
];

pub struct OpenAiFactory;

#[async_trait::async_trait]
impl ProviderFactory for OpenAiFactory {
    fn provider(&self) -> &'static str {
        "openai"
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
        tracing::info!(model = %target.model, base_url = %base_url, "openai model created");
        Ok(Arc::new(OpenAiModel {
            client,
            api_key,
            base_url,
            model: target.model.clone(),
        }))
    }
}

pub struct OpenAiModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiModel {
    fn map_stop_reason(finish: &str) -> StopReason {
        match finish {
            "stop" => StopReason::EndTurn,
            "length" => StopReason::MaxTokens,
            "tool_calls" | "function_call" => StopReason::ToolUse,
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

    fn usage_from(v: &Value) -> Usage {
        let input = v["prompt_tokens"].as_u64().unwrap_or(0);
        let output = v["completion_tokens"].as_u64().unwrap_or(0);
        let total = v["total_tokens"].as_u64().unwrap_or(input + output);
        Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: total,
        }
    }

    fn map_content_part(block: &ContentBlock) -> Value {
        match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::Image { source, .. } => match source {
                MediaSource::Url { url } => {
                    json!({"type": "image_url", "image_url": {"url": url}})
                }
                MediaSource::Base64 { data } => {
                    json!({"type": "image_url", "image_url": {"url": format!("data:image/*;base64,{}", data)}})
                }
            },
            ContentBlock::Audio { source, mime } => match source {
                MediaSource::Base64 { data } => {
                    let format = mime
                        .as_deref()
                        .and_then(|m| m.rsplit('/').next())
                        .unwrap_or("wav");
                    json!({"type": "input_audio", "input_audio": {"data": data, "format": format}})
                }
                // Vendor takes inline audio only; degrade a URL to a marker.
                MediaSource::Url { url } => json!({"type": "text", "text": format!("[audio: {}]", url)}),
            },
            // tool_call/tool_result never reach here; roles are mapped first.
            _ => json!({"type": "text", "text": ""}),
        }
    }

    /// Role-directed message mapping:
    /// text-only user messages stay plain strings, any image/audio block
    /// switches to a content-part list, assistant messages collapse into
    /// one text span plus a tool_calls list, and each tool_result block
    /// becomes its own tool message (one tool call per message).
    fn map_messages(opts: &GenerateTextOptions) -> Result<Vec<Value>, ProviderError> {
        let mut out = Vec::new();
        if let Some(system) = &opts.system {
            out.push(json!({"role": "system", "content": system}));
        }
        for msg in &opts.messages {
            msg.validate().map_err(ProviderError::Invalid)?;
            match msg.role {
                Role::System => {
                    out.push(json!({"role": "system", "content": msg.text()}));
                }
                Role::User => {
                    let multimodal = msg.content.iter().any(|b| {
                        matches!(b, ContentBlock::Image { .. } | ContentBlock::Audio { .. })
                    });
                    let content = if multimodal {
                        let parts: Vec<Value> =
                            msg.content.iter().map(Self::map_content_part).collect();
                        json!(parts)
                    } else {
                        json!(msg.text())
                    };
                    out.push(json!({"role": "user", "content": content}));
                }
                Role::Assistant => {
                    let text = msg.text();
                    let tool_calls: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolCall(call) => Some(json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })),
                            _ => None,
                        })
                        .collect();
                    let mut m = json!({"role": "assistant"});
                    m["content"] = if text.is_empty() {
                        Value::Null
                    } else {
                        json!(text)
                    };
                    if !tool_calls.is_empty() {
                        m["tool_calls"] = json!(tool_calls);
                    }
                    out.push(m);
                }
                Role::Tool => {
                    // One vendor message per tool result.
                    for block in &msg.content {
                        if let ContentBlock::ToolResult {
                            tool_call_id,
                            content,
                        } = block
                        {
                            out.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn build_request(&self, opts: &GenerateTextOptions, stream: bool) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::map_messages(opts)?,
        });
        if let Some(t) = opts.max_tokens {
            body["max_tokens"] = json!(t);
        }
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = opts.top_p {
            body["top_p"] = json!(t);
        }
        if let Some(stop) = &opts.stop {
            body["stop"] = json!(stop);
        }
        if let Some(tools) = &opts.tools {
            let tools_json: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools_json);
        }
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Tool { name } => {
                    json!({"type": "function", "function": {"name": name}})
                }
            };
        }
        if let Some(format) = &opts.response_format {
            body["response_format"] = match format {
                ResponseFormat::Text => json!({"type": "text"}),
                ResponseFormat::JsonObject => json!({"type": "json_object"}),
                ResponseFormat::JsonSchema { name, schema } => json!({
                    "type": "json_schema",
                    "json_schema": {"name": name, "schema": schema, "strict": true},
                }),
            };
        }
        if let Some(budget) = opts.reasoning_budget_tokens {
            body["reasoning_effort"] = json!(ReasoningEffort::from_budget_tokens(budget).as_str());
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        Ok(body)
    }

    fn map_response(raw_request: Value, v: Value) -> Result<GenerateTextResult, ProviderError> {
        let mut content = Vec::new();
        if let Some(text) = v
            .pointer("/choices/0/message/content")
            .and_then(|x| x.as_str())
        {
            if !text.is_empty() {
                content.push(ContentBlock::text(text));
            }
        }
        if let Some(calls) = v
            .pointer("/choices/0/message/tool_calls")
            .and_then(|x| x.as_array())
        {
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call
                    .pointer("/function/name")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                let raw_args = call
                    .pointer("/function/arguments")
                    .and_then(|x| x.as_str())
                    .unwrap_or("{}");
                let arguments: Value = serde_json::from_str(raw_args).map_err(|e| {
                    ProviderError::Mapping(format!(
                        "malformed tool call arguments for '{}': {}",
                        name, e
                    ))
                })?;
                content.push(ContentBlock::ToolCall(ToolCall {
                    id,
                    name,
                    arguments,
                }));
            }
        }
        let stop_reason = v
            .pointer("/choices/0/finish_reason")
            .and_then(|x| x.as_str())
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

    fn map_batch_job(v: &Value) -> Result<BatchJob, ProviderError> {
        let id = v["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Mapping("batch job id missing".into()))?
            .to_string();
        let status = map_vendor_status(BATCH_STATUS_TABLE, v["status"].as_str().unwrap_or(""));
        let counts = &v["request_counts"];
        let created_at = v["created_at"]
            .as_i64()
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);
        let completed_at = v["completed_at"]
            .as_i64()
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok());
        let error = v
            .pointer("/errors/data/0/message")
            .and_then(|x| x.as_str())
            .map(String::from);
        Ok(BatchJob {
            id,
            status,
            total_count: counts["total"].as_u64().unwrap_or(0),
            done_count: counts["completed"].as_u64().unwrap_or(0),
            failed_count: counts["failed"].as_u64().unwrap_or(0),
            created_at,
            completed_at,
            error,
            storage: BatchStorage {
                input_ref: v["input_file_id"].as_str().unwrap_or_default().to_string(),
                output_ref: v["output_file_id"].as_str().map(String::from),
                kind: "file".to_string(),
            },
        })
    }

    /// Parse one output line. Any per-line failure is captured in the
    /// result instead of aborting the download.
    fn parse_output_line(line: &str) -> BatchResult {
        let v: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return BatchResult {
                    custom_id: String::new(),
                    outcome: Err(format!("malformed output line: {}", e)),
                }
            }
        };
        let custom_id = v["custom_id"].as_str().unwrap_or_default().to_string();
        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let code = err["code"].as_str().unwrap_or("error");
            let message = err["message"].as_str().unwrap_or_default();
            return BatchResult {
                custom_id,
                outcome: Err(format!("{}: {}", code, message)),
            };
        }
        let status = v
            .pointer("/response/status_code")
            .and_then(|x| x.as_u64())
            .unwrap_or(0);
        if status != 200 {
            return BatchResult {
                custom_id,
                outcome: Err(format!("vendor returned status {}", status)),
            };
        }
        let body = v.pointer("/response/body").cloned().unwrap_or(Value::Null);
        let outcome = Self::map_response(Value::Null, body).map_err(|e| e.to_string());
        BatchResult { custom_id, outcome }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, text));
        }
        Ok(resp.json().await?)
    }

    async fn get_json(&self, url: &str) -> Result<Value, ProviderError> {
        let resp = self.client.get(url).bearer_auth(&self.api_key).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, text));
        }
        Ok(resp.json().await?)
    }
}

/// Accumulates stream-level state (usage arrives on the final data chunk,
/// finish_reason on the last content chunk) while translating each SSE
/// data payload into zero or more events.
#[derive(Default)]
struct StreamState {
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl StreamState {
    fn on_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable stream chunk");
                return events;
            }
        };
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage = OpenAiModel::usage_from(usage);
        }
        let delta = &v["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(StreamEvent::ContentDelta { text: text.into() });
            }
        }
        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                events.push(StreamEvent::ToolCallDelta {
                    index: call["index"].as_u64().unwrap_or(0) as u32,
                    id: call["id"].as_str().map(String::from),
                    name: call
                        .pointer("/function/name")
                        .and_then(|x| x.as_str())
                        .map(String::from),
                    arguments_delta: call
                        .pointer("/function/arguments")
                        .and_then(|x| x.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
        if let Some(finish) = v
            .pointer("/choices/0/finish_reason")
            .and_then(|x| x.as_str())
        {
            self.stop_reason = Some(OpenAiModel::map_stop_reason(finish));
        }
        events
    }

    fn finish_event(&self) -> StreamEvent {
        StreamEvent::MessageDone {
            usage: self.usage,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiModel {
    fn provider(&self) -> &'static str {
        "openai"
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
            audio: true,
            batch: true,
            structured_output: true,
            reasoning: true,
        }
    }

    async fn generate_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<GenerateTextResult, ProviderError> {
        let body = self.build_request(&opts, false)?;
        let url = format!("{}/chat/completions", self.base_url);
        let timer = metrics::GENERATION_DURATION
            .with_label_values(&["openai", &self.model, "false"])
            .start_timer();
        let result = self.post_json(&url, &body).await;
        timer.observe_duration();
        let v = match result {
            Ok(v) => v,
            Err(e) => {
                metrics::record_generation("openai", &self.model, "error");
                return Err(e);
            }
        };
        let result = Self::map_response(body, v)?;
        metrics::record_generation("openai", &self.model, "ok");
        metrics::record_usage("openai", &self.model, &result.usage);
        Ok(result)
    }

    async fn stream_text(
        &self,
        opts: GenerateTextOptions,
    ) -> Result<StreamIterator, ProviderError> {
        let body = self.build_request(&opts, true)?;
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
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
            // Exactly one terminal event per stream; a cancelled stream
            // closes without one.
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
                        if chunk.data == "[DONE]" {
                            break 'pump Some(state.finish_event());
                        }
                        for event in state.on_data(&chunk.data) {
                            tokio::select! {
                                _ = worker_token.cancelled() => break 'pump None,
                                sent = tx.send(event) => {
                                    if sent.is_err() {
                                        // Consumer dropped the iterator.
                                        break 'pump None;
                                    }
                                }
                            }
                        }
                    }
                }
            };
            match terminal {
                Some(event) => {
                    if let StreamEvent::MessageDone { usage, .. } = &event {
                        metrics::record_generation("openai", &model, "ok");
                        metrics::record_usage("openai", &model, usage);
                    } else {
                        metrics::record_generation("openai", &model, "error");
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

    async fn submit_batch(
        &self,
        items: Vec<BatchRequestItem>,
    ) -> Result<BatchJob, ProviderError> {
        if items.is_empty() {
            return Err(ProviderError::Invalid("empty batch submission".into()));
        }
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let custom_id = if item.custom_id.is_empty() {
                format!("item-{}", Uuid::new_v4())
            } else {
                item.custom_id.clone()
            };
            let body = self.build_request(&item.options, false)?;
            let line = json!({
                "custom_id": custom_id,
                "method": "POST",
                "url": BATCH_ENDPOINT,
                "body": body,
            });
            lines.push(serde_json::to_string(&line)?);
        }
        let payload = lines.join("\n");

        let part = reqwest::multipart::Part::text(payload)
            .file_name("batch.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);
        let resp = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, text));
        }
        let upload: Value = resp.json().await?;
        let file_id = upload["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Mapping("file upload returned no id".into()))?;

        let v = self
            .post_json(
                &format!("{}/batches", self.base_url),
                &json!({
                    "input_file_id": file_id,
                    "endpoint": BATCH_ENDPOINT,
                    "completion_window": BATCH_COMPLETION_WINDOW,
                }),
            )
            .await?;
        let job = Self::map_batch_job(&v)?;
        metrics::BATCH_JOBS_TOTAL
            .with_label_values(&["openai", v["status"].as_str().unwrap_or("unknown")])
            .inc();
        tracing::info!(job_id = %job.id, items = items.len(), "batch submitted");
        Ok(job)
    }

    async fn get_batch_job(&self, id: &str) -> Result<BatchJob, ProviderError> {
        let v = self
            .get_json(&format!("{}/batches/{}", self.base_url, id))
            .await?;
        Self::map_batch_job(&v)
    }

    async fn list_batch_jobs(&self, page: BatchPage) -> Result<Vec<BatchJob>, ProviderError> {
        let mut url = format!("{}/batches", self.base_url);
        let mut sep = '?';
        if let Some(limit) = page.limit {
            url.push_str(&format!("{}limit={}", sep, limit));
            sep = '&';
        }
        if let Some(after) = &page.after {
            url.push_str(&format!("{}after={}", sep, after));
        }
        let v = self.get_json(&url).await?;
        let data = v["data"].as_array().cloned().unwrap_or_default();
        data.iter().map(Self::map_batch_job).collect()
    }

    async fn cancel_batch_job(&self, id: &str) -> Result<BatchJob, ProviderError> {
        let v = self
            .post_json(
                &format!("{}/batches/{}/cancel", self.base_url, id),
                &json!({}),
            )
            .await?;
        Self::map_batch_job(&v)
    }

    async fn download_batch_results(
        &self,
        job: &BatchJob,
    ) -> Result<Vec<BatchResult>, ProviderError> {
        let output_ref = job.storage.output_ref.as_deref().ok_or_else(|| {
            ProviderError::Invalid(format!("batch job {} has no output to download", job.id))
        })?;
        let resp = self
            .client
            .get(format!("{}/files/{}/content", self.base_url, output_ref))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, text));
        }
        let text = resp.text().await?;
        let results: Vec<BatchResult> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Self::parse_output_line(line))
            .collect();
        tracing::debug!(
            job_id = %job.id,
            results = results.len(),
            failed = results.iter().filter(|r| r.outcome.is_err()).count(),
            "batch results downloaded"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::{Message, ToolDefinition};

    fn model() -> OpenAiModel {
        OpenAiModel {
            client: Client::new(),
            api_key: "test-key".into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: "gpt-4o".into(),
        }
    }

    #[test]
    fn text_only_user_message_maps_to_plain_string() {
        let opts = GenerateTextOptions {
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        let body = model().build_request(&opts, false).unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn image_block_switches_to_content_parts() {
        let opts = GenerateTextOptions {
            messages: vec![Message {
                role: Role::User,
                content: vec![
                    ContentBlock::text("what is this?"),
                    ContentBlock::Image {
                        source: MediaSource::Url {
                            url: "https://example.com/cat.png".into(),
                        },
                        mime: None,
                    },
                ],
                name: None,
            }],
            ..Default::default()
        };
        let body = model().build_request(&opts, false).unwrap();
        let content = &body["messages"][0]["content"];
        assert!(content.is_array());
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
    }

    #[test]
    fn assistant_message_collapses_text_and_tool_calls() {
        let opts = GenerateTextOptions {
            messages: vec![Message {
                role: Role::Assistant,
                content: vec![
                    ContentBlock::text("Let me check. "),
                    ContentBlock::text("One moment."),
                    ContentBlock::ToolCall(ToolCall {
                        id: "call_1".into(),
                        name: "get_weather".into(),
                        arguments: json!({"city": "Oslo"}),
                    }),
                ],
                name: None,
            }],
            ..Default::default()
        };
        let body = model().build_request(&opts, false).unwrap();
        let msg = &body["messages"][0];
        assert_eq!(msg["content"], "Let me check. One moment.");
        assert_eq!(msg["tool_calls"][0]["function"]["name"], "get_weather");
        // Arguments travel as a JSON string on the wire.
        assert!(msg["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_message_emits_one_vendor_message_per_result() {
        let opts = GenerateTextOptions {
            messages: vec![Message {
                role: Role::Tool,
                content: vec![
                    ContentBlock::ToolResult {
                        tool_call_id: "call_1".into(),
                        content: "12C".into(),
                    },
                    ContentBlock::ToolResult {
                        tool_call_id: "call_2".into(),
                        content: "sunny".into(),
                    },
                ],
                name: None,
            }],
            ..Default::default()
        };
        let body = model().build_request(&opts, false).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["tool_call_id"], "call_1");
        assert_eq!(messages[1]["tool_call_id"], "call_2");
    }

    #[test]
    fn system_prompt_and_generation_params() {
        let opts = GenerateTextOptions {
            messages: vec![Message::user("hi")],
            system: Some("be brief".into()),
            // Exactly representable in f32 so the JSON number round-trips.
            temperature: Some(0.25),
            max_tokens: Some(100),
            stop: Some(vec!["END".into()]),
            tools: Some(vec![ToolDefinition {
                name: "f".into(),
                description: Some("d".into()),
                parameters: json!({"type": "object"}),
            }]),
            tool_choice: Some(ToolChoice::Required),
            reasoning_budget_tokens: Some(50_000),
            ..Default::default()
        };
        let body = model().build_request(&opts, true).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["temperature"], 0.25);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["reasoning_effort"], "high");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn map_response_extracts_text_usage_and_stop() {
        let v = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        let result = OpenAiModel::map_response(Value::Null, v).unwrap();
        assert_eq!(result.text(), "hello");
        assert_eq!(result.stop_reason, StopReason::EndTurn);
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.total_tokens, 15);
    }

    #[test]
    fn malformed_tool_arguments_abort_mapping() {
        let v = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "f", "arguments": "{not json"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let err = OpenAiModel::map_response(Value::Null, v).unwrap_err();
        assert!(matches!(err, ProviderError::Mapping(_)));
    }

    #[test]
    fn finish_reason_normalization() {
        assert_eq!(OpenAiModel::map_stop_reason("stop"), StopReason::EndTurn);
        assert_eq!(OpenAiModel::map_stop_reason("length"), StopReason::MaxTokens);
        assert_eq!(
            OpenAiModel::map_stop_reason("tool_calls"),
            StopReason::ToolUse
        );
        assert_eq!(
            OpenAiModel::map_stop_reason("content_filter"),
            StopReason::Stop
        );
    }

    #[test]
    fn stream_state_translates_chunks() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        for data in [
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{"content":""},"finish_reason":"stop"}]}"#,
        ] {
            events.extend(state.on_data(data));
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            StreamEvent::ContentDelta { text } if text == "Hel"
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::ContentDelta { text } if text == "lo"
        ));
        assert!(matches!(
            state.finish_event(),
            StreamEvent::MessageDone { stop_reason: StopReason::EndTurn, .. }
        ));
    }

    #[test]
    fn stream_state_captures_tool_call_deltas_and_usage() {
        let mut state = StreamState::default();
        let events = state.on_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"f","arguments":"{\"a\""}}]}}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallDelta { index: 0, id: Some(id), .. } if id == "call_1"
        ));

        let events =
            state.on_data(r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#);
        assert!(events.is_empty());
        match state.finish_event() {
            StreamEvent::MessageDone { usage, .. } => {
                assert_eq!(usage.input_tokens, 7);
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("unexpected terminal: {:?}", other),
        }
    }

    #[test]
    fn unparseable_stream_chunk_is_skipped() {
        let mut state = StreamState::default();
        assert!(state.on_data("not json at all").is_empty());
    }

    #[test]
    fn batch_status_table_is_total_with_pending_default() {
        for raw in [
            "validating",
            "in_progress",
            "finalizing",
            "cancelling",
            "completed",
            "failed",
            "expired",
            "cancelled",
        ] {
            // Every known vendor string maps to exactly one status.
            let _ = map_vendor_status(BATCH_STATUS_TABLE, raw);
        }
        assert_eq!(
            map_vendor_status(BATCH_STATUS_TABLE, "some_future_status"),
            BatchStatus::Pending
        );
        assert_eq!(
            map_vendor_status(BATCH_STATUS_TABLE, "in_progress"),
            BatchStatus::Processing
        );
        assert_eq!(
            map_vendor_status(BATCH_STATUS_TABLE, "expired"),
            BatchStatus::Failed
        );
    }

    #[test]
    fn map_batch_job_reads_counts_and_storage() {
        let v = json!({
            "id": "batch_abc",
            "status": "in_progress",
            "created_at": 1_700_000_000,
            "request_counts": {"total": 10, "completed": 4, "failed": 1},
            "input_file_id": "file-in",
            "output_file_id": "file-out",
        });
        let job = OpenAiModel::map_batch_job(&v).unwrap();
        assert_eq!(job.id, "batch_abc");
        assert_eq!(job.status, BatchStatus::Processing);
        assert_eq!(job.total_count, 10);
        assert_eq!(job.done_count, 4);
        assert_eq!(job.failed_count, 1);
        assert_eq!(job.storage.output_ref.as_deref(), Some("file-out"));
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn output_line_partial_failure_is_item_scoped() {
        let ok_line = r#"{"id":"resp_1","custom_id":"a","response":{"status_code":200,"body":{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}}}"#;
        let vendor_err_line = r#"{"id":"resp_2","custom_id":"b","error":{"code":"rate_limit","message":"slow down"}}"#;
        let malformed_line = "{this is not json";

        let lines = [ok_line, vendor_err_line, malformed_line];
        let results: Vec<BatchResult> = lines
            .iter()
            .map(|l| OpenAiModel::parse_output_line(l))
            .collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].custom_id, "a");
        assert!(results[0].outcome.is_ok());
        assert_eq!(results[0].outcome.as_ref().unwrap().text(), "hi");

        assert_eq!(results[1].custom_id, "b");
        assert_eq!(results[1].error(), Some("rate_limit: slow down"));

        assert!(results[2].error().unwrap().starts_with("malformed output line"));
    }

    #[test]
    fn non_200_output_line_is_an_item_error() {
        let line = r#"{"custom_id":"c","response":{"status_code":500,"body":{}}}"#;
        let result = OpenAiModel::parse_output_line(line);
        assert_eq!(result.error(), Some("vendor returned status 500"));
    }
}
