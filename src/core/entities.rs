use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Where binary media comes from: a fetchable URL or inline base64 data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum MediaSource {
    #[serde(rename = "url")]
    Url { url: String },
    #[serde(rename = "base64")]
    Base64 { data: String },
}

/// A tool invocation emitted by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Opaque JSON arguments; callers parse against their own schema.
    pub arguments: serde_json::Value,
}

/// One unit of message content. Exactly one payload per tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default)]
        mime: Option<String>,
    },
    #[serde(rename = "audio")]
    Audio {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default)]
        mime: Option<String>,
    },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCall),
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Image { .. } => "image",
            ContentBlock::Audio { .. } => "audio",
            ContentBlock::ToolCall(_) => "tool_call",
            ContentBlock::ToolResult { .. } => "tool_result",
        }
    }
}

/// A single conversation turn: a role plus an ordered sequence of blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::text(text)],
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            }],
            name: None,
        }
    }

    /// Concatenate all text blocks in order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    /// Role determines which block kinds are valid: tool_call blocks only on
    /// assistant messages, tool_result blocks only on tool messages.
    pub fn validate(&self) -> Result<(), String> {
        for block in &self.content {
            let ok = match block {
                ContentBlock::ToolCall(_) => self.role == Role::Assistant,
                ContentBlock::ToolResult { .. } => self.role == Role::Tool,
                _ => true,
            };
            if !ok {
                return Err(format!(
                    "{} block not allowed in {} message",
                    block.kind(),
                    self.role
                ));
            }
        }
        Ok(())
    }
}

/// A function the model may call, described by a JSON schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool { name: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

/// Normalized token accounting, always these three fields regardless of
/// what the vendor reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why a generation ended. A lossy but stable normalization of
/// vendor-specific finish reasons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Stop,
}

/// Budget at or below this maps to [`ReasoningEffort::Low`].
pub const LOW_EFFORT_MAX_BUDGET: u32 = 1_000;
/// Budget at or above this maps to [`ReasoningEffort::High`].
pub const HIGH_EFFORT_MIN_BUDGET: u32 = 10_000;

/// Three-tier effort level for vendors that take an effort knob instead of
/// a raw thinking-token budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Deterministic budget-to-tier mapping. The thresholds are a fixed
    /// design choice, not derived from any vendor's documentation.
    pub fn from_budget_tokens(budget: u32) -> Self {
        if budget <= LOW_EFFORT_MAX_BUDGET {
            ReasoningEffort::Low
        } else if budget >= HIGH_EFFORT_MIN_BUDGET {
            ReasoningEffort::High
        } else {
            ReasoningEffort::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Everything a caller can ask of a text generation, vendor-neutral.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerateTextOptions {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub reasoning_budget_tokens: Option<u32>,
}

/// The unified result of a completed generation. Raw vendor payloads are
/// kept for diagnostics only; nothing downstream should parse them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateTextResult {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub raw_request: Option<serde_json::Value>,
    #[serde(default)]
    pub raw_response: Option<serde_json::Value>,
}

impl GenerateTextResult {
    /// Concatenate all text blocks of the output.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    /// All tool calls the model asked for, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_blocks_in_order() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::text("Hello"),
                ContentBlock::text(", "),
                ContentBlock::text("world"),
            ],
            name: None,
        };
        assert_eq!(msg.text(), "Hello, world");
    }

    #[test]
    fn validate_rejects_tool_call_outside_assistant() {
        let msg = Message {
            role: Role::User,
            content: vec![ContentBlock::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                arguments: serde_json::json!({}),
            })],
            name: None,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validate_rejects_tool_result_outside_tool() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolResult {
                tool_call_id: "call_1".into(),
                content: "42".into(),
            }],
            name: None,
        };
        assert!(msg.validate().is_err());
        assert!(Message::tool_result("call_1", "42").validate().is_ok());
    }

    #[test]
    fn reasoning_effort_thresholds() {
        assert_eq!(ReasoningEffort::from_budget_tokens(0), ReasoningEffort::Low);
        assert_eq!(
            ReasoningEffort::from_budget_tokens(1_000),
            ReasoningEffort::Low
        );
        assert_eq!(
            ReasoningEffort::from_budget_tokens(1_001),
            ReasoningEffort::Medium
        );
        assert_eq!(
            ReasoningEffort::from_budget_tokens(9_999),
            ReasoningEffort::Medium
        );
        assert_eq!(
            ReasoningEffort::from_budget_tokens(10_000),
            ReasoningEffort::High
        );
    }

    #[test]
    fn content_block_serde_tagging() {
        let block = ContentBlock::text("hi");
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["text"], "hi");

        let back: ContentBlock =
            serde_json::from_value(serde_json::json!({"type": "text", "text": "hi"})).unwrap();
        assert!(matches!(back, ContentBlock::Text { text } if text == "hi"));
    }
}
