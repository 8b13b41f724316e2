//! Core types for Aimux: provider identities, chat messages, call options,
//! results, usage records, and health snapshots.
//!
//! Everything a caller hands to, or receives from, the provider layer lives
//! here so the runtime and the transports agree on one vocabulary.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// ProviderId
// ─────────────────────────────────────────────

/// Identity of a provider. Immutable key for every per-provider map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gateway")]
    Gateway,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "google")]
    Google,
}

impl ProviderId {
    /// Every known provider, in canonical enumeration order.
    pub const ALL: [ProviderId; 5] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Gateway,
        ProviderId::OpenAiCompatible,
        ProviderId::Google,
    ];

    /// Wire/config name (e.g. `"openai-compatible"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gateway => "gateway",
            ProviderId::OpenAiCompatible => "openai-compatible",
            ProviderId::Google => "google",
        }
    }

    /// Human-readable label, e.g. `"Openai Compatible"`.
    pub fn label(&self) -> String {
        self.as_str()
            .split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Namespace used for per-provider env keys (`AI_OPENAI_COMPATIBLE_...`).
    pub fn env_namespace(&self) -> String {
        format!("AI_{}", self.as_str().to_uppercase().replace('-', "_"))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ProviderId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == trimmed)
            .ok_or_else(|| format!("unknown provider '{}'", trimmed))
    }
}

// ─────────────────────────────────────────────
// Chat messages
// ─────────────────────────────────────────────

/// Role of one turn in a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// One role-tagged turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// A tool call requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique ID for this tool call (used to match results).
    pub id: String,
    /// Always "function" in the OpenAI-compatible format.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

/// The function name and arguments within a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments string.
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Token usage
// ─────────────────────────────────────────────

/// Token counts reported by a transport. Any field may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl TokenUsage {
    /// Total tokens, derived from the parts when the transport omitted it.
    pub fn resolved_total(&self) -> Option<u32> {
        self.total_tokens.or(match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        })
    }
}

// ─────────────────────────────────────────────
// Abort-free call options
// ─────────────────────────────────────────────

/// Sampling and routing knobs shared by every operation.
///
/// Unset sampling fields fall back to the global configuration; `model`
/// overrides the per-provider model selection for this call only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallOptions {
    /// Pin this call to one provider (disables fallback for the call).
    pub provider: Option<ProviderId>,
    /// Disable fallback for this call even when no provider is pinned.
    pub disable_fallback: Option<bool>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    /// Opaque response-format hint forwarded to the transport.
    pub response_format: Option<serde_json::Value>,
    /// Caller annotations attached to usage events (scalars only survive).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ─────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────

/// Result of `generate_text`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResult {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: UsageMetrics,
    pub metadata: ResultMetadata,
}

/// Result of `chat`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResult {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: UsageMetrics,
    pub metadata: ResultMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Transport-side extras returned alongside a result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub warnings: Vec<String>,
}

/// One element of a token stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub token: String,
    pub index: usize,
    pub provider: ProviderId,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    /// Set on the terminal chunk (empty token) of a completed stream.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

/// Input to `embed`: one string or an ordered batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    /// Combined character length of the input, for usage metrics.
    pub fn char_len(&self) -> usize {
        match self {
            EmbeddingInput::Single(s) => s.chars().count(),
            EmbeddingInput::Batch(items) => items.iter().map(|s| s.chars().count()).sum(),
        }
    }

    pub fn values(&self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(s) => vec![s.clone()],
            EmbeddingInput::Batch(items) => items.clone(),
        }
    }
}

impl From<&str> for EmbeddingInput {
    fn from(value: &str) -> Self {
        EmbeddingInput::Single(value.to_string())
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(value: Vec<String>) -> Self {
        EmbeddingInput::Batch(value)
    }
}

/// Embedding request: input plus an optional target dimensionality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRequest {
    pub input: EmbeddingInput,
    #[serde(default)]
    pub dimensions: Option<u32>,
}

impl EmbeddingRequest {
    pub fn new(input: impl Into<EmbeddingInput>) -> Self {
        EmbeddingRequest {
            input: input.into(),
            dimensions: None,
        }
    }
}

/// Result of `embed`. `vector` mirrors `vectors[0]` for batch input.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<Vec<Vec<f32>>>,
    pub provider: ProviderId,
    pub model: String,
    pub usage: UsageMetrics,
}

// ─────────────────────────────────────────────
// Usage metrics / events
// ─────────────────────────────────────────────

/// Scalar annotation value carried on usage records.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Annotation {
    Text(String),
    Number(f64),
    Flag(bool),
}

/// Per-call usage record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub provider: ProviderId,
    pub model: String,
    pub success: bool,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Annotation>,
}

/// Which client operation produced a usage event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Generate,
    Stream,
    Chat,
    Embed,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Generate => "generate",
            Operation::Stream => "stream",
            Operation::Chat => "chat",
            Operation::Embed => "embed",
        }
    }
}

/// A usage record as delivered to listeners.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    #[serde(flatten)]
    pub metrics: UsageMetrics,
    pub operation: Operation,
    pub prompt_length: usize,
    pub response_length: usize,
}

// ─────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────

/// Health state of a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Health record for one provider. Callers only ever see copies.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub id: ProviderId,
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// Fresh healthy record, stamped now.
    pub fn initial(id: ProviderId) -> Self {
        ProviderHealth {
            id,
            status: HealthStatus::Healthy,
            last_checked: Utc::now(),
            consecutive_failures: 0,
            latency_ms: None,
            last_error: None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
