//! AWS Bedrock Converse wire types.
//!
//! Unary request/response bodies are plain JSON; streaming responses arrive
//! as binary event-stream frames whose `:event-type` header selects the
//! payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
	#[default]
	User,
	Assistant,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Assistant => "assistant",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
	Text(String),
	Image(ImageBlock),
	Document(Value),
	ToolUse(ToolUseBlock),
	ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlock {
	/// One of `png`, `jpeg`, `gif`, `webp`.
	pub format: String,
	pub source: ImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
	/// Base64-encoded image bytes.
	pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
	pub tool_use_id: String,
	pub name: String,
	pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
	pub tool_use_id: String,
	pub content: Vec<ToolResultContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContentBlock {
	Text(String),
	Json(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContentBlock {
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
	pub messages: Vec<Message>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<Vec<SystemContentBlock>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inference_config: Option<InferenceConfiguration>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_config: Option<ToolConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
	pub tools: Vec<Tool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
	ToolSpec(ToolSpecification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input_schema: Option<ToolInputSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolInputSchema {
	Json(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolChoice {
	/// The model decides whether to call a tool.
	Auto {},
	/// The model must call at least one tool.
	Any {},
	/// The model must call the named tool. Only honored by some model
	/// families.
	Tool { name: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
	pub output: Option<ConverseOutput>,
	pub stop_reason: Option<StopReason>,
	pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConverseOutput {
	Message(Message),
	#[serde(other)]
	Unknown,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
	#[serde(rename = "inputTokens")]
	pub input_tokens: u32,
	#[serde(rename = "outputTokens")]
	pub output_tokens: u32,
	#[serde(rename = "totalTokens")]
	pub total_tokens: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
	EndTurn,
	StopSequence,
	MaxTokens,
	ContentFiltered,
	GuardrailIntervened,
	ToolUse,
	// Bedrock grows stop reasons over time; anything unrecognized maps to a
	// plain stop downstream.
	#[serde(other)]
	Unknown,
}

/// A JSON exception body returned by Bedrock on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ConverseErrorResponse {
	// Bedrock is inconsistent about capitalization here.
	#[serde(alias = "Message")]
	pub message: String,
}

/// One decoded event from a Converse event stream.
// This is not deserialized directly; see [`ConverseStreamEvent::decode`].
#[derive(Debug, Clone)]
pub enum ConverseStreamEvent {
	MessageStart(MessageStartEvent),
	ContentBlockStart(ContentBlockStartEvent),
	ContentBlockDelta(ContentBlockDeltaEvent),
	ContentBlockStop(ContentBlockStopEvent),
	MessageStop(MessageStopEvent),
	Metadata(MetadataEvent),
	/// A well-formed exception frame: the backend failed mid-stream.
	Exception(StreamException),
}

/// The payload of an exception frame, e.g. a mid-stream throttling or
/// validation failure.
#[derive(Debug, Clone)]
pub struct StreamException {
	pub exception_type: String,
	pub message: String,
}

impl ConverseStreamEvent {
	/// Decodes an event-stream frame into a stream event. The frame's
	/// `:message-type` and `:event-type` headers select the payload shape.
	/// Exception frames decode to [`ConverseStreamEvent::Exception`]; only a
	/// genuinely malformed frame is an error.
	pub fn decode(m: &aws_smithy_types::event_stream::Message) -> anyhow::Result<Self> {
		let get_header = |name: &str| -> Option<String> {
			m.headers()
				.iter()
				.find(|h| h.name().as_str() == name)
				.and_then(|h| h.value().as_string().ok())
				.map(|s| s.as_str().to_owned())
		};

		if get_header(":message-type").as_deref() == Some("exception") {
			let exception_type = get_header(":exception-type").unwrap_or_else(|| "unknown".to_owned());
			return Ok(Self::Exception(StreamException {
				exception_type,
				message: String::from_utf8_lossy(m.payload()).into_owned(),
			}));
		}

		let Some(event_type) = get_header(":event-type") else {
			anyhow::bail!("no event type header");
		};

		let payload = m.payload();
		Ok(match event_type.as_str() {
			"messageStart" => Self::MessageStart(serde_json::from_slice(payload)?),
			"contentBlockStart" => Self::ContentBlockStart(serde_json::from_slice(payload)?),
			"contentBlockDelta" => Self::ContentBlockDelta(serde_json::from_slice(payload)?),
			"contentBlockStop" => Self::ContentBlockStop(serde_json::from_slice(payload)?),
			"messageStop" => Self::MessageStop(serde_json::from_slice(payload)?),
			"metadata" => Self::Metadata(serde_json::from_slice(payload)?),
			other => anyhow::bail!("unexpected event type: {other}"),
		})
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStartEvent {
	pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStartEvent {
	pub start: Option<ContentBlockStart>,
	#[serde(default)]
	pub content_block_index: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockStart {
	ToolUse(ToolUseBlockStart),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlockStart {
	pub tool_use_id: String,
	pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
	pub delta: Option<ContentBlockDelta>,
	#[serde(default)]
	pub content_block_index: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockDelta {
	Text(String),
	ToolUse(ToolUseBlockDelta),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlockDelta {
	pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStopEvent {
	#[serde(default)]
	pub content_block_index: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
	pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEvent {
	pub usage: Option<TokenUsage>,
}
