//! OpenAI chat-completions wire types.
//!
//! The request message list is heterogeneous: each element is discriminated
//! by its `role`, and the shape of `content` depends on that role. The
//! decoders here translate the JSON shapes into proper sum types so that the
//! translators never reach into untyped JSON.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const OBJECT_CHAT_COMPLETION: &str = "chat.completion";
pub const OBJECT_CHAT_COMPLETION_CHUNK: &str = "chat.completion.chunk";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
	pub model: String,
	pub messages: Vec<ChatCompletionMessage>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop: Option<Stop>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Tool>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<ToolChoice>,
	// Fields this service does not interpret are carried through untouched.
	#[serde(flatten, default)]
	pub rest: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
	Sequence(String),
	Sequences(Vec<String>),
}

impl Stop {
	pub fn into_vec(self) -> Vec<String> {
		match self {
			Stop::Sequence(s) => vec![s],
			Stop::Sequences(v) => v,
		}
	}
}

/// A chat message, discriminated by the required `role` field.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatCompletionMessage {
	System(SystemMessage),
	Developer(DeveloperMessage),
	User(UserMessage),
	Assistant(AssistantMessage),
	Tool(ToolMessage),
}

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_DEVELOPER: &str = "developer";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_TOOL: &str = "tool";

impl ChatCompletionMessage {
	/// The role string carried on the message. The decoder keeps it in sync
	/// with the variant; hand-built messages may disagree.
	pub fn role(&self) -> &str {
		match self {
			Self::System(m) => &m.role,
			Self::Developer(m) => &m.role,
			Self::User(m) => &m.role,
			Self::Assistant(m) => &m.role,
			Self::Tool(m) => &m.role,
		}
	}
}

impl<'de> Deserialize<'de> for ChatCompletionMessage {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = Value::deserialize(deserializer)?;
		let Some(role) = value
			.get("role")
			.and_then(Value::as_str)
			.map(str::to_owned)
		else {
			return Err(D::Error::custom("chat message does not have role"));
		};
		match role.as_str() {
			ROLE_SYSTEM => SystemMessage::deserialize(value)
				.map(Self::System)
				.map_err(D::Error::custom),
			ROLE_DEVELOPER => DeveloperMessage::deserialize(value)
				.map(Self::Developer)
				.map_err(D::Error::custom),
			ROLE_USER => UserMessage::deserialize(value)
				.map(Self::User)
				.map_err(D::Error::custom),
			ROLE_ASSISTANT => AssistantMessage::deserialize(value)
				.map(Self::Assistant)
				.map_err(D::Error::custom),
			ROLE_TOOL => ToolMessage::deserialize(value)
				.map(Self::Tool)
				.map_err(D::Error::custom),
			other => Err(D::Error::custom(format!(
				"unknown ChatCompletionMessageParam type: {other}"
			))),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessage {
	pub role: String,
	pub content: TextContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperMessage {
	pub role: String,
	pub content: TextContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
	pub role: String,
	pub content: UserContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<AssistantContent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMessage {
	pub role: String,
	pub content: TextContent,
	#[serde(default)]
	pub tool_call_id: String,
}

/// Content that is either a bare string or a list of text parts. Used for
/// system, developer and tool messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextContent {
	Text(String),
	Parts(Vec<TextPart>),
}

impl TextContent {
	/// Flattens the content into a single string, joining parts with newlines.
	pub fn flatten(&self) -> String {
		match self {
			TextContent::Text(t) => t.clone(),
			TextContent::Parts(parts) => parts
				.iter()
				.map(|p| p.text.as_str())
				.collect::<Vec<_>>()
				.join("\n"),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
	pub r#type: String,
	pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
	Text(String),
	Parts(Vec<UserContentPart>),
}

/// A user content part, discriminated by the required `type` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentPart {
	Text { text: String },
	ImageUrl { image_url: ImageUrl },
	InputAudio { input_audio: InputAudio },
}

impl<'de> Deserialize<'de> for UserContentPart {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		struct TextOnly {
			text: String,
		}
		#[derive(Deserialize)]
		struct ImageOnly {
			image_url: ImageUrl,
		}
		#[derive(Deserialize)]
		struct AudioOnly {
			input_audio: InputAudio,
		}

		let value = Value::deserialize(deserializer)?;
		let Some(kind) = value
			.get("type")
			.and_then(Value::as_str)
			.map(str::to_owned)
		else {
			return Err(D::Error::custom("chat content does not have type"));
		};
		match kind.as_str() {
			"text" => TextOnly::deserialize(value)
				.map(|t| Self::Text { text: t.text })
				.map_err(D::Error::custom),
			"image_url" => ImageOnly::deserialize(value)
				.map(|i| Self::ImageUrl {
					image_url: i.image_url,
				})
				.map_err(D::Error::custom),
			"input_audio" => AudioOnly::deserialize(value)
				.map(|a| Self::InputAudio {
					input_audio: a.input_audio,
				})
				.map_err(D::Error::custom),
			other => Err(D::Error::custom(format!(
				"unknown ChatCompletionContentPartUnionParam type: {other}"
			))),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudio {
	pub data: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub format: Option<String>,
}

/// Assistant content is either a bare string or a structure carrying `text`
/// or `refusal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantContent {
	Text(String),
	Structured(AssistantStructuredContent),
}

impl AssistantContent {
	pub fn text(&self) -> Option<&str> {
		match self {
			AssistantContent::Text(t) => Some(t),
			AssistantContent::Structured(s) => s.text.as_deref().or(s.refusal.as_deref()),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantStructuredContent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refusal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
	pub id: String,
	pub r#type: String,
	pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
	pub name: String,
	/// JSON-encoded arguments, exactly as the model produced them.
	pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function: Option<FunctionDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
	Mode(String),
	Typed(TypedToolChoice),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedToolChoice {
	pub r#type: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
	Stop,
	Length,
	ContentFilter,
	ToolCalls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub object: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub created: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub choices: Vec<ChatChoice>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
	pub index: u32,
	pub message: ResponseMessage,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
	pub prompt_tokens: u32,
	pub completion_tokens: u32,
	pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default)]
	pub object: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default)]
	pub choices: Vec<ChunkChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
	#[serde(default)]
	pub index: u32,
	#[serde(default)]
	pub delta: ChunkDelta,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallChunk {
	pub index: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub r#type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<FunctionCallChunk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCallChunk {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
	pub id: String,
	pub object: String,
	pub owned_by: String,
	pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
	pub object: String,
	pub data: Vec<Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub r#type: String,
	pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	pub r#type: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
}
