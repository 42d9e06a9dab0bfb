//! Request/response schema translation between the client-facing OpenAI API
//! and the selected backend.

use std::collections::HashMap;

use protos::envoy::extensions::filters::http::ext_proc::v3::ProcessingMode;
use protos::envoy::extensions::filters::http::ext_proc::v3::processing_mode::{
	BodySendMode, HeaderSendMode,
};
use protos::envoy::service::ext_proc::v3::{BodyMutation, HeaderMutation};

use crate::config::SchemaName;
use crate::cost::TokenCounts;
use crate::schema::openai::ChatCompletionRequest;

pub mod bedrock;
pub mod openai;

#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
	#[error("failed to parse request: {0}")]
	RequestParsing(serde_json::Error),
	#[error("failed to marshal request: {0}")]
	RequestMarshal(serde_json::Error),
	#[error("failed to parse response: {0}")]
	ResponseParsing(serde_json::Error),
	#[error("failed to marshal response: {0}")]
	ResponseMarshal(serde_json::Error),
	#[error("response was missing fields")]
	IncompleteResponse,
	#[error("unexpected role: {0}")]
	UnexpectedRole(String),
	#[error("ToolCallID is missing")]
	MissingToolCallId,
	#[error("failed to unmarshal tool call arguments: {0}")]
	ToolCallArguments(serde_json::Error),
	#[error("invalid image URL: {0}")]
	InvalidDataUri(String),
	#[error("failed to decode image: {0}")]
	InvalidBase64(#[from] base64::DecodeError),
	#[error(
		"unsupported image content type {0}: only image/png, image/jpeg, image/gif and image/webp are supported"
	)]
	UnsupportedImageType(String),
	#[error("unsupported content type in user message")]
	UnsupportedContent,
	#[error("unexpected content-type for streaming response: {0:?}")]
	UnexpectedContentType(Option<String>),
}

/// Asks the proxy to send response headers and stream the response body,
/// which event-by-event translation requires.
pub(crate) fn streaming_mode_override() -> ProcessingMode {
	ProcessingMode {
		response_header_mode: HeaderSendMode::Send as i32,
		response_body_mode: BodySendMode::Streamed as i32,
		..Default::default()
	}
}

/// The mutations produced by the request-body phase.
#[derive(Debug, Default)]
pub struct RequestTransform {
	pub header_mutation: HeaderMutation,
	pub body_mutation: Option<BodyMutation>,
	pub mode_override: Option<ProcessingMode>,
}

/// The mutations produced by one response phase step, plus any token usage
/// observed in it.
#[derive(Debug, Default)]
pub struct ResponseTransform {
	pub header_mutation: Option<HeaderMutation>,
	pub body_mutation: Option<BodyMutation>,
	pub usage: Option<TokenCounts>,
}

/// A per-stream translator, selected once the request body names a backend.
#[derive(Debug)]
pub enum Translator {
	OpenAi(openai::Passthrough),
	Bedrock(bedrock::BedrockTranslator),
}

impl Translator {
	pub fn new(backend_schema: SchemaName, model: &str, stream: bool) -> Self {
		match backend_schema {
			SchemaName::OpenAI => Self::OpenAi(openai::Passthrough::new(stream)),
			SchemaName::AWSBedrock => Self::Bedrock(bedrock::BedrockTranslator::new(model, stream)),
		}
	}

	pub fn request_body(
		&mut self,
		request: &ChatCompletionRequest,
	) -> Result<RequestTransform, TranslateError> {
		match self {
			Self::OpenAi(t) => t.request_body(request),
			Self::Bedrock(t) => t.request_body(request),
		}
	}

	pub fn response_headers(
		&mut self,
		headers: &HashMap<String, String>,
		backend_ok: bool,
	) -> Result<Option<HeaderMutation>, TranslateError> {
		match self {
			Self::OpenAi(t) => t.response_headers(headers),
			Self::Bedrock(t) => t.response_headers(headers, backend_ok),
		}
	}

	pub fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		match self {
			Self::OpenAi(t) => t.response_body(body, end_of_stream),
			Self::Bedrock(t) => t.response_body(body, end_of_stream),
		}
	}

	/// Translates a non-2xx backend response body. The backend error is not
	/// an error of this stream; the client receives an OpenAI-shaped error
	/// envelope instead.
	pub fn response_error(
		&mut self,
		response_headers: &HashMap<String, String>,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		match self {
			Self::OpenAi(t) => t.response_error(body, end_of_stream),
			Self::Bedrock(t) => t.response_error(response_headers, body, end_of_stream),
		}
	}
}
