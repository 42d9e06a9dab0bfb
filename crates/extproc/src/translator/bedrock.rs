//! OpenAI chat-completions to AWS Bedrock Converse translation.
//!
//! Requests are rewritten wholesale: the path becomes the per-model Converse
//! endpoint, the message list is regrouped into Bedrock roles and content
//! blocks, and tool/image payloads are converted. Unary responses are
//! buffered and mapped back to an OpenAI completion; streaming responses are
//! decoded frame-by-frame from the binary event stream and re-emitted as
//! SSE chunks.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use once_cell::sync::Lazy;
use protos::envoy::service::ext_proc::v3::HeaderMutation;
use regex::Regex;
use tracing::{debug, error};

use super::{RequestTransform, ResponseTransform, TranslateError, streaming_mode_override};
use crate::cost::TokenCounts;
use crate::eventstream::FrameDecoder;
use crate::mutation::{body_replace, set_content_length, set_header};
use crate::schema::{bedrock, openai};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^data:(.+?)?(;base64)?,").expect("static pattern")
});

#[derive(Debug)]
pub struct BedrockTranslator {
	model: String,
	stream: bool,
	decoder: FrameDecoder,
	buffered: BytesMut,
	/// Role observed on the stream's messageStart, reused for delta chunks.
	role: Option<String>,
}

impl BedrockTranslator {
	pub fn new(model: &str, stream: bool) -> Self {
		Self {
			model: model.to_string(),
			stream,
			decoder: FrameDecoder::new(),
			buffered: BytesMut::new(),
			role: None,
		}
	}

	pub fn request_body(
		&mut self,
		request: &openai::ChatCompletionRequest,
	) -> Result<RequestTransform, TranslateError> {
		let converse = to_converse_request(request, &self.model)?;
		let body = serde_json::to_vec(&converse).map_err(TranslateError::RequestMarshal)?;

		let suffix = if self.stream { "converse-stream" } else { "converse" };
		let path = format!("/model/{}/{}", self.model, suffix);

		let mut header_mutation = HeaderMutation::default();
		header_mutation
			.set_headers
			.push(set_header(":path", path.as_bytes()));
		set_content_length(&mut header_mutation, body.len());

		Ok(RequestTransform {
			header_mutation,
			body_mutation: Some(body_replace(body)),
			mode_override: self.stream.then(streaming_mode_override),
		})
	}

	pub fn response_headers(
		&mut self,
		headers: &HashMap<String, String>,
		backend_ok: bool,
	) -> Result<Option<HeaderMutation>, TranslateError> {
		if !self.stream || !backend_ok {
			return Ok(None);
		}
		let content_type = headers.get("content-type").cloned();
		if content_type.as_deref() != Some(EVENT_STREAM_CONTENT_TYPE) {
			return Err(TranslateError::UnexpectedContentType(content_type));
		}
		let mut mutation = HeaderMutation::default();
		mutation
			.set_headers
			.push(set_header("content-type", b"text/event-stream"));
		Ok(Some(mutation))
	}

	pub fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		if self.stream {
			return self.translate_stream(body, end_of_stream);
		}

		self.buffered.extend_from_slice(body);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}

		let resp: bedrock::ConverseResponse =
			serde_json::from_slice(&self.buffered).map_err(TranslateError::ResponseParsing)?;
		let (openai_resp, usage) = converse_to_openai(resp)?;
		let body = serde_json::to_vec(&openai_resp).map_err(TranslateError::ResponseMarshal)?;

		let mut header_mutation = HeaderMutation::default();
		set_content_length(&mut header_mutation, body.len());
		Ok(ResponseTransform {
			header_mutation: Some(header_mutation),
			body_mutation: Some(body_replace(body)),
			usage,
		})
	}

	pub fn response_error(
		&mut self,
		response_headers: &HashMap<String, String>,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		self.buffered.extend_from_slice(body);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}

		let is_json = response_headers
			.get("content-type")
			.is_some_and(|ct| ct.contains("json"));
		let message = if is_json {
			match serde_json::from_slice::<bedrock::ConverseErrorResponse>(&self.buffered) {
				Ok(e) => e.message,
				Err(_) => String::from_utf8_lossy(&self.buffered).into_owned(),
			}
		} else {
			String::from_utf8_lossy(&self.buffered).into_owned()
		};

		let envelope = openai::ErrorResponse {
			r#type: "error".to_string(),
			error: openai::ErrorBody {
				r#type: response_headers
					.get("x-amzn-errortype")
					.cloned()
					.unwrap_or_else(|| "BedrockException".to_string()),
				message,
				code: response_headers.get(":status").cloned(),
			},
		};
		let body = serde_json::to_vec(&envelope).map_err(TranslateError::ResponseMarshal)?;

		let mut header_mutation = HeaderMutation::default();
		set_content_length(&mut header_mutation, body.len());
		Ok(ResponseTransform {
			header_mutation: Some(header_mutation),
			body_mutation: Some(body_replace(body)),
			usage: None,
		})
	}

	fn translate_stream(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		let mut out = String::new();
		let mut usage = None;
		for frame in self.decoder.feed(body) {
			let event = match bedrock::ConverseStreamEvent::decode(&frame) {
				Ok(event) => event,
				Err(err) => {
					debug!("dropping malformed converse stream event: {err}");
					continue;
				},
			};
			// A mid-stream exception is a backend failure, not a malformed
			// frame: the client gets an error event, like the unary error
			// path.
			if let bedrock::ConverseStreamEvent::Exception(ex) = event {
				error!(
					"bedrock stream exception {}: {}",
					ex.exception_type, ex.message
				);
				let json = serde_json::to_string(&exception_envelope(ex))
					.map_err(TranslateError::ResponseMarshal)?;
				out.push_str("data: ");
				out.push_str(&json);
				out.push_str("\n\n");
				continue;
			}
			if let Some(chunk) = self.chunk_for_event(event, &mut usage) {
				let json = serde_json::to_string(&chunk).map_err(TranslateError::ResponseMarshal)?;
				out.push_str("data: ");
				out.push_str(&json);
				out.push_str("\n\n");
			}
		}
		if end_of_stream {
			out.push_str("data: [DONE]\n");
		}
		// The body is replaced even when no frame completed: the raw binary
		// chunk must never reach the client.
		Ok(ResponseTransform {
			header_mutation: None,
			body_mutation: Some(body_replace(out.into_bytes())),
			usage,
		})
	}

	fn chunk_for_event(
		&mut self,
		event: bedrock::ConverseStreamEvent,
		usage_out: &mut Option<TokenCounts>,
	) -> Option<openai::ChatCompletionChunk> {
		use bedrock::ConverseStreamEvent as Ev;

		let chunk =
			|choices: Vec<openai::ChunkChoice>, usage: Option<openai::Usage>| openai::ChatCompletionChunk {
				object: openai::OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
				choices,
				usage,
				..Default::default()
			};
		let delta_choice = |delta: openai::ChunkDelta| openai::ChunkChoice {
			index: 0,
			delta,
			finish_reason: None,
		};

		match event {
			Ev::MessageStart(e) => {
				let role = e.role.as_str().to_string();
				self.role = Some(role.clone());
				Some(chunk(
					vec![delta_choice(openai::ChunkDelta {
						role: Some(role),
						content: Some(String::new()),
						tool_calls: None,
					})],
					None,
				))
			},
			Ev::ContentBlockStart(e) => match e.start {
				Some(bedrock::ContentBlockStart::ToolUse(tu)) => Some(chunk(
					vec![delta_choice(openai::ChunkDelta {
						role: None,
						content: None,
						tool_calls: Some(vec![openai::ToolCallChunk {
							index: e.content_block_index as u32,
							id: Some(tu.tool_use_id),
							r#type: Some("function".to_string()),
							function: Some(openai::FunctionCallChunk {
								name: Some(tu.name),
								arguments: None,
							}),
						}]),
					})],
					None,
				)),
				None => None,
			},
			Ev::ContentBlockDelta(e) => match e.delta {
				Some(bedrock::ContentBlockDelta::Text(text)) => Some(chunk(
					vec![delta_choice(openai::ChunkDelta {
						role: self.role.clone(),
						content: Some(text),
						tool_calls: None,
					})],
					None,
				)),
				Some(bedrock::ContentBlockDelta::ToolUse(tu)) => Some(chunk(
					vec![delta_choice(openai::ChunkDelta {
						role: None,
						content: None,
						tool_calls: Some(vec![openai::ToolCallChunk {
							index: e.content_block_index as u32,
							id: None,
							r#type: None,
							function: Some(openai::FunctionCallChunk {
								name: None,
								arguments: Some(tu.input),
							}),
						}]),
					})],
					None,
				)),
				None => None,
			},
			Ev::ContentBlockStop(_) => None,
			Ev::MessageStop(e) => Some(chunk(
				vec![openai::ChunkChoice {
					index: 0,
					delta: openai::ChunkDelta::default(),
					finish_reason: Some(translate_stop_reason(e.stop_reason)),
				}],
				None,
			)),
			// Intercepted by translate_stream before chunk mapping.
			Ev::Exception(_) => None,
			Ev::Metadata(e) => e.usage.map(|u| {
				*usage_out = Some(TokenCounts {
					input: u.input_tokens,
					output: u.output_tokens,
					total: u.total_tokens,
				});
				chunk(
					vec![],
					Some(openai::Usage {
						prompt_tokens: u.input_tokens,
						completion_tokens: u.output_tokens,
						total_tokens: u.total_tokens,
					}),
				)
			}),
		}
	}
}

fn to_converse_request(
	req: &openai::ChatCompletionRequest,
	model: &str,
) -> Result<bedrock::ConverseRequest, TranslateError> {
	let mut system = Vec::new();
	let mut messages = Vec::new();

	for msg in &req.messages {
		// The decoder keeps the role string in sync with the variant; the
		// guards reject hand-built messages where it disagrees.
		match msg {
			openai::ChatCompletionMessage::System(m) if m.role == openai::ROLE_SYSTEM => {
				system.push(bedrock::SystemContentBlock {
					text: m.content.flatten(),
				});
			},
			openai::ChatCompletionMessage::Developer(m) if m.role == openai::ROLE_DEVELOPER => {
				system.push(bedrock::SystemContentBlock {
					text: m.content.flatten(),
				});
			},
			openai::ChatCompletionMessage::User(m) if m.role == openai::ROLE_USER => {
				let content = match &m.content {
					openai::UserContent::Text(t) => vec![bedrock::ContentBlock::Text(t.clone())],
					openai::UserContent::Parts(parts) => {
						let mut blocks = Vec::with_capacity(parts.len());
						for part in parts {
							match part {
								openai::UserContentPart::Text { text } => {
									blocks.push(bedrock::ContentBlock::Text(text.clone()));
								},
								openai::UserContentPart::ImageUrl { image_url } => {
									blocks.push(bedrock::ContentBlock::Image(parse_image(&image_url.url)?));
								},
								openai::UserContentPart::InputAudio { .. } => {
									// Converse has no audio input block.
									return Err(TranslateError::UnsupportedContent);
								},
							}
						}
						blocks
					},
				};
				messages.push(bedrock::Message {
					role: bedrock::Role::User,
					content,
				});
			},
			openai::ChatCompletionMessage::Assistant(m) if m.role == openai::ROLE_ASSISTANT => {
				let mut content = Vec::new();
				if let Some(text) = m.content.as_ref().and_then(|c| c.text()) {
					content.push(bedrock::ContentBlock::Text(text.to_string()));
				}
				for call in m.tool_calls.iter().flatten() {
					let input = serde_json::from_str(&call.function.arguments)
						.map_err(TranslateError::ToolCallArguments)?;
					content.push(bedrock::ContentBlock::ToolUse(bedrock::ToolUseBlock {
						tool_use_id: call.id.clone(),
						name: call.function.name.clone(),
						input,
					}));
				}
				messages.push(bedrock::Message {
					role: bedrock::Role::Assistant,
					content,
				});
			},
			openai::ChatCompletionMessage::Tool(m) if m.role == openai::ROLE_TOOL => {
				if m.tool_call_id.is_empty() {
					return Err(TranslateError::MissingToolCallId);
				}
				let content = match &m.content {
					openai::TextContent::Text(t) => {
						vec![bedrock::ToolResultContentBlock::Text(t.clone())]
					},
					openai::TextContent::Parts(parts) => parts
						.iter()
						.map(|p| bedrock::ToolResultContentBlock::Text(p.text.clone()))
						.collect(),
				};
				// Tool results travel back to Bedrock on a user turn.
				messages.push(bedrock::Message {
					role: bedrock::Role::User,
					content: vec![bedrock::ContentBlock::ToolResult(bedrock::ToolResultBlock {
						tool_use_id: m.tool_call_id.clone(),
						content,
					})],
				});
			},
			other => {
				return Err(TranslateError::UnexpectedRole(other.role().to_string()));
			},
		}
	}

	let stop_sequences = req.stop.clone().map(openai::Stop::into_vec).unwrap_or_default();
	let has_inference_config = req.max_tokens.is_some()
		|| req.temperature.is_some()
		|| req.top_p.is_some()
		|| !stop_sequences.is_empty();
	let inference_config = has_inference_config.then(|| bedrock::InferenceConfiguration {
		max_tokens: req.max_tokens,
		temperature: req.temperature,
		top_p: req.top_p,
		stop_sequences,
	});

	let tools: Vec<bedrock::Tool> = req
		.tools
		.iter()
		.flatten()
		.filter_map(|tool| {
			tool.function.as_ref().map(|f| {
				bedrock::Tool::ToolSpec(bedrock::ToolSpecification {
					name: f.name.clone(),
					description: f.description.clone(),
					input_schema: f.parameters.clone().map(bedrock::ToolInputSchema::Json),
				})
			})
		})
		.collect();
	let tool_choice = req.tool_choice.as_ref().and_then(|choice| match choice {
		openai::ToolChoice::Mode(mode) => match mode.as_str() {
			"auto" => Some(bedrock::ToolChoice::Auto {}),
			"required" => Some(bedrock::ToolChoice::Any {}),
			// Forcing a named tool through a bare string is only honored by
			// Anthropic Claude model identifiers.
			other => (model.contains("anthropic") && model.contains("claude")).then(|| {
				bedrock::ToolChoice::Tool {
					name: other.to_string(),
				}
			}),
		},
		openai::ToolChoice::Typed(t) => Some(bedrock::ToolChoice::Tool {
			name: t.r#type.clone(),
		}),
	});
	let tool_config = (!tools.is_empty()).then(|| bedrock::ToolConfiguration { tools, tool_choice });

	Ok(bedrock::ConverseRequest {
		messages,
		system: (!system.is_empty()).then_some(system),
		inference_config,
		tool_config,
	})
}

fn parse_image(url: &str) -> Result<bedrock::ImageBlock, TranslateError> {
	let caps = DATA_URI
		.captures(url)
		.ok_or_else(|| TranslateError::InvalidDataUri(url.chars().take(64).collect()))?;
	let content_type = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
	let is_base64 = caps.get(2).is_some();
	let data = &url[caps.get(0).map_or(0, |m| m.end())..];

	let format = match content_type {
		"image/png" => "png",
		"image/jpeg" => "jpeg",
		"image/gif" => "gif",
		"image/webp" => "webp",
		other => return Err(TranslateError::UnsupportedImageType(other.to_string())),
	};

	// Decode to validate the payload, then re-encode for the JSON body.
	let decoded = if is_base64 {
		BASE64.decode(data)?
	} else {
		data.as_bytes().to_vec()
	};
	Ok(bedrock::ImageBlock {
		format: format.to_string(),
		source: bedrock::ImageSource {
			bytes: BASE64.encode(decoded),
		},
	})
}

fn converse_to_openai(
	resp: bedrock::ConverseResponse,
) -> Result<(openai::ChatCompletionResponse, Option<TokenCounts>), TranslateError> {
	let message = match resp.output {
		Some(bedrock::ConverseOutput::Message(m)) => m,
		_ => return Err(TranslateError::IncompleteResponse),
	};
	let finish_reason = translate_stop_reason(resp.stop_reason);

	let mut choices = Vec::new();
	let blocks = message.content;
	let mut i = 0;
	while i < blocks.len() {
		let (content, tool_calls) = match &blocks[i] {
			bedrock::ContentBlock::Text(text) => {
				// A tool-use block directly following a text block belongs to
				// the same choice.
				let tool_calls = match blocks.get(i + 1) {
					Some(bedrock::ContentBlock::ToolUse(tu)) => {
						i += 1;
						Some(vec![tool_call_from(tu)?])
					},
					_ => None,
				};
				(Some(text.clone()), tool_calls)
			},
			bedrock::ContentBlock::ToolUse(tu) => (None, Some(vec![tool_call_from(tu)?])),
			_ => {
				i += 1;
				continue;
			},
		};
		choices.push(openai::ChatChoice {
			index: choices.len() as u32,
			message: openai::ResponseMessage {
				role: message.role.as_str().to_string(),
				content,
				tool_calls,
			},
			finish_reason: Some(finish_reason),
		});
		i += 1;
	}

	let usage = resp.usage.map(|u| TokenCounts {
		input: u.input_tokens,
		output: u.output_tokens,
		total: u.total_tokens,
	});
	let openai_usage = resp.usage.map(|u| openai::Usage {
		prompt_tokens: u.input_tokens,
		completion_tokens: u.output_tokens,
		total_tokens: u.total_tokens,
	});

	Ok((
		openai::ChatCompletionResponse {
			id: None,
			object: openai::OBJECT_CHAT_COMPLETION.to_string(),
			created: None,
			model: None,
			choices,
			usage: openai_usage,
		},
		usage,
	))
}

/// The client-visible envelope for a mid-stream exception, mirroring the
/// unary error translation: JSON exception bodies contribute their message,
/// anything else is passed through raw.
fn exception_envelope(ex: bedrock::StreamException) -> openai::ErrorResponse {
	let message = serde_json::from_str::<bedrock::ConverseErrorResponse>(&ex.message)
		.map(|e| e.message)
		.unwrap_or(ex.message);
	openai::ErrorResponse {
		r#type: "error".to_string(),
		error: openai::ErrorBody {
			r#type: ex.exception_type,
			message,
			code: None,
		},
	}
}

fn tool_call_from(tu: &bedrock::ToolUseBlock) -> Result<openai::ToolCall, TranslateError> {
	Ok(openai::ToolCall {
		id: tu.tool_use_id.clone(),
		r#type: "function".to_string(),
		function: openai::FunctionCall {
			name: tu.name.clone(),
			arguments: serde_json::to_string(&tu.input).map_err(TranslateError::ResponseMarshal)?,
		},
	})
}

fn translate_stop_reason(reason: Option<bedrock::StopReason>) -> openai::FinishReason {
	match reason {
		Some(bedrock::StopReason::EndTurn) | Some(bedrock::StopReason::StopSequence) => {
			openai::FinishReason::Stop
		},
		Some(bedrock::StopReason::MaxTokens) => openai::FinishReason::Length,
		Some(bedrock::StopReason::ContentFiltered) => openai::FinishReason::ContentFilter,
		Some(bedrock::StopReason::ToolUse) => openai::FinishReason::ToolCalls,
		// Anything else, including an absent reason, reads as a normal stop.
		_ => openai::FinishReason::Stop,
	}
}
