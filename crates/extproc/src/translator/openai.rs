//! OpenAI-to-OpenAI passthrough.
//!
//! The body is forwarded unmodified; the translator only extracts token
//! usage from the response so costs can be reported. For streams, body
//! chunks are buffered and scanned for `data: ` lines until the first chunk
//! carrying a non-null `usage`. That chunk's usage is authoritative, so
//! scanning stops there and the buffer is dropped.

use bytes::BytesMut;
use tracing::debug;

use super::{RequestTransform, ResponseTransform, TranslateError, streaming_mode_override};
use crate::cost::TokenCounts;
use crate::schema::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

#[derive(Debug)]
pub struct Passthrough {
	stream: bool,
	buffered: BytesMut,
	buffering_done: bool,
}

impl Passthrough {
	pub fn new(stream: bool) -> Self {
		Self {
			stream,
			buffered: BytesMut::new(),
			buffering_done: false,
		}
	}

	pub fn request_body(
		&mut self,
		_request: &ChatCompletionRequest,
	) -> Result<RequestTransform, TranslateError> {
		Ok(RequestTransform {
			mode_override: self.stream.then(streaming_mode_override),
			..Default::default()
		})
	}

	pub fn response_headers(
		&mut self,
		_headers: &std::collections::HashMap<String, String>,
	) -> Result<Option<protos::envoy::service::ext_proc::v3::HeaderMutation>, TranslateError> {
		Ok(None)
	}

	pub fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		if self.stream {
			return Ok(self.scan_stream(body));
		}

		self.buffered.extend_from_slice(body);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}
		let resp: ChatCompletionResponse =
			serde_json::from_slice(&self.buffered).map_err(TranslateError::ResponseParsing)?;
		let usage = resp.usage.map(|u| TokenCounts {
			input: u.prompt_tokens,
			output: u.completion_tokens,
			total: u.total_tokens,
		});
		Ok(ResponseTransform {
			usage,
			..Default::default()
		})
	}

	pub fn response_error(
		&mut self,
		_body: &[u8],
		_end_of_stream: bool,
	) -> Result<ResponseTransform, TranslateError> {
		// The backend already speaks the client schema.
		Ok(ResponseTransform::default())
	}

	fn scan_stream(&mut self, body: &[u8]) -> ResponseTransform {
		if self.buffering_done {
			return ResponseTransform::default();
		}
		self.buffered.extend_from_slice(body);

		let mut usage = None;
		for line in self.buffered.as_ref().split(|b| *b == b'\n') {
			let Some(payload) = line.strip_prefix(b"data: ") else {
				continue;
			};
			let chunk: ChatCompletionChunk = match serde_json::from_slice(payload) {
				Ok(c) => c,
				Err(err) => {
					// [DONE] and partial lines land here.
					debug!("skipping unparsable stream line: {err}");
					continue;
				},
			};
			if let Some(u) = chunk.usage {
				usage = Some(TokenCounts {
					input: u.prompt_tokens,
					output: u.completion_tokens,
					total: u.total_tokens,
				});
				self.buffering_done = true;
				self.buffered = BytesMut::new();
				break;
			}
		}
		ResponseTransform {
			usage,
			..Default::default()
		}
	}
}
