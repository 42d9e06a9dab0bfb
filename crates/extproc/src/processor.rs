//! Per-stream processing: the four-phase state machine driving one client
//! request through routing, translation and auth.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost_types::value::Kind;
use protos::envoy::service::ext_proc::v3::body_mutation::Mutation;
use protos::envoy::service::ext_proc::v3::{HttpBody, HttpHeaders, ProcessingResponse};
use tracing::debug;

use crate::auth::{AuthError, BackendAuth};
use crate::compression::{self, ResponseEncoding};
use crate::config::{CostType, ProcessorConfig};
use crate::cost::TokenCounts;
use crate::mutation::{
	empty_request_body_response, headers_to_map, immediate_response, request_body_response,
	request_headers_response, response_body_response, response_headers_response, set_header,
};
use crate::router::{RouteCalculator, Router, RouterError, RouterFactory};
use crate::schema::openai::{ChatCompletionRequest, Model, ModelList};
use crate::translator::{TranslateError, Translator};
use crate::{cost, mutation};

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
	#[error("failed to parse request body: {0}")]
	BodyParsing(serde_json::Error),
	#[error("failed to marshal body: {0}")]
	Marshal(serde_json::Error),
	#[error(transparent)]
	Translate(#[from] TranslateError),
	#[error(transparent)]
	Route(#[from] RouterError),
	#[error(transparent)]
	Auth(#[from] AuthError),
	#[error("failed to evaluate request cost: {0}")]
	Cost(#[from] cost::Error),
	#[error("request cost {0:?} has no expression")]
	MissingCostExpression(String),
	#[error("failed to decompress response body: {0}")]
	Decompress(std::io::Error),
	#[error("unexpected method call: {0}")]
	UnexpectedMethodCall(&'static str),
}

/// One processor per stream. Phase methods are called in proxy order;
/// response phases may arrive before any request body when the proxy is
/// configured oddly, and must tolerate it.
#[async_trait]
pub trait Processor: Send + std::fmt::Debug {
	async fn process_request_headers(
		&mut self,
		headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError>;
	async fn process_request_body(
		&mut self,
		body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError>;
	async fn process_response_headers(
		&mut self,
		headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError>;
	async fn process_response_body(
		&mut self,
		body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError>;
}

/// A config snapshot plus everything derived from it at load time: the
/// router and the per-backend auth handlers. Auth construction reads key and
/// credential files, so failures surface at load, not per request.
#[derive(Debug)]
pub struct ActiveConfig {
	pub config: Arc<ProcessorConfig>,
	pub router: Arc<dyn RouteCalculator>,
	pub auth: HashMap<String, Arc<BackendAuth>>,
}

impl ActiveConfig {
	pub async fn build(
		config: Arc<ProcessorConfig>,
		router_factory: Option<&RouterFactory>,
	) -> Result<Arc<Self>, AuthError> {
		let mut auth = HashMap::new();
		for rule in &config.rules {
			for backend in &rule.backends {
				if let Some(auth_config) = &backend.auth {
					auth.insert(
						backend.name.clone(),
						Arc::new(BackendAuth::new(auth_config).await?),
					);
				}
			}
		}
		let default: Arc<dyn RouteCalculator> = Arc::new(Router::new(config.rules.clone()));
		let router = match router_factory {
			Some(factory) => factory(default),
			None => default,
		};
		Ok(Arc::new(Self {
			config,
			router,
			auth,
		}))
	}
}

/// The `/v1/chat/completions` processor.
#[derive(Debug)]
pub struct ChatCompletionProcessor {
	active: Arc<ActiveConfig>,
	request_headers: HashMap<String, String>,
	response_headers: HashMap<String, String>,
	translator: Option<Translator>,
	model: String,
	backend_name: String,
	usage: TokenCounts,
	response_encoding: ResponseEncoding,
	backend_ok: bool,
}

impl ChatCompletionProcessor {
	pub fn new(active: Arc<ActiveConfig>) -> Self {
		Self {
			active,
			request_headers: HashMap::new(),
			response_headers: HashMap::new(),
			translator: None,
			model: String::new(),
			backend_name: String::new(),
			usage: TokenCounts::default(),
			response_encoding: ResponseEncoding::None,
			backend_ok: true,
		}
	}

	fn build_dynamic_metadata(&self) -> Result<prost_types::Struct, ProcessError> {
		let config = &self.active.config;
		let mut fields = BTreeMap::new();
		for cost in &config.llm_request_costs {
			let value: u64 = match cost.r#type {
				CostType::InputToken => self.usage.input as u64,
				CostType::OutputToken => self.usage.output as u64,
				CostType::TotalToken => self.usage.total as u64,
				CostType::Cel => {
					let program = cost
						.cel
						.as_ref()
						.ok_or_else(|| ProcessError::MissingCostExpression(cost.metadata_key.clone()))?;
					program.eval(&self.model, &self.backend_name, self.usage)?
				},
			};
			// Metadata numbers are 32-bit on the proxy side; larger values are
			// truncated, a known lossy path.
			fields.insert(
				cost.metadata_key.clone(),
				prost_types::Value {
					kind: Some(Kind::NumberValue((value as u32) as f64)),
				},
			);
		}
		let mut namespaced = BTreeMap::new();
		namespaced.insert(
			config.metadata_namespace.clone(),
			prost_types::Value {
				kind: Some(Kind::StructValue(prost_types::Struct { fields })),
			},
		);
		Ok(prost_types::Struct { fields: namespaced })
	}
}

#[async_trait]
impl Processor for ChatCompletionProcessor {
	async fn process_request_headers(
		&mut self,
		headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		if let Some(map) = &headers.headers {
			self.request_headers = headers_to_map(map);
		}
		Ok(request_headers_response(None))
	}

	async fn process_request_body(
		&mut self,
		body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		let request: ChatCompletionRequest =
			serde_json::from_slice(&body.body).map_err(ProcessError::BodyParsing)?;
		let stream = request.stream.unwrap_or(false);
		self.model = request.model.clone();

		let config = self.active.config.clone();
		// The model header is published before routing so rules can match on
		// it.
		self
			.request_headers
			.insert(config.model_name_header_key.clone(), self.model.clone());

		let backend = self.active.router.calculate(&self.request_headers)?;
		self.backend_name = backend.name.clone();
		self
			.request_headers
			.insert(config.selected_backend_header_key.clone(), backend.name.clone());

		let mut translator = Translator::new(backend.schema.name, &self.model, stream);
		let mut transform = translator.request_body(&request)?;

		transform.header_mutation.set_headers.push(set_header(
			&config.model_name_header_key,
			self.model.as_bytes(),
		));
		transform.header_mutation.set_headers.push(set_header(
			&config.selected_backend_header_key,
			backend.name.as_bytes(),
		));

		if let Some(auth) = self.active.auth.get(&backend.name) {
			let signing_body: &[u8] = match &transform.body_mutation {
				Some(m) => match &m.mutation {
					Some(Mutation::Body(b)) => b,
					_ => &[],
				},
				None => &[],
			};
			auth.handle(
				&mut self.request_headers,
				&mut transform.header_mutation,
				signing_body,
			)?;
		}

		self.translator = Some(translator);

		let mut response =
			request_body_response(Some(transform.header_mutation), transform.body_mutation);
		response.mode_override = transform.mode_override;
		Ok(response)
	}

	async fn process_response_headers(
		&mut self,
		headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		let map = headers
			.headers
			.as_ref()
			.map(headers_to_map)
			.unwrap_or_default();
		self.response_encoding =
			compression::detect(map.get("content-encoding").map(String::as_str));
		self.backend_ok = map
			.get(":status")
			.and_then(|s| s.parse::<u16>().ok())
			.map(|code| (200..300).contains(&code))
			.unwrap_or(true);

		let mutation = match self.translator.as_mut() {
			Some(t) => t.response_headers(&map, self.backend_ok)?,
			// Response phases can arrive before any request body; nothing to
			// do yet.
			None => None,
		};
		self.response_headers = map;
		Ok(response_headers_response(mutation))
	}

	async fn process_response_body(
		&mut self,
		body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		let Some(translator) = self.translator.as_mut() else {
			return Ok(response_body_response(None, None));
		};

		let decoded = compression::decode(
			self.response_encoding,
			Bytes::copy_from_slice(&body.body),
		)
		.await
		.map_err(ProcessError::Decompress)?;

		let transform = if self.backend_ok {
			translator.response_body(&decoded, body.end_of_stream)?
		} else {
			translator.response_error(&self.response_headers, &decoded, body.end_of_stream)?
		};
		if let Some(usage) = transform.usage {
			self.usage.input += usage.input;
			self.usage.output += usage.output;
			self.usage.total += usage.total;
		}

		let mut response =
			response_body_response(transform.header_mutation, transform.body_mutation);
		if body.end_of_stream && !self.active.config.llm_request_costs.is_empty() {
			response.dynamic_metadata = Some(self.build_dynamic_metadata()?);
			debug!(
				model = %self.model,
				backend = %self.backend_name,
				total_tokens = self.usage.total,
				"emitting request cost metadata"
			);
		}
		Ok(response)
	}
}

/// The `/v1/models` processor: answers at the request-headers phase from the
/// configured model list. The stream ends there, so any further phase call
/// is a contract violation.
#[derive(Debug)]
pub struct ModelsProcessor {
	active: Arc<ActiveConfig>,
}

impl ModelsProcessor {
	pub fn new(active: Arc<ActiveConfig>) -> Self {
		Self { active }
	}
}

#[async_trait]
impl Processor for ModelsProcessor {
	async fn process_request_headers(
		&mut self,
		_headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		let created = chrono::Utc::now().timestamp();
		let list = ModelList {
			object: "list".to_string(),
			data: self
				.active
				.config
				.models
				.iter()
				.map(|m| Model {
					id: m.name.clone(),
					object: "model".to_string(),
					owned_by: m.owned_by.clone(),
					created,
				})
				.collect(),
		};
		let body = serde_json::to_vec(&list).map_err(ProcessError::Marshal)?;
		Ok(immediate_response(
			200,
			vec![mutation::set_header("content-type", b"application/json")],
			body,
		))
	}

	async fn process_request_body(
		&mut self,
		_body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		Err(ProcessError::UnexpectedMethodCall("process_request_body"))
	}

	async fn process_response_headers(
		&mut self,
		_headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		Err(ProcessError::UnexpectedMethodCall("process_response_headers"))
	}

	async fn process_response_body(
		&mut self,
		_body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		Err(ProcessError::UnexpectedMethodCall("process_response_body"))
	}
}

/// Echoes an empty proceed response in every phase. Bound to paths that have
/// no dedicated processor.
#[derive(Debug, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl Processor for PassthroughProcessor {
	async fn process_request_headers(
		&mut self,
		_headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		Ok(request_headers_response(None))
	}

	async fn process_request_body(
		&mut self,
		_body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		Ok(empty_request_body_response())
	}

	async fn process_response_headers(
		&mut self,
		_headers: &HttpHeaders,
	) -> Result<ProcessingResponse, ProcessError> {
		Ok(response_headers_response(None))
	}

	async fn process_response_body(
		&mut self,
		_body: &HttpBody,
	) -> Result<ProcessingResponse, ProcessError> {
		Ok(response_body_response(None, None))
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use protos::envoy::config::core::v3::{HeaderMap, HeaderValue};
	use protos::envoy::service::ext_proc::v3::processing_response::Response;
	use serde_json::json;

	use super::*;

	fn http_headers(pairs: &[(&str, &str)]) -> HttpHeaders {
		HttpHeaders {
			headers: Some(HeaderMap {
				headers: pairs
					.iter()
					.map(|(k, v)| HeaderValue {
						key: k.to_string(),
						value: String::new(),
						raw_value: v.as_bytes().to_vec(),
					})
					.collect(),
			}),
			end_of_stream: false,
		}
	}

	fn http_body(body: &[u8], end_of_stream: bool) -> HttpBody {
		HttpBody {
			body: body.to_vec(),
			end_of_stream,
		}
	}

	async fn active(config_yaml: &str) -> Arc<ActiveConfig> {
		let config = ProcessorConfig::from_yaml(config_yaml).unwrap();
		ActiveConfig::build(config, None).await.unwrap()
	}

	fn mutation_of(resp: &ProcessingResponse) -> (Vec<(String, String)>, Option<Vec<u8>>, bool) {
		let common = match resp.response.as_ref().unwrap() {
			Response::RequestBody(b) => b.response.clone().unwrap(),
			Response::ResponseBody(b) => b.response.clone().unwrap(),
			Response::RequestHeaders(h) => h.response.clone().unwrap(),
			Response::ResponseHeaders(h) => h.response.clone().unwrap(),
			other => panic!("unexpected response kind: {other:?}"),
		};
		let headers = common
			.header_mutation
			.map(|m| {
				m.set_headers
					.iter()
					.map(|h| {
						let hv = h.header.as_ref().unwrap();
						(hv.key.clone(), crate::mutation::header_value(hv))
					})
					.collect()
			})
			.unwrap_or_default();
		let body = common.body_mutation.and_then(|m| match m.mutation {
			Some(Mutation::Body(b)) => Some(b),
			_ => None,
		});
		(headers, body, common.clear_route_cache)
	}

	fn header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
		headers
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}

	const BEDROCK_CONFIG: &str = r#"
schema: { name: OpenAI }
llmRequestCosts:
  - metadataKey: used_total
    type: TotalToken
rules:
  - headers:
      - name: x-ai-eg-model
        value: gpt-4o
    backends:
      - name: awsbedrock
        schema: { name: AWSBedrock }
        weight: 1
"#;

	#[tokio::test]
	async fn chat_request_is_translated_and_routed() {
		let mut p = ChatCompletionProcessor::new(active(BEDROCK_CONFIG).await);

		p.process_request_headers(&http_headers(&[
			(":method", "POST"),
			(":path", "/v1/chat/completions"),
		]))
		.await
		.unwrap();

		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		let resp = p
			.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();

		let (headers, new_body, clear_route_cache) = mutation_of(&resp);
		assert!(clear_route_cache);
		assert_eq!(header(&headers, ":path"), Some("/model/gpt-4o/converse"));
		assert_eq!(header(&headers, "x-ai-eg-model"), Some("gpt-4o"));
		assert_eq!(header(&headers, "x-ai-eg-selected-backend"), Some("awsbedrock"));

		let converse: serde_json::Value = serde_json::from_slice(&new_body.unwrap()).unwrap();
		assert_eq!(converse["messages"][0]["role"], "user");
		assert_eq!(converse["messages"][0]["content"][0]["text"], "hi");
	}

	#[tokio::test]
	async fn bedrock_unary_response_round_trip() {
		let mut p = ChatCompletionProcessor::new(active(BEDROCK_CONFIG).await);

		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		p.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();
		p.process_response_headers(&http_headers(&[
			(":status", "200"),
			("content-type", "application/json"),
		]))
		.await
		.unwrap();

		let bedrock_body = br#"{"output":{"message":{"role":"assistant","content":[{"text":"response"},{"text":"from"},{"text":"assistant"}]}},"usage":{"inputTokens":10,"outputTokens":20,"totalTokens":30}}"#;
		let resp = p
			.process_response_body(&http_body(bedrock_body, true))
			.await
			.unwrap();

		let (_, new_body, _) = mutation_of(&resp);
		let openai: serde_json::Value = serde_json::from_slice(&new_body.unwrap()).unwrap();
		assert_eq!(openai["usage"]["prompt_tokens"], 10);
		assert_eq!(openai["usage"]["completion_tokens"], 20);
		assert_eq!(openai["usage"]["total_tokens"], 30);
		assert_eq!(openai["choices"].as_array().unwrap().len(), 3);
		assert_eq!(p.usage.total, 30);

		// usage.total_tokens on the client side equals Bedrock's totalTokens
		assert_eq!(
			openai["usage"]["total_tokens"].as_u64(),
			Some(p.usage.total as u64)
		);

		let metadata = resp.dynamic_metadata.unwrap();
		let ns = metadata.fields.get("ai_gateway_llm_ns").unwrap();
		let Some(Kind::StructValue(inner)) = &ns.kind else {
			panic!("expected struct metadata");
		};
		let Some(Kind::NumberValue(total)) = inner.fields.get("used_total").and_then(|v| v.kind.as_ref())
		else {
			panic!("expected numeric cost");
		};
		assert_eq!(*total, 30.0);
	}

	const COST_CONFIG: &str = r#"
schema: { name: OpenAI }
metadataNamespace: ai_gateway_llm_ns
llmRequestCosts:
  - metadataKey: output_token_usage
    type: OutputToken
  - metadataKey: input_token_usage
    type: InputToken
  - metadataKey: cel_int
    type: CEL
    cel: "54321"
  - metadataKey: cel_uint
    type: CEL
    cel: "uint(9999)"
rules:
  - headers:
      - name: x-ai-eg-model
        value: gpt-4o
    backends:
      - name: openai
        schema: { name: OpenAI }
"#;

	#[tokio::test]
	async fn cost_metadata_for_each_kind() {
		let mut p = ChatCompletionProcessor::new(active(COST_CONFIG).await);

		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		p.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();
		p.process_response_headers(&http_headers(&[(":status", "200")]))
			.await
			.unwrap();

		let openai_body = br#"{"object":"chat.completion","choices":[],"usage":{"prompt_tokens":1,"completion_tokens":123,"total_tokens":124}}"#;
		let resp = p
			.process_response_body(&http_body(openai_body, true))
			.await
			.unwrap();

		let metadata = resp.dynamic_metadata.unwrap();
		let ns = metadata.fields.get("ai_gateway_llm_ns").unwrap();
		let Some(Kind::StructValue(inner)) = &ns.kind else {
			panic!("expected struct metadata");
		};
		let number = |key: &str| match inner.fields.get(key).and_then(|v| v.kind.as_ref()) {
			Some(Kind::NumberValue(n)) => *n,
			other => panic!("expected number for {key}, got {other:?}"),
		};
		assert_eq!(inner.fields.len(), 4);
		assert_eq!(number("output_token_usage"), 123.0);
		assert_eq!(number("input_token_usage"), 1.0);
		assert_eq!(number("cel_int"), 54321.0);
		assert_eq!(number("cel_uint"), 9999.0);
	}

	#[tokio::test]
	async fn gzip_response_bodies_are_decompressed() {
		use async_compression::tokio::bufread::GzipEncoder;
		use tokio::io::AsyncReadExt;

		let mut p = ChatCompletionProcessor::new(active(COST_CONFIG).await);
		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		p.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();
		p.process_response_headers(&http_headers(&[
			(":status", "200"),
			("content-encoding", "gzip"),
		]))
		.await
		.unwrap();

		let plain = br#"{"object":"chat.completion","choices":[],"usage":{"prompt_tokens":2,"completion_tokens":3,"total_tokens":5}}"#;
		let mut compressed = Vec::new();
		GzipEncoder::new(tokio::io::BufReader::new(plain.as_slice()))
			.read_to_end(&mut compressed)
			.await
			.unwrap();

		p.process_response_body(&http_body(&compressed, true))
			.await
			.unwrap();
		assert_eq!(p.usage.total, 5);
	}

	#[tokio::test]
	async fn unmatched_model_fails_the_body_phase() {
		let mut p = ChatCompletionProcessor::new(active(BEDROCK_CONFIG).await);
		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "unknown-model", "messages": []});
		let err = p
			.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			ProcessError::Route(RouterError::NoMatchingRule)
		));
	}

	#[tokio::test]
	async fn response_phases_before_body_phase_are_tolerated() {
		let mut p = ChatCompletionProcessor::new(active(BEDROCK_CONFIG).await);
		let resp = p
			.process_response_headers(&http_headers(&[(":status", "200")]))
			.await
			.unwrap();
		assert!(matches!(
			resp.response,
			Some(Response::ResponseHeaders(_))
		));
		let resp = p.process_response_body(&http_body(b"junk", true)).await.unwrap();
		let (headers, body, _) = mutation_of(&resp);
		assert!(headers.is_empty());
		assert!(body.is_none());
	}

	#[tokio::test]
	async fn api_key_auth_is_attached() {
		let mut key_file = tempfile::NamedTempFile::new().unwrap();
		write!(key_file, "sk-test-key\n").unwrap();
		let config = format!(
			r#"
schema: {{ name: OpenAI }}
rules:
  - headers:
      - name: x-ai-eg-model
        value: gpt-4o
    backends:
      - name: openai
        schema: {{ name: OpenAI }}
        auth:
          apiKey:
            filename: {}
"#,
			key_file.path().display()
		);
		let mut p = ChatCompletionProcessor::new(active(&config).await);
		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		let resp = p
			.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();
		let (headers, _, _) = mutation_of(&resp);
		assert_eq!(header(&headers, "Authorization"), Some("Bearer sk-test-key"));
	}

	#[tokio::test]
	async fn models_processor_answers_immediately() {
		let config = r#"
schema: { name: OpenAI }
models:
  - name: llama3.3333
    ownedBy: aigw
  - name: gpt4.4444
"#;
		let mut p = ModelsProcessor::new(active(config).await);
		let resp = p
			.process_request_headers(&http_headers(&[(":path", "/v1/models")]))
			.await
			.unwrap();
		let Some(Response::ImmediateResponse(imm)) = resp.response else {
			panic!("expected immediate response");
		};
		assert_eq!(imm.status.unwrap().code, 200);
		let list: serde_json::Value = serde_json::from_slice(&imm.body).unwrap();
		assert_eq!(list["object"], "list");
		assert_eq!(list["data"][0]["id"], "llama3.3333");
		assert_eq!(list["data"][0]["owned_by"], "aigw");
		assert_eq!(list["data"][0]["object"], "model");
		assert_eq!(list["data"][1]["owned_by"], "ai-gateway");
		assert!(list["data"][0]["created"].as_i64().unwrap() > 0);

		let err = p
			.process_request_body(&http_body(b"{}", true))
			.await
			.unwrap_err();
		assert!(matches!(err, ProcessError::UnexpectedMethodCall(_)));
	}

	#[tokio::test]
	async fn passthrough_processor_proceeds_everywhere() {
		let mut p = PassthroughProcessor;
		let resp = p
			.process_request_headers(&http_headers(&[(":path", "/healthz")]))
			.await
			.unwrap();
		assert!(matches!(resp.response, Some(Response::RequestHeaders(_))));
		let resp = p.process_request_body(&http_body(b"x", true)).await.unwrap();
		let (headers, body, clear) = mutation_of(&resp);
		assert!(headers.is_empty() && body.is_none() && !clear);
	}

	#[tokio::test]
	async fn backend_error_is_translated_not_failed() {
		let mut p = ChatCompletionProcessor::new(active(BEDROCK_CONFIG).await);
		p.process_request_headers(&http_headers(&[(":method", "POST")]))
			.await
			.unwrap();
		let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
		p.process_request_body(&http_body(body.to_string().as_bytes(), true))
			.await
			.unwrap();
		p.process_response_headers(&http_headers(&[
			(":status", "429"),
			("content-type", "application/json"),
			("x-amzn-errortype", "ThrottlingException"),
		]))
		.await
		.unwrap();
		let resp = p
			.process_response_body(&http_body(br#"{"message":"too fast"}"#, true))
			.await
			.unwrap();
		let (_, new_body, _) = mutation_of(&resp);
		let err: serde_json::Value = serde_json::from_slice(&new_body.unwrap()).unwrap();
		assert_eq!(err["type"], "error");
		assert_eq!(err["error"]["code"], "429");
		assert_eq!(err["error"]["message"], "too fast");
	}
}
