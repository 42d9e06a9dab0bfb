//! The external-processor gRPC service.
//!
//! One duplex stream per proxied HTTP request: the first message carries the
//! request headers, whose `:path` selects the per-stream processor. Later
//! messages are dispatched to the processor phase by phase. The active
//! configuration is swapped atomically; each stream binds the snapshot
//! current at its start.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwapOption;
use protos::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessor;
use protos::envoy::service::ext_proc::v3::processing_request::Request as PhaseRequest;
use protos::envoy::service::ext_proc::v3::processing_response::Response as PhaseResponse;
use protos::envoy::service::ext_proc::v3::{
	HeaderMutation, ProcessingRequest, ProcessingResponse, TrailersResponse,
};
use protos::grpc::health::v1::health_server::Health;
use protos::grpc::health::v1::{HealthCheckRequest, HealthCheckResponse, health_check_response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::auth::AuthError;
use crate::config::ProcessorConfig;
use crate::mutation::header_value;
use crate::processor::{
	ActiveConfig, ChatCompletionProcessor, ModelsProcessor, PassthroughProcessor, Processor,
};
use crate::router::RouterFactory;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const MODELS_PATH: &str = "/v1/models";

/// Headers whose values never appear in logs.
const SENSITIVE_HEADERS: &[&str] = &["authorization"];

pub type ProcessorFactory =
	Box<dyn Fn(Arc<ActiveConfig>) -> Box<dyn Processor> + Send + Sync>;

pub struct Server {
	active: ArcSwapOption<ActiveConfig>,
	router_factory: Option<RouterFactory>,
	factories: HashMap<String, ProcessorFactory>,
	catch_all: Option<ProcessorFactory>,
	load_count: AtomicUsize,
}

impl Server {
	/// A server with the standard path registrations and a passthrough
	/// catch-all.
	pub fn new(router_factory: Option<RouterFactory>) -> Self {
		let mut server = Self::empty(router_factory);
		server.register(
			CHAT_COMPLETIONS_PATH,
			Box::new(|active| Box::new(ChatCompletionProcessor::new(active))),
		);
		server.register(
			MODELS_PATH,
			Box::new(|active| Box::new(ModelsProcessor::new(active))),
		);
		server.set_catch_all(Box::new(|_| Box::<PassthroughProcessor>::default()));
		server
	}

	/// A server with no registrations at all; paths without a factory fail
	/// with NotFound.
	pub fn empty(router_factory: Option<RouterFactory>) -> Self {
		Self {
			active: ArcSwapOption::empty(),
			router_factory,
			factories: HashMap::new(),
			catch_all: None,
			load_count: AtomicUsize::new(0),
		}
	}

	pub fn register(&mut self, path: &str, factory: ProcessorFactory) {
		self.factories.insert(path.to_string(), factory);
	}

	pub fn set_catch_all(&mut self, factory: ProcessorFactory) {
		self.catch_all = Some(factory);
	}

	/// Publishes a new configuration snapshot. In-flight streams keep the
	/// snapshot they started with.
	pub async fn load_config(&self, config: Arc<ProcessorConfig>) -> Result<(), AuthError> {
		let active = ActiveConfig::build(config, self.router_factory.as_ref()).await?;
		self.active.store(Some(active));
		self.load_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	pub fn load_count(&self) -> usize {
		self.load_count.load(Ordering::SeqCst)
	}

	pub fn current_config(&self) -> Option<Arc<ActiveConfig>> {
		self.active.load_full()
	}

	fn processor_for(&self, path: &str) -> Result<Box<dyn Processor>, Status> {
		let active = self
			.active
			.load_full()
			.ok_or_else(|| Status::unavailable("no configuration loaded"))?;
		if let Some(factory) = self.factories.get(path) {
			return Ok(factory(active));
		}
		match &self.catch_all {
			Some(factory) => Ok(factory(active)),
			None => Err(Status::not_found(format!(
				"no processor registered for path {path}"
			))),
		}
	}

	async fn dispatch(
		processor: &mut dyn Processor,
		message: &ProcessingRequest,
	) -> Result<ProcessingResponse, Status> {
		match &message.request {
			Some(PhaseRequest::RequestHeaders(h)) => processor
				.process_request_headers(h)
				.await
				.map_err(|e| Status::unknown(format!("process request headers: {e}"))),
			Some(PhaseRequest::RequestBody(b)) => processor
				.process_request_body(b)
				.await
				.map_err(|e| Status::unknown(format!("process request body: {e}"))),
			Some(PhaseRequest::ResponseHeaders(h)) => processor
				.process_response_headers(h)
				.await
				.map_err(|e| Status::unknown(format!("process response headers: {e}"))),
			Some(PhaseRequest::ResponseBody(b)) => processor
				.process_response_body(b)
				.await
				.map_err(|e| Status::unknown(format!("process response body: {e}"))),
			// Trailer phases carry nothing we act on.
			Some(PhaseRequest::RequestTrailers(_)) => Ok(ProcessingResponse {
				response: Some(PhaseResponse::RequestTrailers(TrailersResponse::default())),
				..Default::default()
			}),
			Some(PhaseRequest::ResponseTrailers(_)) => Ok(ProcessingResponse {
				response: Some(PhaseResponse::ResponseTrailers(TrailersResponse::default())),
				..Default::default()
			}),
			None => Ok(ProcessingResponse::default()),
		}
	}

	async fn run_stream(
		self: Arc<Self>,
		mut inbound: Streaming<ProcessingRequest>,
		tx: mpsc::Sender<Result<ProcessingResponse, Status>>,
	) {
		let first = match inbound.message().await {
			Ok(Some(m)) => m,
			Ok(None) => return,
			Err(err) => {
				debug!("stream terminated while waiting for headers: {err}");
				return;
			},
		};

		let path = match &first.request {
			Some(PhaseRequest::RequestHeaders(h)) => h
				.headers
				.as_ref()
				.and_then(|hm| hm.headers.iter().find(|h| h.key == ":path"))
				.map(header_value)
				.unwrap_or_default(),
			_ => {
				let _ = tx
					.send(Err(Status::invalid_argument(
						"first message must carry request headers",
					)))
					.await;
				return;
			},
		};

		let mut processor = match self.processor_for(&path) {
			Ok(p) => p,
			Err(status) => {
				let _ = tx.send(Err(status)).await;
				return;
			},
		};

		let mut message = first;
		loop {
			match Self::dispatch(processor.as_mut(), &message).await {
				Ok(response) => {
					if tracing::enabled!(tracing::Level::DEBUG) {
						debug!(response = ?redact_response(&response), "sending processing response");
					}
					if tx.send(Ok(response)).await.is_err() {
						// The proxy went away.
						return;
					}
				},
				Err(status) => {
					warn!(%path, "stream failed: {status}");
					let _ = tx.send(Err(status)).await;
					return;
				},
			}
			message = match inbound.message().await {
				Ok(Some(m)) => m,
				Ok(None) => return,
				Err(err) => {
					debug!("stream terminated: {err}");
					return;
				},
			};
		}
	}
}

/// Replaces sensitive header values in a copy used for logging. The mutation
/// sent to the proxy is never touched.
pub fn redact_headers(mutation: &HeaderMutation) -> HeaderMutation {
	let mut copy = mutation.clone();
	for option in &mut copy.set_headers {
		if let Some(header) = &mut option.header {
			if SENSITIVE_HEADERS.contains(&header.key.to_ascii_lowercase().as_str()) {
				header.value = "[REDACTED]".to_string();
				header.raw_value = b"[REDACTED]".to_vec();
			}
		}
	}
	copy
}

pub fn redact_response(response: &ProcessingResponse) -> ProcessingResponse {
	let mut copy = response.clone();
	let mutation = match &mut copy.response {
		Some(PhaseResponse::RequestHeaders(h)) | Some(PhaseResponse::ResponseHeaders(h)) => h
			.response
			.as_mut()
			.and_then(|c| c.header_mutation.as_mut()),
		Some(PhaseResponse::RequestBody(b)) | Some(PhaseResponse::ResponseBody(b)) => b
			.response
			.as_mut()
			.and_then(|c| c.header_mutation.as_mut()),
		Some(PhaseResponse::ImmediateResponse(imm)) => imm.headers.as_mut(),
		_ => None,
	};
	if let Some(m) = mutation {
		*m = redact_headers(m);
	}
	copy
}

/// The tonic service wrapper around [`Server`].
#[derive(Clone)]
pub struct ExtProcService {
	server: Arc<Server>,
}

impl ExtProcService {
	pub fn new(server: Arc<Server>) -> Self {
		Self { server }
	}
}

#[tonic::async_trait]
impl ExternalProcessor for ExtProcService {
	type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

	async fn process(
		&self,
		request: Request<Streaming<ProcessingRequest>>,
	) -> Result<Response<Self::ProcessStream>, Status> {
		let inbound = request.into_inner();
		let (tx, rx) = mpsc::channel(16);
		tokio::spawn(self.server.clone().run_stream(inbound, tx));
		Ok(Response::new(ReceiverStream::new(rx)))
	}
}

/// Minimal health service: always serving; the watch variant is not
/// implemented.
#[derive(Clone, Default)]
pub struct HealthService;

#[tonic::async_trait]
impl Health for HealthService {
	async fn check(
		&self,
		_request: Request<HealthCheckRequest>,
	) -> Result<Response<HealthCheckResponse>, Status> {
		Ok(Response::new(HealthCheckResponse {
			status: health_check_response::ServingStatus::Serving as i32,
		}))
	}

	type WatchStream = ReceiverStream<Result<HealthCheckResponse, Status>>;

	async fn watch(
		&self,
		_request: Request<HealthCheckRequest>,
	) -> Result<Response<Self::WatchStream>, Status> {
		Err(Status::unimplemented("health watch is not implemented"))
	}
}

#[cfg(test)]
mod tests {
	use protos::envoy::config::core::v3::HeaderValue;
	use protos::envoy::config::core::v3::HeaderValueOption;
	use protos::envoy::service::ext_proc::v3::{HttpBody, HttpHeaders};

	use super::*;
	use crate::mutation::{request_body_response, set_header};

	async fn loaded_server() -> Arc<Server> {
		let server = Arc::new(Server::new(None));
		server
			.load_config(Arc::new(ProcessorConfig::default()))
			.await
			.unwrap();
		server
	}

	#[test]
	fn redaction_only_affects_the_copy() {
		let mut mutation = HeaderMutation::default();
		mutation
			.set_headers
			.push(set_header("Authorization", b"Bearer secret"));
		mutation.set_headers.push(set_header(":path", b"/v1/x"));

		let redacted = redact_headers(&mutation);
		let value = |m: &HeaderMutation, key: &str| {
			m.set_headers
				.iter()
				.find(|h| {
					h.header
						.as_ref()
						.is_some_and(|hv| hv.key.eq_ignore_ascii_case(key))
				})
				.and_then(|h| h.header.as_ref().map(header_value))
		};

		assert_eq!(value(&redacted, "authorization").as_deref(), Some("[REDACTED]"));
		assert_eq!(value(&redacted, ":path").as_deref(), Some("/v1/x"));
		// The outbound mutation still carries the real credential.
		assert_eq!(
			value(&mutation, "authorization").as_deref(),
			Some("Bearer secret")
		);
	}

	#[test]
	fn redact_response_covers_set_headers_of_body_responses() {
		let mut mutation = HeaderMutation::default();
		mutation
			.set_headers
			.push(set_header("authorization", b"AWS4-HMAC-SHA256 secret"));
		let resp = request_body_response(Some(mutation), None);
		let redacted = redact_response(&resp);

		let PhaseResponse::RequestBody(body) = redacted.response.unwrap() else {
			panic!("wrong variant");
		};
		let header: &HeaderValueOption =
			&body.response.unwrap().header_mutation.unwrap().set_headers[0];
		let hv: &HeaderValue = header.header.as_ref().unwrap();
		assert_eq!(hv.raw_value, b"[REDACTED]");
	}

	#[tokio::test]
	async fn unknown_path_without_catch_all_is_not_found() {
		let mut server = Server::empty(None);
		server.register(
			CHAT_COMPLETIONS_PATH,
			Box::new(|active| Box::new(ChatCompletionProcessor::new(active))),
		);
		server
			.load_config(Arc::new(ProcessorConfig::default()))
			.await
			.unwrap();
		let err = server.processor_for("/nope").unwrap_err();
		assert_eq!(err.code(), tonic::Code::NotFound);
		assert!(server.processor_for(CHAT_COMPLETIONS_PATH).is_ok());
	}

	#[tokio::test]
	async fn default_server_passes_unknown_paths_through() {
		let server = loaded_server().await;
		assert!(server.processor_for("/anything").is_ok());
	}

	#[tokio::test]
	async fn dispatch_preserves_phase_name_in_errors() {
		let server = loaded_server().await;
		let mut processor = server.processor_for(MODELS_PATH).unwrap();

		let ok = Server::dispatch(
			processor.as_mut(),
			&ProcessingRequest {
				request: Some(PhaseRequest::RequestHeaders(HttpHeaders::default())),
				..Default::default()
			},
		)
		.await
		.unwrap();
		assert!(matches!(
			ok.response,
			Some(PhaseResponse::ImmediateResponse(_))
		));

		let err = Server::dispatch(
			processor.as_mut(),
			&ProcessingRequest {
				request: Some(PhaseRequest::ResponseBody(HttpBody::default())),
				..Default::default()
			},
		)
		.await
		.unwrap_err();
		assert_eq!(err.code(), tonic::Code::Unknown);
		assert!(err.message().contains("process response body"), "{}", err.message());
	}
}
