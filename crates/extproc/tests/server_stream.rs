//! End-to-end tests over the real gRPC surface: a tonic server on an
//! ephemeral port, driven by the generated client.

use std::sync::Arc;

use extproc::config::ProcessorConfig;
use extproc::server::{ExtProcService, HealthService, Server};
use protos::envoy::config::core::v3::{HeaderMap, HeaderValue};
use protos::envoy::service::ext_proc::v3::external_processor_client::ExternalProcessorClient;
use protos::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use protos::envoy::service::ext_proc::v3::processing_request::Request as PhaseRequest;
use protos::envoy::service::ext_proc::v3::processing_response::Response as PhaseResponse;
use protos::envoy::service::ext_proc::v3::{
	HttpBody, HttpHeaders, ProcessingRequest, ProcessingResponse,
};
use protos::grpc::health::v1::HealthCheckRequest;
use protos::grpc::health::v1::health_client::HealthClient;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Channel;

const CONFIG: &str = r#"
uuid: it-test
schema: { name: OpenAI }
models:
  - name: llama3.3333
    ownedBy: aigw
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

async fn start(server: Server) -> Channel {
	let server = Arc::new(server);
	server
		.load_config(ProcessorConfig::from_yaml(CONFIG).unwrap())
		.await
		.unwrap();

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(
		tonic::transport::Server::builder()
			.add_service(ExternalProcessorServer::new(ExtProcService::new(server)))
			.add_service(protos::grpc::health::v1::health_server::HealthServer::new(
				HealthService,
			))
			.serve_with_incoming(TcpListenerStream::new(listener)),
	);

	Channel::from_shared(format!("http://{addr}"))
		.unwrap()
		.connect()
		.await
		.unwrap()
}

fn request_headers(pairs: &[(&str, &str)]) -> ProcessingRequest {
	ProcessingRequest {
		request: Some(PhaseRequest::RequestHeaders(HttpHeaders {
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
		})),
		..Default::default()
	}
}

fn request_body(body: &str) -> ProcessingRequest {
	ProcessingRequest {
		request: Some(PhaseRequest::RequestBody(HttpBody {
			body: body.as_bytes().to_vec(),
			end_of_stream: true,
		})),
		..Default::default()
	}
}

fn response_headers(pairs: &[(&str, &str)]) -> ProcessingRequest {
	let ProcessingRequest {
		request: Some(PhaseRequest::RequestHeaders(headers)),
		..
	} = request_headers(pairs)
	else {
		unreachable!()
	};
	ProcessingRequest {
		request: Some(PhaseRequest::ResponseHeaders(headers)),
		..Default::default()
	}
}

fn response_body(body: &[u8]) -> ProcessingRequest {
	ProcessingRequest {
		request: Some(PhaseRequest::ResponseBody(HttpBody {
			body: body.to_vec(),
			end_of_stream: true,
		})),
		..Default::default()
	}
}

async fn run(
	channel: Channel,
	messages: Vec<ProcessingRequest>,
) -> Result<Vec<ProcessingResponse>, tonic::Status> {
	let mut client = ExternalProcessorClient::new(channel);
	let outbound = tokio_stream::iter(messages);
	let mut inbound = client.process(outbound).await?.into_inner();
	let mut responses = Vec::new();
	while let Some(resp) = inbound.message().await? {
		responses.push(resp);
	}
	Ok(responses)
}

#[tokio::test]
async fn chat_completion_stream_translates_and_reports_costs() {
	let channel = start(Server::new(None)).await;
	let responses = run(
		channel,
		vec![
			request_headers(&[(":method", "POST"), (":path", "/v1/chat/completions")]),
			request_body(r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#),
			response_headers(&[(":status", "200"), ("content-type", "application/json")]),
			response_body(
				br#"{"output":{"message":{"role":"assistant","content":[{"text":"hello"}]}},"usage":{"inputTokens":3,"outputTokens":4,"totalTokens":7},"stopReason":"end_turn"}"#,
			),
		],
	)
	.await
	.unwrap();

	assert_eq!(responses.len(), 4);
	let Some(PhaseResponse::RequestBody(body_resp)) = &responses[1].response else {
		panic!("expected request body response");
	};
	let common = body_resp.response.as_ref().unwrap();
	assert!(common.clear_route_cache);
	let set = &common.header_mutation.as_ref().unwrap().set_headers;
	let path = set
		.iter()
		.find(|h| h.header.as_ref().is_some_and(|hv| hv.key == ":path"))
		.and_then(|h| h.header.as_ref())
		.unwrap();
	assert_eq!(path.raw_value, b"/model/gpt-4o/converse");

	let metadata = responses[3].dynamic_metadata.as_ref().unwrap();
	let ns = metadata.fields.get("ai_gateway_llm_ns").unwrap();
	let Some(prost_types::value::Kind::StructValue(inner)) = &ns.kind else {
		panic!("expected namespaced metadata");
	};
	let Some(prost_types::value::Kind::NumberValue(total)) =
		inner.fields.get("used_total").and_then(|v| v.kind.as_ref())
	else {
		panic!("expected numeric cost");
	};
	assert_eq!(*total, 7.0);
}

#[tokio::test]
async fn models_listing_is_an_immediate_response() {
	let channel = start(Server::new(None)).await;
	let responses = run(
		channel,
		vec![request_headers(&[(":method", "GET"), (":path", "/v1/models")])],
	)
	.await
	.unwrap();

	assert_eq!(responses.len(), 1);
	let Some(PhaseResponse::ImmediateResponse(imm)) = &responses[0].response else {
		panic!("expected immediate response");
	};
	assert_eq!(imm.status.as_ref().unwrap().code, 200);
	let list: serde_json::Value = serde_json::from_slice(&imm.body).unwrap();
	assert_eq!(list["object"], "list");
	assert_eq!(list["data"][0]["id"], "llama3.3333");
}

#[tokio::test]
async fn unknown_paths_pass_through_on_the_default_server() {
	let channel = start(Server::new(None)).await;
	let responses = run(
		channel,
		vec![request_headers(&[(":method", "GET"), (":path", "/healthz")])],
	)
	.await
	.unwrap();
	assert!(matches!(
		responses[0].response,
		Some(PhaseResponse::RequestHeaders(_))
	));
}

#[tokio::test]
async fn unknown_paths_fail_without_a_catch_all() {
	let channel = start(Server::empty(None)).await;
	let err = run(
		channel,
		vec![request_headers(&[(":method", "GET"), (":path", "/nope")])],
	)
	.await
	.unwrap_err();
	assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn phase_errors_fail_the_stream_with_unknown() {
	let channel = start(Server::new(None)).await;
	let err = run(
		channel,
		vec![
			request_headers(&[(":method", "POST"), (":path", "/v1/chat/completions")]),
			request_body("{not json"),
		],
	)
	.await
	.unwrap_err();
	assert_eq!(err.code(), tonic::Code::Unknown);
	assert!(err.message().contains("process request body"), "{}", err.message());
}

#[tokio::test]
async fn health_check_is_serving_and_watch_is_unimplemented() {
	let channel = start(Server::new(None)).await;
	let mut health = HealthClient::new(channel);

	let resp = health
		.check(HealthCheckRequest {
			service: String::new(),
		})
		.await
		.unwrap()
		.into_inner();
	assert_eq!(
		resp.status,
		protos::grpc::health::v1::health_check_response::ServingStatus::Serving as i32
	);

	let err = health
		.watch(HealthCheckRequest {
			service: String::new(),
		})
		.await
		.unwrap_err();
	assert_eq!(err.code(), tonic::Code::Unimplemented);
}
