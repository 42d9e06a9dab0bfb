//! Helpers for building external-processor response messages.

use std::collections::HashMap;

use protos::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use protos::envoy::r#type::v3::HttpStatus;
use protos::envoy::service::ext_proc::v3::processing_response::Response;
use protos::envoy::service::ext_proc::v3::{
	BodyMutation, BodyResponse, CommonResponse, HeaderMutation, HeadersResponse, ImmediateResponse,
	ProcessingResponse, body_mutation,
};

/// Decodes a header value, preferring `raw_value` when the proxy populated it.
pub fn header_value(hv: &HeaderValue) -> String {
	if !hv.raw_value.is_empty() {
		String::from_utf8_lossy(&hv.raw_value).into_owned()
	} else {
		hv.value.clone()
	}
}

/// Collects a proto header map into a lookup map, preserving key case as
/// observed.
pub fn headers_to_map(headers: &protos::envoy::config::core::v3::HeaderMap) -> HashMap<String, String> {
	headers
		.headers
		.iter()
		.map(|h| (h.key.clone(), header_value(h)))
		.collect()
}

/// A single set-header entry. Values are carried in `raw_value`, which the
/// proxy accepts for any byte sequence.
pub fn set_header(key: &str, value: &[u8]) -> HeaderValueOption {
	HeaderValueOption {
		header: Some(HeaderValue {
			key: key.to_string(),
			value: String::new(),
			raw_value: value.to_vec(),
		}),
		append_action: 0,
		keep_empty_value: false,
	}
}

/// Appends or overwrites `content-length` on the mutation to match a new
/// body. Downstream HTTP/2 upstreams reject bodies whose declared length is
/// stale.
pub fn set_content_length(mutation: &mut HeaderMutation, len: usize) {
	mutation
		.set_headers
		.push(set_header("content-length", len.to_string().as_bytes()));
}

pub fn body_replace(body: Vec<u8>) -> BodyMutation {
	BodyMutation {
		mutation: Some(body_mutation::Mutation::Body(body)),
	}
}

fn common(
	header_mutation: Option<HeaderMutation>,
	body_mutation: Option<BodyMutation>,
	clear_route_cache: bool,
) -> CommonResponse {
	CommonResponse {
		status: 0,
		header_mutation,
		body_mutation,
		trailers: None,
		clear_route_cache,
	}
}

pub fn request_headers_response(header_mutation: Option<HeaderMutation>) -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::RequestHeaders(HeadersResponse {
			response: Some(common(header_mutation, None, false)),
		})),
		..Default::default()
	}
}

pub fn request_body_response(
	header_mutation: Option<HeaderMutation>,
	body_mutation: Option<BodyMutation>,
) -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::RequestBody(BodyResponse {
			// The appended routing headers must be re-consulted by the proxy's
			// route table, hence the route-cache clear.
			response: Some(common(header_mutation, body_mutation, true)),
		})),
		..Default::default()
	}
}

/// A request-body proceed response with no mutations and no route-cache
/// clear, for processors that leave the request untouched.
pub fn empty_request_body_response() -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::RequestBody(BodyResponse {
			response: Some(common(None, None, false)),
		})),
		..Default::default()
	}
}

pub fn response_headers_response(header_mutation: Option<HeaderMutation>) -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::ResponseHeaders(HeadersResponse {
			response: Some(common(header_mutation, None, false)),
		})),
		..Default::default()
	}
}

pub fn response_body_response(
	header_mutation: Option<HeaderMutation>,
	body_mutation: Option<BodyMutation>,
) -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::ResponseBody(BodyResponse {
			response: Some(common(header_mutation, body_mutation, false)),
		})),
		..Default::default()
	}
}

pub fn immediate_response(
	status_code: i32,
	headers: Vec<HeaderValueOption>,
	body: Vec<u8>,
) -> ProcessingResponse {
	ProcessingResponse {
		response: Some(Response::ImmediateResponse(ImmediateResponse {
			status: Some(HttpStatus { code: status_code }),
			headers: Some(HeaderMutation {
				set_headers: headers,
				remove_headers: Vec::new(),
			}),
			body,
			grpc_status: None,
			details: String::new(),
		})),
		..Default::default()
	}
}
