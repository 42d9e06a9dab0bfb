//! Per-backend credential attachment.
//!
//! Handlers mutate the pending header mutation in place: the API-key handler
//! adds a bearer token, the AWS handler computes a SigV4 signature over the
//! outgoing method, path and body. Both are constructed once per stream from
//! the selected backend's config and are safe to call from any task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use aws_config::environment::EnvironmentVariableCredentialsProvider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use protos::envoy::service::ext_proc::v3::HeaderMutation;

use crate::config::BackendAuthConfig;
use crate::mutation::{header_value, set_header};

pub const AUTHORIZATION: &str = "Authorization";

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
	#[error("failed to read {0}: {1}")]
	ReadFile(PathBuf, std::io::Error),
	#[error("api key file {0} is empty")]
	EmptyApiKey(PathBuf),
	#[error("failed to resolve AWS credentials: {0}")]
	Credentials(String),
	#[error("invalid signing request: {0}")]
	Request(#[from] http::Error),
	#[error("signing failed: {0}")]
	Signing(String),
	#[error("request is missing {0}")]
	MissingField(&'static str),
}

#[derive(Debug)]
pub enum BackendAuth {
	ApiKey(ApiKeyAuth),
	Aws(AwsAuth),
}

impl BackendAuth {
	pub async fn new(config: &BackendAuthConfig) -> Result<Self, AuthError> {
		Ok(match config {
			BackendAuthConfig::ApiKey(c) => Self::ApiKey(ApiKeyAuth::new(&c.filename)?),
			BackendAuthConfig::Aws(c) => {
				Self::Aws(AwsAuth::new(c.credential_file_name.as_deref(), &c.region).await?)
			},
		})
	}

	/// Attaches credentials for the outgoing request. `body` is the pending
	/// body mutation's bytes (empty when the body is unchanged).
	pub fn handle(
		&self,
		request_headers: &mut HashMap<String, String>,
		header_mutation: &mut HeaderMutation,
		body: &[u8],
	) -> Result<(), AuthError> {
		match self {
			BackendAuth::ApiKey(h) => {
				h.handle(request_headers, header_mutation);
				Ok(())
			},
			BackendAuth::Aws(h) => h.handle(request_headers, header_mutation, body),
		}
	}
}

/// Bearer-token auth backed by a key file read once at construction.
#[derive(Debug)]
pub struct ApiKeyAuth {
	key: String,
}

impl ApiKeyAuth {
	pub fn new(path: &Path) -> Result<Self, AuthError> {
		let raw =
			fs_err::read_to_string(path).map_err(|e| AuthError::ReadFile(path.to_path_buf(), e))?;
		let key = raw.trim().to_string();
		if key.is_empty() {
			return Err(AuthError::EmptyApiKey(path.to_path_buf()));
		}
		Ok(Self { key })
	}

	fn handle(&self, request_headers: &mut HashMap<String, String>, mutation: &mut HeaderMutation) {
		let bearer = format!("Bearer {}", self.key);
		mutation
			.set_headers
			.push(set_header(AUTHORIZATION, bearer.as_bytes()));
		request_headers.insert(AUTHORIZATION.to_string(), bearer);
	}
}

/// SigV4 signing for Bedrock. Credentials are resolved once at construction,
/// from a shared-credentials file when one is configured and from the
/// standard environment variables otherwise. Signing itself is pure
/// computation and re-entrant.
#[derive(Debug)]
pub struct AwsAuth {
	credentials: Credentials,
	region: String,
}

impl AwsAuth {
	pub async fn new(credential_file: Option<&Path>, region: &str) -> Result<Self, AuthError> {
		let credentials = match credential_file {
			Some(path) => {
				// Surface unreadable files as construction errors instead of
				// letting the provider silently fall through to defaults.
				fs_err::metadata(path).map_err(|e| AuthError::ReadFile(path.to_path_buf(), e))?;
				let files = ProfileFiles::builder()
					.with_file(ProfileFileKind::Credentials, path)
					.build();
				ProfileFileCredentialsProvider::builder()
					.profile_files(files)
					.build()
					.provide_credentials()
					.await
					.map_err(|e| AuthError::Credentials(e.to_string()))?
			},
			None => EnvironmentVariableCredentialsProvider::new()
				.provide_credentials()
				.await
				.map_err(|e| AuthError::Credentials(e.to_string()))?,
		};
		Ok(Self::with_credentials(credentials, region))
	}

	/// Used when the caller already holds static credentials.
	pub fn with_credentials(credentials: Credentials, region: &str) -> Self {
		Self {
			credentials,
			region: region.to_string(),
		}
	}

	fn handle(
		&self,
		request_headers: &HashMap<String, String>,
		mutation: &mut HeaderMutation,
		body: &[u8],
	) -> Result<(), AuthError> {
		let method = request_headers
			.get(":method")
			.cloned()
			.ok_or(AuthError::MissingField(":method"))?;
		// The header mutation is authoritative for the path: the translator
		// has already rewritten it to the Converse endpoint.
		let path = mutation
			.set_headers
			.iter()
			.rev()
			.find(|h| h.header.as_ref().is_some_and(|hv| hv.key == ":path"))
			.and_then(|h| h.header.as_ref().map(header_value))
			.or_else(|| request_headers.get(":path").cloned())
			.ok_or(AuthError::MissingField(":path"))?;

		let url = format!(
			"https://bedrock-runtime.{}.amazonaws.com{}",
			self.region, path
		);

		let identity = self.credentials.clone().into();
		let signing_params = v4::SigningParams::builder()
			.identity(&identity)
			.region(&self.region)
			.name("bedrock")
			.time(SystemTime::now())
			.settings(SigningSettings::default())
			.build()
			.map_err(|e| AuthError::Signing(e.to_string()))?
			.into();

		let signable = SignableRequest::new(
			&method,
			&url,
			std::iter::empty::<(&str, &str)>(),
			SignableBody::Bytes(body),
		)
		.map_err(|e| AuthError::Signing(e.to_string()))?;

		let (instructions, _signature) = sign(signable, &signing_params)
			.map_err(|e| AuthError::Signing(e.to_string()))?
			.into_parts();

		let mut signed = http::Request::builder()
			.method(method.as_str())
			.uri(url.as_str())
			.body(())?;
		instructions.apply_to_request_http1x(&mut signed);
		for (name, value) in signed.headers() {
			mutation
				.set_headers
				.push(set_header(name.as_str(), value.as_bytes()));
		}
		Ok(())
	}
}
