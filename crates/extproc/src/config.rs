//! Filter configuration: an immutable snapshot parsed from YAML.
//!
//! The watcher replaces the whole snapshot on change; per-stream processors
//! bind the snapshot current at stream start and never observe a partial
//! update.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cost::CelProgram;

pub const DEFAULT_METADATA_NAMESPACE: &str = "ai_gateway_llm_ns";
pub const DEFAULT_MODEL_NAME_HEADER: &str = "x-ai-eg-model";
pub const DEFAULT_SELECTED_BACKEND_HEADER: &str = "x-ai-eg-selected-backend";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("failed to parse config: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error("unsupported input schema: {0:?}")]
	UnsupportedSchema(SchemaName),
	#[error("request cost {0:?} has type CEL but no expression")]
	MissingExpression(String),
	#[error("request cost {0:?} carries an expression but has type {1:?}")]
	UnexpectedExpression(String, CostType),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaName {
	OpenAI,
	AWSBedrock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VersionedSchema {
	pub name: SchemaName,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessorConfig {
	/// Opaque version identifier for the snapshot.
	#[serde(default)]
	pub uuid: String,
	#[serde(default = "default_namespace")]
	pub metadata_namespace: String,
	/// Client-facing input schema. Only OpenAI is accepted.
	#[serde(default = "default_schema")]
	pub schema: VersionedSchema,
	/// Header on which the parsed model name is published to the proxy.
	#[serde(default = "default_model_header")]
	pub model_name_header_key: String,
	/// Header on which the chosen backend name is published to the proxy.
	#[serde(default = "default_backend_header")]
	pub selected_backend_header_key: String,
	/// Models reported by the `/v1/models` listing.
	#[serde(default)]
	pub models: Vec<DeclaredModel>,
	#[serde(default)]
	pub llm_request_costs: Vec<LlmRequestCost>,
	#[serde(default)]
	pub rules: Vec<RouteRule>,
}

impl Default for ProcessorConfig {
	fn default() -> Self {
		Self {
			uuid: String::new(),
			metadata_namespace: default_namespace(),
			schema: default_schema(),
			model_name_header_key: default_model_header(),
			selected_backend_header_key: default_backend_header(),
			models: Vec::new(),
			llm_request_costs: Vec::new(),
			rules: Vec::new(),
		}
	}
}

fn default_namespace() -> String {
	DEFAULT_METADATA_NAMESPACE.to_string()
}

fn default_schema() -> VersionedSchema {
	VersionedSchema {
		name: SchemaName::OpenAI,
		version: None,
	}
}

fn default_model_header() -> String {
	DEFAULT_MODEL_NAME_HEADER.to_string()
}

fn default_backend_header() -> String {
	DEFAULT_SELECTED_BACKEND_HEADER.to_string()
}

impl ProcessorConfig {
	/// Parses and validates a YAML snapshot.
	pub fn from_yaml(raw: &str) -> Result<Arc<Self>, ConfigError> {
		let cfg: ProcessorConfig = serde_yaml::from_str(raw)?;
		cfg.validate()?;
		Ok(Arc::new(cfg))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.schema.name != SchemaName::OpenAI {
			return Err(ConfigError::UnsupportedSchema(self.schema.name));
		}
		for cost in &self.llm_request_costs {
			match (cost.r#type, cost.cel.is_some()) {
				(CostType::Cel, false) => {
					return Err(ConfigError::MissingExpression(cost.metadata_key.clone()));
				},
				(t, true) if t != CostType::Cel => {
					return Err(ConfigError::UnexpectedExpression(
						cost.metadata_key.clone(),
						t,
					));
				},
				_ => {},
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeclaredModel {
	pub name: String,
	#[serde(default = "default_owned_by")]
	pub owned_by: String,
}

fn default_owned_by() -> String {
	"ai-gateway".to_string()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostType {
	InputToken,
	OutputToken,
	TotalToken,
	#[serde(rename = "CEL")]
	Cel,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmRequestCost {
	/// Key under which the value lands in the dynamic-metadata namespace.
	pub metadata_key: String,
	pub r#type: CostType,
	/// Present iff `type` is CEL. Compiled at parse time; the compiled program
	/// is cached here beside its source.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cel: Option<CelProgram>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteRule {
	/// Disjunctive header matches: the rule matches if any header matches.
	#[serde(default)]
	pub headers: Vec<HeaderMatch>,
	pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderMatch {
	pub name: String,
	pub value: String,
	#[serde(default)]
	pub r#type: HeaderMatchType,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderMatchType {
	#[default]
	Exact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Backend {
	pub name: String,
	pub schema: VersionedSchema,
	#[serde(default)]
	pub weight: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth: Option<BackendAuthConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendAuthConfig {
	ApiKey(ApiKeyAuthConfig),
	Aws(AwsAuthConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiKeyAuthConfig {
	pub filename: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AwsAuthConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credential_file_name: Option<PathBuf>,
	pub region: String,
}
