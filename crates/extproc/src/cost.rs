//! CEL cost programs evaluated against per-request token usage.
//!
//! A program sees five variables: `model` and `backend` (strings) plus
//! `input_tokens`, `output_tokens` and `total_tokens` (unsigned integers),
//! and must produce a non-negative integer.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use cel_interpreter::{Context, ExecutionError, Program, Value};
use serde::{Deserialize, Serialize, Serializer};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("parse: {0}")]
	Parse(String),
	#[error("execution: {0}")]
	Resolve(#[from] ExecutionError),
	#[error("CEL expression result is negative ({0})")]
	NegativeResult(i64),
	#[error("CEL expression result has unsupported type: {0}")]
	UnsupportedResult(String),
}

/// Token counts accumulated over one stream.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TokenCounts {
	pub input: u32,
	pub output: u32,
	pub total: u32,
}

/// A compiled cost expression. Compilation parses the source and then runs a
/// probe evaluation with dummy inputs; expressions that can never evaluate
/// (bad types, literal underflow) are rejected up front. The compiled form
/// is immutable and safe to share across streams.
pub struct CelProgram {
	program: Program,
	source: String,
}

impl CelProgram {
	pub fn new(source: impl Into<String>) -> Result<Self, Error> {
		let source = source.into();
		let program = Program::compile(&source).map_err(|e| Error::Parse(e.to_string()))?;
		let program = Self { program, source };
		program.eval("dummy", "dummy", TokenCounts::default())?;
		Ok(program)
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	pub fn eval(&self, model: &str, backend: &str, usage: TokenCounts) -> Result<u64, Error> {
		let mut ctx = Context::default();
		ctx.add_variable_from_value("model", Value::String(Arc::new(model.to_string())));
		ctx.add_variable_from_value("backend", Value::String(Arc::new(backend.to_string())));
		ctx.add_variable_from_value("input_tokens", Value::UInt(usage.input as u64));
		ctx.add_variable_from_value("output_tokens", Value::UInt(usage.output as u64));
		ctx.add_variable_from_value("total_tokens", Value::UInt(usage.total as u64));

		match self.program.execute(&ctx)? {
			Value::UInt(v) => Ok(v),
			Value::Int(v) if v < 0 => Err(Error::NegativeResult(v)),
			Value::Int(v) => Ok(v as u64),
			other => Err(Error::UnsupportedResult(format!("{other:?}"))),
		}
	}
}

impl Debug for CelProgram {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CelProgram")
			.field("expression", &self.source)
			.finish()
	}
}

impl Serialize for CelProgram {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.source)
	}
}

impl<'de> Deserialize<'de> for CelProgram {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let source = String::deserialize(deserializer)?;
		CelProgram::new(source).map_err(|e| serde::de::Error::custom(e.to_string()))
	}
}
