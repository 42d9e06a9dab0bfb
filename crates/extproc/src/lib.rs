//! An external processing service for an LLM-aware HTTP proxy.
//!
//! The proxy hands each HTTP stream to this service in four phases (request
//! headers, request body, response headers, response body). Per stream, the
//! service parses the client's OpenAI-style chat-completions body, selects a
//! backend with weighted header rules, rewrites the request into the
//! backend's wire schema (OpenAI-compatible or AWS Bedrock Converse),
//! attaches credentials, translates unary and event-stream responses back to
//! the client schema, and reports token-usage costs as dynamic metadata.

pub mod auth;
pub mod compression;
pub mod config;
pub mod cost;
pub mod eventstream;
pub mod mutation;
pub mod processor;
pub mod router;
pub mod schema;
pub mod server;
pub mod translator;
pub mod watcher;
