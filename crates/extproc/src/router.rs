//! Weighted backend selection keyed on request headers.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use crate::config::{Backend, RouteRule};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RouterError {
	#[error("no matching rule")]
	NoMatchingRule,
}

/// Selects a backend for a set of request headers. Implementations must be
/// safe for concurrent use; one calculator serves every stream bound to a
/// config snapshot.
pub trait RouteCalculator: Send + Sync + std::fmt::Debug {
	fn calculate(&self, headers: &HashMap<String, String>) -> Result<Backend, RouterError>;
}

/// Builds a replacement router around the default one. The default router is
/// handed in as a delegate so a custom implementation can fall back to it.
pub type RouterFactory =
	Arc<dyn Fn(Arc<dyn RouteCalculator>) -> Arc<dyn RouteCalculator> + Send + Sync>;

#[derive(Debug)]
pub struct Router {
	rules: Vec<RouteRule>,
}

impl Router {
	pub fn new(rules: Vec<RouteRule>) -> Self {
		Self { rules }
	}
}

impl RouteCalculator for Router {
	fn calculate(&self, headers: &HashMap<String, String>) -> Result<Backend, RouterError> {
		// The inner loop breaks on the first matching header of a rule, but
		// the outer loop keeps scanning, so a later rule shadows an earlier
		// one. This matches the deployed behavior and is relied on by
		// existing configurations.
		let mut selected: Option<&RouteRule> = None;
		for rule in &self.rules {
			for m in &rule.headers {
				if headers.get(&m.name).is_some_and(|v| v == &m.value) {
					selected = Some(rule);
					break;
				}
			}
		}
		let rule = selected.ok_or(RouterError::NoMatchingRule)?;
		if rule.backends.is_empty() {
			return Err(RouterError::NoMatchingRule);
		}
		Ok(pick_weighted(&rule.backends).clone())
	}
}

fn pick_weighted(backends: &[Backend]) -> &Backend {
	let total: u32 = backends.iter().map(|b| b.weight).sum();
	if total == 0 {
		return &backends[0];
	}
	let mut remaining = rand::rng().random_range(0..total);
	for b in backends {
		if b.weight > remaining {
			return b;
		}
		remaining -= b.weight;
	}
	// Unreachable: the draw is below the weight total.
	&backends[backends.len() - 1]
}
