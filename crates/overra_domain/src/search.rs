#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One hit of a room search, with optional surrounding context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
	#[serde(default)]
	pub result: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<SearchContext>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchContext {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub events_before: Vec<Value>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub events_after: Vec<Value>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl SearchResult {
	pub fn new(result: Value) -> Self {
		Self {
			result,
			..Self::default()
		}
	}
}
