#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Room event as handed out by the homeserver.
///
/// Only the fields the filters touch are typed; everything else is kept in
/// `extra` so events survive a round-trip unchanged. Typed fields holding the
/// wrong JSON type read as absent instead of failing the whole event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
	#[serde(rename = "type", default, deserialize_with = "string_or_empty")]
	pub event_type: String,
	#[serde(default, deserialize_with = "string_or_empty")]
	pub sender: String,
	#[serde(default, deserialize_with = "string_or_empty")]
	pub room_id: String,
	#[serde(default, deserialize_with = "content_or_default")]
	pub content: EventContent,
	#[serde(default, deserialize_with = "object_or_empty", skip_serializing_if = "Map::is_empty")]
	pub unsigned: Map<String, Value>,
	/// Prefix tag split out of the body, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub zrefix: Option<String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContent {
	#[serde(default, deserialize_with = "string_or_none", skip_serializing_if = "Option::is_none")]
	pub body: Option<String>,
	#[serde(default, deserialize_with = "string_or_none", skip_serializing_if = "Option::is_none")]
	pub formatted_body: Option<String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Event {
	pub fn new(event_type: impl Into<String>, sender: impl Into<String>, room_id: impl Into<String>) -> Self {
		Self {
			event_type: event_type.into(),
			sender: sender.into(),
			room_id: room_id.into(),
			..Self::default()
		}
	}

	pub fn with_body(mut self, body: impl Into<String>) -> Self {
		self.content.body = Some(body.into());
		self
	}

	pub fn with_formatted_body(mut self, formatted_body: impl Into<String>) -> Self {
		self.content.formatted_body = Some(formatted_body.into());
		self
	}

	pub fn with_unsigned(mut self, key: impl Into<String>, value: Value) -> Self {
		self.unsigned.insert(key.into(), value);
		self
	}
}

fn string_or_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
	Ok(match Value::deserialize(d)? {
		Value::String(s) => Some(s),
		_ => None,
	})
}

fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
	string_or_none(d).map(Option::unwrap_or_default)
}

fn object_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
	Ok(match Value::deserialize(d)? {
		Value::Object(map) => map,
		_ => Map::new(),
	})
}

fn content_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<EventContent, D::Error> {
	match Value::deserialize(d)? {
		v @ Value::Object(_) => EventContent::deserialize(v).map_err(serde::de::Error::custom),
		_ => Ok(EventContent::default()),
	}
}

/// Read-only view over the parts of an event the visibility rules need.
///
/// Implemented for typed [`Event`]s and for raw JSON records so both paths
/// share a single decision procedure.
pub trait EventView {
	fn event_type(&self) -> Option<&str>;
	fn sender(&self) -> Option<&str>;
	fn room_id(&self) -> Option<&str>;
	fn unsigned_value(&self, key: &str) -> Option<&Value>;
	fn is_empty(&self) -> bool;
}

fn non_empty(s: &str) -> Option<&str> {
	if s.is_empty() { None } else { Some(s) }
}

impl EventView for Event {
	fn event_type(&self) -> Option<&str> {
		non_empty(&self.event_type)
	}

	fn sender(&self) -> Option<&str> {
		non_empty(&self.sender)
	}

	fn room_id(&self) -> Option<&str> {
		non_empty(&self.room_id)
	}

	fn unsigned_value(&self, key: &str) -> Option<&Value> {
		self.unsigned.get(key)
	}

	fn is_empty(&self) -> bool {
		*self == Event::default()
	}
}

impl EventView for Value {
	fn event_type(&self) -> Option<&str> {
		self.get("type").and_then(Value::as_str)
	}

	fn sender(&self) -> Option<&str> {
		self.get("sender").and_then(Value::as_str)
	}

	fn room_id(&self) -> Option<&str> {
		self.get("room_id").and_then(Value::as_str)
	}

	fn unsigned_value(&self, key: &str) -> Option<&Value> {
		self.get("unsigned").and_then(|u| u.get(key))
	}

	fn is_empty(&self) -> bool {
		self.as_object().is_none_or(Map::is_empty)
	}
}

impl<T: EventView + ?Sized> EventView for &T {
	fn event_type(&self) -> Option<&str> {
		(**self).event_type()
	}

	fn sender(&self) -> Option<&str> {
		(**self).sender()
	}

	fn room_id(&self) -> Option<&str> {
		(**self).room_id()
	}

	fn unsigned_value(&self, key: &str) -> Option<&Value> {
		(**self).unsigned_value(key)
	}

	fn is_empty(&self) -> bool {
		(**self).is_empty()
	}
}

/// Homeserver truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
		Value::String(s) => !s.is_empty(),
		Value::Array(a) => !a.is_empty(),
		Value::Object(o) => !o.is_empty(),
	}
}
