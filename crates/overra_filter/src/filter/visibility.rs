#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use overra_domain::{EventView, MESSAGE_EVENT_TYPE, VISIBLE_TO, is_truthy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::rooms::RoomAdminResolver;

/// Where restriction markers live on an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKeys {
	/// Only events of this type are ever filtered.
	pub restricted_event_type: String,
	/// `unsigned` field carrying restriction metadata (with `visible_to`).
	pub metadata_key: Option<String>,
	/// `unsigned` field marking an AI-generated response.
	pub ai_response_key: Option<String>,
}

impl EventKeys {
	/// Keys derived from the configured unsigned key and optional prefix.
	///
	/// Without an explicit prefix, the unsigned key's text before the first
	/// `_` is used.
	pub fn new(unsigned_key: &str, key_prefix: Option<&str>) -> Self {
		let unsigned_key = unsigned_key.trim();
		let prefix = key_prefix
			.map(str::trim)
			.unwrap_or_else(|| derive_prefix(unsigned_key));

		Self {
			restricted_event_type: MESSAGE_EVENT_TYPE.to_string(),
			metadata_key: (!unsigned_key.is_empty()).then(|| unsigned_key.to_string()),
			ai_response_key: (!prefix.is_empty()).then(|| format!("{prefix}_ai_response")),
		}
	}

	pub fn with_restricted_event_type(mut self, event_type: impl Into<String>) -> Self {
		self.restricted_event_type = event_type.into();
		self
	}

	/// Restriction attached to `event`, if it is subject to filtering at all.
	pub fn restriction<'a, E: EventView + ?Sized>(&self, event: &'a E) -> Option<Restriction<'a>> {
		if event.event_type() != Some(self.restricted_event_type.as_str()) {
			return None;
		}

		let metadata = marker(event, self.metadata_key.as_deref());
		let ai_response = marker(event, self.ai_response_key.as_deref());
		if metadata.is_none() && ai_response.is_none() {
			return None;
		}

		Some(Restriction { metadata })
	}

	/// Search variant: only the sender may see a restricted event.
	pub fn visible_in_search<E: EventView + ?Sized>(&self, event: &E, viewer: Option<&str>) -> bool {
		match self.restriction(event) {
			None => true,
			Some(_) => viewer.is_some() && event.sender() == viewer,
		}
	}
}

fn marker<'a, E: EventView + ?Sized>(event: &'a E, key: Option<&str>) -> Option<&'a Value> {
	key.and_then(|k| event.unsigned_value(k)).filter(|v| is_truthy(v))
}

/// Text before the first `_` of the unsigned key.
pub fn derive_prefix(unsigned_key: &str) -> &str {
	unsigned_key.split('_').next().unwrap_or_default()
}

/// Restriction markers found on an event.
#[derive(Debug, Clone, Copy)]
pub struct Restriction<'a> {
	metadata: Option<&'a Value>,
}

impl Restriction<'_> {
	/// Whether `viewer` is on the metadata's `visible_to` allow-list.
	pub fn grants(&self, viewer: &str) -> bool {
		self.metadata
			.and_then(|m| m.get(VISIBLE_TO))
			.and_then(Value::as_array)
			.is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(viewer)))
	}
}

/// What a failed admin lookup means for a restricted event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LookupFailurePolicy {
	/// Treat the viewer as not an admin.
	#[default]
	FailClosed,
	/// Treat the viewer as an admin.
	FailOpen,
}

impl LookupFailurePolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::FailClosed => "closed",
			Self::FailOpen => "open",
		}
	}
}

impl fmt::Display for LookupFailurePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LookupFailurePolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"closed" | "fail_closed" | "fail-closed" => Ok(Self::FailClosed),
			"open" | "fail_open" | "fail-open" => Ok(Self::FailOpen),
			other => Err(format!("unknown lookup failure policy: {other} (expected closed or open)")),
		}
	}
}

/// Decides which events a viewer may see.
#[derive(Clone)]
pub struct VisibilityFilter {
	resolver: RoomAdminResolver,
	keys: EventKeys,
	on_lookup_failure: LookupFailurePolicy,
}

impl VisibilityFilter {
	pub fn new(resolver: RoomAdminResolver, keys: EventKeys, on_lookup_failure: LookupFailurePolicy) -> Self {
		Self {
			resolver,
			keys,
			on_lookup_failure,
		}
	}

	pub fn keys(&self) -> &EventKeys {
		&self.keys
	}

	pub fn resolver(&self) -> &RoomAdminResolver {
		&self.resolver
	}

	/// Whether `viewer` may see `event`.
	///
	/// Unrestricted events are visible to everyone. A restricted event is
	/// visible to its sender, to users on its `visible_to` list and to room
	/// admins; never to an anonymous viewer.
	pub async fn is_visible<E: EventView + ?Sized>(&self, event: Option<&E>, viewer: Option<&str>) -> bool {
		let Some(event) = event.filter(|e| !e.is_empty()) else {
			return false;
		};

		let Some(restriction) = self.keys.restriction(event) else {
			return true;
		};

		let Some(viewer) = viewer else {
			return false;
		};

		if event.sender() == Some(viewer) || restriction.grants(viewer) {
			return true;
		}

		let Some(room_id) = event.room_id() else {
			return false;
		};

		match self.resolver.get_channel_admins(room_id).await {
			Ok(admins) => admins.contains(viewer),
			Err(e) => {
				warn!(
					error = %e,
					room_id,
					policy = %self.on_lookup_failure,
					"admin lookup failed while filtering"
				);
				self.on_lookup_failure == LookupFailurePolicy::FailOpen
			}
		}
	}

	/// Keep the events `viewer` may see, in their original order.
	pub async fn filter_events<E: EventView>(&self, events: impl IntoIterator<Item = E>, viewer: Option<&str>) -> Vec<E> {
		let mut visible = Vec::new();
		let mut hidden = 0u64;

		for event in events {
			if self.is_visible(Some(&event), viewer).await {
				visible.push(event);
			} else {
				hidden += 1;
			}
		}

		if hidden > 0 {
			metrics::counter!("overra_events_hidden_total").increment(hidden);
			debug!(hidden, kept = visible.len(), viewer = viewer.unwrap_or("-"), "filtered events");
		}

		visible
	}

	/// Same as [`Self::filter_events`] over raw JSON records.
	pub async fn filter_event_dicts(&self, events: Vec<Value>, viewer: Option<&str>) -> Vec<Value> {
		self.filter_events(events, viewer).await
	}
}
