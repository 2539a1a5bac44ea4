#![forbid(unsafe_code)]

use overra_domain::POWER_LEVELS_EVENT_TYPE;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a room state backend.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("unsupported database_url (use sqlite:, postgres:, mysql:)")]
	UnsupportedUrl,

	#[error("connect {backend}")]
	Connect {
		backend: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("{context}")]
	Query {
		context: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("decode {event_type} event json in {room_id}")]
	Decode {
		room_id: String,
		event_type: String,
		#[source]
		source: serde_json::Error,
	},
}

/// Read (and one write) access to a room's current state.
///
/// Implementations are shared across requests, so they must be cheap to call
/// concurrently; connection pooling belongs to the implementation.
#[async_trait::async_trait]
pub trait RoomStateStore: Send + Sync {
	/// `content` of the current state event of `event_type` in the room.
	async fn state_content(&self, room_id: &str, event_type: &str) -> Result<Option<Value>, StoreError>;

	/// Room directory flag.
	async fn is_public(&self, room_id: &str) -> Result<bool, StoreError>;

	async fn set_public(&self, room_id: &str, public: bool) -> Result<(), StoreError>;

	/// `content.users` of the current power levels, `Null` when the event has none.
	async fn power_levels(&self, room_id: &str) -> Result<Option<Value>, StoreError> {
		let content = self.state_content(room_id, POWER_LEVELS_EVENT_TYPE).await?;
		Ok(content.map(|c| c.get("users").cloned().unwrap_or(Value::Null)))
	}

	/// Whether the room's channel state event carries `key: true`.
	async fn channel_flag(&self, room_id: &str, event_type: &str, key: &str) -> Result<bool, StoreError> {
		let content = self.state_content(room_id, event_type).await?;
		Ok(matches!(content.as_ref().and_then(|c| c.get(key)), Some(Value::Bool(true))))
	}
}

/// Pull `content` out of a raw event JSON row.
pub(crate) fn content_from_event_json(room_id: &str, event_type: &str, json: &str) -> Result<Value, StoreError> {
	let mut event: Value = serde_json::from_str(json).map_err(|source| StoreError::Decode {
		room_id: room_id.to_string(),
		event_type: event_type.to_string(),
		source,
	})?;

	Ok(event.get_mut("content").map(Value::take).unwrap_or(Value::Null))
}
