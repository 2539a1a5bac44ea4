#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use overra_domain::POWER_LEVELS_EVENT_TYPE;
use parking_lot::RwLock;
use serde_json::{Value, json};

use super::store::{RoomStateStore, StoreError};

/// Process-local room state, used when no homeserver database is configured.
#[derive(Debug, Default)]
pub struct InMemoryRoomStateStore {
	inner: RwLock<MemoryState>,
	reads: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryState {
	state_by_room: HashMap<(String, String), Value>,
	public_by_room: HashMap<String, bool>,
}

impl InMemoryRoomStateStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the current state `content` for `(room_id, event_type)`.
	pub fn set_state_content(&self, room_id: &str, event_type: &str, content: Value) {
		let mut guard = self.inner.write();
		guard
			.state_by_room
			.insert((room_id.to_string(), event_type.to_string()), content);
	}

	/// Shorthand for a power levels event with the given `users` map.
	pub fn set_power_levels(&self, room_id: &str, users: Value) {
		self.set_state_content(room_id, POWER_LEVELS_EVENT_TYPE, json!({ "users": users }));
	}

	/// Number of reads served so far.
	pub fn reads(&self) -> u64 {
		self.reads.load(Ordering::Relaxed)
	}
}

#[async_trait::async_trait]
impl RoomStateStore for InMemoryRoomStateStore {
	async fn state_content(&self, room_id: &str, event_type: &str) -> Result<Option<Value>, StoreError> {
		self.reads.fetch_add(1, Ordering::Relaxed);
		let guard = self.inner.read();
		Ok(guard
			.state_by_room
			.get(&(room_id.to_string(), event_type.to_string()))
			.cloned())
	}

	async fn is_public(&self, room_id: &str) -> Result<bool, StoreError> {
		self.reads.fetch_add(1, Ordering::Relaxed);
		let guard = self.inner.read();
		Ok(guard.public_by_room.get(room_id).copied().unwrap_or(false))
	}

	async fn set_public(&self, room_id: &str, public: bool) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		guard.public_by_room.insert(room_id.to_string(), public);
		Ok(())
	}
}
