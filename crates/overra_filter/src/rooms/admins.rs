#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use overra_domain::ADMIN_POWER_LEVEL;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::{CacheConfig, CachedRow, QueryCache, RoomQuery};
use super::store::{RoomStateStore, StoreError};

#[derive(Debug, Clone)]
pub struct AdminResolverConfig {
	/// Exact power level that counts as admin.
	pub admin_level: i64,
	/// Namespace of the custom channel state event (`m.room.<prefix>.channel`).
	pub key_prefix: String,
	/// Only resolve admins for rooms that are both public and channels.
	pub require_public_channel: bool,
	pub cache: CacheConfig,
}

impl Default for AdminResolverConfig {
	fn default() -> Self {
		Self {
			admin_level: ADMIN_POWER_LEVEL,
			key_prefix: String::new(),
			require_public_channel: false,
			cache: CacheConfig::default(),
		}
	}
}

impl AdminResolverConfig {
	pub fn channel_event_type(&self) -> String {
		format!("m.room.{}.channel", self.key_prefix)
	}

	pub fn channel_key(&self) -> String {
		format!("{}_channel", self.key_prefix)
	}
}

/// Room lookup failures surfaced to callers.
///
/// A room without power levels is not an error; it simply has no admins.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
	#[error("room state lookup unavailable for {room_id}")]
	Unavailable {
		room_id: String,
		#[source]
		source: Arc<StoreError>,
	},

	#[error("malformed power levels for {room_id} (expected a map of user levels)")]
	MalformedPowerLevels { room_id: String },
}

fn unavailable(room_id: &str) -> impl FnOnce(StoreError) -> LookupError + '_ {
	move |source| LookupError::Unavailable {
		room_id: room_id.to_string(),
		source: Arc::new(source),
	}
}

/// Resolves the users holding the admin power level of a room.
#[derive(Clone)]
pub struct RoomAdminResolver {
	store: Arc<dyn RoomStateStore>,
	cache: QueryCache,
	cfg: AdminResolverConfig,
}

impl RoomAdminResolver {
	pub fn new(store: Arc<dyn RoomStateStore>, cfg: AdminResolverConfig) -> Self {
		let cache = QueryCache::new(&cfg.cache);
		Self { store, cache, cfg }
	}

	pub fn config(&self) -> &AdminResolverConfig {
		&self.cfg
	}

	/// Users whose power level equals the admin level.
	pub async fn get_channel_admins(&self, room_id: &str) -> Result<HashSet<String>, LookupError> {
		if self.cfg.require_public_channel {
			let public_channel = self.is_room_public(room_id).await? && self.is_room_channel(room_id).await?;
			if !public_channel {
				debug!(room_id, "admin resolution skipped (room is not a public channel)");
				return Ok(HashSet::new());
			}
		}

		let row = self
			.cache
			.get_or_fetch(RoomQuery::PowerLevels, room_id, || async {
				self.store.power_levels(room_id).await.map(CachedRow::PowerLevels)
			})
			.await
			.map_err(unavailable(room_id))?;

		let users = match row {
			CachedRow::PowerLevels(Some(users)) => users,
			CachedRow::PowerLevels(None) | CachedRow::Flag(_) => {
				debug!(room_id, "no power levels for room");
				return Ok(HashSet::new());
			}
		};

		admins_from_users(&users, self.cfg.admin_level).ok_or_else(|| {
			warn!(room_id, users = %users, "power levels users is not an object");
			LookupError::MalformedPowerLevels {
				room_id: room_id.to_string(),
			}
		})
	}

	/// Whether the room carries the channel flag in its state.
	pub async fn is_room_channel(&self, room_id: &str) -> Result<bool, LookupError> {
		let event_type = self.cfg.channel_event_type();
		let key = self.cfg.channel_key();
		let row = self
			.cache
			.get_or_fetch(RoomQuery::Channel, room_id, || async {
				self.store
					.channel_flag(room_id, &event_type, &key)
					.await
					.map(CachedRow::Flag)
			})
			.await
			.map_err(unavailable(room_id))?;

		Ok(matches!(row, CachedRow::Flag(true)))
	}

	/// Whether the room is listed in the public room directory.
	pub async fn is_room_public(&self, room_id: &str) -> Result<bool, LookupError> {
		let row = self
			.cache
			.get_or_fetch(RoomQuery::Public, room_id, || async {
				self.store.is_public(room_id).await.map(CachedRow::Flag)
			})
			.await
			.map_err(unavailable(room_id))?;

		Ok(matches!(row, CachedRow::Flag(true)))
	}

	/// Update the directory flag and drop the cached value.
	pub async fn set_room_public(&self, room_id: &str, public: bool) -> Result<(), LookupError> {
		self.store
			.set_public(room_id, public)
			.await
			.map_err(unavailable(room_id))?;
		self.cache.invalidate(RoomQuery::Public, room_id).await;
		Ok(())
	}
}

/// `None` if `users` is neither an object nor null.
fn admins_from_users(users: &Value, admin_level: i64) -> Option<HashSet<String>> {
	match users {
		Value::Null => Some(HashSet::new()),
		Value::Object(map) => Some(
			map.iter()
				.filter(|(_, level)| is_level(level, admin_level))
				.map(|(user_id, _)| user_id.clone())
				.collect(),
		),
		_ => None,
	}
}

/// Numeric comparison, so `100.0` counts as `100`.
fn is_level(level: &Value, admin_level: i64) -> bool {
	match level.as_i64() {
		Some(level) => level == admin_level,
		None => level.as_f64().is_some_and(|level| level == admin_level as f64),
	}
}
