#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde_json::Value;
use tracing::trace;

/// Room lookups that go through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomQuery {
	PowerLevels,
	Channel,
	Public,
}

impl RoomQuery {
	/// Stable query name, part of the cache key.
	pub const fn as_str(self) -> &'static str {
		match self {
			RoomQuery::PowerLevels => "power_levels",
			RoomQuery::Channel => "channel",
			RoomQuery::Public => "public",
		}
	}
}

/// Raw lookup result as stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRow {
	PowerLevels(Option<Value>),
	Flag(bool),
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
	pub capacity: u64,
	pub ttl: Duration,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			capacity: 128,
			ttl: Duration::from_secs(10),
		}
	}
}

/// Bounded, time-expiring cache of room lookups keyed by `(query, room_id)`.
///
/// Least-recently-used entries are evicted once `capacity` is reached;
/// entries older than `ttl` are never served.
#[derive(Clone)]
pub struct QueryCache {
	inner: Cache<(RoomQuery, String), CachedRow>,
}

impl QueryCache {
	pub fn new(cfg: &CacheConfig) -> Self {
		let inner = Cache::builder()
			.max_capacity(cfg.capacity)
			.time_to_live(cfg.ttl)
			.eviction_policy(EvictionPolicy::lru())
			.build();
		Self { inner }
	}

	/// Serve from cache, or run `fetch` and remember its successful result.
	pub async fn get_or_fetch<F, Fut, E>(&self, query: RoomQuery, room_id: &str, fetch: F) -> Result<CachedRow, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<CachedRow, E>>,
	{
		let key = (query, room_id.to_string());
		if let Some(row) = self.inner.get(&key).await {
			metrics::counter!("overra_room_cache_hits_total", "query" => query.as_str()).increment(1);
			trace!(query = query.as_str(), room_id, "room cache hit");
			return Ok(row);
		}

		metrics::counter!("overra_room_cache_misses_total", "query" => query.as_str()).increment(1);
		let row = fetch().await?;
		self.inner.insert(key, row.clone()).await;
		Ok(row)
	}

	pub async fn invalidate(&self, query: RoomQuery, room_id: &str) {
		self.inner.invalidate(&(query, room_id.to_string())).await;
	}

	/// Approximate number of live entries (pending maintenance is flushed first).
	pub async fn entry_count(&self) -> u64 {
		self.inner.run_pending_tasks().await;
		self.inner.entry_count()
	}
}
