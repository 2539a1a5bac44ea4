#![forbid(unsafe_code)]

use serde_json::Value;
use tracing::debug;

use super::store::{RoomStateStore, StoreError, content_from_event_json};

/// Room state read from the homeserver's own database.
///
/// Expects the homeserver schema: `current_state_events`, `event_json` and
/// `rooms`. Event JSON is parsed here so the same query runs on every backend.
#[derive(Clone)]
pub struct SqlRoomStateStore {
	backend: SqlBackend,
}

#[derive(Clone)]
enum SqlBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

const STATE_CONTENT_SQLITE: &str = "SELECT ej.json FROM current_state_events cse \
	JOIN event_json ej ON cse.event_id = ej.event_id \
	WHERE cse.room_id = ? AND cse.type = ? LIMIT 1";
const STATE_CONTENT_POSTGRES: &str = "SELECT ej.json FROM current_state_events cse \
	JOIN event_json ej ON cse.event_id = ej.event_id \
	WHERE cse.room_id = $1 AND cse.type = $2 LIMIT 1";

const IS_PUBLIC_SQLITE: &str = "SELECT is_public FROM rooms WHERE room_id = ?";
const IS_PUBLIC_POSTGRES: &str = "SELECT is_public FROM rooms WHERE room_id = $1";

const SET_PUBLIC_SQLITE: &str = "UPDATE rooms SET is_public = ? WHERE room_id = ?";
const SET_PUBLIC_POSTGRES: &str = "UPDATE rooms SET is_public = $1 WHERE room_id = $2";

impl SqlRoomStateStore {
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let backend = if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url)
				.await
				.map_err(|source| StoreError::Connect {
					backend: "sqlite",
					source,
				})?;
			SqlBackend::Sqlite(pool)
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url)
				.await
				.map_err(|source| StoreError::Connect {
					backend: "postgres",
					source,
				})?;
			SqlBackend::Postgres(pool)
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url)
				.await
				.map_err(|source| StoreError::Connect {
					backend: "mysql",
					source,
				})?;
			SqlBackend::Mysql(pool)
		} else {
			return Err(StoreError::UnsupportedUrl);
		};

		Ok(Self { backend })
	}

	/// Wrap a pool owned by the caller.
	pub fn from_sqlite_pool(pool: sqlx::SqlitePool) -> Self {
		Self {
			backend: SqlBackend::Sqlite(pool),
		}
	}

	pub fn from_pg_pool(pool: sqlx::PgPool) -> Self {
		Self {
			backend: SqlBackend::Postgres(pool),
		}
	}

	pub fn from_mysql_pool(pool: sqlx::MySqlPool) -> Self {
		Self {
			backend: SqlBackend::Mysql(pool),
		}
	}

	pub fn backend_name(&self) -> &'static str {
		match self.backend {
			SqlBackend::Sqlite(_) => "sqlite",
			SqlBackend::Postgres(_) => "postgres",
			SqlBackend::Mysql(_) => "mysql",
		}
	}
}

fn query_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
	move |source| StoreError::Query { context, source }
}

#[async_trait::async_trait]
impl RoomStateStore for SqlRoomStateStore {
	async fn state_content(&self, room_id: &str, event_type: &str) -> Result<Option<Value>, StoreError> {
		let row: Option<(String,)> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(STATE_CONTENT_SQLITE)
				.bind(room_id)
				.bind(event_type)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select state content (sqlite)"))?,
			SqlBackend::Postgres(pool) => sqlx::query_as(STATE_CONTENT_POSTGRES)
				.bind(room_id)
				.bind(event_type)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select state content (postgres)"))?,
			SqlBackend::Mysql(pool) => sqlx::query_as(STATE_CONTENT_SQLITE)
				.bind(room_id)
				.bind(event_type)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select state content (mysql)"))?,
		};

		let Some((json,)) = row else {
			debug!(room_id, event_type, "no current state event");
			return Ok(None);
		};

		content_from_event_json(room_id, event_type, &json).map(Some)
	}

	async fn is_public(&self, room_id: &str) -> Result<bool, StoreError> {
		let row: Option<(Option<bool>,)> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(IS_PUBLIC_SQLITE)
				.bind(room_id)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select is_public (sqlite)"))?,
			SqlBackend::Postgres(pool) => sqlx::query_as(IS_PUBLIC_POSTGRES)
				.bind(room_id)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select is_public (postgres)"))?,
			SqlBackend::Mysql(pool) => sqlx::query_as(IS_PUBLIC_SQLITE)
				.bind(room_id)
				.fetch_optional(pool)
				.await
				.map_err(query_err("select is_public (mysql)"))?,
		};

		Ok(row.and_then(|(public,)| public).unwrap_or(false))
	}

	async fn set_public(&self, room_id: &str, public: bool) -> Result<(), StoreError> {
		let result = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query(SET_PUBLIC_SQLITE)
				.bind(public)
				.bind(room_id)
				.execute(pool)
				.await
				.map(|r| r.rows_affected())
				.map_err(query_err("update is_public (sqlite)"))?,
			SqlBackend::Postgres(pool) => sqlx::query(SET_PUBLIC_POSTGRES)
				.bind(public)
				.bind(room_id)
				.execute(pool)
				.await
				.map(|r| r.rows_affected())
				.map_err(query_err("update is_public (postgres)"))?,
			SqlBackend::Mysql(pool) => sqlx::query(SET_PUBLIC_SQLITE)
				.bind(public)
				.bind(room_id)
				.execute(pool)
				.await
				.map(|r| r.rows_affected())
				.map_err(query_err("update is_public (mysql)"))?,
		};

		debug!(room_id, public, rows = result, "updated room directory flag");
		Ok(())
	}
}
