#![forbid(unsafe_code)]

pub mod admins;
pub mod cache;
pub mod memory;
pub mod sql;
pub mod store;

pub use admins::{AdminResolverConfig, LookupError, RoomAdminResolver};
pub use cache::{CacheConfig, CachedRow, QueryCache, RoomQuery};
pub use memory::InMemoryRoomStateStore;
pub use sql::SqlRoomStateStore;
pub use store::{RoomStateStore, StoreError};
