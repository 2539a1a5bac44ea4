#![forbid(unsafe_code)]
//! Message visibility filtering for a homeserver.
//!
//! Restricted messages carry a marker in their `unsigned` data and are only
//! shown to their sender, the users listed in `visible_to`, and room admins.

pub mod config;
pub mod filter;
pub mod rooms;

pub use config::OverraConfig;
pub use filter::{EventKeys, LookupFailurePolicy, VisibilityFilter, filter_search_events, set_event_zrefix, set_zrefix};
pub use rooms::{AdminResolverConfig, LookupError, RoomAdminResolver, RoomStateStore, StoreError};
