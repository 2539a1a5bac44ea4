#![forbid(unsafe_code)]

pub mod event;
pub mod search;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use event::{Event, EventContent, EventView, is_truthy};
pub use search::{SearchContext, SearchResult};

/// The only event type subject to visibility filtering.
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";

/// State event type holding a room's power levels.
pub const POWER_LEVELS_EVENT_TYPE: &str = "m.room.power_levels";

/// Power level treated as room admin for visibility.
pub const ADMIN_POWER_LEVEL: i64 = 100;

/// Explicit allow-list field inside restriction metadata.
pub const VISIBLE_TO: &str = "visible_to";

/// Field name used for the extracted prefix tag.
pub const ZREFIX_FIELD: &str = "zrefix";

/// Separates the prefix tag from the message text (U+2042 ASTERISM).
pub const ZREFIX_DELIMITER: char = '\u{2042}';

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid sigil (expected '{expected}'): {value}")]
	InvalidSigil { expected: char, value: String },
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn parse_sigiled(s: &str, sigil: char) -> Result<String, ParseIdError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}

	let rest = s.strip_prefix(sigil).ok_or_else(|| ParseIdError::InvalidSigil {
		expected: sigil,
		value: s.to_string(),
	})?;

	let (local, server) = rest
		.split_once(':')
		.ok_or_else(|| ParseIdError::InvalidFormat(format!("expected {sigil}localpart:server, got {s}")))?;

	if local.is_empty() || server.is_empty() {
		return Err(ParseIdError::InvalidFormat(format!(
			"expected {sigil}localpart:server, got {s}"
		)));
	}

	Ok(s.to_string())
}

/// Matrix user identifier (`@localpart:server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	pub const SIGIL: char = '@';

	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		parse_sigiled(s, Self::SIGIL).map(Self)
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::parse(s)
	}
}

/// Matrix room identifier (`!opaque:server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	pub const SIGIL: char = '!';

	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		parse_sigiled(s, Self::SIGIL).map(Self)
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::parse(s)
	}
}
