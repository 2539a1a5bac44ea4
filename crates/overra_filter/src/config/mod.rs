#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use overra_domain::{ADMIN_POWER_LEVEL, MESSAGE_EVENT_TYPE};
use serde::Deserialize;
use tracing::{info, warn};

use crate::filter::{EventKeys, LookupFailurePolicy, derive_prefix};
use crate::rooms::{AdminResolverConfig, CacheConfig};

/// Default config path: `~/.overra/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".overra").join("config.toml"))
}

/// Load config from TOML and process env overrides.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<OverraConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = OverraConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct OverraConfig {
	pub filter: FilterSettings,
	pub cache: CacheConfig,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct FilterSettings {
	/// `unsigned` field carrying restriction metadata.
	pub unsigned_key: String,
	/// Prefix for the AI-response marker and the channel state event.
	pub key_prefix: Option<String>,
	pub restricted_event_type: String,
	pub admin_power_level: i64,
	/// Resolve admins only in rooms that are public channels.
	pub require_public_channel: bool,
	pub lookup_failure: LookupFailurePolicy,
}

impl Default for FilterSettings {
	fn default() -> Self {
		Self {
			unsigned_key: String::new(),
			key_prefix: None,
			restricted_event_type: MESSAGE_EVENT_TYPE.to_string(),
			admin_power_level: ADMIN_POWER_LEVEL,
			require_public_channel: false,
			lookup_failure: LookupFailurePolicy::default(),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Homeserver database URL (sqlite:, postgres:, mysql:).
	pub database_url: Option<String>,
}

impl OverraConfig {
	/// Prefix in effect (explicit, or derived from the unsigned key).
	pub fn key_prefix(&self) -> &str {
		self.filter
			.key_prefix
			.as_deref()
			.unwrap_or_else(|| derive_prefix(&self.filter.unsigned_key))
	}

	pub fn event_keys(&self) -> EventKeys {
		EventKeys::new(&self.filter.unsigned_key, self.filter.key_prefix.as_deref())
			.with_restricted_event_type(self.filter.restricted_event_type.clone())
	}

	pub fn admin_resolver_config(&self) -> AdminResolverConfig {
		AdminResolverConfig {
			admin_level: self.filter.admin_power_level,
			key_prefix: self.key_prefix().to_string(),
			require_public_channel: self.filter.require_public_channel,
			cache: self.cache.clone(),
		}
	}

	fn from_file(file: FileConfig) -> Self {
		let defaults = Self::default();

		let lookup_failure = match file.filter.lookup_failure.as_deref().map(str::parse::<LookupFailurePolicy>) {
			Some(Ok(policy)) => policy,
			Some(Err(e)) => {
				warn!(error = %e, "filter config: invalid lookup_failure; using default");
				defaults.filter.lookup_failure
			}
			None => defaults.filter.lookup_failure,
		};

		Self {
			filter: FilterSettings {
				unsigned_key: file.filter.unsigned_key.map(|s| s.trim().to_string()).unwrap_or_default(),
				key_prefix: file.filter.key_prefix.filter(|s| !s.trim().is_empty()),
				restricted_event_type: file
					.filter
					.restricted_event_type
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.filter.restricted_event_type),
				admin_power_level: file.filter.admin_power_level.unwrap_or(defaults.filter.admin_power_level),
				require_public_channel: file.filter.require_public_channel.unwrap_or(false),
				lookup_failure,
			},
			cache: CacheConfig {
				capacity: file.cache.capacity.unwrap_or(defaults.cache.capacity),
				ttl: file.cache.ttl_secs.map(Duration::from_secs).unwrap_or(defaults.cache.ttl),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	filter: FileFilterSettings,

	#[serde(default)]
	cache: FileCacheSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileFilterSettings {
	unsigned_key: Option<String>,
	key_prefix: Option<String>,
	restricted_event_type: Option<String>,
	admin_power_level: Option<i64>,
	require_public_channel: Option<bool>,
	lookup_failure: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileCacheSettings {
	capacity: Option<u64>,
	ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn apply_env_overrides(cfg: &mut OverraConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = non_empty(env("OVERRA_EVENT_UNSIGNED_KEY")) {
		cfg.filter.unsigned_key = v;
		info!("filter config: unsigned_key overridden by env");
	} else if let Some(v) = non_empty(env("SYNAPSE_EVENT_UNSIGNED_KEY")) {
		cfg.filter.unsigned_key = v;
		info!("filter config: unsigned_key taken from SYNAPSE_EVENT_UNSIGNED_KEY");
	}

	if let Some(v) = non_empty(env("OVERRA_EVENT_KEY_PREFIX")) {
		cfg.filter.key_prefix = Some(v);
		info!("filter config: key_prefix overridden by env");
	}

	if let Some(v) = non_empty(env("OVERRA_RESTRICTED_EVENT_TYPE")) {
		cfg.filter.restricted_event_type = v;
		info!("filter config: restricted_event_type overridden by env");
	}

	if let Some(v) = env("OVERRA_ADMIN_POWER_LEVEL")
		&& let Ok(level) = v.trim().parse::<i64>()
	{
		cfg.filter.admin_power_level = level;
		info!(level, "filter config: admin_power_level overridden by env");
	}

	if let Some(v) = env("OVERRA_REQUIRE_PUBLIC_CHANNEL")
		&& let Some(required) = parse_env_bool(&v)
	{
		cfg.filter.require_public_channel = required;
		info!(required, "filter config: require_public_channel overridden by env");
	}

	if let Some(v) = env("OVERRA_LOOKUP_FAILURE") {
		match v.parse::<LookupFailurePolicy>() {
			Ok(policy) => {
				cfg.filter.lookup_failure = policy;
				info!(%policy, "filter config: lookup_failure overridden by env");
			}
			Err(e) => warn!(error = %e, "filter config: ignoring OVERRA_LOOKUP_FAILURE"),
		}
	}

	if let Some(v) = env("OVERRA_CACHE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<u64>()
	{
		cfg.cache.capacity = capacity;
		info!(capacity, "cache config: capacity overridden by env");
	}

	if let Some(v) = env("OVERRA_CACHE_TTL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.cache.ttl = Duration::from_secs(secs);
		info!(secs, "cache config: ttl overridden by env");
	}

	if let Some(v) = non_empty(env("OVERRA_DATABASE_URL")) {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if cfg.filter.unsigned_key.is_empty() {
		warn!("filter config: no unsigned_key configured; restriction metadata is never detected");
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::io::Write as _;

	use super::*;

	fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		move |key| map.get(key).cloned()
	}

	#[test]
	fn missing_file_yields_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let file = read_toml_if_exists(&dir.path().join("nope.toml")).unwrap();
		assert!(file.is_none());

		let cfg = OverraConfig::from_file(FileConfig::default());
		assert_eq!(cfg.filter.restricted_event_type, "m.room.message");
		assert_eq!(cfg.filter.admin_power_level, 100);
		assert_eq!(cfg.cache.capacity, 128);
		assert_eq!(cfg.cache.ttl, Duration::from_secs(10));
		assert_eq!(cfg.filter.lookup_failure, LookupFailurePolicy::FailClosed);
		assert!(!cfg.filter.require_public_channel);
	}

	#[test]
	fn reads_toml_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[filter]
unsigned_key = "ov_meta"
require_public_channel = true
lookup_failure = "open"

[cache]
capacity = 32
ttl_secs = 3

[persistence]
database_url = "sqlite://homeserver.db"
"#
		)
		.unwrap();

		let file_cfg = read_toml_if_exists(file.path()).unwrap().unwrap();
		let cfg = OverraConfig::from_file(file_cfg);

		assert_eq!(cfg.filter.unsigned_key, "ov_meta");
		assert_eq!(cfg.key_prefix(), "ov");
		assert!(cfg.filter.require_public_channel);
		assert_eq!(cfg.filter.lookup_failure, LookupFailurePolicy::FailOpen);
		assert_eq!(cfg.cache.capacity, 32);
		assert_eq!(cfg.cache.ttl, Duration::from_secs(3));
		assert_eq!(cfg.persistence.database_url.as_deref(), Some("sqlite://homeserver.db"));
	}

	#[test]
	fn invalid_toml_is_an_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[filter\nunsigned_key = 1").unwrap();
		assert!(read_toml_if_exists(file.path()).is_err());
	}

	#[test]
	fn env_overrides_file_values() {
		let mut cfg = OverraConfig::default();
		cfg.filter.unsigned_key = "file_meta".to_string();

		apply_env_overrides(
			&mut cfg,
			env_from(&[
				("OVERRA_EVENT_UNSIGNED_KEY", " ov_meta "),
				("OVERRA_EVENT_KEY_PREFIX", "bot"),
				("OVERRA_REQUIRE_PUBLIC_CHANNEL", "yes"),
				("OVERRA_LOOKUP_FAILURE", "open"),
				("OVERRA_CACHE_CAPACITY", "64"),
				("OVERRA_CACHE_TTL_SECS", "not a number"),
				("OVERRA_DATABASE_URL", "postgres://localhost/homeserver"),
			]),
		);

		assert_eq!(cfg.filter.unsigned_key, "ov_meta");
		assert_eq!(cfg.key_prefix(), "bot");
		assert!(cfg.filter.require_public_channel);
		assert_eq!(cfg.filter.lookup_failure, LookupFailurePolicy::FailOpen);
		assert_eq!(cfg.cache.capacity, 64);
		assert_eq!(cfg.cache.ttl, Duration::from_secs(10));
		assert_eq!(
			cfg.persistence.database_url.as_deref(),
			Some("postgres://localhost/homeserver")
		);
	}

	#[test]
	fn legacy_unsigned_key_env_is_honoured() {
		let mut cfg = OverraConfig::default();
		apply_env_overrides(&mut cfg, env_from(&[("SYNAPSE_EVENT_UNSIGNED_KEY", "zz_meta")]));
		assert_eq!(cfg.filter.unsigned_key, "zz_meta");

		apply_env_overrides(
			&mut cfg,
			env_from(&[("SYNAPSE_EVENT_UNSIGNED_KEY", "zz_meta"), ("OVERRA_EVENT_UNSIGNED_KEY", "ov_meta")]),
		);
		assert_eq!(cfg.filter.unsigned_key, "ov_meta");
	}

	#[test]
	fn derived_components_follow_config() {
		let mut cfg = OverraConfig::default();
		cfg.filter.unsigned_key = "ov_meta".to_string();
		cfg.filter.admin_power_level = 90;

		let keys = cfg.event_keys();
		assert_eq!(keys.metadata_key.as_deref(), Some("ov_meta"));
		assert_eq!(keys.ai_response_key.as_deref(), Some("ov_ai_response"));

		let resolver_cfg = cfg.admin_resolver_config();
		assert_eq!(resolver_cfg.admin_level, 90);
		assert_eq!(resolver_cfg.channel_event_type(), "m.room.ov.channel");
	}
}
