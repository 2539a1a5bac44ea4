#![forbid(unsafe_code)]

use std::io::{Read as _, Write as _};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use overra_domain::{Event, RoomId, SearchResult, UserId};
use overra_filter::config::{OverraConfig, default_config_path, load_config_from_path};
use overra_filter::filter::{VisibilityFilter, set_zrefix};
use overra_filter::rooms::{InMemoryRoomStateStore, RoomAdminResolver, RoomStateStore, SqlRoomStateStore};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: overra [--config PATH] <command> [--viewer @user:server] [--room !room:server]\n\
\n\
Commands:\n\
\tfilter    Filter a JSON array of events read from stdin\n\
\tdicts     Same as filter, but keeps events exactly as given\n\
\tsearch    Filter a JSON array of search results read from stdin\n\
\tzrefix    Extract zrefix prefixes from an event or array of events\n\
\tadmins    Print the admins of --room\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.overra/config.toml)\n\
\t--viewer  User the output is filtered for (omit for anonymous)\n\
\t--room    Room to inspect (admins only)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
	Filter,
	Dicts,
	Search,
	Zrefix,
	Admins,
}

struct Args {
	config: Option<PathBuf>,
	command: Command,
	viewer: Option<UserId>,
	room: Option<RoomId>,
}

fn parse_args() -> Args {
	let mut config = None;
	let mut command = None;
	let mut viewer = None;
	let mut room = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config = Some(PathBuf::from(v));
			}
			"--viewer" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				viewer = Some(UserId::parse(&v).unwrap_or_else(|e| {
					eprintln!("--viewer: {e}");
					usage_and_exit();
				}));
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				room = Some(RoomId::parse(&v).unwrap_or_else(|e| {
					eprintln!("--room: {e}");
					usage_and_exit();
				}));
			}
			"filter" => command = Some(Command::Filter),
			"dicts" => command = Some(Command::Dicts),
			"search" => command = Some(Command::Search),
			"zrefix" => command = Some(Command::Zrefix),
			"admins" => command = Some(Command::Admins),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(command) = command else {
		eprintln!("missing command");
		usage_and_exit();
	};
	if command == Command::Admins && room.is_none() {
		eprintln!("admins requires --room");
		usage_and_exit();
	}

	Args {
		config,
		command,
		viewer,
		room,
	}
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,overra_filter=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
		.init();
}

async fn open_store(cfg: &OverraConfig) -> anyhow::Result<Arc<dyn RoomStateStore>> {
	match cfg.persistence.database_url.as_deref() {
		Some(url) => {
			let store = SqlRoomStateStore::connect(url).await.context("connect to homeserver database")?;
			info!(backend = store.backend_name(), "room state backed by homeserver database");
			Ok(Arc::new(store))
		}
		None => {
			warn!("no database_url configured; using empty in-memory room state");
			Ok(Arc::new(InMemoryRoomStateStore::new()))
		}
	}
}

fn read_stdin_json() -> anyhow::Result<Value> {
	let mut input = String::new();
	std::io::stdin().read_to_string(&mut input).context("read stdin")?;
	serde_json::from_str(&input).context("parse JSON from stdin")
}

fn write_stdout_json(value: &Value) -> anyhow::Result<()> {
	let mut out = std::io::stdout().lock();
	serde_json::to_writer_pretty(&mut out, value).context("write JSON")?;
	writeln!(out).context("write JSON")?;
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => default_config_path()?,
	};
	let cfg = load_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded config (toml + env overrides)");

	let viewer = args.viewer.as_ref().map(UserId::as_str);

	let output = match args.command {
		Command::Zrefix => {
			let mut input = read_stdin_json()?;
			match &mut input {
				Value::Array(events) => events.iter_mut().for_each(set_zrefix),
				event => set_zrefix(event),
			}
			input
		}
		Command::Search => {
			let results: Vec<SearchResult> =
				serde_json::from_value(read_stdin_json()?).context("expected an array of search results")?;
			let kept = overra_filter::filter_search_events(&cfg.event_keys(), results, viewer);
			serde_json::to_value(kept)?
		}
		Command::Filter | Command::Dicts | Command::Admins => {
			let store = open_store(&cfg).await?;
			let resolver = RoomAdminResolver::new(store, cfg.admin_resolver_config());

			match args.command {
				Command::Admins => {
					let room = args.room.as_ref().map(RoomId::as_str).unwrap_or_default();
					let mut admins: Vec<String> = resolver.get_channel_admins(room).await?.into_iter().collect();
					admins.sort();
					json!({
						"room_id": room,
						"admins": admins,
						"channel": resolver.is_room_channel(room).await?,
						"public": resolver.is_room_public(room).await?,
					})
				}
				Command::Dicts => {
					let events: Vec<Value> =
						serde_json::from_value(read_stdin_json()?).context("expected an array of events")?;
					let filter = VisibilityFilter::new(resolver, cfg.event_keys(), cfg.filter.lookup_failure);
					Value::Array(filter.filter_event_dicts(events, viewer).await)
				}
				_ => {
					let events: Vec<Event> =
						serde_json::from_value(read_stdin_json()?).context("expected an array of events")?;
					let filter = VisibilityFilter::new(resolver, cfg.event_keys(), cfg.filter.lookup_failure);
					serde_json::to_value(filter.filter_events(events, viewer).await)?
				}
			}
		}
	};

	write_stdout_json(&output)
}
