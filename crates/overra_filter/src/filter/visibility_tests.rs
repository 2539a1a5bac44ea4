#![forbid(unsafe_code)]

use std::sync::Arc;

use overra_domain::Event;
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::filter::{EventKeys, LookupFailurePolicy, VisibilityFilter};
use crate::rooms::{AdminResolverConfig, InMemoryRoomStateStore, RoomAdminResolver, RoomStateStore, StoreError};

const ROOM: &str = "!room:x";
const META: &str = "ov_meta";

fn keys() -> EventKeys {
	EventKeys::new(META, None)
}

fn mk_filter(store: Arc<dyn RoomStateStore>, policy: LookupFailurePolicy) -> VisibilityFilter {
	let resolver = RoomAdminResolver::new(store, AdminResolverConfig::default());
	VisibilityFilter::new(resolver, keys(), policy)
}

fn filter_with_admins(admins: &[&str]) -> (VisibilityFilter, Arc<InMemoryRoomStateStore>) {
	let store = Arc::new(InMemoryRoomStateStore::new());
	let users: serde_json::Map<String, Value> = admins.iter().map(|a| (a.to_string(), json!(100))).collect();
	store.set_power_levels(ROOM, Value::Object(users));
	(
		mk_filter(Arc::clone(&store) as Arc<dyn RoomStateStore>, LookupFailurePolicy::default()),
		store,
	)
}

fn restricted(sender: &str, visible_to: &[&str]) -> Value {
	json!({
		"type": "m.room.message",
		"sender": sender,
		"room_id": ROOM,
		"content": { "body": "secret" },
		"unsigned": { META: { "visible_to": visible_to } },
	})
}

fn plain(sender: &str) -> Value {
	json!({
		"type": "m.room.message",
		"sender": sender,
		"room_id": ROOM,
		"content": { "body": "hello" },
	})
}

struct DownStore;

#[async_trait::async_trait]
impl RoomStateStore for DownStore {
	async fn state_content(&self, _room_id: &str, _event_type: &str) -> Result<Option<Value>, StoreError> {
		Err(StoreError::UnsupportedUrl)
	}

	async fn is_public(&self, _room_id: &str) -> Result<bool, StoreError> {
		Err(StoreError::UnsupportedUrl)
	}

	async fn set_public(&self, _room_id: &str, _public: bool) -> Result<(), StoreError> {
		Err(StoreError::UnsupportedUrl)
	}
}

#[test]
fn keys_derive_from_unsigned_key() {
	let k = EventKeys::new("ov_meta", None);
	assert_eq!(k.metadata_key.as_deref(), Some("ov_meta"));
	assert_eq!(k.ai_response_key.as_deref(), Some("ov_ai_response"));
	assert_eq!(k.restricted_event_type, "m.room.message");

	let k = EventKeys::new("ov_meta", Some("bot"));
	assert_eq!(k.ai_response_key.as_deref(), Some("bot_ai_response"));

	let k = EventKeys::new("", None);
	assert_eq!(k.metadata_key, None);
	assert_eq!(k.ai_response_key, None);
}

#[test]
fn lookup_failure_policy_parses() {
	assert_eq!("open".parse::<LookupFailurePolicy>().unwrap(), LookupFailurePolicy::FailOpen);
	assert_eq!(" Fail_Closed ".parse::<LookupFailurePolicy>().unwrap(), LookupFailurePolicy::FailClosed);
	assert!("maybe".parse::<LookupFailurePolicy>().is_err());
}

#[tokio::test]
async fn unrestricted_events_are_visible_to_everyone() {
	let (filter, store) = filter_with_admins(&[]);
	let ev = plain("@a:x");

	assert!(filter.is_visible(Some(&ev), Some("@b:x")).await);
	assert!(filter.is_visible(Some(&ev), None).await);
	assert_eq!(store.reads(), 0, "no lookup for unrestricted events");
}

#[tokio::test]
async fn falsy_metadata_does_not_restrict() {
	let (filter, _) = filter_with_admins(&[]);
	for marker in [json!({}), json!(""), json!(null), json!(false)] {
		let mut ev = plain("@a:x");
		ev["unsigned"] = json!({ META: marker });
		assert!(filter.is_visible(Some(&ev), Some("@b:x")).await, "marker {marker}");
	}
}

#[tokio::test]
async fn other_event_types_are_never_filtered() {
	let (filter, _) = filter_with_admins(&[]);
	let mut ev = restricted("@a:x", &[]);
	ev["type"] = json!("m.room.member");

	assert!(filter.is_visible(Some(&ev), Some("@b:x")).await);
	assert!(filter.is_visible(Some(&ev), None).await);
}

#[tokio::test]
async fn empty_or_absent_events_are_not_visible() {
	let (filter, _) = filter_with_admins(&[]);
	assert!(!filter.is_visible::<Value>(None, Some("@a:x")).await);
	assert!(!filter.is_visible(Some(&json!({})), Some("@a:x")).await);
	assert!(!filter.is_visible(Some(&Value::Null), None).await);
}

#[tokio::test]
async fn sender_always_sees_own_event() {
	let (filter, store) = filter_with_admins(&["@admin:x"]);
	let ev = restricted("@a:x", &[]);

	assert!(filter.is_visible(Some(&ev), Some("@a:x")).await);
	assert_eq!(store.reads(), 0, "sender check needs no lookup");
}

#[tokio::test]
async fn anonymous_viewer_never_sees_restricted_events() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	assert!(!filter.is_visible(Some(&restricted("@a:x", &["@b:x"])), None).await);
}

#[tokio::test]
async fn visible_to_grants_access() {
	let (filter, _) = filter_with_admins(&[]);
	let ev = restricted("@a:x", &["@b:x", "@c:x"]);

	assert!(filter.is_visible(Some(&ev), Some("@b:x")).await);
	assert!(filter.is_visible(Some(&ev), Some("@c:x")).await);
	assert!(!filter.is_visible(Some(&ev), Some("@d:x")).await);
}

#[tokio::test]
async fn admins_see_restricted_events_regardless_of_visible_to() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	let ev = restricted("@a:x", &["@b:x"]);

	assert!(filter.is_visible(Some(&ev), Some("@admin:x")).await);
}

#[tokio::test]
async fn moderators_below_admin_level_are_not_admins() {
	let store = Arc::new(InMemoryRoomStateStore::new());
	store.set_power_levels(ROOM, json!({ "@mod:x": 50, "@admin:x": 100 }));
	let filter = mk_filter(store, LookupFailurePolicy::default());
	let ev = restricted("@a:x", &[]);

	assert!(!filter.is_visible(Some(&ev), Some("@mod:x")).await);
	assert!(filter.is_visible(Some(&ev), Some("@admin:x")).await);
}

#[tokio::test]
async fn ai_response_marker_alone_restricts() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	let mut ev = plain("@bot:x");
	ev["unsigned"] = json!({ "ov_ai_response": true });

	assert!(!filter.is_visible(Some(&ev), Some("@b:x")).await);
	assert!(filter.is_visible(Some(&ev), Some("@bot:x")).await);
	assert!(filter.is_visible(Some(&ev), Some("@admin:x")).await);
}

#[tokio::test]
async fn malformed_visible_to_grants_nothing() {
	let (filter, _) = filter_with_admins(&[]);
	let mut ev = plain("@a:x");
	ev["unsigned"] = json!({ META: { "visible_to": "@b:x" } });
	assert!(!filter.is_visible(Some(&ev), Some("@b:x")).await);

	ev["unsigned"] = json!({ META: "restricted" });
	assert!(!filter.is_visible(Some(&ev), Some("@b:x")).await);
	assert!(filter.is_visible(Some(&ev), Some("@a:x")).await);
}

#[tokio::test]
async fn restricted_event_without_room_is_hidden_from_outsiders() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	let mut ev = restricted("@a:x", &[]);
	ev.as_object_mut().unwrap().remove("room_id");

	assert!(!filter.is_visible(Some(&ev), Some("@admin:x")).await);
}

#[tokio::test]
async fn lookup_failure_follows_policy() {
	let ev = restricted("@a:x", &["@b:x"]);

	let closed = mk_filter(Arc::new(DownStore), LookupFailurePolicy::FailClosed);
	assert!(!closed.is_visible(Some(&ev), Some("@c:x")).await);
	assert!(closed.is_visible(Some(&ev), Some("@b:x")).await, "visible_to needs no lookup");

	let open = mk_filter(Arc::new(DownStore), LookupFailurePolicy::FailOpen);
	assert!(open.is_visible(Some(&ev), Some("@c:x")).await);
}

#[tokio::test]
async fn filter_events_keeps_order_and_drops_hidden() {
	let (filter, _) = filter_with_admins(&[]);
	let events = vec![
		plain("@a:x"),
		restricted("@a:x", &[]),
		restricted("@b:x", &[]),
		plain("@c:x"),
		restricted("@a:x", &["@b:x"]),
	];

	let kept = filter.filter_event_dicts(events.clone(), Some("@b:x")).await;
	assert_eq!(kept, vec![events[0].clone(), events[2].clone(), events[3].clone(), events[4].clone()]);
}

#[tokio::test]
async fn typed_and_raw_events_get_identical_decisions() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	let raw = vec![
		plain("@a:x"),
		restricted("@a:x", &[]),
		restricted("@b:x", &["@c:x"]),
		restricted("@admin:x", &[]),
	];
	let typed: Vec<Event> = raw.iter().map(|v| serde_json::from_value(v.clone()).unwrap()).collect();

	for viewer in [None, Some("@a:x"), Some("@c:x"), Some("@admin:x"), Some("@z:x")] {
		let kept_raw = filter.filter_event_dicts(raw.clone(), viewer).await;
		let kept_typed = filter.filter_events(typed.clone(), viewer).await;
		let kept_typed: Vec<Value> = kept_typed.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
		assert_eq!(kept_raw, kept_typed, "viewer {viewer:?}");
	}
}

#[tokio::test]
async fn malformed_fields_do_not_break_typed_filtering() {
	let (filter, _) = filter_with_admins(&["@admin:x"]);
	let mut raw = vec![
		plain("@a:x"),
		restricted("@a:x", &["@b:x"]),
		restricted("@c:x", &[]),
		plain("@d:x"),
	];
	raw[0]["content"]["body"] = json!(42);
	raw[1]["content"]["formatted_body"] = json!({ "html": true });
	raw[2]["content"] = json!("not an object");
	raw[3]["unsigned"] = Value::Null;
	for (i, ev) in raw.iter_mut().enumerate() {
		ev["event_id"] = json!(format!("$e{i}"));
	}

	let typed: Vec<Event> = serde_json::from_value(Value::Array(raw.clone())).unwrap();
	let ids = |kept: Vec<Value>| -> Vec<String> { kept.iter().map(|e| e["event_id"].as_str().unwrap().to_string()).collect() };

	for viewer in [None, Some("@a:x"), Some("@b:x"), Some("@admin:x")] {
		let kept_raw = filter.filter_event_dicts(raw.clone(), viewer).await;
		let kept_typed = filter.filter_events(typed.clone(), viewer).await;
		let kept_typed: Vec<Value> = kept_typed.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
		assert_eq!(ids(kept_raw), ids(kept_typed), "viewer {viewer:?}");
	}

	let kept = filter.filter_events(typed, Some("@b:x")).await;
	assert_eq!(kept.len(), 3);
}

proptest! {
	#[test]
	fn restricted_visibility_is_sender_or_grant_or_admin(
		sender in 0usize..4,
		viewer in proptest::option::of(0usize..4),
		visible_to in proptest::collection::vec(0usize..4, 0..4),
		admins in proptest::collection::vec(0usize..4, 0..3),
	) {
		let users = ["@u0:x", "@u1:x", "@u2:x", "@u3:x"];
		let visible_to: Vec<&str> = visible_to.iter().map(|i| users[*i]).collect();
		let admins: Vec<&str> = admins.iter().map(|i| users[*i]).collect();
		let viewer = viewer.map(|i| users[i]);
		let ev = restricted(users[sender], &visible_to);

		let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
		let (filter, _) = filter_with_admins(&admins);
		let got = rt.block_on(filter.is_visible(Some(&ev), viewer));

		let expected = match viewer {
			None => false,
			Some(v) => v == users[sender] || visible_to.contains(&v) || admins.contains(&v),
		};
		prop_assert_eq!(got, expected);
	}
}
