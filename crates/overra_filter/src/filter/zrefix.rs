#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::sync::LazyLock;

use overra_domain::{Event, ZREFIX_DELIMITER, ZREFIX_FIELD};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<.*?>").expect("valid html tag regex"));
static REPLY_FALLBACK_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?s)^\s*<mx-reply>.*?</mx-reply>").expect("valid reply fallback regex"));

const VOID_ELEMENTS: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

/// Remove anything that looks like an HTML tag.
pub fn strip_html(s: &str) -> Cow<'_, str> {
	HTML_TAG_RE.replace_all(s, "")
}

/// Split `body` at the first delimiter into trimmed `(prefix, rest)`.
pub fn split_body(body: &str) -> Option<(&str, &str)> {
	body.split_once(ZREFIX_DELIMITER)
		.map(|(prefix, rest)| (prefix.trim(), rest.trim()))
}

/// Result of splitting an HTML `formatted_body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedSplit {
	/// Tag-free prefix text.
	pub zrefix: String,
	/// Markup with the prefix text and delimiter removed; empty if nothing is left.
	pub formatted_body: String,
}

/// Split `formatted` at the first delimiter that sits in text (not inside a tag).
///
/// Only the prefix text and the delimiter are removed. Elements that enclose
/// the remaining text keep their tags, elements emptied by the removal are
/// dropped, and a leading `<mx-reply>` fallback is left alone.
pub fn split_formatted_body(formatted: &str) -> Option<FormattedSplit> {
	let reply_end = REPLY_FALLBACK_RE.find(formatted).map_or(0, |m| m.end());
	let (reply, formatted) = formatted.split_at(reply_end);

	let offset = text_delimiter_offset(formatted)?;
	let prefix = &formatted[..offset];
	let mut rest = formatted[offset + ZREFIX_DELIMITER.len_utf8()..].trim_start();

	let mut open = prefix_markup(prefix);
	while let Some(top) = open.last() {
		let Some(name) = opening_tag_name(top) else {
			break;
		};
		let Some(after) = strip_closing_tag(rest, &name) else {
			break;
		};
		open.pop();
		rest = after.trim_start();
	}

	let mut formatted_body = String::from(reply);
	open.iter().for_each(|tag| formatted_body.push_str(tag));
	formatted_body.push_str(rest);

	Some(FormattedSplit {
		zrefix: strip_html(prefix).trim().to_string(),
		formatted_body: formatted_body.trim().to_string(),
	})
}

/// Tags of the prefix that still matter once its text is gone.
fn prefix_markup(prefix: &str) -> Vec<&str> {
	let mut kept: Vec<&str> = Vec::new();
	for tag in HTML_TAG_RE.find_iter(prefix).map(|m| m.as_str()) {
		let Some(name) = tag_name(tag) else {
			continue;
		};
		if tag.starts_with("</") {
			if kept.last().and_then(|open| opening_tag_name(open)).as_deref() == Some(name.as_str()) {
				kept.pop();
			} else {
				kept.push(tag);
			}
		} else if !tag.ends_with("/>") && !VOID_ELEMENTS.contains(&name.as_str()) {
			kept.push(tag);
		}
	}
	kept
}

fn tag_name(tag: &str) -> Option<String> {
	let inner = tag.strip_prefix('<')?;
	let inner = inner.strip_prefix('/').unwrap_or(inner);
	let name: String = inner
		.chars()
		.take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
		.collect();
	(!name.is_empty()).then(|| name.to_ascii_lowercase())
}

fn opening_tag_name(tag: &str) -> Option<String> {
	if tag.starts_with("</") { None } else { tag_name(tag) }
}

fn strip_closing_tag<'a>(s: &'a str, name: &str) -> Option<&'a str> {
	let tag = HTML_TAG_RE.find(s).filter(|m| m.start() == 0)?;
	let closes = tag.as_str().starts_with("</") && tag_name(tag.as_str()).as_deref() == Some(name);
	closes.then(|| &s[tag.end()..])
}

fn text_delimiter_offset(formatted: &str) -> Option<usize> {
	let mut pos = 0;
	for tag in HTML_TAG_RE.find_iter(formatted) {
		if let Some(i) = formatted[pos..tag.start()].find(ZREFIX_DELIMITER) {
			return Some(pos + i);
		}
		pos = tag.end();
	}
	formatted[pos..].find(ZREFIX_DELIMITER).map(|i| pos + i)
}

#[derive(Debug, Error)]
enum ZrefixError {
	#[error("event is not an object")]
	EventNotObject,
	#[error("content is not an object")]
	ContentNotObject,
	#[error("content.{0} is not a string")]
	NotAString(&'static str),
	#[error("unsigned is not an object")]
	UnsignedNotObject,
}

/// Move a leading prefix tag out of a raw event's body into `zrefix`.
///
/// Best effort: problems are logged and whatever was already rewritten stays.
pub fn set_zrefix(event: &mut Value) {
	if let Err(e) = try_set_zrefix(event) {
		warn!(error = %e, event = %event, "zrefix extraction failed");
	}
}

fn try_set_zrefix(event: &mut Value) -> Result<(), ZrefixError> {
	let body_split = {
		let Some(content) = content_of(event)? else {
			return Ok(());
		};
		string_field(content, "body")?
			.and_then(split_body)
			.map(|(prefix, rest)| (prefix.to_string(), rest.to_string()))
	};

	if let Some((prefix, rest)) = body_split {
		content_mut(event)?.insert("body".to_string(), Value::String(rest));
		mark_zrefix(event, prefix)?;
	}

	let formatted_split = {
		let Some(content) = content_of(event)? else {
			return Ok(());
		};
		string_field(content, "formatted_body")?.and_then(split_formatted_body)
	};

	if let Some(split) = formatted_split {
		content_mut(event)?.insert("formatted_body".to_string(), Value::String(split.formatted_body));
		mark_zrefix(event, split.zrefix)?;
	}

	Ok(())
}

fn content_of(event: &Value) -> Result<Option<&Map<String, Value>>, ZrefixError> {
	let event = event.as_object().ok_or(ZrefixError::EventNotObject)?;
	match event.get("content") {
		None | Some(Value::Null) => Ok(None),
		Some(Value::Object(content)) => Ok(Some(content)),
		Some(_) => Err(ZrefixError::ContentNotObject),
	}
}

fn content_mut(event: &mut Value) -> Result<&mut Map<String, Value>, ZrefixError> {
	event
		.get_mut("content")
		.and_then(Value::as_object_mut)
		.ok_or(ZrefixError::ContentNotObject)
}

fn string_field<'a>(content: &'a Map<String, Value>, field: &'static str) -> Result<Option<&'a str>, ZrefixError> {
	match content.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s)),
		Some(_) => Err(ZrefixError::NotAString(field)),
	}
}

fn mark_zrefix(event: &mut Value, zrefix: String) -> Result<(), ZrefixError> {
	debug!(zrefix = %zrefix, "extracted zrefix");
	let event = event.as_object_mut().ok_or(ZrefixError::EventNotObject)?;
	event.insert(ZREFIX_FIELD.to_string(), Value::String(zrefix.clone()));

	let unsigned = event
		.entry("unsigned")
		.or_insert_with(|| Value::Object(Map::new()));
	if unsigned.is_null() {
		*unsigned = Value::Object(Map::new());
	}
	unsigned
		.as_object_mut()
		.ok_or(ZrefixError::UnsignedNotObject)?
		.insert(ZREFIX_FIELD.to_string(), Value::String(zrefix));
	Ok(())
}

/// Typed counterpart of [`set_zrefix`].
pub fn set_event_zrefix(event: &mut Event) {
	let body_split = event
		.content
		.body
		.as_deref()
		.and_then(split_body)
		.map(|(prefix, rest)| (prefix.to_string(), rest.to_string()));

	if let Some((prefix, rest)) = body_split {
		event.content.body = Some(rest);
		mark_event_zrefix(event, prefix);
	}

	if let Some(split) = event.content.formatted_body.as_deref().and_then(split_formatted_body) {
		event.content.formatted_body = Some(split.formatted_body);
		mark_event_zrefix(event, split.zrefix);
	}
}

fn mark_event_zrefix(event: &mut Event, zrefix: String) {
	event
		.unsigned
		.insert(ZREFIX_FIELD.to_string(), Value::String(zrefix.clone()));
	event.zrefix = Some(zrefix);
}
