#![forbid(unsafe_code)]

use overra_domain::SearchResult;
use tracing::debug;

use super::visibility::{EventKeys, VisibilityFilter};

/// Drop restricted search hits and context events the viewer did not send.
///
/// Narrower than [`VisibilityFilter::is_visible`]: neither room admins nor
/// `visible_to` grant access here.
pub fn filter_search_events(keys: &EventKeys, results: Vec<SearchResult>, viewer: Option<&str>) -> Vec<SearchResult> {
	let before = results.len();

	let mut kept: Vec<SearchResult> = results
		.into_iter()
		.filter(|r| keys.visible_in_search(&r.result, viewer))
		.collect();

	for context in kept.iter_mut().filter_map(|r| r.context.as_mut()) {
		context.events_before.retain(|e| keys.visible_in_search(e, viewer));
		context.events_after.retain(|e| keys.visible_in_search(e, viewer));
	}

	if kept.len() != before {
		debug!(dropped = before - kept.len(), kept = kept.len(), "filtered search results");
	}

	kept
}

impl VisibilityFilter {
	pub fn filter_search_events(&self, results: Vec<SearchResult>, viewer: Option<&str>) -> Vec<SearchResult> {
		filter_search_events(self.keys(), results, viewer)
	}
}
