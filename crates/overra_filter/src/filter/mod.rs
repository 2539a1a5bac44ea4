#![forbid(unsafe_code)]

pub mod search;
pub mod visibility;
pub mod zrefix;

pub use search::filter_search_events;
pub use visibility::{EventKeys, LookupFailurePolicy, Restriction, VisibilityFilter, derive_prefix};
pub use zrefix::{FormattedSplit, set_event_zrefix, set_zrefix, split_body, split_formatted_body, strip_html};


#[cfg(test)]
mod visibility_tests;
