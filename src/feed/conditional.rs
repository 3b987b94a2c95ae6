//! Conditional-request headers from a feed's stored cache validators.

use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};

use crate::storage::FetchTarget;

/// Build the conditional headers for a fetch.
///
/// An ETag wins over Last-Modified; a feed with neither gets a full,
/// unconditional fetch. Pure — a validator that fails header encoding is
/// simply dropped.
pub fn conditional_headers(target: &FetchTarget<'_>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = target.etag.filter(|s| !s.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
            return headers;
        }
    }
    if let Some(last_modified) = target.last_modified.filter(|s| !s.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(last_modified) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    headers
}
