use hyper::{HeaderMap, header::{HeaderName, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA}};

use crate::models::CacheStatus;


pub fn set_cache_status(headers: &mut HeaderMap, status: CacheStatus) {
    headers.insert(
        HeaderName::from_static("x-cache"),
        HeaderValue::from_static(status.as_str()),
    );
}

/// Server-side TTLs are the only caching policy; upstream directives are
/// not passed on.
pub fn strip_caching_directives(headers: &mut HeaderMap) {
    headers.remove(CACHE_CONTROL);
    headers.remove(PRAGMA);
    headers.remove(EXPIRES);
}
