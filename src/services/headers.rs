use http::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, COOKIE, HOST, SET_COOKIE};
use http::HeaderMap;
use lazy_static::lazy_static;
use regex::RegexSet;

use crate::config::Config;
use crate::models::RequestContext;
use crate::services::rewrite::OriginRemap;

lazy_static! {
    /// Client/CDN metadata that must not reach the upstream.
    static ref OUTBOUND_DENY: RegexSet = RegexSet::new([
        r"^cf-",
        r"^cdn-loop$",
        r"^x-forwarded-",
        r"^x-real-ip$",
        r"^via$",
        r"^x-amzn-",
        r"^x-request-id$",
    ])
    .expect("static header patterns");

    /// Upstream CDN metadata that would reveal the real origin.
    static ref INBOUND_DENY: RegexSet = RegexSet::new([
        r"^cf-",
        r"^cdn-loop$",
        r"^cf-ray$",
        r"^cf-visitor$",
        r"^cf-cache-status$",
        r"^x-forwarded-",
        r"^via$",
    ])
    .expect("static header patterns");
}

/// Tracking cookies set by the upstream's CDN; never forwarded back to it.
const TRACKING_COOKIES: [&str; 3] = ["__cf_bm", "_cfuvid", "cf_clearance"];

/// Response headers that either block the rewritten page under a foreign
/// origin or describe a body that no longer exists after rewriting.
const STRIPPED_RESPONSE_HEADERS: [&str; 6] = [
    "content-security-policy",
    "content-security-policy-report-only",
    "clear-site-data",
    "content-length",
    "transfer-encoding",
    "content-encoding",
];

/// Prepares client headers for the upstream: drops forwarding metadata,
/// pins `Host` to the target, asks for an identity-encoded body and makes
/// `Referer`/`Origin` style values point at the target instead of us.
pub fn sanitize_outbound(headers: &HeaderMap, ctx: &RequestContext, config: &Config) -> HeaderMap {
    let own = OriginRemap::new(&ctx.origin, &ctx.authority());

    let mut sanitized = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if OUTBOUND_DENY.is_match(name.as_str()) || name == HOST || name == ACCEPT_ENCODING {
            continue;
        }

        let value = if name == COOKIE {
            match strip_tracking_cookies(value) {
                Some(value) => value,
                None => continue,
            }
        } else {
            value.clone()
        };

        let value = rewrite_value(&value, |text| {
            own.replace_all(text, &config.target_origin, &config.target_host)
                .into_owned()
        });
        sanitized.append(name.clone(), value);
    }

    if let Ok(host) = HeaderValue::from_str(&config.target_host) {
        sanitized.insert(HOST, host);
    }
    sanitized
}

/// Prepares upstream headers for the client: drops CDN metadata and headers
/// invalidated by rewriting, and swaps every mention of the target for the
/// origin the client used. `Set-Cookie` values get the bare host name, since
/// a cookie `Domain` carries no port.
pub fn sanitize_inbound(headers: &HeaderMap, ctx: &RequestContext, config: &Config) -> HeaderMap {
    let target = OriginRemap::new(&config.target_origin, &config.target_host);
    let cookie_target = OriginRemap::new(&config.target_origin, &config.target_hostname);
    let authority = ctx.authority();

    let mut sanitized = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if INBOUND_DENY.is_match(name.as_str()) || is_stripped(name) {
            continue;
        }

        let value = rewrite_value(value, |text| {
            let rewritten = if name == SET_COOKIE {
                cookie_target.replace_all(text, &ctx.origin, &ctx.host)
            } else {
                target.replace_all(text, &ctx.origin, &authority)
            };
            rewritten.into_owned()
        });
        sanitized.append(name.clone(), value);
    }
    sanitized
}

fn is_stripped(name: &HeaderName) -> bool {
    STRIPPED_RESPONSE_HEADERS.contains(&name.as_str())
}

/// Applies `rewrite` to textual values; opaque or unrepresentable results
/// leave the original value untouched.
fn rewrite_value<F>(value: &HeaderValue, rewrite: F) -> HeaderValue
where
    F: FnOnce(&str) -> String,
{
    match value.to_str() {
        Ok(text) => HeaderValue::from_str(&rewrite(text)).unwrap_or_else(|_| value.clone()),
        Err(_) => value.clone(),
    }
}

/// Removes CDN tracking cookies from a `Cookie` value, or returns `None` when
/// nothing is left to send.
pub fn strip_tracking_cookies(value: &HeaderValue) -> Option<HeaderValue> {
    let text = match value.to_str() {
        Ok(text) => text,
        Err(_) => return Some(value.clone()),
    };

    let kept: Vec<&str> = text
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map(|(name, _)| name).unwrap_or(pair).trim();
            !TRACKING_COOKIES.contains(&name)
        })
        .collect();

    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}
