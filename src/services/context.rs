use http::header::HOST;

use crate::config::Config;
use crate::models::{InboundRequest, RequestContext};

/// Works out which origin the client believes it is talking to and where the
/// request goes upstream.
///
/// The `Host` header wins over the request URI because it is what the client
/// actually addressed; the configured `MY_ORIGIN` host is the last resort.
pub fn resolve_context(request: &InboundRequest, config: &Config) -> RequestContext {
    let raw_host = request
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| request.uri.authority().map(|authority| authority.as_str().to_string()))
        .unwrap_or_else(|| config.my_host.clone());

    let (host, port) = split_host_port(&raw_host);
    let scheme = resolve_scheme(request);

    let origin = match port {
        Some(port) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}://{}", scheme, host),
    };

    let path = match request.uri.path() {
        "" => "/",
        path => path,
    };
    let path_and_query = match request.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let target_url = format!("{}{}", config.target_origin, path_and_query);

    RequestContext {
        method: request.method.clone(),
        path_and_query,
        scheme,
        host,
        port,
        origin,
        target_url,
    }
}

fn resolve_scheme(request: &InboundRequest) -> String {
    let forwarded = request
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| value == "http" || value == "https");

    forwarded
        .or_else(|| request.uri.scheme_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "http".to_string())
}

/// Splits `host[:port]` on the last colon. Bracketed IPv6 literals keep their
/// brackets; a trailing segment that is not a valid port stays in the host.
pub fn split_host_port(raw: &str) -> (String, Option<u16>) {
    if raw.starts_with('[') {
        if let Some(end) = raw.find(']') {
            let host = &raw[..=end];
            let port = raw[end + 1..]
                .strip_prefix(':')
                .and_then(|port| port.parse::<u16>().ok());
            return (host.to_string(), port);
        }
        return (raw.to_string(), None);
    }

    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (raw.to_string(), None),
        },
        _ => (raw.to_string(), None),
    }
}
