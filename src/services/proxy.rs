use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{Method, StatusCode};

use crate::middleware::{set_cache_status, strip_caching_directives};
use crate::models::{
    CacheEntry, CacheStatus, InboundRequest, ProxyResponse, ProxyState, RequestContext, UpstreamRequest,
};
use crate::services::context::resolve_context;
use crate::services::headers::{sanitize_inbound, sanitize_outbound};
use crate::services::rewrite::{inject_script, is_html_content, is_text_content};
use crate::services::upstream::dispatch;

/// Whether `path` ends in one of the static asset extensions.
pub fn is_static_path(path: &str, extensions: &[String]) -> bool {
    let path = path.to_ascii_lowercase();
    extensions.iter().any(|ext| {
        path.strip_suffix(ext.as_str())
            .map(|rest| rest.ends_with('.'))
            .unwrap_or(false)
    })
}

/// Runs one request through the pipeline: cache lookup, upstream fetch,
/// header sanitising, body rewriting and cache fill.
///
/// Always yields a response; upstream failures become a 502.
pub async fn proxy_request(state: &ProxyState, request: InboundRequest) -> ProxyResponse {
    let config = &state.config;
    let ctx = resolve_context(&request, config);
    let cache_key = ctx.cache_key();
    let is_static = is_static_path(ctx.path(), &config.static_extensions);
    let cacheable = ctx.method == Method::GET;

    if cacheable {
        // Extensionless binary responses are filed in the static store, so
        // dynamic paths fall back to it.
        let cached = if is_static {
            state.static_cache.get(&cache_key).await
        } else {
            match state.dynamic_cache.get(&cache_key).await {
                Some(entry) => Some(entry),
                None => state.static_cache.get(&cache_key).await,
            }
        };
        if let Some(entry) = cached {
            tracing::debug!("Cache hit for {}", cache_key);
            let mut headers = entry.headers.clone();
            set_cache_status(&mut headers, CacheStatus::Hit);
            return ProxyResponse {
                status: entry.status,
                headers,
                body: entry.body,
            };
        }
        tracing::debug!("Cache miss for {}", cache_key);
    }

    let body = match ctx.method {
        Method::GET | Method::HEAD => None,
        _ => Some(request.body),
    };
    // The body is already buffered; framing is recomputed from what is sent.
    let mut headers = sanitize_outbound(&request.headers, &ctx, config);
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
    let upstream_request = UpstreamRequest {
        method: ctx.method.clone(),
        url: ctx.target_url.clone(),
        headers,
        body,
    };

    let upstream = match dispatch(state.transport.as_ref(), upstream_request, config.upstream_timeout).await {
        Ok(upstream) => upstream,
        Err(e) => {
            return ProxyResponse::text(StatusCode::BAD_GATEWAY, format!("Upstream fetch error: {}", e));
        }
    };

    let mut headers = sanitize_inbound(&upstream.headers, &ctx, config);
    strip_caching_directives(&mut headers);
    set_cache_status(&mut headers, CacheStatus::Miss);

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let store_it = cacheable && upstream.status.is_success();

    if is_static || !is_text_content(&content_type) {
        if store_it {
            let entry = CacheEntry {
                status: upstream.status,
                headers: headers.clone(),
                body: upstream.body.clone(),
            };
            state.static_cache.put(&cache_key, entry, config.cache_ttl_static).await;
        }
        return ProxyResponse {
            status: upstream.status,
            headers,
            body: upstream.body,
        };
    }

    let body = rewrite_text_body(state, &upstream.body, &content_type, &ctx);
    if store_it {
        let entry = CacheEntry {
            status: upstream.status,
            headers: headers.clone(),
            body: body.clone(),
        };
        state.dynamic_cache.put(&cache_key, entry, config.cache_ttl_dynamic).await;
    }

    ProxyResponse {
        status: upstream.status,
        headers,
        body,
    }
}

fn rewrite_text_body(state: &ProxyState, raw: &Bytes, content_type: &str, ctx: &RequestContext) -> Bytes {
    let text = String::from_utf8_lossy(raw);
    let mut text = state.rewriter.rewrite(&text, ctx);

    if is_html_content(content_type) {
        if let Some(script) = &state.config.inject_script {
            text = inject_script(&text, script, state.config.inject_location);
        }
    }
    Bytes::from(text)
}

/// Entry counts of the static and dynamic stores.
pub async fn cache_sizes(state: &ProxyState) -> (usize, usize) {
    (state.static_cache.len().await, state.dynamic_cache.len().await)
}

/// Purges expired entries from both stores.
pub async fn sweep_caches(state: &ProxyState) -> usize {
    state.static_cache.purge_expired().await + state.dynamic_cache.purge_expired().await
}
