use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hyper::{Body, HeaderMap, Method, Response, StatusCode, Uri};
use warp::{Filter, Rejection, Reply};

use crate::errors::ProxyError;
use crate::models::{InboundRequest, ProxyResponse, ProxyState};
use crate::services::proxy_request;


/// Catch-all route: every method and path goes to the proxy pipeline.
pub fn routes(
    state: Arc<ProxyState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    warp::any()
        .and(warp::method())
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .or_else(|_| async { Ok::<(String,), Infallible>((String::new(),)) }),
        )
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(state_filter)
        .and_then(handle_proxy)
        .recover(handle_rejection)
}

async fn handle_proxy(
    method: Method,
    full_path: warp::path::FullPath,
    query: String,
    headers: HeaderMap,
    body: Bytes,
    state: Arc<ProxyState>,
) -> Result<Response<Body>, Rejection> {
    let start_time = Instant::now();

    let mut uri_str = full_path.as_str().to_string();
    if !query.is_empty() {
        uri_str.push('?');
        uri_str.push_str(&query);
    }
    let uri: Uri = uri_str.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        tracing::warn!("Failed to parse URI {}: {}", uri_str, e);
        warp::reject::custom(ProxyError::InvalidUri(e.to_string()))
    })?;

    let request = InboundRequest {
        method: method.clone(),
        uri,
        headers,
        body,
    };
    let response = proxy_request(&state, request).await;

    tracing::info!(
        "{} {} {} {} {}ms",
        method,
        full_path.as_str(),
        response.status.as_u16(),
        response
            .headers
            .get("x-cache")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        start_time.elapsed().as_millis()
    );

    Ok(into_response(response))
}

pub fn into_response(proxied: ProxyResponse) -> Response<Body> {
    let mut response = Response::new(Body::from(proxied.body));
    *response.status_mut() = proxied.status;
    *response.headers_mut() = proxied.headers;
    response
}

/// Upstream failures never get here: the pipeline answers them with a 502.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if let Some(ProxyError::InvalidUri(_)) = err.find::<ProxyError>() {
        (StatusCode::BAD_REQUEST, "Bad request")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message.to_string(), code))
}
