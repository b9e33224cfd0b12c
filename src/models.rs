use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::config::Config;
use crate::services::cache::CacheStore;
use crate::services::rewrite::ContentRewriter;
use crate::services::upstream::Transport;

/// A stored response, either raw bytes (static) or already rewritten (dynamic).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the client sent, as handed over by the server layer.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Usually origin-form (`/path?query`); absolute-form is accepted too.
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Per-request view of where the client thinks it is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub path_and_query: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// `scheme://host[:port]`
    pub origin: String,
    pub target_url: String,
}

impl RequestContext {
    /// `host[:port]`, with the port only when the client addressed one.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `method:scheme://host[:port]/path?query`
    pub fn cache_key(&self) -> String {
        format!("{}:{}{}", self.method, self.origin, self.path_and_query)
    }

    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.path_and_query)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Final response handed back to the server layer.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Everything a request needs, built once at startup and shared by reference.
pub struct ProxyState {
    pub config: Arc<Config>,
    pub static_cache: CacheStore,
    pub dynamic_cache: CacheStore,
    pub rewriter: ContentRewriter,
    pub transport: Arc<dyn Transport>,
}

impl ProxyState {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let rewriter = ContentRewriter::new(&config);
        Self {
            config: Arc::new(config),
            static_cache: CacheStore::new(),
            dynamic_cache: CacheStore::new(),
            rewriter,
            transport,
        }
    }
}
