use std::time::Duration;

use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, HOST, USER_AGENT};
use http::HeaderMap;
use reqwest::{redirect, Client};

use crate::errors::{ProxyError, ProxyResult};
use crate::models::{UpstreamRequest, UpstreamResponse};

const MAX_REDIRECTS: usize = 10;

const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const FIREFOX_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0";

/// Browser whose network fingerprint the upstream call imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpersonationProfile {
    Chrome,
    Firefox,
}

impl ImpersonationProfile {
    /// Firefox clients get the Firefox profile, everyone else looks like Chrome.
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        match user_agent {
            Some(ua) if ua.to_ascii_lowercase().contains("firefox") => Self::Firefox,
            _ => Self::Chrome,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }

    /// Headers a real browser of this kind always sends.
    fn default_headers(&self) -> Vec<(HeaderName, &'static str)> {
        match self {
            Self::Chrome => vec![
                (USER_AGENT, CHROME_USER_AGENT),
                (
                    ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                ),
                (ACCEPT_LANGUAGE, "en-US,en;q=0.9"),
                (
                    HeaderName::from_static("sec-ch-ua"),
                    "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
                ),
                (HeaderName::from_static("sec-ch-ua-mobile"), "?0"),
                (HeaderName::from_static("sec-ch-ua-platform"), "\"Windows\""),
            ],
            Self::Firefox => vec![
                (USER_AGENT, FIREFOX_USER_AGENT),
                (
                    ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
                (ACCEPT_LANGUAGE, "en-US,en;q=0.5"),
            ],
        }
    }

    /// Fills in whatever browser headers the client left out.
    pub fn apply_defaults(&self, headers: &mut HeaderMap) {
        for (name, value) in self.default_headers() {
            if !headers.contains_key(&name) {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }
    }
}

/// The network capability used to reach the upstream origin.
///
/// Implementations own the TLS fingerprint for the requested profile.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        profile: ImpersonationProfile,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, ProxyResult<UpstreamResponse>>;
}

/// `reqwest`-backed transport. A client is built for each request and
/// dropped when the request completes.
#[derive(Debug, Default, Clone)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }

    fn build_client(profile: ImpersonationProfile, timeout: Duration) -> ProxyResult<Client> {
        let builder = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(0);

        let builder = match profile {
            ImpersonationProfile::Chrome => builder.http2_adaptive_window(true),
            ImpersonationProfile::Firefox => builder.http1_title_case_headers(),
        };

        builder
            .build()
            .map_err(|e| ProxyError::Upstream(format!("failed to build {} client: {}", profile.as_str(), e)))
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        profile: ImpersonationProfile,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, ProxyResult<UpstreamResponse>> {
        Box::pin(async move {
            let client = Self::build_client(profile, timeout)?;

            // reqwest sets Host from each hop's URL, redirects included.
            let mut headers = request.headers;
            headers.remove(HOST);

            let mut builder = client.request(request.method, &request.url).headers(headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify)?;

            Ok(UpstreamResponse { status, headers, body })
        })
    }
}

fn classify(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else if err.is_connect() {
        ProxyError::Connect(err.to_string())
    } else {
        ProxyError::Upstream(err.to_string())
    }
}

/// Picks a profile from the client's `User-Agent` and issues the request.
/// Failures come back as values; nothing is retried.
pub async fn dispatch(
    transport: &dyn Transport,
    mut request: UpstreamRequest,
    timeout: Duration,
) -> ProxyResult<UpstreamResponse> {
    let profile = ImpersonationProfile::from_user_agent(
        request.headers.get(USER_AGENT).and_then(|ua| ua.to_str().ok()),
    );
    profile.apply_defaults(&mut request.headers);

    tracing::debug!("Dispatching {} {} as {}", request.method, request.url, profile.as_str());
    let result = transport.send(profile, request, timeout).await;
    if let Err(e) = &result {
        tracing::warn!("Upstream request failed: {}", e);
    }
    result
}
