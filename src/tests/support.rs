use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::config::Config;
use crate::errors::ProxyResult;
use crate::models::{ProxyState, UpstreamRequest, UpstreamResponse};
use crate::services::upstream::{ImpersonationProfile, Transport};

type Responder = dyn Fn(&UpstreamRequest) -> ProxyResult<UpstreamResponse> + Send + Sync;

/// In-memory upstream: answers with a closure and records what it was sent.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    pub seen: Mutex<Vec<(ImpersonationProfile, UpstreamRequest)>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&UpstreamRequest) -> ProxyResult<UpstreamResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> (ImpersonationProfile, UpstreamRequest) {
        self.seen.lock().unwrap().last().cloned().expect("no upstream call recorded")
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        profile: ImpersonationProfile,
        request: UpstreamRequest,
        _timeout: Duration,
    ) -> BoxFuture<'_, ProxyResult<UpstreamResponse>> {
        let result = (self.responder)(&request);
        self.seen.lock().unwrap().push((profile, request));
        Box::pin(async move { result })
    }
}

pub fn upstream(status: u16, content_type: &str, body: &str) -> UpstreamResponse {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_str(content_type).unwrap());
    UpstreamResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body: Bytes::from(body.to_string()),
    }
}

pub fn config_with(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_map(&vars).unwrap()
}

pub fn state_with(config: Config, transport: Arc<ScriptedTransport>) -> Arc<ProxyState> {
    Arc::new(ProxyState::new(config, transport))
}
