use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::errors::ProxyError;
use crate::handlers::routes;
use crate::models::{ProxyState, UpstreamResponse};
use crate::services::{ImpersonationProfile, ReqwestTransport};
use crate::tests::support::{config_with, state_with, upstream, ScriptedTransport};

#[tokio::test]
async fn test_proxy_get_rewrites_and_caches() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let transport = ScriptedTransport::new(move |_| {
        let body = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            "<html>Welcome to example.com</html>"
        } else {
            "<html>changed</html>"
        };
        Ok(upstream(200, "text/html", body))
    });
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    let first = warp::test::request()
        .path("/some/path")
        .header("host", "testserver")
        .reply(&filter)
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.body(), "<html>Welcome to testserver</html>");
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");

    let second = warp::test::request()
        .path("/some/path")
        .header("host", "testserver")
        .reply(&filter)
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.body(), first.body());
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_cache_key_includes_host_and_query() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/plain", "ok")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    for (host, path) in [("a.test", "/p?x=1"), ("b.test", "/p?x=1"), ("a.test", "/p?x=2")] {
        let response = warp::test::request().path(path).header("host", host).reply(&filter).await;
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_mandatory_remap_survives_hostile_rule() {
    let transport = ScriptedTransport::new(|_| {
        Ok(upstream(
            200,
            "application/json",
            r#"{"home":"https://example.com/","api":"https://api.example.com/v1","name":"Example.com"}"#,
        ))
    });
    let config = config_with(&[(
        "REPLACEMENTS",
        r#"{"example.com": "attacker.test", "https://example.com": "MY_HOST", "v1": "v2"}"#,
    )]);
    let filter = routes(state_with(config, transport));

    let response = warp::test::request()
        .path("/config.json")
        .header("host", "testserver")
        .reply(&filter)
        .await;
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert_eq!(
        body,
        r#"{"home":"http://testserver/","api":"https://api.testserver/v2","name":"testserver"}"#
    );
    assert!(!body.to_lowercase().contains("example.com"));
    assert!(!body.contains("attacker.test"));
}

#[tokio::test]
async fn test_user_rule_with_my_host() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/css", "url(//cdn.partner.net/a.png)")));
    let config = config_with(&[("REPLACEMENTS", r#"[{"from": "cdn.partner.net", "to": "MY_HOST"}]"#)]);
    let filter = routes(state_with(config, transport));

    // `.css` is a static extension, so the body passes through untouched.
    let response = warp::test::request()
        .path("/site.css")
        .header("host", "mirror.local:8080")
        .reply(&filter)
        .await;
    assert_eq!(response.body(), "url(//cdn.partner.net/a.png)");

    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/html", "//cdn.partner.net/a.png")));
    let config = config_with(&[("REPLACEMENTS", r#"[{"from": "cdn.partner.net", "to": "MY_HOST"}]"#)]);
    let filter = routes(state_with(config, transport));
    let response = warp::test::request()
        .path("/page")
        .header("host", "mirror.local:8080")
        .reply(&filter)
        .await;
    assert_eq!(response.body(), "//mirror.local/a.png");
}

#[tokio::test]
async fn test_proxy_header_sanitization() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/plain", "ok")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    let response = warp::test::request()
        .path("/headers")
        .header("host", "testserver")
        .header("X-Forwarded-For", "1.2.3.4")
        .header("CF-Connecting-IP", "1.2.3.4")
        .header("CF-IPCountry", "NL")
        .header("Accept-Encoding", "gzip")
        .header("Origin", "http://testserver")
        .header("Cookie", "__cf_bm=zzz; session=abc")
        .header("User-Agent", "test-agent")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (profile, sent) = transport.last();
    assert_eq!(profile, ImpersonationProfile::Chrome);
    assert!(!sent.headers.contains_key("x-forwarded-for"));
    assert!(!sent.headers.keys().any(|name| name.as_str().starts_with("cf-")));
    assert!(!sent.headers.contains_key("accept-encoding"));
    assert_eq!(sent.headers.get("host").unwrap(), "example.com");
    assert_eq!(sent.headers.get("origin").unwrap(), "https://example.com");
    assert_eq!(sent.headers.get("cookie").unwrap(), "session=abc");
    assert_eq!(sent.headers.get("user-agent").unwrap(), "test-agent");
    assert!(sent.body.is_none());
}

#[tokio::test]
async fn test_firefox_clients_use_firefox_profile() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/plain", "ok")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    warp::test::request()
        .path("/")
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0")
        .reply(&filter)
        .await;

    assert_eq!(transport.last().0, ImpersonationProfile::Firefox);
}

#[tokio::test]
async fn test_response_headers_rewritten() {
    let transport = ScriptedTransport::new(|_| {
        let mut response = upstream(200, "text/html", "<html></html>");
        let headers = &mut response.headers;
        headers.append("set-cookie", HeaderValue::from_static("session=1; Domain=example.com"));
        headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
        headers.insert("cf-ray", HeaderValue::from_static("8b1"));
        headers.insert("cache-control", HeaderValue::from_static("max-age=60"));
        headers.insert("content-length", HeaderValue::from_static("13"));
        headers.insert("link", HeaderValue::from_static("<https://example.com/style.css>; rel=preload"));
        Ok(response)
    });
    let filter = routes(state_with(config_with(&[]), transport));

    let response = warp::test::request()
        .path("/")
        .header("host", "testserver")
        .reply(&filter)
        .await;
    let headers = response.headers();
    assert_eq!(headers.get("set-cookie").unwrap(), "session=1; Domain=testserver");
    assert_eq!(headers.get("link").unwrap(), "<http://testserver/style.css>; rel=preload");
    assert!(headers.get("content-security-policy").is_none());
    assert!(headers.get("cf-ray").is_none());
    assert!(headers.get("cache-control").is_none());
}

#[tokio::test]
async fn test_script_injection() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/html", "<html><body>page</body></html>")));
    let config = config_with(&[("INJECT_JS", "window.__injected = true;")]);
    let filter = routes(state_with(config, transport));

    let response = warp::test::request().path("/").header("host", "testserver").reply(&filter).await;
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(body.contains("<script>window.__injected = true;</script></body>"));
    assert_eq!(body.matches("<script>").count(), 1);
}

#[tokio::test]
async fn test_script_injected_in_head_and_not_rewritten() {
    let transport = ScriptedTransport::new(|_| {
        Ok(upstream(200, "text/html; charset=utf-8", "<html><head></head><body>example.com</body></html>"))
    });
    let config = config_with(&[
        ("INJECT_JS", "fetch('https://example.com/beacon');"),
        ("INJECT_LOCATION", "head"),
    ]);
    let filter = routes(state_with(config, transport));

    let response = warp::test::request().path("/").header("host", "testserver").reply(&filter).await;
    assert_eq!(
        response.body(),
        "<html><head><script>fetch('https://example.com/beacon');</script></head><body>testserver</body></html>"
    );
}

#[tokio::test]
async fn test_no_script_without_configuration() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/html", "<html><body>page</body></html>")));
    let filter = routes(state_with(config_with(&[]), transport));

    let response = warp::test::request().path("/").header("host", "testserver").reply(&filter).await;
    assert_eq!(response.body(), "<html><body>page</body></html>");
}

#[tokio::test]
async fn test_script_not_injected_into_json() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "application/json", "{\"a\":\"</body>\"}")));
    let config = config_with(&[("INJECT_JS", "window.x = 1;")]);
    let filter = routes(state_with(config, transport));

    let response = warp::test::request().path("/data").reply(&filter).await;
    assert_eq!(response.body(), "{\"a\":\"</body>\"}");
}

#[tokio::test]
async fn test_post_is_never_cached() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/plain", "created")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    for _ in 0..2 {
        let response = warp::test::request()
            .method("POST")
            .path("/submit")
            .header("host", "testserver")
            .body("name=value")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
    assert_eq!(transport.calls(), 2);

    let (_, sent) = transport.last();
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.body, Some(Bytes::from("name=value")));

    // A POST response never seeds the cache for a later GET either.
    let response = warp::test::request().path("/submit").header("host", "testserver").reply(&filter).await;
    assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_non_success_is_not_cached() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(404, "text/html", "<html>missing</html>")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    for _ in 0..2 {
        let response = warp::test::request().path("/gone").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_upstream_failure_returns_502_uncached() {
    let transport = ScriptedTransport::new(|_| Err(ProxyError::Connect("connection refused".to_string())));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    for _ in 0..2 {
        let response = warp::test::request().path("/").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.starts_with("Upstream fetch error:"));
        assert!(body.contains("connection refused"));
        assert!(response.headers().get("x-cache").is_none());
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_static_asset_passthrough_and_cache() {
    let png: &'static [u8] = &[0x89, b'P', b'N', b'G', 0xff, 0x00, b'e', b'x'];
    let transport = ScriptedTransport::new(move |_| {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("image/png"));
        headers.insert("cache-control", HeaderValue::from_static("public, max-age=31536000"));
        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(png),
        })
    });
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    let first = warp::test::request().path("/logo.png").reply(&filter).await;
    assert_eq!(first.body().as_ref(), png);
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    assert!(first.headers().get("cache-control").is_none());

    let second = warp::test::request().path("/logo.png").reply(&filter).await;
    assert_eq!(second.body().as_ref(), png);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_extensionless_binary_is_cached() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "application/octet-stream", "example.com")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    let first = warp::test::request().path("/download").reply(&filter).await;
    assert_eq!(first.body(), "example.com");
    let second = warp::test::request().path("/download").reply(&filter).await;
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_invalid_utf8_text_is_decoded_lossily() {
    let transport = ScriptedTransport::new(|_| {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"caf\xe9 at example.com"),
        })
    });
    let filter = routes(state_with(config_with(&[]), transport));

    let response = warp::test::request().path("/menu").header("host", "testserver").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "caf\u{fffd} at testserver");
}

#[tokio::test]
async fn test_head_is_forwarded_without_body_or_cache() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/html", "")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    for _ in 0..2 {
        let response = warp::test::request().method("HEAD").path("/").reply(&filter).await;
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
    assert_eq!(transport.calls(), 2);
    assert!(transport.last().1.body.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_entry_expires_after_ttl() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/html", "<p>hi</p>")));
    let config = config_with(&[("CACHE_TTL_HTML", "10")]);
    let filter = routes(state_with(config, transport.clone()));

    let first = warp::test::request().path("/ttl").reply(&filter).await;
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");

    tokio::time::advance(Duration::from_secs(5)).await;
    let cached = warp::test::request().path("/ttl").reply(&filter).await;
    assert_eq!(cached.headers().get("x-cache").unwrap(), "HIT");

    tokio::time::advance(Duration::from_secs(6)).await;
    let refreshed = warp::test::request().path("/ttl").reply(&filter).await;
    assert_eq!(refreshed.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_bodyless_requests_drop_framing_headers() {
    let transport = ScriptedTransport::new(|_| Ok(upstream(200, "text/plain", "ok")));
    let filter = routes(state_with(config_with(&[]), transport.clone()));

    let response = warp::test::request()
        .path("/search")
        .header("host", "testserver")
        .body("stray payload")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (_, sent) = transport.last();
    assert!(sent.body.is_none());
    assert!(!sent.headers.contains_key("content-length"));
    assert!(!sent.headers.contains_key("transfer-encoding"));

    warp::test::request()
        .method("POST")
        .path("/submit")
        .header("host", "testserver")
        .body("name=value")
        .reply(&filter)
        .await;
    let (_, sent) = transport.last();
    assert_eq!(sent.body, Some(Bytes::from("name=value")));
    assert!(!sent.headers.contains_key("content-length"));
}

#[tokio::test]
async fn test_unreachable_origin_returns_502() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let origin = format!("http://127.0.0.1:{}", port);
    let config = config_with(&[("TARGET_ORIGIN", origin.as_str())]);
    let state = Arc::new(ProxyState::new(config, Arc::new(ReqwestTransport::new())));
    let filter = routes(state);

    let response = warp::test::request().path("/").header("host", "testserver").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(body.starts_with("Upstream fetch error: upstream connection failed"), "{}", body);
}
