use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::errors::ProxyError;

pub const DEFAULT_TARGET_ORIGIN: &str = "https://example.com";
pub const DEFAULT_MY_ORIGIN: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CACHE_TTL_STATIC_SECS: u64 = 86400; // 1 day
pub const DEFAULT_CACHE_TTL_HTML_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: &str = "8000";

/// Rule target resolved per request to the host the client addressed.
pub const MY_HOST: &str = "MY_HOST";

lazy_static! {
    pub static ref STATIC_EXTENSIONS: Vec<String> = ["png", "jpg", "jpeg", "gif", "css", "js", "woff", "woff2"]
        .iter()
        .map(|ext| ext.to_string())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectLocation {
    Head,
    #[default]
    Body,
}

impl InjectLocation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "head" => Some(Self::Head),
            "body" => Some(Self::Body),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Body => "body",
        }
    }
}

/// Process-wide settings. Built once by [`Config::from_env`] and shared
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream root, without a trailing slash.
    pub target_origin: String,
    /// Upstream netloc; carries the port when one was given.
    pub target_host: String,
    /// Upstream host name without port, used for cookie `Domain=` rewriting.
    pub target_hostname: String,
    pub my_origin: String,
    /// Used as the incoming host when a request names none.
    pub my_host: String,
    pub replacements: Vec<ReplacementRule>,
    pub static_extensions: Vec<String>,
    pub cache_ttl_static: Duration,
    pub cache_ttl_dynamic: Duration,
    pub inject_script: Option<String>,
    pub inject_location: InjectLocation,
    pub listen_addr: SocketAddr,
    pub upstream_timeout: Duration,
    pub cache_sweep_interval: Option<Duration>,
}

#[derive(Deserialize)]
struct RuleSpec {
    from: String,
    to: String,
}

impl Config {
    /// Reads the process environment, loading `.env` first when present.
    pub fn from_env() -> Result<Self, ProxyError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, collecting every
    /// violation instead of stopping at the first one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProxyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let mut errors = Vec::new();

        let target_origin = get("TARGET_ORIGIN", DEFAULT_TARGET_ORIGIN);
        let target = parse_origin(&target_origin);
        if target.is_none() {
            errors.push("TARGET_ORIGIN must be a valid http(s) URL".to_string());
        }

        let my_origin = get("MY_ORIGIN", DEFAULT_MY_ORIGIN);
        let mine = parse_origin(&my_origin);
        if mine.is_none() {
            errors.push("MY_ORIGIN must be a valid http(s) URL".to_string());
        }

        let strict = lookup("REPLACEMENTS_STRICT")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);
        let replacements = match lookup("REPLACEMENTS").filter(|raw| !raw.trim().is_empty()) {
            None => Vec::new(),
            Some(raw) => match parse_replacements(&raw) {
                Ok(rules) => rules,
                Err(problems) if strict => {
                    errors.extend(problems);
                    Vec::new()
                }
                Err(problems) => {
                    tracing::warn!(
                        "Ignoring malformed REPLACEMENTS ({}), continuing with no rules",
                        problems.join("; ")
                    );
                    Vec::new()
                }
            },
        };

        let cache_ttl_static = parse_secs(
            &get("CACHE_TTL_STATIC", &DEFAULT_CACHE_TTL_STATIC_SECS.to_string()),
            "CACHE_TTL_STATIC",
            &mut errors,
        );
        let cache_ttl_dynamic = parse_secs(
            &get("CACHE_TTL_HTML", &DEFAULT_CACHE_TTL_HTML_SECS.to_string()),
            "CACHE_TTL_HTML",
            &mut errors,
        );
        let upstream_timeout = parse_secs(
            &get("UPSTREAM_TIMEOUT_SECS", &DEFAULT_UPSTREAM_TIMEOUT_SECS.to_string()),
            "UPSTREAM_TIMEOUT_SECS",
            &mut errors,
        );
        if upstream_timeout.is_zero() {
            errors.push("UPSTREAM_TIMEOUT_SECS must be greater than zero".to_string());
        }
        let sweep = parse_secs(&get("CACHE_SWEEP_SECS", "0"), "CACHE_SWEEP_SECS", &mut errors);

        let inject_location = match lookup("INJECT_LOCATION") {
            None => InjectLocation::default(),
            Some(raw) => InjectLocation::parse(&raw).unwrap_or_else(|| {
                errors.push("INJECT_LOCATION must be either 'head' or 'body'".to_string());
                InjectLocation::default()
            }),
        };
        let inject_script = load_script(lookup("INJECT_JS_FILE"), lookup("INJECT_JS"));

        let listen = format!("{}:{}", get("HOST", DEFAULT_HOST), get("PORT", DEFAULT_PORT));
        let listen_addr = listen.parse::<SocketAddr>().ok().or_else(|| {
            errors.push(format!("HOST and PORT must form a socket address, got '{}'", listen));
            None
        });

        match (target, mine, listen_addr) {
            (Some(target), Some(mine), Some(listen_addr)) if errors.is_empty() => Ok(Self {
                target_origin: target.origin,
                target_host: target.host,
                target_hostname: target.hostname,
                my_origin: mine.origin,
                my_host: mine.host,
                replacements,
                static_extensions: STATIC_EXTENSIONS.clone(),
                cache_ttl_static,
                cache_ttl_dynamic,
                inject_script,
                inject_location,
                listen_addr,
                upstream_timeout,
                cache_sweep_interval: (!sweep.is_zero()).then_some(sweep),
            }),
            _ => Err(ProxyError::Config(errors)),
        }
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ProxyError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }
}

struct Origin {
    origin: String,
    host: String,
    hostname: String,
}

fn parse_origin(raw: &str) -> Option<Origin> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let hostname = url.host_str()?.to_string();
    let host = match url.port() {
        Some(port) => format!("{}:{}", hostname, port),
        None => hostname.clone(),
    };
    Some(Origin {
        origin: format!("{}://{}", url.scheme(), host),
        host,
        hostname,
    })
}

fn parse_secs(raw: &str, name: &str, errors: &mut Vec<String>) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            errors.push(format!("{} must be a non-negative integer", name));
            Duration::ZERO
        }
    }
}

/// Accepts either `{"from": "to", ...}` or `[{"from": .., "to": ..}, ...]`.
/// Rules with an empty `from` are dropped.
pub fn parse_replacements(raw: &str) -> Result<Vec<ReplacementRule>, Vec<String>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|_| vec!["REPLACEMENTS must be valid JSON".to_string()])?;

    let rules = match value {
        Value::Object(map) => {
            let mut rules = Vec::with_capacity(map.len());
            let mut errors = Vec::new();
            for (from, to) in map {
                match to {
                    Value::String(to) => rules.push(ReplacementRule { from, to }),
                    _ => errors.push(format!("REPLACEMENTS['{}'] must map to a string", from)),
                }
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            rules
        }
        Value::Array(items) => {
            let mut rules = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                match serde_json::from_value::<RuleSpec>(item) {
                    Ok(rule) => rules.push(ReplacementRule { from: rule.from, to: rule.to }),
                    Err(_) => errors.push(format!(
                        "REPLACEMENTS[{}] must be an object with string 'from' and 'to' keys",
                        i
                    )),
                }
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            rules
        }
        _ => {
            return Err(vec![
                "REPLACEMENTS must be a JSON object or a JSON list of {from,to} objects".to_string(),
            ])
        }
    };

    Ok(rules.into_iter().filter(|rule| !rule.from.is_empty()).collect())
}

fn load_script(path: Option<String>, inline: Option<String>) -> Option<String> {
    let from_file = path.filter(|p| !p.trim().is_empty()).and_then(|path| {
        fs::read_to_string(&path)
            .map_err(|e| tracing::warn!("Failed to read INJECT_JS_FILE {}: {}, using INJECT_JS", path, e))
            .ok()
    });
    from_file
        .or(inline)
        .filter(|script| !script.trim().is_empty())
}
