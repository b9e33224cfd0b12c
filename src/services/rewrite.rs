use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::{Captures, NoExpand, Regex, RegexBuilder};

use crate::config::{Config, InjectLocation, MY_HOST};
use crate::models::RequestContext;

lazy_static! {
    static ref HEAD_CLOSE: Regex = ci(r"</head\s*>");
    static ref HEAD_OPEN: Regex = ci(r"<head(\s[^>]*)?>");
    static ref BODY_CLOSE: Regex = ci(r"</body\s*>");
}

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static markup pattern")
}

/// Case-insensitive literal substring matcher.
#[derive(Debug, Clone)]
pub struct LiteralPattern {
    regex: Regex,
}

impl LiteralPattern {
    pub fn new(needle: &str) -> Self {
        Self {
            regex: ci(&regex::escape(needle)),
        }
    }

    /// Replaces every match, inserting `replacement` verbatim.
    pub fn replace_all<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        self.regex.replace_all(text, NoExpand(replacement))
    }
}

/// Swaps an origin and its host in one pass, so text written for one match
/// is never matched again. The origin alternative wins where both start.
#[derive(Debug, Clone)]
pub struct OriginRemap {
    regex: Regex,
}

impl OriginRemap {
    pub fn new(origin: &str, host: &str) -> Self {
        Self {
            regex: ci(&format!("({})|({})", regex::escape(origin), regex::escape(host))),
        }
    }

    pub fn replace_all<'t>(&self, text: &'t str, origin_to: &str, host_to: &str) -> Cow<'t, str> {
        self.regex.replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                origin_to.to_string()
            } else {
                host_to.to_string()
            }
        })
    }
}

#[derive(Debug, Clone)]
enum Replacement {
    Literal(String),
    IncomingHost,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: LiteralPattern,
    to: Replacement,
}

/// Text rewriting with a remap of the target origin and host that
/// configuration cannot switch off.
///
/// User rules whose `from` mentions the target origin or host are discarded
/// up front, then the target remap always runs last.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    rules: Vec<CompiledRule>,
    target: OriginRemap,
}

impl ContentRewriter {
    pub fn new(config: &Config) -> Self {
        let origin = config.target_origin.to_lowercase();
        let host = config.target_host.to_lowercase();

        let rules = config
            .replacements
            .iter()
            .filter(|rule| !rule.from.is_empty())
            .filter(|rule| {
                let from = rule.from.to_lowercase();
                let overlaps = from.contains(&origin) || from.contains(&host);
                if overlaps {
                    tracing::warn!(
                        "Replacement rule '{}' targets the upstream origin and is ignored",
                        rule.from
                    );
                }
                !overlaps
            })
            .map(|rule| CompiledRule {
                pattern: LiteralPattern::new(&rule.from),
                to: if rule.to == MY_HOST {
                    Replacement::IncomingHost
                } else {
                    Replacement::Literal(rule.to.clone())
                },
            })
            .collect();

        Self {
            rules,
            target: OriginRemap::new(&config.target_origin, &config.target_host),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Each rule runs once over the whole text, in order.
    pub fn rewrite(&self, text: &str, ctx: &RequestContext) -> String {
        let mut result = text.to_string();
        for rule in &self.rules {
            let to = match &rule.to {
                Replacement::Literal(to) => to.as_str(),
                Replacement::IncomingHost => ctx.host.as_str(),
            };
            result = rule.pattern.replace_all(&result, to).into_owned();
        }

        self.target
            .replace_all(&result, &ctx.origin, &ctx.authority())
            .into_owned()
    }
}

/// Content types whose bodies are rewritten as text.
pub fn is_text_content(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    ["text", "json", "javascript", "xml", "html"]
        .iter()
        .any(|kind| content_type.contains(kind))
}

pub fn is_html_content(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("html")
}

/// Wraps `script` in a `<script>` tag and splices it into `html`.
///
/// `Head` goes before the first `</head>`, else right after `<head ...>`,
/// else at the very start. `Body` goes before the first `</body>`, else at
/// the end.
pub fn inject_script(html: &str, script: &str, location: InjectLocation) -> String {
    let tag = format!("<script>{}</script>", script);
    let at = match location {
        InjectLocation::Head => HEAD_CLOSE
            .find(html)
            .map(|m| m.start())
            .or_else(|| HEAD_OPEN.find(html).map(|m| m.end()))
            .unwrap_or(0),
        InjectLocation::Body => BODY_CLOSE.find(html).map(|m| m.start()).unwrap_or(html.len()),
    };

    let mut out = String::with_capacity(html.len() + tag.len());
    out.push_str(&html[..at]);
    out.push_str(&tag);
    out.push_str(&html[at..]);
    out
}
