pub mod cache;
pub mod context;
pub mod headers;
pub mod proxy;
pub mod rewrite;
pub mod upstream;

pub use cache::CacheStore;
pub use context::resolve_context;
pub use headers::{sanitize_inbound, sanitize_outbound};
pub use proxy::{is_static_path, proxy_request};
pub use rewrite::{inject_script, ContentRewriter};
pub use upstream::{dispatch, ImpersonationProfile, ReqwestTransport, Transport};
