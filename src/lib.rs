pub mod config;
pub mod errors;
pub mod handlers;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod services;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use errors::{ProxyError, ProxyResult};
pub use models::{CacheEntry, ProxyState, RequestContext};
