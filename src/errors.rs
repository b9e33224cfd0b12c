use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl warp::reject::Reject for ProxyError {}

pub type ProxyResult<T> = Result<T, ProxyError>;
