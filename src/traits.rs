use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Head => write!(f, "HEAD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub content_length: Option<u64>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_length: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status < 400
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// The outbound HTTP collaborator (usually a CORS proxy). Status codes are
/// data, not errors: only a missing response is a `TransportError`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, TransportError>;
}

/// Site-specific image URL extraction for CDNs with non-standard path shapes.
pub trait SiteImageRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Absolute image URLs found in `body`, in document order.
    fn extract(&self, body: &str, base_url: &url::Url) -> Vec<String>;
}
