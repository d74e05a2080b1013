use crate::config::GatewayConfig;
use crate::error::Result;
use crate::traits::{FetchRequest, FetchResponse, Method, Transport, TransportError};
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// reqwest-backed transport. When `proxy_url` is set every request is routed
/// through it instead of hitting the target site directly.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    proxy_url: Option<String>,
}

impl HttpClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))
            .build()?;

        Ok(Self {
            client,
            proxy_url: config.proxy_url.clone(),
        })
    }

    /// The URL actually requested for `target`.
    pub fn request_url(&self, target: &str) -> String {
        match &self.proxy_url {
            Some(template) if template.contains("{url}") => {
                let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                template.replace("{url}", &encoded)
            }
            Some(prefix) => format!("{}{}", prefix, target),
            None => target.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpClient {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, TransportError> {
        let url = self.request_url(&request.url);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Head => self.client.head(&url),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        // reqwest reports the (empty) body size for HEAD, so read the header first.
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or_else(|| response.content_length());

        let body = match request.method {
            Method::Head => String::new(),
            Method::Get => response.text().await.map_err(map_reqwest_error)?,
        };

        debug!("[HTTP] {} {} -> {} ({} bytes)", request.method, request.url, status, body.len());

        Ok(FetchResponse {
            status,
            body,
            content_length,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_template_encodes_target() {
        let config = GatewayConfig {
            proxy_url: Some("https://proxy.local/fetch?url={url}".to_string()),
            ..GatewayConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(
            client.request_url("https://site.com/a b?c=1"),
            "https://proxy.local/fetch?url=https%3A%2F%2Fsite.com%2Fa+b%3Fc%3D1"
        );
    }

    #[test]
    fn proxy_prefix_and_direct() {
        let prefixed = HttpClient::new(&GatewayConfig {
            proxy_url: Some("https://proxy.local/".to_string()),
            ..GatewayConfig::default()
        })
        .unwrap();
        assert_eq!(prefixed.request_url("https://a.b/c"), "https://proxy.local/https://a.b/c");

        let direct = HttpClient::new(&GatewayConfig::default()).unwrap();
        assert_eq!(direct.request_url("https://a.b/c"), "https://a.b/c");
    }
}
