//! HTTP implementations of the resolver and transport.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use super::{MediaDownload, MediaTransport, RemoteError, RemoteResolver, TransportError};
use crate::config::FetchConfig;
use crate::content::ContentId;

const ID_PLACEHOLDER: &str = "{id}";

/// Builds direct media URLs from a template such as
/// `https://cdn.example.com/videos/{id}`.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: String,
}

impl TemplateResolver {
    /// # Errors
    ///
    /// - `RemoteError::InvalidUrl` - Template lacks the `{id}` placeholder
    pub fn new(template: impl Into<String>) -> Result<Self, RemoteError> {
        let template = template.into();
        if !template.contains(ID_PLACEHOLDER) {
            return Err(RemoteError::InvalidUrl {
                reason: format!("template {template} has no {ID_PLACEHOLDER} placeholder"),
            });
        }
        Ok(Self { template })
    }
}

#[async_trait]
impl RemoteResolver for TemplateResolver {
    async fn resolve_remote_url(&self, content_id: &ContentId) -> Result<Url, RemoteError> {
        let encoded = urlencoding::encode(content_id.as_str());
        let raw = self.template.replace(ID_PLACEHOLDER, &encoded);

        Url::parse(&raw).map_err(|e| RemoteError::InvalidUrl {
            reason: format!("{raw}: {e}"),
        })
    }
}

/// `reqwest`-backed media transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// - `TransportError::Request` - HTTP client could not be built
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| TransportError::Request {
            url: String::new(),
            reason: e.to_string(),
        })?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaTransport for HttpTransport {
    async fn download(&self, url: &Url) -> Result<MediaDownload, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        debug!(
            "Downloading {} (type={:?}, length={:?})",
            url, content_type, content_length
        );

        let body_url = url.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| TransportError::Body {
                url: body_url.clone(),
                reason: e.to_string(),
            })
            .boxed();

        Ok(MediaDownload {
            content_type,
            content_length,
            body,
        })
    }
}
