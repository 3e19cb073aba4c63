//! Server-rendered HTML fragments the view is rebuilt from.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::model::{MessageId, ThreadId};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("invalid fragment url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid auth token: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment(String);

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn html(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait FragmentSource: Send + Sync {
    async fn thread_preview(&self, thread: &ThreadId) -> Result<Fragment, FetchError>;
    async fn message_bubble(&self, message: &MessageId) -> Result<Fragment, FetchError>;
    async fn chat_messages(&self, thread: &ThreadId) -> Result<Fragment, FetchError>;
    async fn message_list(&self) -> Result<Fragment, FetchError>;
}

/// Fetches fragments from the dashboard over HTTP, authenticated with the
/// dashboard session cookie.
#[derive(Debug, Clone)]
pub struct HttpFragmentSource {
    client: Client,
    base_url: Url,
}

impl HttpFragmentSource {
    pub fn new(
        base_url: Url,
        auth_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert("HX-Request", HeaderValue::from_static("true"));
        if let Some(token) = auth_token {
            let mut cookie = HeaderValue::from_str(&format!("auth_token={token}"))?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str, query: Option<(&str, &str)>) -> Result<Url, FetchError> {
        let mut url = self.base_url.join(path)?;
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Fragment, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Fragment(response.text().await?))
    }
}

#[async_trait]
impl FragmentSource for HttpFragmentSource {
    async fn thread_preview(&self, thread: &ThreadId) -> Result<Fragment, FetchError> {
        let url = self.endpoint("thread-preview", Some(("thread_id", thread.as_str())))?;
        self.get(url).await
    }

    async fn message_bubble(&self, message: &MessageId) -> Result<Fragment, FetchError> {
        let url = self.endpoint("message-bubble", Some(("id", message.as_str())))?;
        self.get(url).await
    }

    async fn chat_messages(&self, thread: &ThreadId) -> Result<Fragment, FetchError> {
        let url = self.endpoint("chat-messages", Some(("thread_id", thread.as_str())))?;
        self.get(url).await
    }

    async fn message_list(&self) -> Result<Fragment, FetchError> {
        let url = self.endpoint("message-list", None)?;
        self.get(url).await
    }
}
