use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Exchanges an expired signed URL for a fresh one.
#[async_trait]
pub trait UrlRefresher: Send + Sync {
    async fn refresh(&self, expired: &Url) -> Result<Url, RefreshError>;
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh endpoint answered HTTP {status}")]
    Status { status: u16 },
    #[error("refresh request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("refresh endpoint returned an invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    url: String,
}

/// Calls a signing service: `POST {"url": expired}` answered by `{"url": fresh}`.
#[derive(Clone, Debug)]
pub struct HttpUrlRefresher {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpUrlRefresher {
    pub fn new(client: Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl UrlRefresher for HttpUrlRefresher {
    async fn refresh(&self, expired: &Url) -> Result<Url, RefreshError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&RefreshRequest {
                url: expired.as_str(),
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status {
                status: status.as_u16(),
            });
        }
        let body: RefreshResponse = response.json().await?;
        Ok(Url::parse(&body.url)?)
    }
}
