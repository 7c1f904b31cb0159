pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use tracing::{debug, info};

/// Connection settings for a Browserless deployment.
#[derive(Debug, Clone)]
pub struct BrowserlessClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            timeout,
        }
    }

    /// Open a rendering session. Holds the HTTP connection pool until `close`.
    pub fn open_session(&self) -> Result<BrowserSession> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BrowserlessError::Client(e.to_string()))?;

        info!(base_url = self.base_url.as_str(), "Browserless session opened");

        Ok(BrowserSession {
            http,
            endpoint: self.content_endpoint(),
            pages_rendered: 0,
        })
    }

    fn content_endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

/// A live rendering session. Must be closed by its owner once extraction is done.
pub struct BrowserSession {
    http: reqwest::Client,
    endpoint: String,
    pages_rendered: u32,
}

impl BrowserSession {
    /// Fetch fully-rendered HTML content for a URL via the Browserless /content endpoint.
    pub async fn content(&mut self, url: &str) -> Result<String> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let html = resp.text().await?;
        if html.trim().is_empty() {
            return Err(BrowserlessError::EmptyContent(url.to_string()));
        }

        self.pages_rendered += 1;
        debug!(url, bytes = html.len(), "Rendered page via Browserless");
        Ok(html)
    }

    pub fn pages_rendered(&self) -> u32 {
        self.pages_rendered
    }

    /// Release the session and its pooled connections.
    pub fn close(self) {
        info!(pages_rendered = self.pages_rendered, "Browserless session closed");
        drop(self.http);
    }
}
