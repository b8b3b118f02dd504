//! HTTP client for the snapshot server

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use temper_lib::models::MetricsDocument;
use url::Url;

const API_KEY_HEADER: &str = "X-API-Key";

/// Client for the temperd snapshot endpoint
pub struct SnapshotClient {
    client: Client,
    url: Url,
    token: Option<String>,
}

impl SnapshotClient {
    /// Create a new client
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let url = Url::parse(url).context("Invalid server URL")?;

        Ok(Self { client, url, token })
    }

    /// Fetch the document as untyped JSON
    pub async fn fetch_raw(&self) -> Result<serde_json::Value> {
        let body = self.get().await?;
        serde_json::from_str(&body).context("Failed to parse response")
    }

    /// Fetch and decode the metrics document
    pub async fn fetch(&self) -> Result<MetricsDocument> {
        let body = self.get().await?;
        serde_json::from_str(&body).context("Failed to parse metrics document")
    }

    async fn get(&self) -> Result<String> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.token {
            request = request.header(API_KEY_HEADER, token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach temperd at {}", self.url))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            anyhow::bail!("Unauthorized: set --token or TEMPER_TOKEN");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server error ({}): {}", status, body);
        }

        response.text().await.context("Failed to read response")
    }
}
