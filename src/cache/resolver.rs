use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Convierte una búsqueda de texto libre en una referencia canónica
///
/// `Ok(None)` significa que la consulta funcionó sin resultados; no se guarda.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

/// Resolver que usa la búsqueda de YouTube Data API v3
#[derive(Debug, Clone)]
pub struct YouTubeSearchResolver {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl YouTubeSearchResolver {
    const SEARCH_URL: &'static str = "https://www.googleapis.com/youtube/v3/search";

    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            api_key,
            endpoint: Self::SEARCH_URL.to_string(),
            client,
        })
    }

    /// Apunta a otro endpoint compatible
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl QueryResolver for YouTubeSearchResolver {
    async fn resolve(&self, query: &str) -> Result<Option<String>> {
        debug!("🔍 Resolviendo búsqueda en YouTube API: {}", query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", "1"),
                ("key", &self.api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, error_text);
            anyhow::bail!("YouTube API error: {} - {}", status, error_text);
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .items
            .into_iter()
            .find_map(|item| item.id.video_id)
            .map(|id| format!("https://www.youtube.com/watch?v={id}")))
    }
}
