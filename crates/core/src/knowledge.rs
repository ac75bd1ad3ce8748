use crate::error::StoreError;
use crate::models::{IndexRecord, MemoryMatch, MemoryQuery, QueryResponse};
use crate::traits::KnowledgeStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;
use url::Url;

pub const DEFAULT_OPENMEMORY_URL: &str = "http://localhost:8080";

/// HTTP client for an OpenMemory-compatible knowledge store.
pub struct OpenMemoryClient {
    client: Client,
    base: Url,
}

impl OpenMemoryClient {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn post<T: serde::Serialize + Sync>(
        &self,
        route: &str,
        body: &T,
    ) -> Result<reqwest::Response, StoreError> {
        let response = self
            .client
            .post(self.base.join(route)?)
            .json(body)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(StoreError::BackendResponse {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl KnowledgeStore for OpenMemoryClient {
    async fn add(&self, record: &IndexRecord) -> Result<(), StoreError> {
        self.post("memory/add", record).await?;
        Ok(())
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryMatch>, StoreError> {
        let response = self.post("memory/query", query).await?;
        let body = response.text().await?;
        let payload: QueryResponse = serde_json::from_str(&body)?;
        Ok(payload.matches)
    }
}

pub async fn index_document<K>(
    store: &K,
    content: &str,
    source: &Path,
    category: &str,
    tags: &[String],
) -> Result<(), StoreError>
where
    K: KnowledgeStore + Send + Sync + ?Sized,
{
    let record = IndexRecord::document(
        content.to_string(),
        source.to_string_lossy().to_string(),
        category.to_string(),
        tags.to_vec(),
    );
    store.add(&record).await
}

/// One line per match, as shown by the `search` command.
pub fn format_match(hit: &MemoryMatch) -> String {
    let preview = match hit.content.char_indices().nth(500) {
        Some((byte_index, _)) => &hit.content[..byte_index],
        None => hit.content.as_str(),
    };
    format!(
        "[Score: {:.2}] [Category: {}] Source: {} | Content: {}...",
        hit.similarity,
        hit.category(),
        hit.source(),
        preview
    )
}
