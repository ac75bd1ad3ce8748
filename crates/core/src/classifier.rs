use crate::error::ClassifyError;
use crate::models::{Classification, CLASSIFY_EXCERPT_CHARS, DEFAULT_CATEGORY, KNOWN_CATEGORIES};
use crate::traits::Classifier;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::{debug, warn};

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const MAX_TAGS: usize = 5;

pub fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(CLASSIFY_EXCERPT_CHARS) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub fn build_prompt(excerpt: &str) -> String {
    format!(
        "Analyze this document. Output JSON with 'category' and 'tags'.\n\
         Categories: [{}]. Use one of these unless the content clearly fits none of them.\n\
         Tags: 3-5 short keywords.\n\n\
         Content start:\n{excerpt}",
        KNOWN_CATEGORIES.join(", ")
    )
}

/// Classifies `text`, degrading to the default classification on any failure.
pub async fn classify_or_default<C>(classifier: &C, text: &str) -> Classification
where
    C: Classifier + Send + Sync + ?Sized,
{
    match classifier.classify(excerpt(text)).await {
        Ok(classification) => classification,
        Err(error) => {
            warn!(%error, "classification degraded, using default category");
            Classification::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Option<Vec<Value>>,
}

pub fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    let fence = Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$")?;
    let body = match fence.captures(raw) {
        Some(captures) => captures.get(1).map_or(raw, |inner| inner.as_str()),
        None => raw,
    };

    let value = match serde_json::from_str::<Value>(body.trim())? {
        Value::Array(items) => items
            .into_iter()
            .find(Value::is_object)
            .ok_or_else(|| ClassifyError::Malformed("array without an object".to_string()))?,
        other => other,
    };
    if !value.is_object() {
        return Err(ClassifyError::Malformed(format!("expected object, got {value}")));
    }

    let parsed: RawClassification = serde_json::from_value(value)?;

    let category = parsed
        .category
        .map(|category| category.trim().to_string())
        .filter(|category| !category.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let tags = parsed
        .tags
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tag| match tag {
            Value::String(tag) => Some(tag.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .filter(|tag| !tag.is_empty())
        .take(MAX_TAGS)
        .collect();

    Ok(Classification { category, tags })
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(build_prompt(text)),
                }],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        let mut request = self.client.post(self.url()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-goog-api-key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::BackendResponse {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: GenerateResponse = response.json().await?;
        let raw = payload
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<String>();

        if raw.trim().is_empty() {
            return Err(ClassifyError::Malformed("response had no text".to_string()));
        }

        debug!(raw = %raw, "classification response");
        parse_classification(&raw)
    }
}
