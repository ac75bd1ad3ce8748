use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Trimmed native text shorter than this sends a page through OCR.
pub const MIN_NATIVE_PAGE_CHARS: usize = 50;

/// Trimmed document text shorter than this is treated as empty.
pub const MIN_DOCUMENT_CHARS: usize = 10;

/// Only this many characters of a document are sent for classification.
pub const CLASSIFY_EXCERPT_CHARS: usize = 2_000;

pub const DEFAULT_CATEGORY: &str = "General";

/// Categories offered to the classification service.
pub const KNOWN_CATEGORIES: [&str; 8] = [
    "Identity",
    "Travel",
    "Finance",
    "Work",
    "Education",
    "Health",
    "Personal",
    "General",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IngestEventKind {
    Created,
    MovedIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub path: PathBuf,
    pub kind: IngestEventKind,
    pub observed_at: DateTime<Utc>,
}

impl IngestEvent {
    pub fn new(path: PathBuf, kind: IngestEventKind) -> Self {
        Self {
            path,
            kind,
            observed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub number: u32,
    pub text: String,
    pub method: ExtractionMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub source_path: PathBuf,
    pub pages: Vec<ExtractedPage>,
    /// Set for paginated sources, where each page gets a `--- Page N ---` header.
    pub paginated: bool,
}

impl ExtractedDocument {
    pub fn single(source_path: PathBuf, text: String, method: ExtractionMethod) -> Self {
        Self {
            source_path,
            pages: vec![ExtractedPage {
                number: 1,
                text,
                method,
            }],
            paginated: false,
        }
    }

    pub fn text(&self) -> String {
        if !self.paginated {
            return self
                .pages
                .iter()
                .map(|page| page.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut text = String::new();
        for page in &self.pages {
            text.push_str(&format!("\n--- Page {} ---\n", page.number));
            text.push_str(&page.text);
        }
        text
    }

    pub fn trimmed_len(&self) -> usize {
        self.pages
            .iter()
            .map(|page| page.text.trim().chars().count())
            .sum()
    }

    pub fn is_effectively_empty(&self) -> bool {
        self.trimmed_len() < MIN_DOCUMENT_CHARS
    }
}

/// Result of a successful extraction. `Empty` means the file was readable
/// but held no recoverable text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(ExtractedDocument),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub tags: Vec<String>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub final_path: PathBuf,
    pub original_filename: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMetadata {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexRecord {
    pub content: String,
    pub metadata: IndexMetadata,
}

impl IndexRecord {
    pub fn document(content: String, source: String, category: String, tags: Vec<String>) -> Self {
        Self {
            content,
            metadata: IndexMetadata {
                source,
                kind: "document".to_string(),
                category,
                tags,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueryFilter {
    pub sectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryQuery {
    pub query: String,
    #[serde(rename = "topK")]
    pub top_k: usize,
    pub filter: QueryFilter,
}

impl MemoryQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: 3,
            filter: QueryFilter {
                sectors: ["episodic", "semantic", "reflective"]
                    .iter()
                    .map(|sector| sector.to_string())
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MemoryMatch {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub similarity: f64,
}

impl MemoryMatch {
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown")
    }

    pub fn category(&self) -> &str {
        self.metadata
            .get("category")
            .and_then(|value| value.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub matches: Vec<MemoryMatch>,
}

/// What happened to one file. Every per-file pipeline run ends in exactly one
/// of these; none of them stops the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ignored,
    Unsupported { extension: String },
    ExtractionFailed { reason: String },
    NothingToIngest,
    FilingFailed { reason: String },
    Filed {
        entry: VaultEntry,
        classification: Classification,
        indexed: bool,
    },
}

impl IngestOutcome {
    pub fn is_filed(&self) -> bool {
        matches!(self, IngestOutcome::Filed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub stabilization_delay: Duration,
    pub dedupe_window: Duration,
    pub debounce: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stabilization_delay: Duration::from_secs(2),
            dedupe_window: Duration::from_secs(10),
            debounce: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str, method: ExtractionMethod) -> ExtractedPage {
        ExtractedPage {
            number,
            text: text.to_string(),
            method,
        }
    }

    #[test]
    fn paginated_text_carries_page_headers() {
        let document = ExtractedDocument {
            source_path: PathBuf::from("invoice.pdf"),
            pages: vec![
                page(1, "first", ExtractionMethod::Native),
                page(2, "second", ExtractionMethod::Ocr),
            ],
            paginated: true,
        };

        assert_eq!(
            document.text(),
            "\n--- Page 1 ---\nfirst\n--- Page 2 ---\nsecond"
        );
    }

    #[test]
    fn whitespace_only_document_is_effectively_empty() {
        let document = ExtractedDocument::single(
            PathBuf::from("blank.txt"),
            "   \n  tiny  \n".to_string(),
            ExtractionMethod::Native,
        );
        assert!(document.is_effectively_empty());

        let document = ExtractedDocument::single(
            PathBuf::from("note.txt"),
            "ten chars!".to_string(),
            ExtractionMethod::Native,
        );
        assert!(!document.is_effectively_empty());
    }

    #[test]
    fn index_record_serializes_type_field() -> Result<(), serde_json::Error> {
        let record = IndexRecord::document(
            "body".to_string(),
            "/vault/Finance/a.pdf".to_string(),
            "Finance".to_string(),
            vec!["invoice".to_string()],
        );
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["metadata"]["type"], "document");
        assert_eq!(value["metadata"]["source"], "/vault/Finance/a.pdf");
        Ok(())
    }

    #[test]
    fn memory_match_falls_back_on_missing_metadata() -> Result<(), serde_json::Error> {
        let response: QueryResponse =
            serde_json::from_str(r#"{"matches":[{"content":"hello"}]}"#)?;
        let hit = &response.matches[0];
        assert_eq!(hit.source(), "unknown");
        assert_eq!(hit.category(), "General");
        assert_eq!(hit.similarity, 0.0);
        Ok(())
    }

    #[test]
    fn memory_query_uses_camel_case_top_k() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(MemoryQuery::new("resume skills"))?;
        assert_eq!(value["topK"], 3);
        assert_eq!(value["filter"]["sectors"][0], "episodic");
        Ok(())
    }
}
