use crate::{
    Classification, ClassifyError, ExtractError, Extraction, IndexRecord, MemoryMatch,
    MemoryQuery, StoreError,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Native text layer of a page-based document, one entry per page in page order.
pub trait PdfTextSource {
    fn page_texts(&self, path: &Path) -> Result<Vec<(u32, String)>, ExtractError>;
}

#[async_trait]
pub trait PageRenderer {
    /// Rasterises one page into `out_dir` and returns the image path.
    async fn render_page(
        &self,
        pdf: &Path,
        page_number: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractError>;
}

#[async_trait]
pub trait OcrEngine {
    async fn recognize(&self, image: &Path) -> Result<String, ExtractError>;
}

/// Turns a dropped file into text. Unsupported types fail with
/// [`ExtractError::Unsupported`]; readable files without text yield
/// [`Extraction::Empty`].
#[async_trait]
pub trait Extractor {
    async fn extract(&self, path: &Path) -> Result<Extraction, ExtractError>;
}

#[async_trait]
pub trait Classifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError>;
}

#[async_trait]
pub trait KnowledgeStore {
    async fn add(&self, record: &IndexRecord) -> Result<(), StoreError>;

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryMatch>, StoreError>;
}
