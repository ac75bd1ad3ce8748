use crate::error::ExtractError;
use crate::models::{
    ExtractedDocument, ExtractedPage, Extraction, ExtractionMethod, MIN_NATIVE_PAGE_CHARS,
};
use crate::ocr::{PdftoppmRenderer, TesseractOcr};
use crate::traits::{Extractor, OcrEngine, PageRenderer, PdfTextSource};
use async_trait::async_trait;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PageDocument,
    RasterImage,
    PlainText,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(FileKind::PageDocument),
            "png" | "jpg" | "jpeg" => Ok(FileKind::RasterImage),
            "txt" | "md" | "py" | "json" => Ok(FileKind::PlainText),
            _ => Err(ExtractError::Unsupported(extension)),
        }
    }
}

/// Whether a page's native text is too thin to trust.
pub fn needs_ocr(native_text: &str) -> bool {
    native_text.trim().chars().count() < MIN_NATIVE_PAGE_CHARS
}

#[derive(Default)]
pub struct LopdfTextSource;

impl PdfTextSource for LopdfTextSource {
    fn page_texts(&self, path: &Path) -> Result<Vec<(u32, String)>, ExtractError> {
        let document =
            Document::load(path).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            // Scanned pages often have no content stream lopdf can decode.
            let text = document.extract_text(&[page_no]).unwrap_or_else(|error| {
                debug!(page = page_no, %error, "no native text layer");
                String::new()
            });
            pages.push((page_no, text));
        }

        Ok(pages)
    }
}

pub struct DocumentExtractor<S, R, O> {
    text_source: S,
    renderer: R,
    ocr: O,
}

impl Default for DocumentExtractor<LopdfTextSource, PdftoppmRenderer, TesseractOcr> {
    fn default() -> Self {
        Self::new(
            LopdfTextSource,
            PdftoppmRenderer::default(),
            TesseractOcr::default(),
        )
    }
}

impl<S, R, O> DocumentExtractor<S, R, O>
where
    S: PdfTextSource + Send + Sync,
    R: PageRenderer + Send + Sync,
    O: OcrEngine + Send + Sync,
{
    pub fn new(text_source: S, renderer: R, ocr: O) -> Self {
        Self {
            text_source,
            renderer,
            ocr,
        }
    }

    async fn extract_pages(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let native_pages = self.text_source.page_texts(path)?;
        if native_pages.is_empty() {
            return Err(ExtractError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        let scratch = tempfile::tempdir()?;
        let mut pages = Vec::with_capacity(native_pages.len());

        for (number, native) in native_pages {
            if !needs_ocr(&native) {
                pages.push(ExtractedPage {
                    number,
                    text: native,
                    method: ExtractionMethod::Native,
                });
                continue;
            }

            info!(page = number, path = %path.display(), "page looks scanned, running OCR");
            let image = self
                .renderer
                .render_page(path, number, scratch.path())
                .await?;
            let text = self.ocr.recognize(&image).await?;
            pages.push(ExtractedPage {
                number,
                text,
                method: ExtractionMethod::Ocr,
            });
        }

        Ok(ExtractedDocument {
            source_path: path.to_path_buf(),
            pages,
            paginated: true,
        })
    }
}

#[async_trait]
impl<S, R, O> Extractor for DocumentExtractor<S, R, O>
where
    S: PdfTextSource + Send + Sync,
    R: PageRenderer + Send + Sync,
    O: OcrEngine + Send + Sync,
{
    async fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let document = match FileKind::from_path(path)? {
            FileKind::PageDocument => self.extract_pages(path).await?,
            FileKind::RasterImage => {
                let text = self.ocr.recognize(path).await?;
                ExtractedDocument::single(path.to_path_buf(), text, ExtractionMethod::Ocr)
            }
            FileKind::PlainText => {
                let text = tokio::fs::read_to_string(path).await?;
                ExtractedDocument::single(path.to_path_buf(), text, ExtractionMethod::Native)
            }
        };

        if document.trimmed_len() == 0 {
            return Ok(Extraction::Empty);
        }

        Ok(Extraction::Text(document))
    }
}
