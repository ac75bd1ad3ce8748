pub mod classifier;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod reconcile;
pub mod traits;
pub mod vault;
pub mod watcher;

pub use classifier::{
    classify_or_default, parse_classification, GeminiClassifier, DEFAULT_GEMINI_ENDPOINT,
    DEFAULT_GEMINI_MODEL,
};
pub use error::{ClassifyError, ExtractError, FilingError, StoreError};
pub use extractor::{needs_ocr, DocumentExtractor, FileKind, LopdfTextSource};
pub use knowledge::{format_match, index_document, OpenMemoryClient, DEFAULT_OPENMEMORY_URL};
pub use models::{
    Classification, ExtractedDocument, ExtractedPage, Extraction, ExtractionMethod, IndexMetadata,
    IndexRecord, IngestEvent, IngestEventKind, IngestOutcome, MemoryMatch, MemoryQuery,
    PipelineOptions, QueryFilter, VaultEntry,
};
pub use ocr::{PdftoppmRenderer, TesseractOcr, DEFAULT_RENDER_DPI};
pub use pipeline::Pipeline;
pub use reconcile::{discover_drop_files, ReconcileReport, SkippedFile};
pub use traits::{Classifier, Extractor, KnowledgeStore, OcrEngine, PageRenderer, PdfTextSource};
pub use vault::VaultFiler;
pub use watcher::{is_ignored, DropWatcher};
