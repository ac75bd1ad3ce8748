use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("page render failed: {0}")]
    Render(String),

    #[error("ocr failed: {0}")]
    Ocr(String),
}

#[derive(Debug, Error)]
pub enum FilingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("classification service returned {status}: {body}")]
    BackendResponse { status: u16, body: String },

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("malformed classification: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("knowledge store returned {status}: {body}")]
    BackendResponse { status: u16, body: String },
}
