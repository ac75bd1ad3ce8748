//! External OCR and page rasterisation.
//!
//! Both run as child processes: `tesseract` for recognition and `pdftoppm`
//! for turning a single PDF page into a PNG that tesseract can read.

use crate::error::ExtractError;
use crate::traits::{OcrEngine, PageRenderer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_RENDER_DPI: u32 = 200;

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: Option<String>,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
        debug!(image = %image.display(), "running tesseract");

        let mut command = Command::new(&self.binary);
        command.arg(image).arg("stdout");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }

        let output = command.output().await.map_err(|error| {
            ExtractError::Ocr(format!(
                "failed to run {}: {error}",
                self.binary.display()
            ))
        })?;

        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    binary: PathBuf,
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(binary: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            binary: binary.into(),
            dpi,
        }
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new("pdftoppm", DEFAULT_RENDER_DPI)
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_page(
        &self,
        pdf: &Path,
        page_number: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractError> {
        let prefix = out_dir.join(format!("page-{page_number}"));
        let page = page_number.to_string();
        let dpi = self.dpi.to_string();

        let output = Command::new(&self.binary)
            .args(["-f", page.as_str(), "-l", page.as_str(), "-r", dpi.as_str()])
            .args(["-png", "-singlefile"])
            .arg(pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|error| {
                ExtractError::Render(format!(
                    "failed to run {}: {error}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            return Err(ExtractError::Render(format!(
                "{} exited with {} on page {page_number}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let image = prefix.with_extension("png");
        if !image.is_file() {
            return Err(ExtractError::Render(format!(
                "no image produced for page {page_number} of {}",
                pdf.display()
            )));
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tesseract_binary_is_an_ocr_error() {
        let engine = TesseractOcr::new("/nonexistent/bin/tesseract");
        let result = engine.recognize(Path::new("scan.png")).await;
        assert!(matches!(result, Err(ExtractError::Ocr(_))));
    }

    #[tokio::test]
    async fn missing_renderer_binary_is_a_render_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let renderer = PdftoppmRenderer::new("/nonexistent/bin/pdftoppm", 72);
        let result = renderer
            .render_page(Path::new("scan.pdf"), 1, dir.path())
            .await;
        assert!(matches!(result, Err(ExtractError::Render(_))));
        Ok(())
    }
}
