use crate::classifier::classify_or_default;
use crate::error::ExtractError;
use crate::extractor::FileKind;
use crate::knowledge::index_document;
use crate::models::{Extraction, IngestEvent, IngestOutcome, PipelineOptions};
use crate::traits::{Classifier, Extractor, KnowledgeStore};
use crate::vault::VaultFiler;
use crate::watcher::{is_ignored, RecentPaths};
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Extract, classify, file and index, one file at a time.
pub struct Pipeline<X, C, K> {
    extractor: X,
    classifier: C,
    store: K,
    vault: VaultFiler,
    options: PipelineOptions,
}

impl<X, C, K> Pipeline<X, C, K>
where
    X: Extractor + Send + Sync,
    C: Classifier + Send + Sync,
    K: KnowledgeStore + Send + Sync,
{
    pub fn new(
        extractor: X,
        classifier: C,
        store: K,
        vault: VaultFiler,
        options: PipelineOptions,
    ) -> Self {
        Self {
            extractor,
            classifier,
            store,
            vault,
            options,
        }
    }

    pub fn vault(&self) -> &VaultFiler {
        &self.vault
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs one file to completion. Never fails: every stage error becomes
    /// an [`IngestOutcome`] and a log line.
    pub async fn process(&self, path: &Path) -> IngestOutcome {
        info!(path = %path.display(), "processing");
        let outcome = self.process_file(path).await;
        log_outcome(path, &outcome);
        outcome
    }

    async fn process_file(&self, path: &Path) -> IngestOutcome {
        let Some(name) = path.file_name() else {
            return IngestOutcome::Ignored;
        };
        let filename = name.to_string_lossy();
        if is_ignored(path) || !path.is_file() {
            return IngestOutcome::Ignored;
        }
        if let Err(ExtractError::Unsupported(extension)) = FileKind::from_path(path) {
            return IngestOutcome::Unsupported { extension };
        }

        // Cloud-sync clients materialise files in stages.
        tokio::time::sleep(self.options.stabilization_delay).await;

        let document = match self.extractor.extract(path).await {
            Ok(Extraction::Text(document)) if !document.is_effectively_empty() => document,
            Ok(_) => return IngestOutcome::NothingToIngest,
            Err(ExtractError::Unsupported(extension)) => {
                return IngestOutcome::Unsupported { extension }
            }
            Err(error) => {
                return IngestOutcome::ExtractionFailed {
                    reason: error.to_string(),
                }
            }
        };
        let text = document.text();

        let classification = classify_or_default(&self.classifier, &text).await;
        info!(category = %classification.category, tags = ?classification.tags, "classified");

        let entry = match self.vault.file(path, &filename, &classification.category) {
            Ok(entry) => entry,
            Err(error) => {
                return IngestOutcome::FilingFailed {
                    reason: error.to_string(),
                }
            }
        };
        info!(destination = %entry.final_path.display(), "filed");

        let indexed = match index_document(
            &self.store,
            &text,
            &entry.final_path,
            &entry.category,
            &classification.tags,
        )
        .await
        {
            Ok(()) => true,
            Err(error) => {
                error!(
                    source = %entry.final_path.display(),
                    %error,
                    "indexing failed, file stays archived; re-index manually"
                );
                false
            }
        };

        IngestOutcome::Filed {
            entry,
            classification,
            indexed,
        }
    }

    /// Consumes watcher events until `shutdown` resolves or the channel closes.
    /// A file already in the pipeline when shutdown fires is finished first.
    pub async fn run<F>(&self, mut events: mpsc::Receiver<IngestEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut recent = RecentPaths::new(self.options.dedupe_window);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting files");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("watcher channel closed");
                        break;
                    }
                },
            };

            if !recent.admit(&event.path, Instant::now()) {
                info!(path = %event.path.display(), kind = ?event.kind, "duplicate trigger suppressed");
                continue;
            }

            debug!(path = %event.path.display(), kind = ?event.kind, observed_at = %event.observed_at, "ingest event");
            if self.process(&event.path).await.is_filed() {
                // The path is free again; anything showing up there next is a new arrival.
                recent.forget(&event.path);
            }
        }
    }
}

fn log_outcome(path: &Path, outcome: &IngestOutcome) {
    let path = path.display();
    match outcome {
        IngestOutcome::Ignored => debug!(%path, "ignored"),
        IngestOutcome::Unsupported { extension } => {
            warn!(%path, %extension, "unsupported file type, skipping")
        }
        IngestOutcome::ExtractionFailed { reason } => error!(%path, %reason, "read failed"),
        IngestOutcome::NothingToIngest => info!(%path, "nothing to ingest"),
        IngestOutcome::FilingFailed { reason } => error!(%path, %reason, "filing failed"),
        IngestOutcome::Filed {
            entry, indexed: true, ..
        } => info!(%path, destination = %entry.final_path.display(), "ingested"),
        IngestOutcome::Filed {
            entry,
            indexed: false,
            ..
        } => warn!(%path, destination = %entry.final_path.display(), "filed but not indexed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassifyError, StoreError};
    use crate::models::{
        Classification, ExtractedDocument, ExtractionMethod, IndexRecord, IngestEventKind,
        MemoryMatch, MemoryQuery,
    };
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FileTextExtractor;

    #[async_trait]
    impl Extractor for FileTextExtractor {
        async fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
            FileKind::from_path(path)?;
            let text = fs::read_to_string(path)?;
            if text.trim().is_empty() {
                return Ok(Extraction::Empty);
            }
            Ok(Extraction::Text(ExtractedDocument::single(
                path.to_path_buf(),
                text,
                ExtractionMethod::Native,
            )))
        }
    }

    struct FixedClassifier(Option<Classification>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> Result<Classification, ClassifyError> {
            self.0
                .clone()
                .ok_or_else(|| ClassifyError::Malformed("service unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        records: Mutex<Vec<IndexRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl KnowledgeStore for RecordingStore {
        async fn add(&self, record: &IndexRecord) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::BackendResponse {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            if let Ok(mut records) = self.records.lock() {
                records.push(record.clone());
            }
            Ok(())
        }

        async fn query(&self, _query: &MemoryQuery) -> Result<Vec<MemoryMatch>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            stabilization_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn pipeline(
        vault: &Path,
        classification: Option<Classification>,
        store: RecordingStore,
    ) -> Pipeline<FileTextExtractor, FixedClassifier, RecordingStore> {
        Pipeline::new(
            FileTextExtractor,
            FixedClassifier(classification),
            store,
            VaultFiler::new(vault),
            options(),
        )
    }

    fn finance() -> Option<Classification> {
        Some(Classification {
            category: "Finance".to_string(),
            tags: vec!["invoice".to_string(), "2024".to_string()],
        })
    }

    #[tokio::test]
    async fn text_file_is_filed_and_indexed() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("invoice.txt");
        fs::write(&source, "Invoice #42, total due 120 EUR")?;

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let outcome = pipeline.process(&source).await;

        let IngestOutcome::Filed { entry, indexed, .. } = outcome else {
            panic!("expected filed outcome, got {outcome:?}");
        };
        assert!(indexed);
        assert_eq!(entry.final_path, vault.path().join("Finance").join("invoice.txt"));
        assert!(!source.exists());

        let records = pipeline.store.records.lock().map_err(|e| e.to_string())?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "Invoice #42, total due 120 EUR");
        assert_eq!(records[0].metadata.category, "Finance");
        assert_eq!(records[0].metadata.tags, vec!["invoice", "2024"]);
        assert_eq!(
            records[0].metadata.source,
            entry.final_path.to_string_lossy()
        );
        Ok(())
    }

    #[tokio::test]
    async fn classifier_outage_still_files_under_general() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("letter.md");
        fs::write(&source, "Dear tenant, the rent changes next month.")?;

        let pipeline = pipeline(vault.path(), None, RecordingStore::default());
        let outcome = pipeline.process(&source).await;

        let IngestOutcome::Filed { entry, classification, .. } = outcome else {
            panic!("expected filed outcome, got {outcome:?}");
        };
        assert_eq!(classification, Classification::default());
        assert_eq!(entry.final_path, vault.path().join("General").join("letter.md"));
        Ok(())
    }

    #[tokio::test]
    async fn index_failure_keeps_file_moved() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("invoice.txt");
        fs::write(&source, "Invoice #43, total due 80 EUR")?;

        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let pipeline = pipeline(vault.path(), finance(), store);
        let outcome = pipeline.process(&source).await;

        let IngestOutcome::Filed { entry, indexed, .. } = outcome else {
            panic!("expected filed outcome, got {outcome:?}");
        };
        assert!(!indexed);
        assert!(entry.final_path.exists());
        assert!(!source.exists());
        Ok(())
    }

    #[tokio::test]
    async fn trivial_and_unsupported_files_stay_put() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let tiny = inbox.path().join("tiny.txt");
        let blank = inbox.path().join("blank.txt");
        let archive = inbox.path().join("backup.zip");
        fs::write(&tiny, "hi there")?;
        fs::write(&blank, "   \n")?;
        fs::write(&archive, b"PK")?;

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());

        assert_eq!(pipeline.process(&tiny).await, IngestOutcome::NothingToIngest);
        assert_eq!(pipeline.process(&blank).await, IngestOutcome::NothingToIngest);
        assert_eq!(
            pipeline.process(&archive).await,
            IngestOutcome::Unsupported {
                extension: "zip".to_string()
            }
        );
        assert!(tiny.exists() && blank.exists() && archive.exists());
        assert!(pipeline.store.records.lock().map_err(|e| e.to_string())?.is_empty());
        assert!(!vault.path().join("Finance").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_file_is_an_extraction_failure() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("latin1.txt");
        fs::write(&source, b"\xff\xfe\xfd\x00\xc3")?;

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let outcome = pipeline.process(&source).await;

        assert!(matches!(outcome, IngestOutcome::ExtractionFailed { .. }));
        assert!(source.exists());
        Ok(())
    }

    #[tokio::test]
    async fn run_suppresses_duplicate_triggers() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("notes.txt");
        fs::write(&source, "Meeting notes for the quarterly review")?;

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let (tx, rx) = mpsc::channel(8);
        tx.send(IngestEvent::new(source.clone(), IngestEventKind::Created))
            .await?;
        tx.send(IngestEvent::new(source.clone(), IngestEventKind::MovedIn))
            .await?;
        drop(tx);

        pipeline.run(rx, std::future::pending::<()>()).await;

        assert_eq!(pipeline.store.records.lock().map_err(|e| e.to_string())?.len(), 1);
        assert!(vault.path().join("Finance").join("notes.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn run_files_a_second_drop_under_the_same_name() -> Result<(), Box<dyn std::error::Error>> {
        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join("scan.txt");
        fs::write(&source, "First scan of the lease agreement")?;

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let (tx, rx) = mpsc::channel(8);
        let first_filed = vault.path().join("Finance").join("scan.txt");
        let producer = tokio::spawn({
            let source = source.clone();
            async move {
                tx.send(IngestEvent::new(source.clone(), IngestEventKind::Created))
                    .await
                    .map_err(|e| e.to_string())?;
                while !first_filed.exists() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                fs::write(&source, "Second scan of the lease agreement, signed")
                    .map_err(|e| e.to_string())?;
                tx.send(IngestEvent::new(source, IngestEventKind::Created))
                    .await
                    .map_err(|e| e.to_string())
            }
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(rx, std::future::pending::<()>()),
        )
        .await?;
        producer.await??;

        assert!(!source.exists());
        assert_eq!(fs::read_dir(vault.path().join("Finance"))?.count(), 2);
        assert_eq!(pipeline.store.records.lock().map_err(|e| e.to_string())?.len(), 2);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_name_is_still_filed() -> Result<(), Box<dyn std::error::Error>> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let inbox = tempdir()?;
        let vault = tempdir()?;
        let source = inbox.path().join(OsStr::from_bytes(b"facture-\xe9t\xe9.txt"));
        if fs::write(&source, "Invoice for the summer rental, 900 EUR").is_err() {
            // Some filesystems refuse non-UTF-8 names outright.
            return Ok(());
        }

        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let outcome = pipeline.process(&source).await;

        let IngestOutcome::Filed { entry, .. } = outcome else {
            panic!("expected filed outcome, got {outcome:?}");
        };
        assert!(!source.exists());
        assert!(entry.final_path.exists());
        assert_eq!(entry.original_filename, "facture-\u{fffd}t\u{fffd}.txt");
        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let vault = tempdir()?;
        let pipeline = pipeline(vault.path(), finance(), RecordingStore::default());
        let (_tx, rx) = mpsc::channel::<IngestEvent>(1);

        tokio::time::timeout(Duration::from_secs(5), pipeline.run(rx, async {})).await?;
        Ok(())
    }
}
