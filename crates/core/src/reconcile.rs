use crate::models::{IngestOutcome, VaultEntry};
use crate::pipeline::Pipeline;
use crate::traits::{Classifier, Extractor, KnowledgeStore};
use crate::watcher::is_ignored;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Regular files directly inside `drop_dir`, skipping hidden and sync files.
pub fn discover_drop_files(drop_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(drop_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || is_ignored(entry.path()) {
            continue;
        }
        files.push(entry.into_path());
    }

    files.sort_unstable();
    Ok(files)
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Default)]
pub struct ReconcileReport {
    pub filed: Vec<VaultEntry>,
    pub unindexed: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
    /// Shutdown arrived before every file was visited.
    pub interrupted: bool,
}

impl<X, C, K> Pipeline<X, C, K>
where
    X: Extractor + Send + Sync,
    C: Classifier + Send + Sync,
    K: KnowledgeStore + Send + Sync,
{
    /// Replays files already sitting in `drop_dir`, one after another, before
    /// live watching starts.
    pub async fn reconcile(&self, drop_dir: &Path) -> io::Result<ReconcileReport> {
        self.reconcile_until(drop_dir, std::future::pending::<()>()).await
    }

    /// Same sweep, but stops before the next file once `shutdown` resolves.
    /// The file in flight is always finished.
    pub async fn reconcile_until<F>(
        &self,
        drop_dir: &Path,
        shutdown: F,
    ) -> io::Result<ReconcileReport>
    where
        F: Future<Output = ()>,
    {
        let files = discover_drop_files(drop_dir)?;
        info!(count = files.len(), dir = %drop_dir.display(), "scanning existing files");
        tokio::pin!(shutdown);

        let mut report = ReconcileReport::default();
        for path in files {
            let stop = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                _ = std::future::ready(()) => false,
            };
            if stop {
                info!(remaining = %path.display(), "shutdown requested, startup scan cut short");
                report.interrupted = true;
                break;
            }

            let reason = match self.process(&path).await {
                IngestOutcome::Filed { entry, indexed, .. } => {
                    if !indexed {
                        report.unindexed.push(entry.final_path.clone());
                    }
                    report.filed.push(entry);
                    continue;
                }
                IngestOutcome::Ignored => "ignored".to_string(),
                IngestOutcome::Unsupported { extension } => {
                    format!("unsupported file type: {extension}")
                }
                IngestOutcome::NothingToIngest => "nothing to ingest".to_string(),
                IngestOutcome::ExtractionFailed { reason } => reason,
                IngestOutcome::FilingFailed { reason } => reason,
            };
            report.skipped.push(SkippedFile { path, reason });
        }

        info!(
            filed = report.filed.len(),
            skipped = report.skipped.len(),
            unindexed = report.unindexed.len(),
            "startup scan complete"
        );
        Ok(report)
    }
}
