use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use magic_folder_core::{
    format_match, DocumentExtractor, DropWatcher, GeminiClassifier, IngestOutcome,
    KnowledgeStore, LopdfTextSource, MemoryQuery, OpenMemoryClient, PdftoppmRenderer, Pipeline,
    PipelineOptions, QueryFilter, TesseractOcr, VaultFiler, DEFAULT_GEMINI_ENDPOINT,
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENMEMORY_URL, DEFAULT_RENDER_DPI,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type AppPipeline = Pipeline<
    DocumentExtractor<LopdfTextSource, PdftoppmRenderer, TesseractOcr>,
    GeminiClassifier,
    OpenMemoryClient,
>;

#[derive(Parser)]
#[command(name = "magic-folder", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory that receives new documents
    #[arg(long, env = "MAGIC_FOLDER_DROP_DIR")]
    drop_dir: PathBuf,

    /// Root of the category-keyed archive
    #[arg(long, env = "MAGIC_FOLDER_VAULT_DIR")]
    vault_dir: PathBuf,

    /// Knowledge store base URL
    #[arg(long, env = "OPENMEMORY_URL", default_value = DEFAULT_OPENMEMORY_URL)]
    openmemory_url: String,

    /// Classification service base URL
    #[arg(long, env = "MAGIC_FOLDER_CLASSIFIER_URL", default_value = DEFAULT_GEMINI_ENDPOINT)]
    classifier_url: String,

    /// Classification model
    #[arg(long, env = "MAGIC_FOLDER_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    model: String,

    /// API key for the classification service
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Wait after a file shows up before reading it, in milliseconds
    #[arg(long, env = "MAGIC_FOLDER_STABILIZE_MS", default_value = "2000")]
    stabilize_ms: u64,

    /// Window in which repeat notifications for one path are dropped, in seconds
    #[arg(long, env = "MAGIC_FOLDER_DEDUPE_SECS", default_value = "10")]
    dedupe_secs: u64,

    /// Notifier debounce, in milliseconds
    #[arg(long, env = "MAGIC_FOLDER_DEBOUNCE_MS", default_value = "500")]
    debounce_ms: u64,

    /// OCR executable
    #[arg(long, env = "MAGIC_FOLDER_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// OCR language passed to tesseract (-l)
    #[arg(long, env = "MAGIC_FOLDER_OCR_LANG")]
    ocr_lang: Option<String>,

    /// PDF page rasteriser executable
    #[arg(long, env = "MAGIC_FOLDER_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// Resolution for rasterised pages
    #[arg(long, env = "MAGIC_FOLDER_RENDER_DPI", default_value_t = DEFAULT_RENDER_DPI)]
    render_dpi: u32,
}

#[derive(Subcommand)]
enum Command {
    /// File everything already in the drop directory, then watch it until Ctrl-C.
    Watch,
    /// File everything already in the drop directory and exit.
    Scan,
    /// Run a single file through the pipeline.
    Process {
        /// File to ingest
        #[arg(long)]
        file: PathBuf,
    },
    /// Query the knowledge store.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of matches to return.
        #[arg(long, default_value = "3")]
        top_k: usize,
        /// Knowledge store sectors to search.
        #[arg(long, value_delimiter = ',', default_value = "episodic,semantic,reflective")]
        sectors: Vec<String>,
    },
    /// Find an archived document by file name.
    Locate {
        /// Exact file name or part of it
        #[arg(long)]
        name: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        drop_dir = %cli.drop_dir.display(),
        vault_dir = %cli.vault_dir.display(),
        "magic-folder boot"
    );

    match &cli.command {
        Command::Watch => {
            let pipeline = build_pipeline(&cli)?;
            let shutdown = ctrl_c();
            tokio::pin!(shutdown);
            if scan(&pipeline, &cli.drop_dir, &mut shutdown).await? {
                return Ok(());
            }

            let (event_tx, event_rx) = mpsc::channel(64);
            let mut watcher =
                DropWatcher::new(&cli.drop_dir, pipeline.options().debounce, event_tx)
                    .context("failed to create watcher")?;
            watcher.watch().context("failed to watch drop directory")?;
            info!(dir = %cli.drop_dir.display(), "listening for new files, Ctrl-C to stop");

            pipeline.run(event_rx, shutdown).await;

            if let Err(error) = watcher.unwatch() {
                warn!(%error, "failed to stop watching");
            }
            info!("stopped");
        }
        Command::Scan => {
            let pipeline = build_pipeline(&cli)?;
            scan(&pipeline, &cli.drop_dir, ctrl_c()).await?;
        }
        Command::Process { file } => {
            let pipeline = build_pipeline(&cli)?;
            match pipeline.process(file).await {
                IngestOutcome::Filed {
                    entry,
                    classification,
                    indexed,
                } => println!(
                    "filed {} as [{}] tags={:?} indexed={indexed}",
                    entry.final_path.display(),
                    classification.category,
                    classification.tags
                ),
                other => println!("not filed: {other:?}"),
            }
        }
        Command::Search {
            query,
            top_k,
            sectors,
        } => {
            let store = OpenMemoryClient::new(&cli.openmemory_url)?;
            let memory_query = MemoryQuery {
                query: query.clone(),
                top_k: *top_k,
                filter: QueryFilter {
                    sectors: sectors.clone(),
                },
            };

            let matches = store.query(&memory_query).await?;
            if matches.is_empty() {
                println!("No matching memories found. Try naming the document (e.g. 'resume').");
            }
            for hit in &matches {
                println!("{}", format_match(hit));
            }
        }
        Command::Locate { name } => {
            let hits = VaultFiler::new(&cli.vault_dir).locate(name);
            if hits.is_empty() {
                println!("'{name}' not found in {}", cli.vault_dir.display());
            }
            for hit in hits {
                println!("{}", hit.display());
            }
        }
    }

    Ok(())
}

fn build_pipeline(cli: &Cli) -> anyhow::Result<AppPipeline> {
    std::fs::create_dir_all(&cli.drop_dir)
        .with_context(|| format!("failed to create {}", cli.drop_dir.display()))?;
    std::fs::create_dir_all(&cli.vault_dir)
        .with_context(|| format!("failed to create {}", cli.vault_dir.display()))?;

    if cli.api_key.is_none() {
        warn!("no classification API key set, documents will be filed under General");
    }

    let mut ocr = TesseractOcr::new(&cli.tesseract);
    if let Some(language) = &cli.ocr_lang {
        ocr = ocr.with_language(language);
    }
    let extractor = DocumentExtractor::new(
        LopdfTextSource,
        PdftoppmRenderer::new(&cli.pdftoppm, cli.render_dpi),
        ocr,
    );
    let classifier = GeminiClassifier::new(&cli.classifier_url, &cli.model, cli.api_key.clone());
    let store = OpenMemoryClient::new(&cli.openmemory_url)?;

    Ok(Pipeline::new(
        extractor,
        classifier,
        store,
        VaultFiler::new(&cli.vault_dir),
        PipelineOptions {
            stabilization_delay: Duration::from_millis(cli.stabilize_ms),
            dedupe_window: Duration::from_secs(cli.dedupe_secs),
            debounce: Duration::from_millis(cli.debounce_ms),
        },
    ))
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to wait for Ctrl-C");
    }
}

/// Sweeps the drop directory. Returns true when Ctrl-C cut the sweep short.
async fn scan(
    pipeline: &AppPipeline,
    drop_dir: &Path,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<bool> {
    let report = pipeline
        .reconcile_until(drop_dir, shutdown)
        .await
        .with_context(|| format!("failed to scan {}", drop_dir.display()))?;

    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "left in drop directory");
    }
    for path in &report.unindexed {
        warn!(path = %path.display(), "archived but not indexed");
    }

    println!(
        "{} filed, {} left in place at {}",
        report.filed.len(),
        report.skipped.len(),
        Utc::now().to_rfc3339()
    );
    if report.interrupted {
        info!("stopped during startup scan");
    }
    Ok(report.interrupted)
}
