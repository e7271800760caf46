//! CLI binary for tender-extract.
//!
//! A thin shim over the library crate: maps flags to an
//! `ExtractionConfig`, wires up the default collaborators, and writes one
//! `<tender_id>.json` per processed document.

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tender_extract::{
    is_tender_text, process_document, ArtifactStore, Collaborators, EmailContext,
    ExtractionConfig, FsStore, HttpFetcher, OpenAiCompatClient, TenderRecord, TesseractOcr,
};
use tracing_subscriber::EnvFilter;

/// Documents processed concurrently when the input is a directory.
const DOC_CONCURRENCY: usize = 4;

#[derive(Parser, Debug)]
#[command(
    name = "tender-extract",
    version,
    about = "Extract structured tender records from PDF documents"
)]
struct Cli {
    /// A PDF file, or a directory of PDFs to process.
    input: PathBuf,

    /// Directory for records, raw-text artifacts, and counter state.
    #[arg(short, long, default_value = "./output")]
    out_dir: PathBuf,

    /// Email subject to scan for a tender identifier before the PDF text.
    #[arg(long)]
    subject: Option<String>,

    /// Email body to scan for a tender identifier before the PDF text.
    #[arg(long)]
    body: Option<String>,

    /// OCR language passed to tesseract.
    #[arg(long, default_value = "eng")]
    ocr_lang: String,

    /// Disable the OCR fallback even when tesseract is installed.
    #[arg(long)]
    no_ocr: bool,

    /// Disable fetching of hyperlinked documents.
    #[arg(long)]
    no_links: bool,

    /// LLM model for the refinement pass (requires an API key).
    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible endpoint base URL.
    #[arg(long, env = "LLM_BASE_URL")]
    base_url: Option<String>,

    /// API key for the refinement endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Issue timestamp identifiers when the counter store is unusable,
    /// instead of failing.
    #[arg(long)]
    allow_degraded_ids: bool,

    /// Process documents even when they do not look like tenders.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut builder = ExtractionConfig::builder()
        .ocr_language(cli.ocr_lang.clone())
        .allow_degraded_ids(cli.allow_degraded_ids);
    if let Some(model) = &cli.model {
        builder = builder.llm_model(model.clone());
    }
    if let Some(url) = &cli.base_url {
        builder = builder.llm_base_url(url.clone());
    }
    if let Some(key) = &cli.api_key {
        builder = builder.llm_api_key(key.clone());
    }
    let config = builder.build()?;

    let store: Arc<FsStore> = Arc::new(FsStore::new(&cli.out_dir));
    let mut collab = Collaborators::new(store.clone());

    if !cli.no_ocr {
        let ocr = TesseractOcr::new();
        if ocr.is_available().await {
            collab = collab.with_ocr(Arc::new(ocr));
        } else {
            eprintln!("note: tesseract not found, OCR fallback disabled");
        }
    }
    if !cli.no_links {
        collab = collab.with_fetcher(Arc::new(
            HttpFetcher::new(config.fetch_timeout_secs).context("building HTTP fetcher")?,
        ));
    }
    if let Some(llm) = OpenAiCompatClient::from_config(&config) {
        collab = collab.with_llm(Arc::new(llm));
    }

    let email = match (&cli.subject, &cli.body) {
        (None, None) => None,
        (subject, body) => Some(EmailContext {
            subject: subject.clone().unwrap_or_default(),
            body: body.clone().unwrap_or_default(),
        }),
    };

    let pdfs = collect_pdfs(&cli.input)?;
    anyhow::ensure!(!pdfs.is_empty(), "no PDF files found at {:?}", cli.input);

    let records_dir = cli.out_dir.join("extracted");
    std::fs::create_dir_all(&records_dir)
        .with_context(|| format!("creating {records_dir:?}"))?;

    // One pipeline instance per document, a few in flight at a time.
    // Identifier uniqueness holds regardless — the counter serialises
    // itself through the store lock.
    let outcomes: Vec<Result<Option<String>>> = stream::iter(&pdfs)
        .map(|path| {
            let collab = &collab;
            let config = &config;
            let store = &store;
            let email = email.as_ref();
            let records_dir = &records_dir;
            let force = cli.force || email.is_some();
            async move {
                process_one(path, email, collab, config, store, records_dir, force).await
            }
        })
        .buffer_unordered(DOC_CONCURRENCY)
        .collect()
        .await;

    let mut processed = 0usize;
    let mut skipped = 0usize;
    for outcome in outcomes {
        match outcome? {
            Some(line) => {
                println!("{line}");
                processed += 1;
            }
            None => skipped += 1,
        }
    }

    eprintln!("done: {processed} processed, {skipped} skipped");
    Ok(())
}

/// Process one PDF; returns a summary line, or `None` when skipped as a
/// non-tender document.
async fn process_one(
    path: &Path,
    email: Option<&EmailContext>,
    collab: &Collaborators,
    config: &ExtractionConfig,
    store: &Arc<FsStore>,
    records_dir: &Path,
    force: bool,
) -> Result<Option<String>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {path:?}"))?;
    let source_ref = path.display().to_string();

    let record = process_document(&bytes, &source_ref, email, collab, config).await?;

    if !force && !looks_like_tender(&record, store).await {
        eprintln!("skipping (not a tender): {source_ref}");
        return Ok(None);
    }

    let out_path = records_dir.join(format!("{}.json", record.tender_id.value));
    tokio::fs::write(&out_path, record.to_json()?)
        .await
        .with_context(|| format!("writing {out_path:?}"))?;

    Ok(Some(format!(
        "{} ← {} ({} candidates{})",
        record.tender_id.value,
        source_ref,
        record.candidates.len(),
        if record.degraded.is_clean() {
            ""
        } else {
            ", degraded"
        }
    )))
}

/// Keyword check over the persisted raw text. Unreadable documents pass —
/// a failed recovery is a degraded record, not evidence of irrelevance.
async fn looks_like_tender(record: &TenderRecord, store: &Arc<FsStore>) -> bool {
    let Some(key) = record.raw_text_artifact.as_deref() else {
        return true;
    };
    match store.read(key).await {
        Ok(Some(bytes)) => is_tender_text(&String::from_utf8_lossy(&bytes)),
        _ => true,
    }
}

fn collect_pdfs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    anyhow::ensure!(input.is_dir(), "input {:?} does not exist", input);
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("reading directory {input:?}"))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    Ok(pdfs)
}
