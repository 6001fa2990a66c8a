use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_rag_core::{
    discover_pdf_files, generate_document_id, normalize_whitespace, read_blob, relative_name,
    AppConfig, BatchSearchOutcome, CharacterNgramEmbedder, ChatCompletionFieldExtractor,
    DualIndexStore, Embedder, ExtractedData, HybridSearchEngine, IndexOptions, IndexReceipt,
    IngestionPipeline, LopdfExtractor, NoopFieldExtractor, OcrFallbackExtractor, OpenAiEmbedder,
    OpenSearchStore, QdrantStore, RankedResult, StalePolicy, StructuredFieldExtractor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Store = DualIndexStore<OpenSearchStore, QdrantStore>;
type Pipeline = IngestionPipeline<
    OcrFallbackExtractor<LopdfExtractor>,
    Arc<dyn StructuredFieldExtractor>,
    Arc<dyn Embedder>,
    Store,
>;

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file
    #[arg(long, env = "PDF_RAG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// OpenSearch base URL (overrides the config file)
    #[arg(long, env = "OPENSEARCH_URL", global = true)]
    opensearch_url: Option<String>,

    /// OpenSearch index name
    #[arg(long, env = "OPENSEARCH_INDEX", global = true)]
    opensearch_index: Option<String>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", global = true)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", global = true)]
    qdrant_collection: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the OpenSearch index and Qdrant collection if missing.
    CreateIndex {
        /// Drop and recreate both.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Extract text and structured fields without indexing; writes a snapshot to edit.
    Preview {
        /// Folder that contains PDFs recursively.
        #[arg(long, conflicts_with = "file")]
        folder: Option<PathBuf>,
        /// Individual PDF files.
        #[arg(long)]
        file: Vec<PathBuf>,
        /// Where to write the preview snapshot.
        #[arg(long)]
        out: PathBuf,
    },
    /// Index a (possibly edited) preview snapshot.
    Confirm {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        indexing: IndexingArgs,
    },
    /// Preview and confirm a folder in one go.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
        #[command(flatten)]
        indexing: IndexingArgs,
    },
    /// Hybrid vector + BM25 search.
    Search {
        /// Query text; repeat for a batch.
        #[arg(long, required = true)]
        query: Vec<String>,
        /// Blend weight: 1 is pure vector, 0 is pure lexical.
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long)]
        k_vec: Option<usize>,
        #[arg(long)]
        k_bm25: Option<usize>,
        #[arg(long)]
        top_n: Option<usize>,
        /// Drop results whose combined score is below this.
        #[arg(long)]
        min_score: Option<f64>,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Characters of chunk text shown per result.
        #[arg(long, default_value = "300")]
        preview_chars: usize,
    },
    /// Validate the configuration and print the effective settings.
    Check,
}

#[derive(clap::Args)]
struct IndexingArgs {
    /// Records per upsert call.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Keep chunks of a re-ingested document that are no longer produced.
    #[arg(long, default_value_t = false)]
    keep_stale: bool,
}

impl IndexingArgs {
    fn apply(&self, mut options: IndexOptions) -> IndexOptions {
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if self.keep_stale {
            options.stale_policy = StalePolicy::Keep;
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Check => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!(
                "embedding: {}",
                config.embedding.endpoint.as_deref().unwrap_or("local character n-grams")
            );
            println!(
                "structured fields: {}",
                config.chat.endpoint.as_deref().unwrap_or("disabled")
            );
            println!(
                "ocr fallback: {}",
                config.ocr.endpoint.as_deref().unwrap_or("disabled")
            );
            println!("configuration ok");
        }
        Command::CreateIndex { force } => {
            config.validate()?;
            let embedder = build_embedder(&config);
            let store = build_store(&config, embedder.dimensions());
            if force {
                warn!("dropping existing index and collection");
                store.keyword().delete_index().await?;
                store.vector().delete_collection().await?;
            }
            ensure_backends(&store).await?;
            println!(
                "index {} and collection ready (dims={})",
                store.keyword().index_name(),
                store.vector().vector_size()
            );
        }
        Command::Preview { folder, file, out } => {
            config.validate()?;
            let targets = collect_targets(folder.as_deref(), &file)?;
            let pipeline = build_pipeline(&config);

            let previews = preview_targets(&pipeline, targets).await;
            let failed = previews.iter().filter(|data| data.error.is_some()).count();
            tokio::fs::write(&out, serde_json::to_vec_pretty(&previews)?)
                .await
                .with_context(|| format!("cannot write {}", out.display()))?;

            for data in &previews {
                match &data.error {
                    Some(error) => println!("[error] {}: {error}", data.filename),
                    None => println!(
                        "[ok] {} ({} characters, {} fields)",
                        data.filename,
                        data.text_length.unwrap_or_default(),
                        data.structured_info.as_ref().map_or(0, |info| info.len())
                    ),
                }
            }
            println!(
                "{} file(s) previewed, {failed} failed; snapshot written to {}",
                previews.len(),
                out.display()
            );
        }
        Command::Confirm { input, indexing } => {
            config.validate()?;
            let raw = tokio::fs::read(&input)
                .await
                .with_context(|| format!("cannot read {}", input.display()))?;
            let records: Vec<ExtractedData> = serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not a preview snapshot", input.display()))?;

            let pipeline = build_pipeline(&config);
            ensure_backends(pipeline.store()).await?;
            let receipt = pipeline
                .confirm_and_index(records, indexing.apply(config.indexing))
                .await;
            print_receipt(&receipt)?;
        }
        Command::Ingest { folder, indexing } => {
            config.validate()?;
            let pipeline = build_pipeline(&config);
            ensure_backends(pipeline.store()).await?;
            let receipt = pipeline
                .ingest_folder(&folder, indexing.apply(config.indexing))
                .await?;
            print_receipt(&receipt)?;
        }
        Command::Search {
            query,
            alpha,
            k_vec,
            k_bm25,
            top_n,
            min_score,
            json,
            preview_chars,
        } => {
            config.validate()?;
            let mut template = config.search_query(query[0].clone());
            if let Some(alpha) = alpha {
                template.alpha = alpha;
            }
            if let Some(k_vec) = k_vec {
                template.k_vec = k_vec;
            }
            if let Some(k_bm25) = k_bm25 {
                template.k_bm25 = k_bm25;
            }
            if let Some(top_n) = top_n {
                template.top_n = top_n;
            }
            if min_score.is_some() {
                template.min_score = min_score;
            }

            let embedder = build_embedder(&config);
            let store = build_store(&config, embedder.dimensions());
            let engine = HybridSearchEngine::new(store, embedder);

            if query.len() == 1 {
                let results = engine.search(&template).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    print_results(&template.text, &results, preview_chars);
                }
            } else {
                let outcomes = engine.search_batch(&query, &template).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&outcomes)?);
                } else {
                    print_batch(&outcomes, preview_chars);
                }
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(url) = &cli.opensearch_url {
        config.opensearch.url = url.clone();
    }
    if let Some(index) = &cli.opensearch_index {
        config.opensearch.index_name = index.clone();
    }
    if let Some(url) = &cli.qdrant_url {
        config.qdrant.url = url.clone();
    }
    if let Some(collection) = &cli.qdrant_collection {
        config.qdrant.collection = collection.clone();
    }

    Ok(config)
}

fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    match &config.embedding.endpoint {
        Some(endpoint) => Arc::new(OpenAiEmbedder::new(
            endpoint.clone(),
            config.embedding.api_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimensions,
        )),
        None => Arc::new(CharacterNgramEmbedder {
            dimensions: config.embedding.dimensions,
        }),
    }
}

fn build_field_extractor(config: &AppConfig) -> Arc<dyn StructuredFieldExtractor> {
    match &config.chat.endpoint {
        Some(endpoint) => Arc::new(
            ChatCompletionFieldExtractor::new(
                endpoint.clone(),
                config.chat.api_key.clone(),
                config.chat.model.clone(),
            )
            .with_max_input_chars(config.chat.max_input_chars),
        ),
        None => Arc::new(NoopFieldExtractor),
    }
}

fn build_store(config: &AppConfig, dimensions: usize) -> Store {
    DualIndexStore::new(
        OpenSearchStore::new(&config.opensearch.url, &config.opensearch.index_name),
        QdrantStore::new(&config.qdrant.url, &config.qdrant.collection, dimensions),
    )
}

fn build_pipeline(config: &AppConfig) -> Pipeline {
    let embedder = build_embedder(config);
    let store = build_store(config, embedder.dimensions());
    let extractor = OcrFallbackExtractor::new(
        LopdfExtractor,
        config.ocr_endpoint(),
        config.ingestion.min_text_chars,
    );

    IngestionPipeline::new(
        extractor,
        build_field_extractor(config),
        embedder,
        store,
        config.ingestion.clone(),
    )
    .with_retry_policy(config.retry)
}

async fn ensure_backends(store: &Store) -> anyhow::Result<()> {
    tokio::try_join!(
        store.keyword().ensure_index(),
        store.vector().ensure_collection()
    )?;
    Ok(())
}

fn collect_targets(folder: Option<&Path>, files: &[PathBuf]) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut targets = Vec::new();

    if let Some(folder) = folder {
        for path in discover_pdf_files(folder) {
            targets.push((relative_name(folder, &path)?, path));
        }
    }
    for path in files {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .with_context(|| format!("{} has no file name", path.display()))?;
        targets.push((name, path.clone()));
    }

    if targets.is_empty() {
        bail!("no pdf files given; use --folder or --file");
    }
    Ok(targets)
}

/// Unreadable files become failed entries in place; the rest are previewed.
async fn preview_targets(pipeline: &Pipeline, targets: Vec<(String, PathBuf)>) -> Vec<ExtractedData> {
    let mut blobs = Vec::with_capacity(targets.len());
    let mut slots = Vec::with_capacity(targets.len());

    for (name, path) in targets {
        match read_blob(&path, name.clone()).await {
            Ok(blob) => {
                blobs.push(blob);
                slots.push(None);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable file");
                let document_id = generate_document_id(&name);
                slots.push(Some(ExtractedData::failed(
                    name,
                    document_id,
                    format!("cannot read {}: {error}", path.display()),
                )));
            }
        }
    }

    let mut extracted = pipeline.extract_preview(blobs).await.into_iter();
    slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| extracted.next()))
        .collect()
}

fn print_receipt(receipt: &IndexReceipt) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(receipt)?);
    if !receipt.failures.is_empty() {
        warn!(failures = receipt.failures.len(), "some files were not indexed");
    }
    for cleanup in &receipt.cleanup_failures {
        warn!(filename = %cleanup.filename, error = %cleanup.error, "indexed, but stale chunks remain");
    }
    println!(
        "{} chunk(s) indexed ({} without vector), {} stale removed, {} file(s) failed at {}",
        receipt.indexed_count,
        receipt.degraded_count,
        receipt.stale_removed,
        receipt.failures.len(),
        receipt.completed_at.to_rfc3339()
    );
    Ok(())
}

fn print_results(query: &str, results: &[RankedResult], preview_chars: usize) {
    println!("query: {query}");
    if results.is_empty() {
        println!("  no results");
        return;
    }

    for (rank, result) in results.iter().enumerate() {
        let record = &result.record;
        println!(
            "#{} score={:.4} (vector={:.3}, bm25={:.3}) id={}",
            rank + 1,
            result.combined_score,
            result.vector_score_norm,
            result.bm25_score_norm,
            result.id
        );
        println!(
            "  source={} pages={}-{}",
            record.filename, record.page_from, record.page_to
        );
        if let Some(org) = record.fields.get("org_name").and_then(|value| value.as_str()) {
            println!("  org={org}");
        }

        let content = normalize_whitespace(&record.text);
        let preview: String = content.chars().take(preview_chars).collect();
        let ellipsis = if content.chars().count() > preview_chars { "..." } else { "" };
        println!("  {preview}{ellipsis}");
    }
}

fn print_batch(outcomes: &[BatchSearchOutcome], preview_chars: usize) {
    for outcome in outcomes {
        match &outcome.error {
            Some(error) => println!("query: {}\n  error: {error}", outcome.query),
            None => print_results(&outcome.query, &outcome.results, preview_chars),
        }
        println!();
    }
}
