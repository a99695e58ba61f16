use clap::{Parser, Subcommand};
use docgate::config::{self, get_config};
use docgate::document::{PdfTextExtractor, UnitBuilder};
use docgate::embedding::{EmbeddingClient, EmbeddingPipeline, EmbeddingSettings};
use docgate::graph::{GraphSettings, GroupMembershipResolver};
use docgate::index::{IndexPublisher, IndexSettings, SearchIndexService};
use docgate::logging;
use docgate::metrics::ActivityMetrics;
use docgate::pipeline::{IngestReport, IngestService};
use docgate::search::{SearchDisposition, SearchGateway, SearchMode, SearchOutcome, SearchRequest};
use docgate::throttle::ThrottledClient;
use docgate::vision::{VisionClient, VisionPipeline, VisionSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(
    name = "docgate",
    version,
    about = "Permission-trimmed PDF ingestion and search for managed search indexes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDFs from a directory into the search index.
    Ingest {
        /// Directory to scan; defaults to the configured source directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Run a security-trimmed search as the given principal.
    Search {
        /// Query text.
        query: String,
        /// Principal the results are trimmed for.
        #[arg(long)]
        user: String,
        /// Query strategy: text, vector, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Extra OData predicate conjoined with the security filter.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show index totals, or one principal's visibility with --user.
    Stats {
        /// Principal whose accessible slice to report.
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete the search index and everything in it.
    DeleteIndex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let throttle = Arc::new(ThrottledClient::from_config()?);
    match cli.command {
        Command::Ingest { dir } => run_ingest(throttle, dir).await,
        Command::Search {
            query,
            user,
            mode,
            top,
            filter,
        } => run_search(throttle, query, user, mode, top, filter).await,
        Command::Stats { user } => run_stats(throttle, user).await,
        Command::DeleteIndex => run_delete_index(throttle).await,
    }
}

async fn run_ingest(throttle: Arc<ThrottledClient>, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = get_config();
    let source = dir.unwrap_or_else(|| PathBuf::from(&config.pdf_dir));
    let shutdown = Arc::new(AtomicBool::new(false));
    install_interrupt_flag(Arc::clone(&shutdown));

    let index = Arc::new(SearchIndexService::new(
        Arc::clone(&throttle),
        IndexSettings::from_config(),
    ));
    let vision = VisionSettings::from_config().map(|settings| {
        VisionPipeline::new(Arc::new(VisionClient::new(Arc::clone(&throttle), settings)))
    });
    let embeddings = EmbeddingPipeline::new(Arc::new(EmbeddingClient::new(
        Arc::clone(&throttle),
        EmbeddingSettings::from_config(),
    )));
    let metrics = Arc::new(ActivityMetrics::new());
    let service = IngestService::new(
        Box::new(PdfTextExtractor),
        UnitBuilder::from_config()?,
        vision,
        embeddings,
        IndexPublisher::new(Arc::clone(&index), config.upload_batch_size),
        index,
        Arc::clone(&metrics),
        config.max_concurrent_documents,
        shutdown,
    );

    let report = service.run(&source).await?;
    print_ingest_report(&source, &report);
    println!("counters: {}", serde_json::to_string(&metrics.snapshot())?);
    if report.interrupted {
        anyhow::bail!("ingest interrupted before completion");
    }
    Ok(())
}

async fn run_search(
    throttle: Arc<ThrottledClient>,
    query: String,
    user: String,
    mode: SearchMode,
    top: usize,
    filter: Option<String>,
) -> anyhow::Result<()> {
    let gateway = build_gateway(throttle);
    let mut request = SearchRequest::new(query, user);
    request.mode = mode;
    request.top = top;
    request.include_total = true;
    request.extra_filter = filter;

    let outcome = gateway.search(&request).await;
    print_search_outcome(&outcome)
}

async fn run_stats(throttle: Arc<ThrottledClient>, user: Option<String>) -> anyhow::Result<()> {
    match user {
        Some(principal) => {
            let gateway = build_gateway(throttle);
            let stats = gateway.principal_statistics(&principal).await;
            println!("Visibility for {principal}");
            println!("  accessible documents  {}", stats.accessible_documents);
            println!("  accessible files      {}", stats.accessible_files);
            if stats.groups.is_empty() {
                println!("  groups                (none)");
            } else {
                let groups: Vec<&str> = stats.groups.iter().map(String::as_str).collect();
                println!("  groups                {}", groups.join(", "));
            }
        }
        None => {
            let service =
                SearchIndexService::new(Arc::clone(&throttle), IndexSettings::from_config());
            let count = service.document_count().await?;
            println!("Index '{}' holds {count} documents", service.index_name());
        }
    }
    Ok(())
}

async fn run_delete_index(throttle: Arc<ThrottledClient>) -> anyhow::Result<()> {
    let service = SearchIndexService::new(Arc::clone(&throttle), IndexSettings::from_config());
    service.delete_index().await?;
    println!("Deleted index '{}'", service.index_name());
    Ok(())
}

fn build_gateway(throttle: Arc<ThrottledClient>) -> SearchGateway {
    let config = get_config();
    let index = Arc::new(SearchIndexService::new(
        Arc::clone(&throttle),
        IndexSettings::from_config(),
    ));
    let embeddings = Arc::new(EmbeddingClient::new(
        Arc::clone(&throttle),
        EmbeddingSettings::from_config(),
    ));
    let resolver = Arc::new(GroupMembershipResolver::new(
        Arc::clone(&throttle),
        GraphSettings::from_config(),
    ));
    SearchGateway::new(
        index,
        embeddings,
        resolver,
        Arc::new(ActivityMetrics::new()),
        config.document_groups.iter().cloned().collect(),
    )
}

/// Flip the shared flag on the first interrupt so the run stops at the next
/// stage boundary.
fn install_interrupt_flag(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing the current stage");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
}

fn print_ingest_report(source: &Path, report: &IngestReport) {
    println!("Ingest of {}", source.display());
    println!("  files discovered      {}", report.files_discovered);
    println!("  files extracted       {}", report.files_extracted);
    println!("  pages read            {}", report.pages);
    println!("  text units            {}", report.text_units);
    println!("  duplicate chunks      {}", report.duplicate_chunks);
    println!("  images found          {}", report.images_found);
    println!("  images analyzed       {}", report.images_analyzed);
    println!("  image units           {}", report.image_units);
    println!("  embedded              {}", report.embedded);
    println!("  embedding failures    {}", report.embedding_failures);
    println!("  published             {}", report.upload.succeeded);
    println!("  rejected              {}", report.upload.failed);
    println!("  skipped, no embedding {}", report.upload.skipped_no_embedding);
    for error in &report.upload.errors {
        println!("  upload error: {error}");
    }
    if report.interrupted {
        println!("  run interrupted before completion");
    }
}

fn print_search_outcome(outcome: &SearchOutcome) -> anyhow::Result<()> {
    match &outcome.disposition {
        SearchDisposition::Fulfilled => {
            if let Some(total) = outcome.total_count {
                println!("{total} matching documents");
            }
            if outcome.results.is_empty() {
                println!("No results");
            }
            for (rank, hit) in outcome.results.iter().enumerate() {
                println!(
                    "{}. {} (score {:.3})",
                    rank + 1,
                    hit.id,
                    hit.score
                );
                println!(
                    "   {} page {} [{}]",
                    hit.file_name, hit.page_number, hit.content_kind
                );
                if !hit.headline.is_empty() {
                    println!("   {}", hit.headline);
                }
            }
            Ok(())
        }
        SearchDisposition::NoAccessibleGroups => {
            println!("No results: the principal holds no accessible groups");
            Ok(())
        }
        SearchDisposition::ResolutionFailed(reason) => {
            anyhow::bail!("group resolution failed: {reason}")
        }
        SearchDisposition::QueryFailed(reason) => anyhow::bail!("query failed: {reason}"),
    }
}
