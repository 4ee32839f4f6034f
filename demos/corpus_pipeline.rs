use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::FmtSubscriber;

use corpusmith::{
    ChangeLedger, DirectoryCorpus, EmbeddingProvider, HashEmbeddingProvider, IndexPipeline,
    PipelineConfig, RagError, RetrievalService, SearchFilter, SqliteVectorIndex,
};

#[tokio::main]
async fn main() -> Result<(), RagError> {
    init_tracing();

    let corpus_dir = env::var("CORPUS_DIR").unwrap_or_else(|_| "./corpus".to_string());
    let ledger_path = env::var("CORPUS_LEDGER")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./corpus_ledger.json"));
    let db_path = env::var("CORPUS_DB").unwrap_or_else(|_| "./corpus_index.sqlite".to_string());
    let query = env::var("CORPUS_QUERY").ok();
    let top_k = env::var("CORPUS_TOP_K")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(5);

    let embedder = Arc::new(HashEmbeddingProvider::default());
    let backend = Arc::new(
        SqliteVectorIndex::open(&db_path, embedder.id(), embedder.dimensions()).await?,
    );

    let pipeline = IndexPipeline::new(
        DirectoryCorpus::new(&corpus_dir),
        ChangeLedger::new(&ledger_path),
        Arc::clone(&backend),
        embedder.clone(),
        PipelineConfig::default(),
    )?;

    let start = Instant::now();
    let summary = pipeline.run().await?;
    let elapsed = start.elapsed();

    println!("\n✅ Indexing run complete!");
    println!("  documents scanned : {}", summary.scanned);
    println!("  unchanged         : {}", summary.unchanged);
    println!(
        "  processed         : {} ({} new, {} changed)",
        summary.processed, summary.new_documents, summary.changed_documents
    );
    println!("  chunks written    : {}", summary.chunks_written);
    println!("  chunks skipped    : {}", summary.chunks_skipped);
    println!("  failures          : {}", summary.failures.len());
    for failure in &summary.failures {
        println!("    - {} [{}]: {}", failure.id, failure.stage, failure.reason);
    }
    println!("  duration          : {:.2?}", elapsed);
    println!("  ledger            : {}", ledger_path.display());
    println!("  sqlite database   : {}", db_path);

    if let Some(query) = query {
        let service = RetrievalService::new(backend, embedder);
        let result = service
            .retrieve(&query, top_k, &SearchFilter::default())
            .await?;
        println!("\nTop {} hits for \"{}\":", top_k, query);
        if result.is_empty() {
            println!("  (no indexed context yet)");
        }
        for hit in &result.hits {
            let preview: String = hit.text.chars().take(80).collect();
            println!(
                "  {:.4}  {} [{}]  {}",
                hit.score, hit.source_id, hit.section_path, preview
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
