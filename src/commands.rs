//! CLI command runners.
//!
//! Each `run_*` function backs one `docqa` subcommand: it drives the library,
//! prints results to stdout, and returns `anyhow::Result` so `main` can
//! report failures with context and a non-zero exit code.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::chunk;
use crate::config::{Config, Strictness};
use crate::embedding::create_embedder;
use crate::envelope::{self, FileStatus, IngestReport};
use crate::evaluate;
use crate::generation::DisabledGenerator;
use crate::index::{self, IndexState, VectorIndex};
use crate::parser;
use crate::pipeline::{self, PipelineContext};
use crate::progress::BuildProgressReporter;

/// `docqa ingest <path>`: print the ingestion envelope as JSON.
pub fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let message = envelope::ingest_bounded(path, config.ingest.max_file_bytes)
        .with_context(|| format!("Failed to ingest {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

/// `docqa chunk <path>`: parse and chunk one file without touching the index.
pub fn run_chunk(config: &Config, path: &Path) -> Result<()> {
    let text = parser::parse_file_bounded(path, config.ingest.max_file_bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let document = path.display().to_string();
    let chunks = chunk::chunk_document(&document, &text, &config.chunking)?;

    println!("{}", document);
    println!(
        "  characters: {}  chunks: {}  (size {}, overlap {}, {})",
        text.chars().count(),
        chunks.len(),
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.splitter.as_str()
    );
    println!();
    for c in &chunks {
        println!(
            "[{}] chars {}..{} ({} chars)",
            c.chunk_index,
            c.start,
            c.end,
            c.end - c.start
        );
        println!("    {}", excerpt(&c.text, 160));
    }
    Ok(())
}

/// `docqa index build`: build if absent, otherwise reuse.
pub async fn run_index_build(config: Config, progress: &dyn BuildProgressReporter) -> Result<()> {
    let ctx = open_for_retrieval(config, progress).await?;

    println!("index build");
    println!("  dir: {}", ctx.index().dir().display());
    println!("  state: {}", ctx.index_state().as_str());
    println!(
        "  action: {}",
        match (ctx.built(), ctx.index_state()) {
            (true, _) => "built",
            (false, IndexState::Stale) => "reused (stale; run `docqa index rebuild`)",
            (false, _) => "reused",
        }
    );
    print_manifest_counts(ctx.index());
    if let Some(report) = ctx.ingest_report() {
        print_failures(report);
    }

    ctx.shutdown().await;
    Ok(())
}

/// `docqa index rebuild`: delete and rebuild from the current sources.
pub async fn run_index_rebuild(config: &Config, progress: &dyn BuildProgressReporter) -> Result<()> {
    require_embedding(config)?;
    let embedder = create_embedder(&config.embedding)?;
    let (index, report) = pipeline::rebuild(config, embedder.as_ref(), progress)
        .await
        .context("Index rebuild failed")?;

    println!("index rebuild");
    println!("  dir: {}", index.dir().display());
    println!("  action: rebuilt");
    print_manifest_counts(&index);
    print_failures(&report);

    index.close().await;
    Ok(())
}

/// `docqa index status`: state, manifest and per-document counts.
pub async fn run_index_status(config: &Config) -> Result<()> {
    let dir = &config.index.dir;
    println!("index status");
    println!("  dir: {}", dir.display());

    if !dir.exists() {
        println!("  state: {} (not built)", IndexState::Fresh.as_str());
        return Ok(());
    }

    let index = VectorIndex::open(dir).await?;
    let current_hash = pipeline::current_sources(config)?
        .map(|report| index::source_hash(&report.messages, &config.chunking));
    let state = index::classify(Some(index.manifest()), current_hash.as_deref());

    let m = index.manifest();
    println!("  state: {}", state.as_str());
    println!("  model: {} ({} dims)", m.model, m.dims);
    println!(
        "  chunking: size {}, overlap {}, {}",
        m.chunk_size, m.chunk_overlap, m.splitter
    );
    println!("  created: {}", m.created_at);
    println!("  documents: {}", m.document_count);
    println!("  chunks: {}", m.chunk_count);
    println!();
    for doc in index.documents().await? {
        println!("  {}  ({} chunks, trace {})", doc.name, doc.chunk_count, doc.trace_id);
    }

    index.close().await;
    Ok(())
}

/// `docqa query "<text>"`: print the top-k chunks with scores.
pub async fn run_query(
    config: Config,
    query: &str,
    k: Option<usize>,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    let ctx = open_for_retrieval(config, progress).await?;
    let hits = ctx.retrieve(query, k).await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{}",
            i + 1,
            hit.score,
            hit.document,
            hit.chunk_index
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.text, 200));
        println!("    id: {}", hit.chunk_id);
        println!();
    }

    ctx.shutdown().await;
    Ok(())
}

/// `docqa ask "<question>"`: retrieve, generate, print the answer and sources.
pub async fn run_ask(
    config: Config,
    question: &str,
    k: Option<usize>,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    require_embedding(&config)?;
    require_generation(&config, "ask")?;
    let ctx = PipelineContext::init(config, progress).await?;
    let answer = ctx.ask(question, k).await?;

    println!("Answer:");
    println!("{}", answer.text());
    if !answer.context.is_empty() {
        println!();
        println!("Sources:");
        for hit in &answer.context {
            println!("  [{:.4}] {} #{}", hit.score, hit.document, hit.chunk_index);
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// `docqa evaluate <cases.toml>`: keyword evaluation with an accuracy summary.
pub async fn run_evaluate(
    config: Config,
    cases_path: &Path,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    let cases = evaluate::load_cases(cases_path)?;
    require_embedding(&config)?;
    require_generation(&config, "evaluate")?;
    let ctx = PipelineContext::init(config, progress).await?;
    let summary = evaluate::evaluate(&ctx, &cases).await?;

    for (i, result) in summary.results.iter().enumerate() {
        println!("Q{}: {}", i + 1, result.question);
        println!("Answer: {}", excerpt(&result.answer, 150));
        println!("Matched keywords: {:?}", result.matched);
        println!("Status: {}", if result.passed { "PASS" } else { "FAIL" });
        println!();
    }
    println!("{}", "=".repeat(40));
    println!("Passed: {}/{}", summary.passed, summary.total);
    println!("Accuracy: {:.1}%", summary.accuracy());
    println!("{}", "=".repeat(40));

    ctx.shutdown().await;
    Ok(())
}

/// Load-or-build the index for commands that never generate.
async fn open_for_retrieval(
    config: Config,
    progress: &dyn BuildProgressReporter,
) -> Result<PipelineContext> {
    require_embedding(&config)?;
    let embedder = create_embedder(&config.embedding)?;
    let ctx = PipelineContext::open_with(config, embedder, Arc::new(DisabledGenerator), progress)
        .await?;
    Ok(ctx)
}

/// Fail before any index work when no embedding provider is configured.
fn require_embedding(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("embedding is disabled; set [embedding].provider to hash, openai, ollama or local");
    }
    Ok(())
}

/// Under prompt strictness every question reaches the generator, so a
/// disabled one is reported before the index is loaded or built.
fn require_generation(config: &Config, command: &str) -> Result<()> {
    if !config.generation.is_enabled() && config.answer.strictness == Strictness::Prompt {
        bail!(
            "generation is disabled; set [generation].provider to ollama or openai to use `docqa {}`",
            command
        );
    }
    Ok(())
}

fn print_manifest_counts(index: &VectorIndex) {
    let m = index.manifest();
    println!("  model: {} ({} dims)", m.model, m.dims);
    println!("  documents: {}", m.document_count);
    println!("  chunks: {}", m.chunk_count);
}

fn print_failures(report: &IngestReport) {
    for failure in report.failures() {
        if let FileStatus::Failed { error } = &failure.status {
            eprintln!("Warning: skipped {}: {}", failure.path.display(), error);
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
