//! Pipeline lifecycle: load-or-build the index once, then answer questions.
//!
//! ```rust,no_run
//! # async fn demo() -> docqa::error::Result<()> {
//! use docqa::config::Config;
//! use docqa::pipeline::PipelineContext;
//! use docqa::progress::NoProgress;
//!
//! let ctx = PipelineContext::init(Config::default(), &NoProgress).await?;
//! let answer = ctx.ask("What is RAG?", None).await?;
//! println!("{}", answer.text());
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, Strictness};
use crate::embedding::{create_embedder, Embedder};
use crate::envelope::{self, IngestReport};
use crate::error::{RagError, Result};
use crate::generation::{create_generator, Generator};
use crate::index::{self, BuildOptions, IndexState, LoadedIndex, VectorIndex};
use crate::models::RetrievedChunk;
use crate::progress::BuildProgressReporter;
use crate::prompt;
use crate::retriever::Retriever;
use crate::sources;

/// Reply returned in place of a generated answer when the context cannot
/// support one.
pub const NO_ANSWER: &str = "I don't know.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Generated(String),
    InsufficientContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub outcome: AnswerOutcome,
    pub context: Vec<RetrievedChunk>,
}

impl Answer {
    pub fn text(&self) -> &str {
        match &self.outcome {
            AnswerOutcome::Generated(text) => text,
            AnswerOutcome::InsufficientContext => NO_ANSWER,
        }
    }
}

/// Everything needed to answer questions, built explicitly at startup.
pub struct PipelineContext {
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    index: VectorIndex,
    state: IndexState,
    built: bool,
    ingest: Option<IngestReport>,
}

pub fn build_options(config: &Config) -> BuildOptions {
    BuildOptions {
        dir: config.index.dir.clone(),
        chunking: config.chunking.clone(),
        batch_size: config.embedding.batch_size,
        rebuild_on_stale: config.index.rebuild_on_stale,
    }
}

/// Scan `[documents]` and ingest every match. Per-file failures are recorded
/// in the report; an unreadable root is an error.
pub fn ingest_sources(config: &Config) -> Result<IngestReport> {
    let files = sources::scan_documents(&config.documents)?;
    let paths: Vec<_> = files.into_iter().map(|f| f.path).collect();
    let report = envelope::ingest_many(&paths, config.ingest.max_file_bytes);
    if report.all_failed() {
        return Err(RagError::Config(format!(
            "all {} documents under {} failed to ingest",
            report.files.len(),
            config.documents.root.display()
        )));
    }
    if report.files.is_empty() {
        tracing::warn!(root = %config.documents.root.display(), "no documents matched");
    }
    Ok(report)
}

/// Sources for the startup build or staleness check.
///
/// Without an index on disk the sources are required and any failure is an
/// error. With an index present, a missing root or a source set that fails
/// entirely only disables the staleness check (`Ok(None)`), so the persisted
/// index stays usable.
pub fn current_sources(config: &Config) -> Result<Option<IngestReport>> {
    if !config.index.dir.exists() {
        return ingest_sources(config).map(Some);
    }
    if !config.documents.root.is_dir() {
        tracing::warn!(
            root = %config.documents.root.display(),
            "documents root missing; using persisted index without a staleness check"
        );
        return Ok(None);
    }
    match ingest_sources(config) {
        Ok(report) => Ok(Some(report)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "sources could not be ingested; using persisted index without a staleness check"
            );
            Ok(None)
        }
    }
}

/// Ingest the sources and replace the index unconditionally.
pub async fn rebuild(
    config: &Config,
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<(VectorIndex, IngestReport)> {
    let report = ingest_sources(config)?;
    let index =
        index::rebuild_index(&build_options(config), &report.messages, embedder, progress).await?;
    Ok((index, report))
}

impl PipelineContext {
    /// Create the configured embedder and generator, then load or build the index.
    pub async fn init(config: Config, progress: &dyn BuildProgressReporter) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::open_with(config, embedder, generator, progress).await
    }

    /// Like [`init`](Self::init) with caller-supplied backends.
    pub async fn open_with(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        progress: &dyn BuildProgressReporter,
    ) -> Result<Self> {
        let ingest = current_sources(&config)?;

        let LoadedIndex {
            index,
            state,
            built,
        } = index::ensure_index(
            &build_options(&config),
            ingest.as_ref().map(|r| r.messages.as_slice()),
            embedder.as_ref(),
            progress,
        )
        .await?;

        Ok(Self::from_parts(config, embedder, generator, index, state, built, ingest))
    }

    pub fn from_parts(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: VectorIndex,
        state: IndexState,
        built: bool,
        ingest: Option<IngestReport>,
    ) -> Self {
        Self {
            config,
            embedder,
            generator,
            index,
            state,
            built,
            ingest,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// State of the index directory at startup.
    pub fn index_state(&self) -> IndexState {
        self.state
    }

    /// True when startup embedded the sources.
    pub fn built(&self) -> bool {
        self.built
    }

    /// Ingestion report from startup, if the sources were read.
    pub fn ingest_report(&self) -> Option<&IngestReport> {
        self.ingest.as_ref()
    }

    /// Top-k chunks for `query`; `k` defaults to `retrieval.top_k`.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        let k = k.unwrap_or(self.config.retrieval.top_k);
        Retriever::new(self.embedder.as_ref(), &self.index)?
            .retrieve(query, k)
            .await
    }

    /// Retrieve context and generate a grounded answer.
    ///
    /// With `answer.strictness = "context"`, weak or missing context yields
    /// [`AnswerOutcome::InsufficientContext`] without calling the generator.
    /// Generator failures propagate; they are never turned into an answer.
    pub async fn ask(&self, question: &str, k: Option<usize>) -> Result<Answer> {
        let context = self.retrieve(question, k).await?;

        if self.config.answer.strictness == Strictness::Context {
            let best = context.first().map(|c| c.score);
            if best.map_or(true, |s| s < self.config.answer.min_score) {
                tracing::info!(?best, min_score = self.config.answer.min_score, "insufficient context");
                return Ok(Answer {
                    question: question.to_string(),
                    outcome: AnswerOutcome::InsufficientContext,
                    context,
                });
            }
        }

        let prompt = prompt::assemble(question, &context);
        tracing::debug!(
            generator = self.generator.name(),
            chunks = context.len(),
            prompt_chars = prompt.chars().count(),
            "generating answer"
        );
        let text = self.generator.generate(&prompt).await?;

        Ok(Answer {
            question: question.to_string(),
            outcome: AnswerOutcome::Generated(text),
            context,
        })
    }

    /// Release the index connection pool.
    pub async fn shutdown(self) {
        self.index.close().await;
    }
}
